//! Read path for sqfs compressed read-only archives.
//!
//! An archive stores each regular file as a run of compressed datablocks,
//! optionally followed by a tail-end packed into a shared fragment block.
//! The on-disk size of every datablock lives in a per-file block list held
//! in the compressed metadata stream, so locating datablock `n` requires
//! summing the first `n` block-list words. To keep random reads in large
//! files from rescanning the block list every time, the crate maintains a
//! fixed-size meta-index cache of block-index to disk-location mappings,
//! shared by all readers of an [`Archive`].
//!
//! The single entry point for the host is [`File::fill_pages`], which
//! decompresses one datablock (or fragment) and deposits it into
//! page-sized buffers supplied by the host page cache.

use slog::Drain;

mod compression;
mod data;
pub mod file;
mod fragment;
mod inode;
mod meta_index;
mod metadata;
mod pool;
pub mod read;

pub(crate) mod errors;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::errors::{Error, Result};
pub use crate::file::{File, Page, PageCache, PAGE_SHIFT, PAGE_SIZE};
pub use crate::inode::Inode;
pub use crate::read::Archive;
pub use repr::INVALID_BLOCK;

fn default_logger() -> slog::Logger {
    slog::Logger::root(slog_stdlog::StdLog.fuse(), slog::o!())
}
