//! On-disk representation of an sqfs archive.
//!
//! An archive consists of a superblock followed by a number of sections,
//! packed together on a byte alignment:
//!
//! * [Superblock](superblock/index.html)
//! * Datablocks & Fragments
//! * Inode Table (stored in [metadata blocks](metablock/index.html))
//! * Directory Table
//! * Fragment Table
//! * Export Table
//! * UID/GID Lookup Table
//! * Xattr Table
//!
//! All multi-byte integers are little-endian.

pub mod compression;
pub mod datablock;
pub mod inode;
pub mod metablock;
pub mod superblock;

pub const BLOCK_LOG_MIN: u16 = 12;
pub const BLOCK_LOG_MAX: u16 = 20;
pub const BLOCK_LOG_DEFAULT: u16 = 17;

pub const BLOCK_SIZE_MIN: u32 = 1 << BLOCK_LOG_MIN as u32;
pub const BLOCK_SIZE_MAX: u32 = 1 << BLOCK_LOG_MAX as u32;
pub const BLOCK_SIZE_DEFAULT: u32 = 1 << BLOCK_LOG_DEFAULT as u32;

/// Sentinel for "no block". Stored in file inodes which have no fragment.
pub const INVALID_BLOCK: u64 = !0;
