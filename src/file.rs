//! Regular file reads.
//!
//! A regular file is a run of contiguous compressed datablocks, optionally
//! ending in a tail packed into a shared fragment block. The on-disk size
//! of each datablock sits in a block list in the metadata stream;
//! [`read_blocklist`] turns a datablock index into its archive offset and
//! size word, leaning on the meta index so large files need not rescan
//! the list from its head. [`File::fill_pages`] is the host-facing entry
//! point: it reads the datablock (or fragment) covering one page and
//! deposits the decompressed bytes into every host page the block spans.

use crate::errors::FileError;
use crate::inode::Inode;
use crate::meta_index::read_block_indexes;
use crate::read::ArchiveInner;
use positioned_io::ReadAt;
use repr::datablock;
use slog::{error, trace};
use std::sync::Arc;

pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// A page-sized destination buffer owned by the host page cache.
///
/// The filler writes each page at most once, then marks it uptodate.
/// Dropping a page unlocks it and hands it back to the host.
pub trait Page {
    fn uptodate(&self) -> bool;
    fn error(&self) -> bool;
    /// Copy `data` into the page and zero-fill the remainder.
    fn write(&mut self, data: &[u8]);
    fn mark_uptodate(&mut self);
    fn mark_error(&mut self);
}

/// The host page cache, as seen by the filler.
pub trait PageCache {
    type Page: Page;

    /// Non-blocking attempt to take the page at `index` for filling.
    /// `None` skips readahead into that page.
    fn grab_page(&self, index: u64) -> Option<Self::Page>;
}

/// A regular file bound to its archive.
pub struct File<R> {
    pub(crate) archive: Arc<ArchiveInner<R>>,
    pub(crate) inode: Inode,
}

impl<R: ReadAt> File<R> {
    pub fn inode(&self) -> &Inode {
        &self.inode
    }

    /// Fill the host page at `index`, plus as many of its neighbors
    /// covered by the same datablock as the host will hand over.
    ///
    /// Never fails from the host's point of view: on any read error the
    /// target page is zero-filled and flagged, and always ends up
    /// unlocked.
    pub fn fill_pages<C: PageCache>(&self, pages: &C, index: u64, target: &mut C::Page) {
        let inner = &*self.archive;
        let block_size = u64::from(inner.superblock.block_size);
        let block_log = u32::from(inner.superblock.block_log);
        let shift = block_log - PAGE_SHIFT;
        let file_size = self.inode.file_size;

        trace!(inner.logger, "fill pages";
            "inode" => self.inode.inode_number,
            "page" => index,
            "start_block" => self.inode.start_block);

        if index >= (file_size + PAGE_SIZE as u64 - 1) >> PAGE_SHIFT {
            finish_page(target);
            return;
        }

        let block_index = index >> shift;
        let mask = (1u64 << shift) - 1;
        let start_page = index & !mask;
        let end_page = start_page | mask;
        let file_end = file_size >> block_log;

        if block_index < file_end || !self.inode.has_fragment() {
            // Reading a datablock from disk: the block list gives its
            // location and size.
            let mut block_list = inner.buffers.get();
            block_list.resize(PAGE_SIZE, 0);

            let (block, bsize) =
                match read_blocklist(inner, &self.inode, block_index, &mut block_list) {
                    Ok(location) => location,
                    Err(e) => {
                        error!(inner.logger, "unable to read block list";
                            "inode" => self.inode.inode_number,
                            "block_index" => block_index,
                            "error" => %e);
                        target.mark_error();
                        finish_page(target);
                        return;
                    }
                };

            if bsize.is_sparse() {
                let bytes = if block_index == file_end {
                    (file_size & (block_size - 1)) as i64
                } else {
                    block_size as i64
                };
                push_pages(pages, start_page, end_page, index, target, &[], bytes, true);
            } else {
                let mut data = inner.read_page.lock();
                match inner.read_data(&mut data, block, bsize) {
                    Ok(bytes) => {
                        push_pages(
                            pages,
                            start_page,
                            end_page,
                            index,
                            target,
                            &data[..bytes],
                            bytes as i64,
                            false,
                        );
                    }
                    Err(e) => {
                        drop(data);
                        error!(inner.logger, "unable to read data block";
                            "inode" => self.inode.inode_number,
                            "block" => block,
                            "error" => %e);
                        target.mark_error();
                        finish_page(target);
                        return;
                    }
                }
            }
        } else {
            // The tail end is packed inside a shared fragment block.
            let fragment =
                inner.cached_fragment(self.inode.fragment_block, self.inode.fragment_size);
            let bytes = (file_size & (block_size - 1)) as i64;
            let offset = self.inode.fragment_offset as usize;
            if fragment.error || offset + bytes as usize > fragment.data.len() {
                error!(inner.logger, "unable to read fragment";
                    "inode" => self.inode.inode_number,
                    "fragment_block" => self.inode.fragment_block);
                target.mark_error();
                finish_page(target);
                return;
            }
            let data = &fragment.data[offset..offset + bytes as usize];
            push_pages(pages, start_page, end_page, index, target, data, bytes, false);
        }
    }
}

/// Locate datablock `index` of `inode`: its archive offset and size word.
/// `block_list` is scratch for block-list reads and caps how many words
/// one metadata read may pull.
pub(crate) fn read_blocklist<R: ReadAt>(
    inner: &ArchiveInner<R>,
    inode: &Inode,
    index: u64,
    block_list: &mut [u8],
) -> Result<(u64, datablock::Size), FileError> {
    let reached = inner.meta_index.fill(
        inner,
        &inner.logger,
        inode,
        inner.superblock.inode_table_start,
        inner.superblock.block_log,
        block_list,
        index,
    )?;

    let mut cursor = reached.cursor;
    let mut block = reached.data_block;

    // The meta index works at a coarser granularity, so the waypoint is
    // usually short of the requested index. Walk the rest of the list.
    let mut remaining = index - reached.index;
    let max_words = (block_list.len() / 4) as u64;
    while remaining > 0 {
        let n = remaining.min(max_words) as usize;
        block += read_block_indexes(inner, block_list, n, &mut cursor)?;
        remaining -= n as u64;
    }

    read_block_indexes(inner, block_list, 1, &mut cursor)?;
    let bsize = datablock::Size(u32::from_le_bytes([
        block_list[0],
        block_list[1],
        block_list[2],
        block_list[3],
    ]));
    Ok((block, bsize))
}

/// Deposit one decompressed block into the host pages it covers. The
/// target page is always the caller's; neighbors are grabbed without
/// blocking and skipped when unavailable or already uptodate. A sparse
/// block deposits zeros only.
fn push_pages<C: PageCache>(
    pages: &C,
    start_page: u64,
    end_page: u64,
    target_index: u64,
    target: &mut C::Page,
    data: &[u8],
    mut bytes: i64,
    sparse: bool,
) {
    for i in start_page..=end_page {
        if bytes <= 0 {
            break;
        }
        let avail = if sparse {
            0
        } else {
            bytes.min(PAGE_SIZE as i64) as usize
        };
        let offset = ((i - start_page) as usize) * PAGE_SIZE;
        let chunk = if avail == 0 {
            &[][..]
        } else {
            &data[offset..offset + avail]
        };

        if i == target_index {
            if !target.uptodate() {
                target.write(chunk);
                target.mark_uptodate();
            }
        } else if let Some(mut page) = pages.grab_page(i) {
            if !page.uptodate() {
                page.write(chunk);
                page.mark_uptodate();
            }
        }

        bytes -= PAGE_SIZE as i64;
    }
}

/// Terminal page state for EOF and error paths: zero-filled, uptodate
/// unless an error was flagged first.
fn finish_page<P: Page>(page: &mut P) {
    page.write(&[]);
    if !page.error() {
        page.mark_uptodate();
    }
}
