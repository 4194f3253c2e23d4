//! Reads from the compressed metadata stream.
//!
//! Metadata (inode tables, block lists, directory tables) is packed into
//! 8KiB blocks, compressed individually and concatenated on disk, each
//! prefixed by a `u16` header giving its on-disk size. A position in the
//! stream is therefore a pair: the archive offset of a metadata block and
//! a byte offset into that block's decompressed contents. Reads cross
//! block boundaries transparently.
//!
//! Decompressed blocks are kept in a small fixed-slot cache so that the
//! block-list walks done by the meta index hit disk once per block.

use crate::compression::Compressor;
use crate::errors::{HugeMetablock, MetablockError, OffsetPastEnd};
use parking_lot::Mutex;
use positioned_io::ReadAt;
use repr::metablock;
use snafu::ensure;

/// Number of decompressed metadata blocks kept in memory. Also caps the
/// skip factor of the meta index: one meta-index step must never traverse
/// more metadata blocks than fit here.
pub(crate) const CACHED_BLOCKS: usize = 8;

/// A position in the metadata stream: the archive offset of a metadata
/// block, and a byte offset into its decompressed contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct MetaCursor {
    pub block: u64,
    pub offset: u16,
}

/// The seam between the meta index and the metadata stream.
pub(crate) trait MetadataSource {
    /// Read `dest.len()` bytes starting at `cursor`, returning the
    /// advanced cursor.
    fn read_metadata(&self, dest: &mut [u8], cursor: MetaCursor) -> Result<MetaCursor, MetablockError>;
}

pub(crate) struct MetablockCache {
    entries: Mutex<Entries>,
}

struct Entries {
    slots: Box<[Entry]>,
    next: usize,
}

struct Entry {
    /// Archive offset of the cached block, or `INVALID_BLOCK` if unused
    block: u64,
    /// Archive offset of the block following this one
    next_block: u64,
    /// Decompressed length
    len: usize,
    data: Box<metablock::Metablock>,
}

impl MetablockCache {
    pub fn new() -> Self {
        let slots = (0..CACHED_BLOCKS)
            .map(|_| Entry {
                block: repr::INVALID_BLOCK,
                next_block: 0,
                len: 0,
                data: Box::new([0; metablock::SIZE]),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            entries: Mutex::new(Entries { slots, next: 0 }),
        }
    }

    /// Read `dest.len()` bytes of the metadata stream starting at
    /// `cursor`. Returns the cursor one past the last byte read, with the
    /// offset normalized into the following block if the read ended
    /// exactly on a block boundary.
    pub fn read<R: ReadAt>(
        &self,
        reader: &R,
        compressor: &Compressor,
        dest: &mut [u8],
        cursor: MetaCursor,
    ) -> Result<MetaCursor, MetablockError> {
        if dest.is_empty() {
            return Ok(cursor);
        }

        let mut entries = self.entries.lock();
        let mut cur = cursor;
        let mut pos = 0;
        loop {
            let idx = match entries.lookup(cur.block) {
                Some(idx) => idx,
                None => entries.load(reader, compressor, cur.block)?,
            };
            let entry = &entries.slots[idx];
            let offset = usize::from(cur.offset);
            ensure!(
                offset <= entry.len,
                OffsetPastEnd {
                    offset: cur.offset,
                    actual: entry.len,
                }
            );
            if offset == entry.len {
                cur = MetaCursor {
                    block: entry.next_block,
                    offset: 0,
                };
                continue;
            }

            let n = (entry.len - offset).min(dest.len() - pos);
            dest[pos..pos + n].copy_from_slice(&entry.data[offset..offset + n]);
            pos += n;

            if offset + n == entry.len {
                cur = MetaCursor {
                    block: entry.next_block,
                    offset: 0,
                };
            } else {
                cur.offset = (offset + n) as u16;
            }

            if pos == dest.len() {
                return Ok(cur);
            }
        }
    }
}

impl Entries {
    fn lookup(&self, block: u64) -> Option<usize> {
        self.slots.iter().position(|e| e.block == block)
    }

    /// Pull the metadata block at `block` off disk into the next cache
    /// slot, evicting whatever was there.
    fn load<R: ReadAt>(
        &mut self,
        reader: &R,
        compressor: &Compressor,
        block: u64,
    ) -> Result<usize, MetablockError> {
        let mut header = [0u8; 2];
        reader.read_exact_at(block, &mut header)?;
        let header = metablock::Header(u16::from_le_bytes(header));
        let size = usize::from(header.size());
        ensure!(size <= metablock::SIZE, HugeMetablock { actual: size });

        let idx = self.next;
        self.next = (self.next + 1) % CACHED_BLOCKS;
        let entry = &mut self.slots[idx];
        entry.block = repr::INVALID_BLOCK;

        if header.compressed() {
            let mut staging = [0u8; metablock::SIZE];
            reader.read_exact_at(block + 2, &mut staging[..size])?;
            entry.len = compressor
                .decompress(&staging[..size], &mut entry.data[..])
                .map_err(MetablockError::from)?;
        } else {
            reader.read_exact_at(block + 2, &mut entry.data[..size])?;
            entry.len = size;
        }
        entry.block = block;
        entry.next_block = block + 2 + size as u64;
        Ok(idx)
    }
}

impl<R: ReadAt> MetadataSource for crate::read::ArchiveInner<R> {
    fn read_metadata(&self, dest: &mut [u8], cursor: MetaCursor) -> Result<MetaCursor, MetablockError> {
        self.metablocks.read(&self.reader, &self.compressor, dest, cursor)
    }
}
