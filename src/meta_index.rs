//! The meta index: a small cache of block-list positions for large files.
//!
//! A file's block list only stores the on-disk size of each datablock, so
//! finding datablock `n` means summing the first `n` size words. For
//! random access in large files that walk is the dominant cost. The meta
//! index caches evenly spaced waypoints along the walk: entry `k` of a
//! slot records where in the metadata stream the block list cursor stands
//! after `(offset + k) * skip * INDEXES_PER_ENTRY` datablocks, together
//! with the datablock's archive offset at that point. A later read picks
//! the nearest waypoint at or below its target and only walks the
//! remainder.
//!
//! The cache is a fixed set of slots, allocated on first use and
//! reassigned round-robin. The skip factor grows with the file so a
//! single slot can span it when possible; skip is capped so one waypoint
//! step never walks more metadata blocks than the metablock cache holds,
//! at the price of large files spreading over several slots.
//!
//! A slot is owned exclusively while it is read or grown. Ownership is a
//! held slot mutex; releasing the guard publishes the entries to the next
//! owner. Anything found locked is simply skipped: if no slot can be had,
//! callers fall back to an uncached linear walk, which is slower but
//! correct.

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, MutexGuard};
use slog::{trace, Logger};

use crate::errors::{BlockListRead, EmptySlot, FileError};
use crate::inode::Inode;
use crate::metadata::{MetaCursor, MetadataSource, CACHED_BLOCKS};
use repr::datablock;
use snafu::ResultExt;

pub(crate) const SLOT_COUNT: usize = 8;
pub(crate) const ENTRIES_PER_SLOT: usize = 127;
pub(crate) const INDEXES_PER_ENTRY: u64 = 16;

/// One cached waypoint: the metadata-stream position of the block list
/// cursor and the archive offset of the datablock it points at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct MetaEntry {
    /// Metadata block holding the cursor, relative to the start of the
    /// inode table
    pub index_block: u64,
    /// Byte offset of the cursor within that block
    pub offset: u16,
    /// Archive offset of the datablock
    pub data_block: u64,
}

pub(crate) struct SlotState {
    /// Owning file, or 0 if the slot has never been used
    pub inode_number: u32,
    /// Coarse index described by `entry[0]`
    pub offset: u64,
    /// Skip factor the entries were built with
    pub skip: u64,
    /// Number of valid entries
    pub entries: usize,
    pub entry: [MetaEntry; ENTRIES_PER_SLOT],
}

impl SlotState {
    fn new() -> Self {
        Self {
            inode_number: 0,
            offset: 0,
            skip: 0,
            entries: 0,
            entry: [MetaEntry::default(); ENTRIES_PER_SLOT],
        }
    }
}

pub(crate) type SlotGuard<'a> = MutexGuard<'a, SlotState>;

/// What a fill walk reached: a raw datablock index, and the block-list
/// cursor and datablock offset standing exactly there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FillResult {
    pub index: u64,
    pub cursor: MetaCursor,
    pub data_block: u64,
}

pub(crate) struct MetaIndex {
    /// Allocated as a unit the first time a slot is needed, never freed
    slots: OnceCell<Box<[Mutex<SlotState>]>>,
    /// Rotating eviction cursor. Doubles as the table lock: scans and
    /// cursor updates happen while it is held.
    next_slot: Mutex<usize>,
}

/// The skip factor for a file of `blocks` datablocks: how many coarse
/// units lie between consecutive slot entries. Chosen so one full slot
/// covers the file when possible, but capped so a single entry step never
/// traverses more metadata blocks than the metablock cache can hold.
pub(crate) fn calculate_skip(blocks: u64) -> u64 {
    let skip = blocks.saturating_sub(1) / ((ENTRIES_PER_SLOT as u64 + 1) * INDEXES_PER_ENTRY) + 1;
    skip.min(CACHED_BLOCKS as u64 - 1)
}

/// Read the next `n` words of a block list at `cursor`, advancing it.
/// Returns the summed on-disk span of the `n` datablocks they describe.
pub(crate) fn read_block_indexes<M: MetadataSource>(
    source: &M,
    block_list: &mut [u8],
    n: usize,
    cursor: &mut MetaCursor,
) -> Result<u64, FileError> {
    let buf = &mut block_list[..n * 4];
    *cursor = source.read_metadata(buf, *cursor).context(BlockListRead {
        block: cursor.block,
        offset: cursor.offset,
    })?;

    let mut span = 0u64;
    for word in buf.chunks_exact(4) {
        let size = datablock::Size(u32::from_le_bytes([word[0], word[1], word[2], word[3]]));
        span += u64::from(size.size());
    }
    Ok(span)
}

impl MetaIndex {
    pub fn new() -> Self {
        Self {
            slots: OnceCell::new(),
            next_slot: Mutex::new(0),
        }
    }

    /// Find a slot for `inode_number` covering a coarse index in
    /// `[low, high]`. Of all matches the one closest to `high` is
    /// returned, held. Locked slots are invisible to the scan.
    pub(crate) fn locate(&self, inode_number: u32, low: u64, high: u64) -> Option<SlotGuard<'_>> {
        let slots = self.slots.get()?;
        let _table = self.next_slot.lock();

        let mut low = low;
        let mut found = None;
        for slot in slots.iter() {
            if let Some(state) = slot.try_lock() {
                if state.inode_number == inode_number && state.offset >= low && state.offset <= high
                {
                    low = state.offset;
                    found = Some(state);
                }
            }
        }
        found
    }

    /// Claim a free slot for `inode_number` starting at coarse index
    /// `offset`, reinitializing it. Returns it held, or `None` if every
    /// slot is currently owned. The eviction cursor advances past each
    /// probed slot either way.
    pub(crate) fn empty(&self, inode_number: u32, offset: u64, skip: u64) -> Option<SlotGuard<'_>> {
        let slots = self.slots.get_or_init(|| {
            (0..SLOT_COUNT)
                .map(|_| Mutex::new(SlotState::new()))
                .collect::<Vec<_>>()
                .into_boxed_slice()
        });
        let mut next = self.next_slot.lock();

        let mut found = None;
        for _ in 0..SLOT_COUNT {
            match slots[*next].try_lock() {
                Some(state) => {
                    found = Some(state);
                    break;
                }
                None => *next = (*next + 1) % SLOT_COUNT,
            }
        }

        let mut state = found?;
        *next = (*next + 1) % SLOT_COUNT;

        state.inode_number = inode_number;
        state.offset = offset;
        state.skip = skip;
        state.entries = 0;
        Some(state)
    }

    /// Walk the meta index toward datablock `index` of `inode`, growing
    /// cached slots along the way. Returns the nearest waypoint at or
    /// below the target: a raw datablock index together with the
    /// block-list cursor and datablock offset standing there. With no
    /// claimable slot the walk degrades to returning an earlier position
    /// (possibly the inode head) and the caller reads the rest linearly.
    pub fn fill<M: MetadataSource>(
        &self,
        source: &M,
        logger: &Logger,
        inode: &Inode,
        inode_table_start: u64,
        block_log: u16,
        block_list: &mut [u8],
        index: u64,
    ) -> Result<FillResult, FileError> {
        let skip = calculate_skip(inode.file_size >> block_log);
        let target = index / (INDEXES_PER_ENTRY * skip);
        let max_words = (block_list.len() / 4) as u64;

        let mut cursor = MetaCursor {
            block: inode.block_list_start,
            offset: inode.offset,
        };
        let mut data_block = inode.start_block;
        let mut pos = 0u64;

        while pos < target {
            let mut slot = match self.locate(inode.inode_number, pos + 1, target) {
                Some(slot) => {
                    if slot.entries == 0 {
                        return EmptySlot {
                            inode_number: inode.inode_number,
                        }
                        .fail();
                    }
                    let nearest = target.min(slot.offset + slot.entries as u64 - 1);
                    let entry = slot.entry[(nearest - slot.offset) as usize];
                    cursor = MetaCursor {
                        block: entry.index_block + inode_table_start,
                        offset: entry.offset,
                    };
                    data_block = entry.data_block;
                    pos = nearest;
                    trace!(logger, "meta index hit";
                        "inode" => inode.inode_number,
                        "pos" => pos,
                        "slot_offset" => slot.offset,
                        "entries" => slot.entries);
                    slot
                }
                None => match self.empty(inode.inode_number, pos + 1, skip) {
                    Some(slot) => slot,
                    None => {
                        trace!(logger, "meta index exhausted, walking linearly";
                            "inode" => inode.inode_number, "pos" => pos);
                        break;
                    }
                },
            };

            // Grow the slot up to the target or its capacity, whichever
            // comes first. Past capacity, the next loop iteration claims
            // a further slot.
            let mut i = slot.offset + slot.entries as u64;
            while i <= target && i < slot.offset + ENTRIES_PER_SLOT as u64 {
                let mut blocks = skip * INDEXES_PER_ENTRY;
                while blocks > 0 {
                    let n = blocks.min(max_words);
                    data_block += read_block_indexes(source, block_list, n as usize, &mut cursor)?;
                    blocks -= n;
                }

                let entries = slot.entries;
                slot.entry[entries] = MetaEntry {
                    index_block: cursor.block - inode_table_start,
                    offset: cursor.offset,
                    data_block,
                };
                slot.entries += 1;
                pos = i;
                i += 1;
            }
        }

        Ok(FillResult {
            index: pos * INDEXES_PER_ENTRY * skip,
            cursor,
            data_block,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::MetablockError;
    use repr::INVALID_BLOCK;
    use std::cell::Cell;

    /// Serves a raw block list as the metadata stream. Stream positions
    /// are plain byte offsets: `block` is the absolute position, `base`
    /// is where the served bytes begin.
    struct FakeSource {
        base: u64,
        bytes: Vec<u8>,
        reads: Cell<usize>,
        fail_after: Cell<usize>,
    }

    impl FakeSource {
        fn new(base: u64, bytes: Vec<u8>) -> Self {
            Self {
                base,
                bytes,
                reads: Cell::new(0),
                fail_after: Cell::new(usize::max_value()),
            }
        }

        fn uniform_blocklist(base: u64, blocks: usize, word: u32) -> Self {
            let mut bytes = Vec::with_capacity(blocks * 4);
            for _ in 0..blocks {
                bytes.extend_from_slice(&word.to_le_bytes());
            }
            Self::new(base, bytes)
        }
    }

    impl MetadataSource for FakeSource {
        fn read_metadata(
            &self,
            dest: &mut [u8],
            cursor: MetaCursor,
        ) -> Result<MetaCursor, MetablockError> {
            if self.reads.get() >= self.fail_after.get() {
                return Err(MetablockError::from(std::io::Error::from(
                    std::io::ErrorKind::UnexpectedEof,
                )));
            }
            self.reads.set(self.reads.get() + 1);

            let pos = (cursor.block - self.base) as usize + usize::from(cursor.offset);
            let end = pos + dest.len();
            assert!(end <= self.bytes.len(), "read past end of fake stream");
            dest.copy_from_slice(&self.bytes[pos..end]);
            Ok(MetaCursor {
                block: self.base + end as u64,
                offset: 0,
            })
        }
    }

    fn logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn inode(inode_number: u32, blocks: u64, block_log: u16, base: u64) -> Inode {
        Inode {
            inode_number,
            file_size: blocks << block_log,
            block_list_start: base,
            offset: 0,
            start_block: 96,
            fragment_block: INVALID_BLOCK,
            fragment_size: datablock::Size::ZERO,
            fragment_offset: 0,
        }
    }

    #[test]
    fn skip_is_clamped_and_monotonic() {
        assert_eq!(calculate_skip(0), 1);
        assert_eq!(calculate_skip(1), 1);
        assert_eq!(calculate_skip(2048), 1);
        assert_eq!(calculate_skip(2049), 2);
        assert_eq!(calculate_skip(1 << 40), CACHED_BLOCKS as u64 - 1);

        let mut last = 0;
        for blocks in (0..1 << 16).step_by(97) {
            let skip = calculate_skip(blocks);
            assert!(skip >= last);
            last = skip;
        }
    }

    #[test]
    fn block_indexes_sum_spans_and_advance() {
        let words = [
            datablock::Size::new(1024, true).0,
            0,
            datablock::Size::new(768, false).0,
        ];
        let mut bytes = Vec::new();
        for w in &words {
            bytes.extend_from_slice(&w.to_le_bytes());
        }
        let source = FakeSource::new(0, bytes);

        let mut buf = vec![0u8; 64];
        let mut cursor = MetaCursor { block: 0, offset: 0 };
        let span = read_block_indexes(&source, &mut buf, 3, &mut cursor).unwrap();
        // The sparse word and the flag bit contribute nothing
        assert_eq!(span, 1024 + 768);
        assert_eq!(cursor.block, 12);
    }

    #[test]
    fn fill_reaches_target_and_caches() {
        // 4096 blocks at 128KiB: skip 2, coarse unit of 32 blocks
        let ino = inode(1, 4096, 17, 0);
        assert_eq!(calculate_skip(4096), 2);
        let source = FakeSource::uniform_blocklist(0, 4096, 100);
        let index = MetaIndex::new();
        let mut block_list = vec![0u8; 4096];

        let first = index
            .fill(&source, &logger(), &ino, 0, 17, &mut block_list, 3000)
            .unwrap();
        assert_eq!(first.index, 2976);
        assert_eq!(first.data_block, 96 + 2976 * 100);
        assert_eq!(first.cursor.block, 2976 * 4);
        let cost = source.reads.get();
        assert!(cost > 0);

        // A nearby access is served entirely from the cache
        let second = index
            .fill(&source, &logger(), &ino, 0, 17, &mut block_list, 3001)
            .unwrap();
        assert_eq!(second, first);
        assert_eq!(source.reads.get(), cost);

        // So is a re-request of anything at or below the filled range
        let third = index
            .fill(&source, &logger(), &ino, 0, 17, &mut block_list, 1000)
            .unwrap();
        assert_eq!(third.index, 992);
        assert_eq!(third.data_block, 96 + 992 * 100);
        assert_eq!(source.reads.get(), cost);
    }

    #[test]
    fn fill_extends_an_existing_slot() {
        let ino = inode(1, 4096, 17, 0);
        let source = FakeSource::uniform_blocklist(0, 4096, 100);
        let index = MetaIndex::new();
        let mut block_list = vec![0u8; 4096];

        index
            .fill(&source, &logger(), &ino, 0, 17, &mut block_list, 1000)
            .unwrap();
        let cost = source.reads.get();

        // Growing from coarse 31 to 93 costs only the delta
        index
            .fill(&source, &logger(), &ino, 0, 17, &mut block_list, 3000)
            .unwrap();
        assert_eq!(source.reads.get(), cost + 62);
    }

    #[test]
    fn reads_are_capped_by_the_scratch_buffer() {
        let ino = inode(1, 4096, 17, 0);
        let source = FakeSource::uniform_blocklist(0, 4096, 100);
        let index = MetaIndex::new();
        // 16 words per read; each coarse step covers 32 blocks
        let mut block_list = vec![0u8; 64];

        index
            .fill(&source, &logger(), &ino, 0, 17, &mut block_list, 320)
            .unwrap();
        // 10 coarse steps, two reads each
        assert_eq!(source.reads.get(), 20);
    }

    #[test]
    fn entries_are_written_relative_to_the_inode_table() {
        let base = 10_000;
        let ino = inode(1, 4096, 17, base);
        let source = FakeSource::uniform_blocklist(base, 4096, 100);
        let index = MetaIndex::new();
        let mut block_list = vec![0u8; 4096];

        let reached = index
            .fill(&source, &logger(), &ino, base, 17, &mut block_list, 3000)
            .unwrap();
        assert_eq!(reached.cursor.block, base + 2976 * 4);

        let slot = index.locate(1, 1, u64::max_value()).unwrap();
        assert_eq!(slot.entry[0].index_block, 32 * 4);

        // Entries are strictly monotonic in both stream position and
        // datablock offset
        for pair in slot.entry[..slot.entries].windows(2) {
            assert!(pair[0].data_block < pair[1].data_block);
            assert!((pair[0].index_block, pair[0].offset) < (pair[1].index_block, pair[1].offset));
        }
    }

    #[test]
    fn large_files_span_disjoint_slots() {
        // skip capped at 7: coarse unit of 112 blocks, > 127 entries needed
        let ino = inode(1, 20_000, 12, 0);
        assert_eq!(calculate_skip(20_000), 7);
        let source = FakeSource::uniform_blocklist(0, 20_000, 50);
        let index = MetaIndex::new();
        let mut block_list = vec![0u8; 4096];

        let reached = index
            .fill(&source, &logger(), &ino, 0, 12, &mut block_list, 19_000)
            .unwrap();
        assert_eq!(reached.index, 169 * 112);

        let slots = index.slots.get().unwrap();
        let mut ranges = Vec::new();
        for slot in slots.iter() {
            let state = slot.try_lock().unwrap();
            if state.inode_number == 1 && state.entries > 0 {
                assert!(state.entries <= ENTRIES_PER_SLOT);
                ranges.push((state.offset, state.offset + state.entries as u64));
            }
        }
        ranges.sort_unstable();
        assert_eq!(ranges, vec![(1, 128), (128, 170)]);
    }

    #[test]
    fn exhausted_table_degrades_to_a_linear_walk() {
        let ino = inode(1, 4096, 17, 0);
        let source = FakeSource::uniform_blocklist(0, 4096, 100);
        let index = MetaIndex::new();
        let mut block_list = vec![0u8; 4096];

        let held: Vec<_> = (0..SLOT_COUNT)
            .map(|i| index.empty(90 + i as u32, 1, 1).unwrap())
            .collect();

        // Every slot is owned elsewhere: the walk makes no progress but
        // stays correct, reporting the inode head
        let reached = index
            .fill(&source, &logger(), &ino, 0, 17, &mut block_list, 3000)
            .unwrap();
        assert_eq!(reached.index, 0);
        assert_eq!(reached.data_block, 96);
        assert_eq!(reached.cursor, MetaCursor { block: 0, offset: 0 });
        assert_eq!(source.reads.get(), 0);

        drop(held);
        let cached = index
            .fill(&source, &logger(), &ino, 0, 17, &mut block_list, 3000)
            .unwrap();
        assert_eq!(cached.index, 2976);
    }

    #[test]
    fn located_slot_without_entries_is_corruption() {
        let ino = inode(7, 4096, 17, 0);
        let source = FakeSource::uniform_blocklist(0, 4096, 100);
        let index = MetaIndex::new();
        let mut block_list = vec![0u8; 4096];

        // A slot claimed for this file but never grown
        drop(index.empty(7, 1, 2));

        let err = index
            .fill(&source, &logger(), &ino, 0, 17, &mut block_list, 3000)
            .unwrap_err();
        assert!(matches!(err, FileError::EmptySlot { inode_number: 7 }));
    }

    #[test]
    fn failed_read_leaves_the_slot_released() {
        let ino = inode(1, 4096, 17, 0);
        let source = FakeSource::uniform_blocklist(0, 4096, 100);
        source.fail_after.set(5);
        let index = MetaIndex::new();
        let mut block_list = vec![0u8; 4096];

        let err = index
            .fill(&source, &logger(), &ino, 0, 17, &mut block_list, 3000)
            .unwrap_err();
        assert!(matches!(err, FileError::BlockListRead { .. }));

        // The slot was released mid-grow; its partial entries are intact
        let slot = index.locate(1, 1, u64::max_value()).unwrap();
        assert_eq!(slot.entries, 5);
    }

    #[test]
    fn eviction_cursor_rotates_past_held_slots() {
        let index = MetaIndex::new();

        let first = index.empty(101, 1, 1).unwrap();
        let second = index.empty(102, 1, 1).unwrap();
        drop(first);
        // The freed first slot is not reused until the cursor wraps
        drop(index.empty(103, 1, 1).unwrap());
        drop(second);

        let slots = index.slots.get().unwrap();
        let owners: Vec<u32> = slots
            .iter()
            .map(|s| s.try_lock().unwrap().inode_number)
            .collect();
        assert_eq!(&owners[..3], &[101, 102, 103]);
    }
}
