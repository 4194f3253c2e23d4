//! Cache of decompressed fragment blocks.
//!
//! Fragments pack the tail ends of many files into one shared compressed
//! block, so neighboring small files usually hit the same fragment block.
//! A handful of decompressed fragment blocks are kept around, handed out
//! as reference-counted entries.

use crate::read::ArchiveInner;
use parking_lot::Mutex;
use positioned_io::ReadAt;
use repr::datablock;
use slog::error;
use std::collections::VecDeque;
use std::sync::Arc;

pub(crate) const CACHED_FRAGMENTS: usize = 3;

/// A decompressed fragment block. If `error` is set the read failed and
/// `data` is empty.
pub(crate) struct Fragment {
    pub data: Vec<u8>,
    pub error: bool,
}

pub(crate) struct FragmentCache {
    entries: Mutex<VecDeque<(u64, Arc<Fragment>)>>,
}

impl FragmentCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(CACHED_FRAGMENTS)),
        }
    }
}

impl<R: ReadAt> ArchiveInner<R> {
    /// Look up (or read and cache) the fragment block at archive offset
    /// `block`. Dropping the returned entry releases it.
    pub(crate) fn cached_fragment(&self, block: u64, size: datablock::Size) -> Arc<Fragment> {
        let mut entries = self.fragments.entries.lock();

        if let Some(i) = entries.iter().position(|(b, _)| *b == block) {
            if let Some(hit) = entries.remove(i) {
                let fragment = hit.1.clone();
                entries.push_back(hit);
                return fragment;
            }
        }

        let block_size = self.superblock.block_size;
        let mut data = vec![0u8; block_size as usize];
        let fragment = match self.read_data(&mut data, block, size) {
            Ok(bytes) => {
                data.truncate(bytes);
                Arc::new(Fragment { data, error: false })
            }
            Err(e) => {
                error!(self.logger, "unable to read fragment block";
                    "block" => block, "error" => %e);
                Arc::new(Fragment {
                    data: Vec::new(),
                    error: true,
                })
            }
        };

        if !fragment.error {
            if entries.len() == CACHED_FRAGMENTS {
                entries.pop_front();
            }
            entries.push_back((block, fragment.clone()));
        }
        fragment
    }
}
