//! In-memory archive images and a fake host page cache for tests.

use crate::file::{Page, PageCache, PAGE_SIZE};
use crate::read::Archive;
use positioned_io::ReadAt;
use repr::metablock;
use repr::superblock::Superblock;
use slog::{o, Logger};
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::HashSet;
use std::io;
use std::io::Write;
use std::rc::Rc;
use zerocopy::AsBytes;

/// A byte-slice reader which counts how often it touches "disk".
pub(crate) struct TestReader {
    bytes: Vec<u8>,
    reads: Cell<usize>,
}

impl TestReader {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            reads: Cell::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.get()
    }
}

impl ReadAt for TestReader {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.reads.set(self.reads.get() + 1);
        let pos = pos as usize;
        if pos >= self.bytes.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.bytes.len() - pos);
        buf[..n].copy_from_slice(&self.bytes[pos..pos + n]);
        Ok(n)
    }
}

pub(crate) fn zlib_compress(payload: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(payload).expect("compression");
    encoder.finish().expect("compression")
}

pub(crate) fn word_bytes(words: &[u32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(words.len() * 4);
    for w in words {
        bytes.extend_from_slice(&w.to_le_bytes());
    }
    bytes
}

/// Append one metadata block (header + payload) to `out`.
pub(crate) fn uncompressed_metablock(out: &mut Vec<u8>, payload: &[u8]) {
    assert!(payload.len() <= metablock::SIZE);
    let header = metablock::Header::new(payload.len() as u16, false);
    out.extend_from_slice(&header.0.to_le_bytes());
    out.extend_from_slice(payload);
}

pub(crate) fn compressed_metablock(out: &mut Vec<u8>, payload: &[u8]) {
    assert!(payload.len() <= metablock::SIZE);
    let compressed = zlib_compress(payload);
    let header = metablock::Header::new(compressed.len() as u16, true);
    out.extend_from_slice(&header.0.to_le_bytes());
    out.extend_from_slice(&compressed);
}

/// A minimal archive image: a superblock followed by whatever the test
/// appends.
pub(crate) struct Image {
    pub bytes: Vec<u8>,
}

impl Image {
    pub fn new(block_size: u32) -> Self {
        let superblock = Superblock {
            magic: repr::superblock::MAGIC,
            inode_count: 1,
            modification_time: 0,
            block_size,
            fragment_entry_count: 0,
            compression_id: repr::compression::Id::GZIP,
            block_log: block_size.trailing_zeros() as u16,
            flags: 0,
            id_count: 0,
            version_major: repr::superblock::VERSION_MAJOR,
            version_minor: repr::superblock::VERSION_MINOR,
            root_inode_ref: repr::inode::Ref(0),
            bytes_used: 0,
            id_table_start: 0,
            xattr_id_table_start: 0,
            inode_table_start: 0,
            directory_table_start: 0,
            fragment_table_start: 0,
            export_table_start: 0,
        };
        Self {
            bytes: superblock.as_bytes().to_vec(),
        }
    }

    /// Append raw bytes, returning their archive offset.
    pub fn append(&mut self, data: &[u8]) -> u64 {
        let offset = self.bytes.len() as u64;
        self.bytes.extend_from_slice(data);
        offset
    }

    /// Append one metadata block holding `payload`, returning its offset.
    pub fn append_metablock(&mut self, payload: &[u8], compressed: bool) -> u64 {
        let offset = self.bytes.len() as u64;
        if compressed {
            compressed_metablock(&mut self.bytes, payload);
        } else {
            uncompressed_metablock(&mut self.bytes, payload);
        }
        offset
    }

    /// Append `payload` as a chain of consecutive metadata blocks,
    /// returning the offset of the first.
    pub fn append_metablock_chain(&mut self, payload: &[u8], compressed: bool) -> u64 {
        let offset = self.bytes.len() as u64;
        for chunk in payload.chunks(metablock::SIZE) {
            self.append_metablock(chunk, compressed);
        }
        offset
    }

    pub fn archive(&self) -> Archive<TestReader> {
        Archive::with_logger(
            TestReader::new(self.bytes.clone()),
            Logger::root(slog::Discard, o!()),
        )
        .expect("archive opens")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PageState {
    pub data: Vec<u8>,
    pub uptodate: bool,
    pub error: bool,
}

pub(crate) struct MemPage(Rc<RefCell<PageState>>);

impl Page for MemPage {
    fn uptodate(&self) -> bool {
        self.0.borrow().uptodate
    }

    fn error(&self) -> bool {
        self.0.borrow().error
    }

    fn write(&mut self, data: &[u8]) {
        assert!(data.len() <= PAGE_SIZE);
        let mut page = self.0.borrow_mut();
        page.data = vec![0u8; PAGE_SIZE];
        page.data[..data.len()].copy_from_slice(data);
    }

    fn mark_uptodate(&mut self) {
        self.0.borrow_mut().uptodate = true;
    }

    fn mark_error(&mut self) {
        self.0.borrow_mut().error = true;
    }
}

/// A fixed run of host pages, indexed from 0. Pages on the withheld list
/// act as if another thread holds them: `grab_page` fails.
pub(crate) struct MemPageCache {
    pages: Vec<Rc<RefCell<PageState>>>,
    withheld: RefCell<HashSet<u64>>,
}

impl MemPageCache {
    pub fn new(count: usize) -> Self {
        Self {
            pages: (0..count)
                .map(|_| {
                    Rc::new(RefCell::new(PageState {
                        data: Vec::new(),
                        uptodate: false,
                        error: false,
                    }))
                })
                .collect(),
            withheld: RefCell::new(HashSet::new()),
        }
    }

    /// The target page handle a host read hook would pass in.
    pub fn page(&self, index: u64) -> MemPage {
        MemPage(self.pages[index as usize].clone())
    }

    pub fn withhold(&self, index: u64) {
        self.withheld.borrow_mut().insert(index);
    }

    pub fn state(&self, index: u64) -> Ref<'_, PageState> {
        self.pages[index as usize].borrow()
    }

    pub fn state_mut(&self, index: u64) -> RefMut<'_, PageState> {
        self.pages[index as usize].borrow_mut()
    }

    pub fn snapshot(&self, index: u64) -> PageState {
        self.state(index).clone()
    }
}

impl PageCache for MemPageCache {
    type Page = MemPage;

    fn grab_page(&self, index: u64) -> Option<MemPage> {
        if self.withheld.borrow().contains(&index) {
            return None;
        }
        self.pages.get(index as usize).map(|page| MemPage(page.clone()))
    }
}
