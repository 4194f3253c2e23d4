use crate::compression;
use crate::errors::{
    BadMagic, BadVersion, CorruptBlockSizes, DisabledCompression, OutOfRangeBlockSize, Result,
    SuperblockError, UnableToOpen, UnknownCompression, UnsupportedOption,
};
use crate::file::File;
use crate::fragment::FragmentCache;
use crate::inode::Inode;
use crate::meta_index::MetaIndex;
use crate::metadata::MetablockCache;
use crate::pool::Pool;
use parking_lot::Mutex;
use positioned_io::{RandomAccessFile, ReadAt};
use repr::superblock::Superblock;
use snafu::{ensure, ResultExt};
use std::io;
use std::path::Path;
use std::sync::Arc;
use zerocopy::FromBytes;

use slog::*;

/// A read-only compressed archive.
///
/// Cheap to share: clones of the inner state are handed to every
/// [`File`](crate::File) opened from it.
#[derive(Debug)]
pub struct Archive<R> {
    pub(crate) inner: Arc<ArchiveInner<R>>,
}

pub(crate) struct ArchiveInner<R> {
    pub(crate) reader: R,
    pub(crate) superblock: Superblock,
    pub(crate) compressor: compression::Compressor,
    pub(crate) metablocks: MetablockCache,
    pub(crate) meta_index: MetaIndex,
    /// The shared decompression target for datablock reads. Held for the
    /// full read and the copy-out to host pages.
    pub(crate) read_page: Mutex<Vec<u8>>,
    pub(crate) fragments: FragmentCache,
    pub(crate) buffers: Pool<Vec<u8>>,
    pub(crate) logger: Logger,
}

impl Archive<RandomAccessFile> {
    pub fn open<P: AsRef<Path>>(p: P) -> Result<Self> {
        Archive::open_with_logger(p, crate::default_logger())
    }

    pub fn open_with_logger<P: AsRef<Path>>(p: P, logger: Logger) -> Result<Self> {
        Self::_open_with_logger(p.as_ref(), logger)
    }

    fn _open_with_logger(path: &Path, logger: Logger) -> Result<Self> {
        let path_str = path.display().to_string();
        let logger = logger.new(o!("file" => path_str));
        let file = RandomAccessFile::open(path).context(UnableToOpen { path })?;
        Self::with_logger(file, logger)
    }
}

impl<R: ReadAt> Archive<R> {
    pub fn new(reader: R) -> Result<Self> {
        Self::with_logger(reader, crate::default_logger())
    }

    pub fn with_logger(reader: R, logger: Logger) -> Result<Self> {
        let superblock = read_superblock(&reader)?;

        let block_size = superblock.block_size;
        let block_log = superblock.block_log;
        let inode_count = superblock.inode_count;
        let compression_id = superblock.compression_id;
        let inode_table_start = superblock.inode_table_start;
        info!(logger, "Read superblock";
            "inode_count" => inode_count,
            "block_size" => block_size,
            "block_log" => block_log,
            "compression_id" => compression_id.0,
            "inode_table_start" => inode_table_start);

        let compression_kind = compression::Kind::from_id(compression_id);
        let compressor = compression_kind.decompressor();

        Ok(Self {
            inner: Arc::new(ArchiveInner {
                reader,
                superblock,
                compressor,
                metablocks: MetablockCache::new(),
                meta_index: MetaIndex::new(),
                read_page: Mutex::new(vec![0u8; block_size as usize]),
                fragments: FragmentCache::new(),
                buffers: Pool::new(num_cpus::get(), num_cpus::get() * 2),
                logger,
            }),
        })
    }

    /// Bind a host-resolved inode to this archive for reading.
    pub fn file(&self, inode: Inode) -> File<R> {
        File {
            archive: self.inner.clone(),
            inode,
        }
    }
}

fn read_superblock<R: ReadAt>(reader: &R) -> Result<Superblock, SuperblockError> {
    let mut raw = [0u8; Superblock::SIZE];
    reader.read_exact_at(0, &mut raw)?;
    let superblock = Superblock::read_from(&raw[..]).ok_or_else(|| {
        SuperblockError::from(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "short superblock",
        ))
    })?;

    let magic = superblock.magic;
    ensure!(magic == repr::superblock::MAGIC, BadMagic { magic });

    let major = superblock.version_major;
    let minor = superblock.version_minor;
    ensure!(
        (major, minor) == (repr::superblock::VERSION_MAJOR, repr::superblock::VERSION_MINOR),
        BadVersion { major, minor }
    );

    let block_size = superblock.block_size;
    let block_log = superblock.block_log;
    ensure!(
        block_size >= repr::BLOCK_SIZE_MIN
            && block_size <= repr::BLOCK_SIZE_MAX
            && block_size.is_power_of_two(),
        OutOfRangeBlockSize { actual: block_size }
    );
    ensure!(
        block_log >= repr::BLOCK_LOG_MIN
            && block_log <= repr::BLOCK_LOG_MAX
            && (1u32 << u32::from(block_log)) == block_size,
        CorruptBlockSizes {
            block_log,
            block_size,
        }
    );

    let compression_id = superblock.compression_id;
    let compression_kind = compression::Kind::from_id(compression_id);
    ensure!(
        compression_kind != compression::Kind::Unknown,
        UnknownCompression { compression_id }
    );
    ensure!(
        compression_kind.supported(),
        DisabledCompression { compression_kind }
    );

    ensure!(
        !superblock
            .flags()
            .contains(repr::superblock::Flags::COMPRESSOR_OPTIONS),
        UnsupportedOption {
            err: "compressor options".to_string(),
        }
    );

    Ok(superblock)
}

impl<R> std::fmt::Debug for ArchiveInner<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveInner").finish()
    }
}
