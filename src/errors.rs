use snafu::{IntoError, Snafu};
use std::io;
use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub struct Error(ErrorInner);

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum ErrorInner {
    #[snafu(display("Unable to open {}: {}", path.display(), source))]
    UnableToOpen { path: PathBuf, source: io::Error },

    #[snafu(display("Superblock error: {}", source))]
    BadSuperblock { source: SuperblockError },
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum SuperblockError {
    #[snafu(display(
        "Magic mismatch: expected {:#x}, got {:#x}",
        repr::superblock::MAGIC,
        magic
    ))]
    BadMagic { magic: u32 },

    #[snafu(display(
        "Invalid archive version {}.{}: sqfs only supports version 4.0",
        major,
        minor
    ))]
    BadVersion { major: u16, minor: u16 },

    #[snafu(display("Unknown compression type: {}", compression_id.get()))]
    UnknownCompression {
        compression_id: repr::compression::Id,
    },

    #[snafu(display("sqfs built without support for {}", compression_kind))]
    DisabledCompression {
        compression_kind: crate::compression::Kind,
    },

    #[snafu(display("Block size ({}) invalid", actual))]
    OutOfRangeBlockSize { actual: u32 },

    #[snafu(display("Block size mismatch ({}/{})", (1u32 << *block_log as u32), block_size))]
    CorruptBlockSizes { block_log: u16, block_size: u32 },

    #[snafu(display("Unsupported option: {}", err))]
    UnsupportedOption { err: String },

    #[snafu(display("IO error: {}", source))]
    SuperblockIo { source: io::Error },
}

/// Failures while reading from the compressed metadata stream.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum MetablockError {
    #[snafu(display(
        "Metadata block size too large {} (max {})",
        actual,
        ::repr::metablock::SIZE
    ))]
    HugeMetablock { actual: usize },

    #[snafu(display("Metadata cursor offset {} past end of block ({} bytes)", offset, actual))]
    OffsetPastEnd { offset: u16, actual: usize },

    #[snafu(display("IO error: {}", source))]
    MetablockIo {
        source: io::Error,
        backtrace: snafu::Backtrace,
    },
}

/// Failures on the regular-file read path. These never surface to the
/// host: the page filler converts them into an error-filled target page.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum FileError {
    #[snafu(display("Meta index slot for inode {} has no entries", inode_number))]
    EmptySlot { inode_number: u32 },

    #[snafu(display("Fail reading block list [{:x}:{:x}]: {}", block, offset, source))]
    BlockListRead {
        block: u64,
        offset: u16,
        source: MetablockError,
    },

    #[snafu(display("Fail reading data block [{:x}:{:x}]: {}", block, size, source))]
    DataBlockIo {
        block: u64,
        size: u32,
        source: io::Error,
    },

    #[snafu(display("Data block [{:x}:{:x}] larger than block size {}", block, size, limit))]
    HugeDataBlock { block: u64, size: u32, limit: usize },

    #[snafu(display("Data block [{:x}:{:x}] decompressed to nothing", block, size))]
    EmptyDataBlock { block: u64, size: u32 },
}

impl From<SuperblockError> for ErrorInner {
    fn from(e: SuperblockError) -> Self {
        BadSuperblock.into_error(e)
    }
}

impl From<SuperblockError> for Error {
    fn from(e: SuperblockError) -> Self {
        Self(e.into())
    }
}

impl From<io::Error> for SuperblockError {
    fn from(e: io::Error) -> Self {
        SuperblockIo.into_error(e)
    }
}

impl From<io::Error> for MetablockError {
    fn from(e: io::Error) -> Self {
        MetablockIo.into_error(e)
    }
}
