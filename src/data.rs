//! Reads and decompresses single datablocks.

use crate::errors::{DataBlockIo, EmptyDataBlock, FileError, HugeDataBlock};
use crate::read::ArchiveInner;
use positioned_io::ReadAt;
use repr::datablock;
use snafu::{ensure, ResultExt};

impl<R: ReadAt> ArchiveInner<R> {
    /// Read the datablock at archive offset `block` into `dest`, returning
    /// the number of decompressed bytes. `dest` must be `block_size` long.
    ///
    /// Sparse blocks never reach this point: the block list encodes them
    /// as a zero size word and the page filler materializes them without
    /// I/O.
    pub(crate) fn read_data(
        &self,
        dest: &mut [u8],
        block: u64,
        size: datablock::Size,
    ) -> Result<usize, FileError> {
        debug_assert!(!size.is_sparse());
        let on_disk = size.size() as usize;
        ensure!(
            on_disk <= dest.len(),
            HugeDataBlock {
                block,
                size: size.size(),
                limit: dest.len(),
            }
        );

        if size.uncompressed() {
            self.reader
                .read_exact_at(block, &mut dest[..on_disk])
                .context(DataBlockIo {
                    block,
                    size: size.size(),
                })?;
            Ok(on_disk)
        } else {
            let mut staging = self.buffers.get();
            staging.resize(on_disk, 0);
            self.reader
                .read_exact_at(block, &mut staging[..])
                .context(DataBlockIo {
                    block,
                    size: size.size(),
                })?;
            let bytes = self
                .compressor
                .decompress(&staging, dest)
                .context(DataBlockIo {
                    block,
                    size: size.size(),
                })?;
            ensure!(
                bytes > 0,
                EmptyDataBlock {
                    block,
                    size: size.size(),
                }
            );
            Ok(bytes)
        }
    }
}
