use repr::{datablock, INVALID_BLOCK};

/// A regular file's identity and data layout, as resolved from the inode
/// table by the host's lookup machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inode {
    /// Position of the inode in the archive's inode list. Never 0.
    pub inode_number: u32,
    /// Uncompressed file size in bytes
    pub file_size: u64,
    /// Archive offset of the metadata block holding the start of the
    /// file's block list
    pub block_list_start: u64,
    /// Byte offset of the block list within that metadata block's
    /// decompressed contents
    pub offset: u16,
    /// Archive offset of the file's first datablock
    pub start_block: u64,
    /// Archive offset of the fragment block holding the file's tail end,
    /// or [`INVALID_BLOCK`](repr::INVALID_BLOCK) if the file has none
    pub fragment_block: u64,
    /// On-disk size word of the fragment block
    pub fragment_size: datablock::Size,
    /// Byte offset of this file's tail within the decompressed fragment
    /// block
    pub fragment_offset: u32,
}

impl Inode {
    pub fn has_fragment(&self) -> bool {
        self.fragment_block != INVALID_BLOCK
    }
}
