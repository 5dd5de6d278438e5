// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

/// Any failure while decoding an FDT blob.
///
/// Every decode-time failure is fatal for that call: the decoder never
/// substitutes a default or skips malformed structure.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid FDT header: {0}")]
    Header(#[from] HeaderError),

    #[error("invalid memory reserve map: {0}")]
    ReserveMap(#[from] ReserveMapError),

    #[error("invalid property name reference: {0}")]
    StringTable(#[from] StringTableError),

    #[error("invalid structure block: {0}")]
    Structure(#[from] StructureError),
}

/// Failures validating the fixed header.
#[derive(Debug, thiserror::Error)]
pub enum HeaderError {
    #[error("bad magic 0x{0:08x}, expected 0xd00dfeed")]
    BadMagic(u32),

    #[error("buffer holds {0} bytes, shorter than the fixed header")]
    Truncated(usize),

    #[error("total size {0} is smaller than the fixed header")]
    TotalSizeTooSmall(u32),

    #[error("total size {total_size} does not fit the {buffer_len} byte buffer")]
    TotalSizeOutOfRange { total_size: u32, buffer_len: usize },

    #[error("last compatible version {last_comp_version} is newer than version {version}")]
    BadVersion { version: u32, last_comp_version: u32 },

    #[error(
        "{block} block at offset 0x{offset:x} with size 0x{size:x} runs past total size 0x{total_size:x}"
    )]
    BlockOutOfRange {
        block: &'static str,
        offset: u32,
        size: u32,
        total_size: u32,
    },
}

/// Failures reading the memory reservation block.
#[derive(Debug, thiserror::Error)]
pub enum ReserveMapError {
    #[error("truncated reservation entry at offset 0x{0:x}")]
    Truncated(usize),

    #[error("reserve map reached offset 0x{0:x} without an all-zero terminator")]
    MissingTerminator(usize),
}

/// Failures resolving a property name through the strings block.
#[derive(Debug, thiserror::Error)]
pub enum StringTableError {
    #[error("name offset {offset} is outside the {size} byte strings block")]
    OffsetOutOfRange { offset: u32, size: u32 },

    #[error("name at offset {0} is not NUL terminated within the strings block")]
    Unterminated(u32),

    #[error("unable to parse name at offset {0} as UTF-8")]
    InvalidUtf8(u32),
}

/// Failures walking the structure block.
///
/// Offsets are absolute positions in the blob.
#[derive(Debug, thiserror::Error)]
pub enum StructureError {
    #[error("structure block offset 0x{0:x} is not 4-byte aligned")]
    Misaligned(u32),

    #[error("structure block ends before the read at offset 0x{0:x} completes")]
    Truncated(usize),

    #[error("unable to parse node name at offset 0x{0:x} as UTF-8")]
    InvalidNodeName(usize),

    #[error("END_NODE at offset 0x{0:x} without a matching BEGIN_NODE")]
    UnbalancedEndNode(usize),

    #[error("structure ended at offset 0x{offset:x} with {open} nodes still open")]
    UnbalancedTree { offset: usize, open: usize },

    #[error("property at offset 0x{0:x} appears outside any node")]
    PropertyOutsideNode(usize),

    #[error("second top-level node at offset 0x{0:x}")]
    MultipleRootNodes(usize),

    #[error("structure block ended at offset 0x{0:x} without declaring a root node")]
    MissingRootNode(usize),

    #[error("unknown tag 0x{tag:08x} at offset 0x{offset:x}")]
    UnknownTag { tag: u32, offset: usize },
}
