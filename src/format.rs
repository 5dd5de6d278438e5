// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! FDT on-disk format primitives.
//!
//! A blob begins with [FdtHeader], a fixed record of big-endian u32 fields
//! locating three regions: the memory reservation block (a
//! sentinel-terminated sequence of [FdtReserveEntry] records), the
//! structure block (the tag stream walked by
//! [DecodedTree](crate::tree::DecodedTree)), and the strings block
//! ([StringsBlock]) holding NUL-terminated property names addressed by
//! offset.
//!
//! Everything in a blob is offset-addressed and untrusted, so every
//! accessor here validates its range against the buffer it is handed and
//! returns a typed error instead of slicing out of bounds.

use {
    crate::error::{HeaderError, ReserveMapError, StringTableError},
    scroll::{Pread, SizeWith},
};

/// Format magic in the first header field.
pub const FDT_MAGIC: u32 = 0xd00d_feed;

/// Size in bytes of the fixed header record.
pub const HEADER_SIZE: usize = 40;

/// Size in bytes of one structure block tag.
pub const TAG_SIZE: usize = 4;

/// Starts a node; a NUL-terminated name follows the tag.
pub const FDT_BEGIN_NODE: u32 = 0x1;
/// Closes the most recently opened node.
pub const FDT_END_NODE: u32 = 0x2;
/// A property: length, name offset, then the payload.
pub const FDT_PROP: u32 = 0x3;
/// Padding tag with no effect.
pub const FDT_NOP: u32 = 0x4;
/// Terminates the structure block.
pub const FDT_END: u32 = 0x9;

/// The fixed header at the start of every FDT blob.
///
/// All fields are stored big-endian. Offsets are relative to the start of
/// the blob; sizes are in bytes.
#[repr(C)]
#[derive(Clone, Copy, Default, Debug, Pread, SizeWith)]
pub struct FdtHeader {
    /// Format magic. Always [FDT_MAGIC].
    pub magic: u32,

    /// Total size of the blob, header included.
    pub totalsize: u32,

    /// Start offset of the structure block.
    pub off_dt_struct: u32,

    /// Start offset of the strings block.
    pub off_dt_strings: u32,

    /// Start offset of the memory reservation block.
    pub off_mem_rsvmap: u32,

    /// Format version.
    pub version: u32,

    /// Oldest version this blob is backwards compatible with.
    pub last_comp_version: u32,

    /// Physical ID of the booting CPU.
    pub boot_cpuid_phys: u32,

    /// Length of the strings block in bytes.
    pub size_dt_strings: u32,

    /// Length of the structure block in bytes.
    pub size_dt_struct: u32,
}

impl FdtHeader {
    /// Parse and validate the header at the start of `data`.
    ///
    /// Validation covers the magic, the version pair, and that every block
    /// the header addresses lies inside `totalsize` and inside `data`.
    /// Any violation is fatal for the decode, not a warning.
    pub fn parse(data: &[u8]) -> Result<Self, HeaderError> {
        let header = data
            .pread_with::<FdtHeader>(0, scroll::BE)
            .map_err(|_| HeaderError::Truncated(data.len()))?;
        header.validate(data.len())?;

        Ok(header)
    }

    fn validate(&self, buffer_len: usize) -> Result<(), HeaderError> {
        if self.magic != FDT_MAGIC {
            return Err(HeaderError::BadMagic(self.magic));
        }
        if self.last_comp_version > self.version {
            return Err(HeaderError::BadVersion {
                version: self.version,
                last_comp_version: self.last_comp_version,
            });
        }
        if (self.totalsize as usize) < HEADER_SIZE {
            return Err(HeaderError::TotalSizeTooSmall(self.totalsize));
        }
        if self.totalsize as usize > buffer_len {
            return Err(HeaderError::TotalSizeOutOfRange {
                total_size: self.totalsize,
                buffer_len,
            });
        }

        self.check_block("structure", self.off_dt_struct, self.size_dt_struct)?;
        self.check_block("strings", self.off_dt_strings, self.size_dt_strings)?;

        if self.off_mem_rsvmap >= self.totalsize {
            return Err(HeaderError::BlockOutOfRange {
                block: "memory reserve map",
                offset: self.off_mem_rsvmap,
                size: 0,
                total_size: self.totalsize,
            });
        }

        Ok(())
    }

    fn check_block(&self, block: &'static str, offset: u32, size: u32) -> Result<(), HeaderError> {
        // The fields are untrusted; the sum must not wrap u32.
        if u64::from(offset) + u64::from(size) > u64::from(self.totalsize) {
            return Err(HeaderError::BlockOutOfRange {
                block,
                offset,
                size,
                total_size: self.totalsize,
            });
        }

        Ok(())
    }

    /// Obtain the raw bytes of the structure block.
    pub fn structure_block<'a>(&self, data: &'a [u8]) -> Result<&'a [u8], HeaderError> {
        self.validate(data.len())?;
        let start = self.off_dt_struct as usize;

        Ok(&data[start..start + self.size_dt_struct as usize])
    }

    /// Obtain the strings block holding property names.
    pub fn strings_block<'a>(&self, data: &'a [u8]) -> Result<StringsBlock<'a>, HeaderError> {
        self.validate(data.len())?;
        let start = self.off_dt_strings as usize;

        Ok(StringsBlock::new(
            &data[start..start + self.size_dt_strings as usize],
        ))
    }

    /// Iterate the memory reservation entries.
    ///
    /// The sequence ends at the first all-zero entry; if the blob ends
    /// before one is found the iterator yields a [ReserveMapError] instead
    /// of reading past the buffer.
    pub fn reserve_entries<'a>(&self, data: &'a [u8]) -> Result<ReserveMapIter<'a>, HeaderError> {
        self.validate(data.len())?;

        Ok(ReserveMapIter {
            data: &data[..self.totalsize as usize],
            offset: self.off_mem_rsvmap as usize,
            done: false,
        })
    }
}

/// One physical memory range withheld from operating system use.
///
/// The reservation block is a sequence of these records terminated by an
/// entry whose address and size are both zero.
#[repr(C)]
#[derive(Clone, Copy, Default, Debug, Pread, SizeWith)]
pub struct FdtReserveEntry {
    /// Physical start address of the reserved range.
    pub address: u64,

    /// Length of the reserved range in bytes.
    pub size: u64,
}

impl FdtReserveEntry {
    /// Whether this entry is the sequence terminator.
    pub fn is_terminator(&self) -> bool {
        self.address == 0 && self.size == 0
    }
}

/// Iterator over [FdtReserveEntry] records.
///
/// Fused: after the terminator or an error, further calls return `None`.
pub struct ReserveMapIter<'a> {
    data: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> Iterator for ReserveMapIter<'a> {
    type Item = Result<FdtReserveEntry, ReserveMapError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let at = self.offset;
        if at == self.data.len() {
            self.done = true;
            return Some(Err(ReserveMapError::MissingTerminator(at)));
        }

        match self
            .data
            .gread_with::<FdtReserveEntry>(&mut self.offset, scroll::BE)
        {
            Ok(entry) if entry.is_terminator() => {
                self.done = true;
                None
            }
            Ok(entry) => Some(Ok(entry)),
            Err(_) => {
                self.done = true;
                Some(Err(ReserveMapError::Truncated(at)))
            }
        }
    }
}

/// The strings block: NUL-terminated property names addressed by offset.
#[derive(Clone, Copy, Debug)]
pub struct StringsBlock<'a> {
    data: &'a [u8],
}

impl<'a> StringsBlock<'a> {
    /// Wrap an already-extracted strings block range.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Resolve a property name offset to its string.
    ///
    /// The scan for the terminating NUL never leaves the block.
    pub fn resolve(&self, offset: u32) -> Result<&'a str, StringTableError> {
        let start = offset as usize;
        if start >= self.data.len() {
            return Err(StringTableError::OffsetOutOfRange {
                offset,
                size: self.data.len() as u32,
            });
        }

        let tail = &self.data[start..];
        let len = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or(StringTableError::Unterminated(offset))?;

        std::str::from_utf8(&tail[..len]).map_err(|_| StringTableError::InvalidUtf8(offset))
    }
}

#[cfg(test)]
mod tests {
    use {super::*, byteorder::WriteBytesExt};

    fn header_bytes(fields: [u32; 10]) -> Vec<u8> {
        let mut data = Vec::new();
        for field in fields {
            data.write_u32::<byteorder::BE>(field).unwrap();
        }
        data
    }

    // magic, totalsize, off_dt_struct, off_dt_strings, off_mem_rsvmap,
    // version, last_comp_version, boot_cpuid_phys, size_dt_strings,
    // size_dt_struct
    fn empty_blob() -> Vec<u8> {
        let mut data = header_bytes([FDT_MAGIC, 56, 56, 56, 40, 17, 16, 0, 0, 0]);
        data.extend_from_slice(&[0u8; 16]);
        data
    }

    #[test]
    fn parse_minimal_header() {
        let data = empty_blob();
        let header = FdtHeader::parse(&data).unwrap();

        assert_eq!(header.magic, FDT_MAGIC);
        assert_eq!(header.totalsize, 56);
        assert_eq!(header.version, 17);
        assert!(header.structure_block(&data).unwrap().is_empty());
    }

    #[test]
    fn parse_rejects_bad_magic() {
        let mut data = empty_blob();
        data[0] = 0xde;

        assert!(matches!(
            FdtHeader::parse(&data),
            Err(HeaderError::BadMagic(_))
        ));
    }

    #[test]
    fn parse_rejects_short_buffer() {
        assert!(matches!(
            FdtHeader::parse(&[0u8; 12]),
            Err(HeaderError::Truncated(12))
        ));
    }

    #[test]
    fn parse_rejects_total_size_past_buffer() {
        let data = header_bytes([FDT_MAGIC, 4096, 40, 40, 39, 17, 16, 0, 0, 0]);

        assert!(matches!(
            FdtHeader::parse(&data),
            Err(HeaderError::TotalSizeOutOfRange { total_size: 4096, .. })
        ));
    }

    #[test]
    fn parse_rejects_structure_block_past_total_size() {
        let mut data = header_bytes([FDT_MAGIC, 56, 52, 56, 40, 17, 16, 0, 0, 8]);
        data.extend_from_slice(&[0u8; 16]);

        assert!(matches!(
            FdtHeader::parse(&data),
            Err(HeaderError::BlockOutOfRange { block: "structure", .. })
        ));
    }

    #[test]
    fn parse_rejects_inconsistent_versions() {
        let data = header_bytes([FDT_MAGIC, 56, 56, 56, 40, 16, 17, 0, 0, 0]);

        assert!(matches!(
            FdtHeader::parse(&data),
            Err(HeaderError::BadVersion { .. })
        ));
    }

    #[test]
    fn reserve_entries_stop_at_terminator() {
        let mut data = header_bytes([FDT_MAGIC, 88, 88, 88, 40, 17, 16, 0, 0, 0]);
        for word in [0u64, 0x1000, 0x8000_0000, 0x4000, 0, 0] {
            data.write_u64::<byteorder::BE>(word).unwrap();
        }

        let header = FdtHeader::parse(&data).unwrap();
        let entries = header
            .reserve_entries(&data)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].address, 0);
        assert_eq!(entries[0].size, 0x1000);
        assert_eq!(entries[1].address, 0x8000_0000);
        assert_eq!(entries[1].size, 0x4000);
    }

    #[test]
    fn reserve_entries_report_missing_terminator() {
        let mut data = header_bytes([FDT_MAGIC, 56, 56, 56, 40, 17, 16, 0, 0, 0]);
        for word in [0x1000u64, 0x2000] {
            data.write_u64::<byteorder::BE>(word).unwrap();
        }

        let header = FdtHeader::parse(&data).unwrap();
        let mut entries = header.reserve_entries(&data).unwrap();

        assert!(matches!(entries.next(), Some(Ok(_))));
        assert!(matches!(
            entries.next(),
            Some(Err(ReserveMapError::MissingTerminator(56)))
        ));
        assert!(entries.next().is_none());
    }

    #[test]
    fn reserve_entries_report_partial_entry() {
        let mut data = header_bytes([FDT_MAGIC, 48, 48, 48, 40, 17, 16, 0, 0, 0]);
        data.write_u64::<byteorder::BE>(0x1000).unwrap();

        let header = FdtHeader::parse(&data).unwrap();
        let mut entries = header.reserve_entries(&data).unwrap();

        assert!(matches!(
            entries.next(),
            Some(Err(ReserveMapError::Truncated(40)))
        ));
        assert!(entries.next().is_none());
    }

    #[test]
    fn strings_resolve() {
        let strings = StringsBlock::new(b"compatible\0reg\0");

        assert_eq!(strings.resolve(0).unwrap(), "compatible");
        assert_eq!(strings.resolve(11).unwrap(), "reg");
        // Landing mid-string is allowed; the tail is a valid name.
        assert_eq!(strings.resolve(3).unwrap(), "patible");
    }

    #[test]
    fn strings_reject_offset_out_of_range() {
        let strings = StringsBlock::new(b"reg\0");

        assert!(matches!(
            strings.resolve(4),
            Err(StringTableError::OffsetOutOfRange { offset: 4, size: 4 })
        ));
        assert!(matches!(
            StringsBlock::new(b"").resolve(0),
            Err(StringTableError::OffsetOutOfRange { .. })
        ));
    }

    #[test]
    fn strings_reject_unterminated_name() {
        let strings = StringsBlock::new(b"reg\0model");

        assert!(matches!(
            strings.resolve(4),
            Err(StringTableError::Unterminated(4))
        ));
    }

    #[test]
    fn strings_reject_non_utf8_name() {
        let strings = StringsBlock::new(b"\xffreg\0");

        assert!(matches!(
            strings.resolve(0),
            Err(StringTableError::InvalidUtf8(0))
        ));
    }
}
