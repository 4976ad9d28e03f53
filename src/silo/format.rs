//! # Silo Blob Format
//!
//! Type-safe, zerocopy-based definitions for the on-disk silo layout. A
//! silo is a single contiguous byte buffer with three regions:
//!
//! ```text
//! +----------------------+
//! | Header (32 bytes)    |  magic, version, guid, string-region offset
//! +----------------------+
//! | Node region          |  packed element / sentinel records
//! +----------------------+
//! | String region        |  NUL-terminated interned strings
//! +----------------------+
//! ```
//!
//! ## Node records
//!
//! The node region is a packed sequence of variable-length records, each
//! starting with a tag byte:
//!
//! | Tag    | Record                                                 |
//! |--------|--------------------------------------------------------|
//! | `0x01` | element: name, parent, next, text, attr_count, attrs   |
//! | `0x00` | end-of-parent sentinel (single byte)                   |
//!
//! An element record is 18 fixed bytes followed by `attr_count` 8-byte
//! attribute records. Every element is immediately followed by its
//! children in document order and then one sentinel, so "first child" is
//! the record after the element's attributes and "end of siblings" is a
//! sentinel. Offsets inside the node region are relative to its start;
//! the first record is the synthetic root sentinel (an element with the
//! empty name and no parent).
//!
//! | Field        | Meaning                                              |
//! |--------------|------------------------------------------------------|
//! | `name`       | string-region offset of the element name             |
//! | `parent`     | back-offset (`self - parent`), 0 = none              |
//! | `next`       | forward-offset to the next sibling, 0 = last sibling |
//! | `text`       | string-region offset of the text, 0 = no text        |
//! | `attr_count` | number of trailing attribute records                 |
//!
//! Offset 0 of the string region always holds the empty string, which is
//! why `text == 0` can double as "unset": empty text is never stored.
//!
//! ## Endianness
//!
//! All multi-byte fields are little-endian via zerocopy's `U32`, so the
//! structs below can be read directly from unaligned mapped memory.

use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::{Error, Result};

pub const SILO_MAGIC: [u8; 4] = *b"SILO";
pub const FORMAT_VERSION: u32 = 1;

pub const HEADER_SIZE: usize = 32;

/// Tag byte of an element record.
pub const TAG_ELEMENT: u8 = 0x01;
/// Tag byte of an end-of-parent sentinel record.
pub const TAG_SENTINEL: u8 = 0x00;

/// Size of an element record's fixed part, including the tag byte.
pub const ELEMENT_FIXED_SIZE: usize = 18;
/// Size of one attribute record.
pub const ATTR_SIZE: usize = 8;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct SiloHeader {
    magic: [u8; 4],
    version: U32,
    guid: [u8; 16],
    strtab: U32,
    reserved: [u8; 4],
}

const _: () = assert!(std::mem::size_of::<SiloHeader>() == HEADER_SIZE);

impl SiloHeader {
    pub fn new(guid: [u8; 16], strtab: u32) -> Self {
        Self {
            magic: SILO_MAGIC,
            version: U32::new(FORMAT_VERSION),
            guid,
            strtab: U32::new(strtab),
            reserved: [0u8; 4],
        }
    }

    /// Parse and validate a header from the start of a blob.
    ///
    /// With `check_magic` unset the magic comparison is skipped (fuzzing
    /// and forensic loads); every other check still applies.
    pub fn from_bytes(bytes: &[u8], check_magic: bool) -> Result<&Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::invalid_data(format!(
                "blob too small for header: {} < {} bytes",
                bytes.len(),
                HEADER_SIZE
            )));
        }

        let header = Self::ref_from_bytes(&bytes[..HEADER_SIZE])
            .map_err(|e| Error::invalid_data(format!("failed to parse header: {e:?}")))?;

        if check_magic && header.magic != SILO_MAGIC {
            return Err(Error::invalid_data(format!(
                "bad magic {:02x?} at offset 0",
                header.magic
            )));
        }

        if header.version.get() != FORMAT_VERSION {
            return Err(Error::unsupported(format!(
                "format version {} (expected {})",
                header.version.get(),
                FORMAT_VERSION
            )));
        }

        Ok(header)
    }

    pub fn version(&self) -> u32 {
        self.version.get()
    }

    pub fn guid(&self) -> &[u8; 16] {
        &self.guid
    }

    pub fn strtab(&self) -> u32 {
        self.strtab.get()
    }
}

/// Fixed part of an element record, after the tag byte.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct RawElement {
    name: U32,
    parent: U32,
    next: U32,
    text: U32,
    attr_count: u8,
}

const _: () = assert!(std::mem::size_of::<RawElement>() == ELEMENT_FIXED_SIZE - 1);

impl RawElement {
    pub fn new(name: u32, parent: u32, next: u32, text: u32, attr_count: u8) -> Self {
        Self {
            name: U32::new(name),
            parent: U32::new(parent),
            next: U32::new(next),
            text: U32::new(text),
            attr_count,
        }
    }

    pub fn name(&self) -> u32 {
        self.name.get()
    }

    /// Back-offset to the parent record, 0 for the root sentinel.
    pub fn parent(&self) -> u32 {
        self.parent.get()
    }

    /// Forward-offset to the next sibling, 0 for the last sibling.
    pub fn next(&self) -> u32 {
        self.next.get()
    }

    /// String offset of the text content, 0 when unset.
    pub fn text(&self) -> u32 {
        self.text.get()
    }

    pub fn attr_count(&self) -> u8 {
        self.attr_count
    }

    /// Total record size including tag byte and attribute records.
    pub fn record_size(&self) -> usize {
        ELEMENT_FIXED_SIZE + self.attr_count as usize * ATTR_SIZE
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct RawAttr {
    name: U32,
    value: U32,
}

const _: () = assert!(std::mem::size_of::<RawAttr>() == ATTR_SIZE);

impl RawAttr {
    pub fn new(name: u32, value: u32) -> Self {
        Self {
            name: U32::new(name),
            value: U32::new(value),
        }
    }

    pub fn name(&self) -> u32 {
        self.name.get()
    }

    pub fn value(&self) -> u32 {
        self.value.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::IntoBytes;

    #[test]
    fn header_size_is_32() {
        assert_eq!(std::mem::size_of::<SiloHeader>(), 32);
    }

    #[test]
    fn header_roundtrip() {
        let guid = [7u8; 16];
        let header = SiloHeader::new(guid, 1234);

        let parsed = SiloHeader::from_bytes(header.as_bytes(), true).unwrap();
        assert_eq!(parsed.version(), FORMAT_VERSION);
        assert_eq!(parsed.guid(), &guid);
        assert_eq!(parsed.strtab(), 1234);
    }

    #[test]
    fn header_rejects_bad_magic() {
        let mut bytes = [0u8; 32];
        bytes[..4].copy_from_slice(b"NOPE");
        bytes[4] = FORMAT_VERSION as u8;

        assert!(SiloHeader::from_bytes(&bytes, true).is_err());
        // forensic mode skips only the magic comparison
        assert!(SiloHeader::from_bytes(&bytes, false).is_ok());
    }

    #[test]
    fn header_rejects_version_mismatch() {
        let mut header = SiloHeader::new([0u8; 16], 32);
        header.version = U32::new(99);

        let err = SiloHeader::from_bytes(header.as_bytes(), true).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Unsupported);
    }

    #[test]
    fn header_rejects_truncated_buffer() {
        let header = SiloHeader::new([0u8; 16], 32);
        let err = SiloHeader::from_bytes(&header.as_bytes()[..16], true).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidData);
    }

    #[test]
    fn element_record_sizes() {
        let elem = RawElement::new(1, 2, 3, 4, 2);
        assert_eq!(elem.record_size(), ELEMENT_FIXED_SIZE + 2 * ATTR_SIZE);
        assert_eq!(std::mem::size_of::<RawElement>(), 17);
        assert_eq!(std::mem::size_of::<RawAttr>(), 8);
    }

    #[test]
    fn element_field_accessors() {
        let elem = RawElement::new(10, 20, 30, 0, 1);
        assert_eq!(elem.name(), 10);
        assert_eq!(elem.parent(), 20);
        assert_eq!(elem.next(), 30);
        assert_eq!(elem.text(), 0);
        assert_eq!(elem.attr_count(), 1);
    }
}
