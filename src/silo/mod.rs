//! # Compiled Silo
//!
//! A silo is a compiled, read-only binary representation of an XML
//! document (see [`format`] for the byte layout). Once loaded it is
//! immutable and can be shared freely between threads; every cursor
//! operation is plain offset arithmetic over the blob with no allocation
//! on the navigation path.
//!
//! ## Ownership
//!
//! The blob is either an owned allocation (`load_from_bytes`, compiled
//! silos) or a read-only memory map (`load_from_file`). [`Node`] handles
//! share ownership of the silo core through an `Arc`; the backing buffer
//! is released when the last handle and the silo itself are gone.
//!
//! ## Safety against corrupt input
//!
//! Loading validates the header in O(1); the node region is *not*
//! scanned up front. Instead every dereference during navigation is
//! bounds-checked and returns [`ErrorKind::InvalidData`](crate::ErrorKind::InvalidData) on the first
//! violation, so a truncated or bit-flipped blob can never cause an
//! out-of-bounds access.

pub mod export;
pub mod format;
mod node;

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use memchr::memchr;
use memmap2::Mmap;
use smallvec::SmallVec;
use tracing::debug;
use zerocopy::FromBytes;

use crate::error::{Error, Result};
use crate::query::Query;
use export::ExportFlags;
use format::{
    RawAttr, RawElement, SiloHeader, ATTR_SIZE, ELEMENT_FIXED_SIZE, HEADER_SIZE, TAG_ELEMENT,
    TAG_SENTINEL,
};

pub use node::Node;

bitflags::bitflags! {
    /// Flags controlling how a silo blob is loaded.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LoadFlags: u32 {
        /// Skip the magic-marker comparison (fuzzing / forensic loads).
        const NO_MAGIC = 1 << 0;
        /// Record that the caller wants file-change notification on the
        /// source; the watch facility itself lives outside the core.
        const WATCH_BLOB = 1 << 1;
    }
}

impl LoadFlags {
    pub const NONE: LoadFlags = LoadFlags::empty();
}

#[derive(Debug)]
enum Blob {
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl Blob {
    fn bytes(&self) -> &[u8] {
        match self {
            Blob::Owned(v) => v,
            Blob::Mapped(m) => m,
        }
    }
}

/// Shared, immutable silo state referenced by [`Silo`] and every [`Node`].
#[derive(Debug)]
pub(crate) struct SiloCore {
    blob: Blob,
    strtab: u32,
    guid: String,
    flags: LoadFlags,
}

/// A compiled, read-only, queryable XML document.
#[derive(Debug, Clone)]
pub struct Silo {
    core: Arc<SiloCore>,
}

impl Silo {
    /// Validate and take ownership of an in-memory blob.
    pub fn load_from_bytes(bytes: Vec<u8>, flags: LoadFlags) -> Result<Silo> {
        let silo = Self::from_blob(Blob::Owned(bytes), flags)?;
        debug!(size = silo.size(), guid = silo.guid(), "loaded silo from bytes");
        Ok(silo)
    }

    /// Memory-map a silo file read-only and validate it.
    pub fn load_from_file<P: AsRef<Path>>(path: P, flags: LoadFlags) -> Result<Silo> {
        let path = path.as_ref();

        let file = File::open(path)
            .map_err(|e| Error::io(format!("failed to open '{}'", path.display()), e))?;

        // SAFETY: Mmap::map is unsafe because the file could be modified
        // externally while mapped. This is acceptable here because:
        // 1. The mapping is read-only; writes through it are impossible
        // 2. Silo files are written whole by `save_to_file` and replaced,
        //    not rewritten in place
        // 3. Every read through the mapping is bounds-checked against the
        //    mapping length taken at map time
        let mmap = unsafe {
            Mmap::map(&file)
                .map_err(|e| Error::io(format!("failed to map '{}'", path.display()), e))?
        };

        let silo = Self::from_blob(Blob::Mapped(mmap), flags)?;
        debug!(
            path = %path.display(),
            size = silo.size(),
            guid = silo.guid(),
            "mapped silo from file"
        );
        Ok(silo)
    }

    fn from_blob(blob: Blob, flags: LoadFlags) -> Result<Silo> {
        let (strtab, guid) = validate(blob.bytes(), flags)?;
        let core = SiloCore {
            blob,
            strtab,
            guid: format_guid(&guid),
            flags,
        };
        // The root record is the only node touched at load time; the rest
        // of the node region is checked lazily on navigation.
        if core.root_off().is_some() {
            let root = core.raw_element(0)?;
            core.string_at(root.name())?;
        }
        Ok(Silo {
            core: Arc::new(core),
        })
    }

    /// Write the blob to a file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.core.bytes())
            .map_err(|e| Error::io(format!("failed to write '{}'", path.display()), e))?;
        debug!(path = %path.display(), size = self.size(), "saved silo");
        Ok(())
    }

    /// The sentinel root, or `None` for a silo with an empty node region.
    pub fn root(&self) -> Option<Node> {
        self.core
            .root_off()
            .map(|off| Node::new(Arc::clone(&self.core), off))
    }

    /// Guid of the source content, in hyphenated hex form.
    pub fn guid(&self) -> &str {
        &self.core.guid
    }

    /// Re-check the load-time invariants against the buffer.
    ///
    /// Constructors only return silos that start valid; this stays
    /// cheap enough to call before every use of a long-lived silo.
    pub fn valid(&self) -> bool {
        validate(self.core.bytes(), self.core.flags).is_ok()
    }

    /// Total blob size in bytes.
    pub fn size(&self) -> usize {
        self.core.bytes().len()
    }

    /// Evaluate an XPath-subset query from the root, returning up to
    /// `limit` nodes in document order (0 = unlimited).
    pub fn query(&self, xpath: &str, limit: usize) -> Result<Vec<Node>> {
        let query = Query::compile(xpath)?;
        self.query_compiled(&query, limit)
    }

    /// Evaluate a pre-compiled query; compilation cost is paid once and
    /// the query can be reused across silos.
    pub fn query_compiled(&self, query: &Query, limit: usize) -> Result<Vec<Node>> {
        crate::query::execute(&self.core, None, query, limit)
    }

    /// Evaluate a query and return the first result, or
    /// [`ErrorKind::NotFound`](crate::ErrorKind::NotFound) if nothing matched.
    pub fn query_first(&self, xpath: &str) -> Result<Node> {
        let mut results = self.query(xpath, 1)?;
        results
            .pop()
            .ok_or_else(|| Error::not_found(format!("no results for query '{xpath}'")))
    }

    /// Export the document back to XML text.
    pub fn to_xml(&self, flags: ExportFlags) -> Result<String> {
        let root = self
            .root()
            .and_then(|r| r.child().transpose())
            .transpose()?
            .ok_or_else(|| Error::not_found("silo has no root element"))?;
        export::export_node(&root, flags | ExportFlags::INCLUDE_SIBLINGS)
    }

    /// Render a line-per-record description of the blob for debugging.
    pub fn dump(&self) -> Result<String> {
        let core = &self.core;
        let mut out = String::new();
        out.push_str(&format!(
            "silo: {} bytes, guid {}, strtab @{}\n",
            self.size(),
            self.guid(),
            core.strtab
        ));

        let region = core.node_region();
        let mut off = 0u32;
        let mut depth = 0usize;
        while (off as usize) < region.len() {
            match core.record_tag(off)? {
                TAG_SENTINEL => {
                    depth = depth.saturating_sub(1);
                    off += 1;
                }
                TAG_ELEMENT => {
                    let elem = core.raw_element(off)?;
                    let name = core.string_at(elem.name())?;
                    out.push_str(&format!(
                        "{:indent$}@{off}: <{}> parent={} next={} attrs={}",
                        "",
                        if name.is_empty() { "(root)" } else { name },
                        elem.parent(),
                        elem.next(),
                        elem.attr_count(),
                        indent = depth * 2,
                    ));
                    if elem.text() != 0 {
                        out.push_str(&format!(" text={:?}", core.string_at(elem.text())?));
                    }
                    out.push('\n');
                    off += elem.record_size() as u32;
                    depth += 1;
                }
                tag => {
                    return Err(Error::invalid_data(format!(
                        "unknown record tag {tag:#04x} at node offset {off}"
                    )));
                }
            }
        }
        Ok(out)
    }
}

/// Header-level validation shared by loading and [`Silo::valid`].
fn validate(bytes: &[u8], flags: LoadFlags) -> Result<(u32, [u8; 16])> {
    let header = SiloHeader::from_bytes(bytes, !flags.contains(LoadFlags::NO_MAGIC))?;

    let strtab = header.strtab();
    if (strtab as usize) < HEADER_SIZE || strtab as usize > bytes.len() {
        return Err(Error::invalid_data(format!(
            "string region offset {strtab} out of bounds (blob is {} bytes)",
            bytes.len()
        )));
    }

    let strings = &bytes[strtab as usize..];
    let nodes_len = strtab as usize - HEADER_SIZE;
    if !strings.is_empty() && strings[strings.len() - 1] != 0 {
        return Err(Error::invalid_data(format!(
            "string region does not end with NUL (last byte at offset {})",
            bytes.len() - 1
        )));
    }
    if nodes_len > 0 && strings.is_empty() {
        return Err(Error::invalid_data(
            "node region present but string region is empty",
        ));
    }

    Ok((strtab, *header.guid()))
}

/// Render a 16-byte guid in the conventional hyphenated form.
pub(crate) fn format_guid(guid: &[u8; 16]) -> String {
    let mut out = String::with_capacity(36);
    for (i, b) in guid.iter().enumerate() {
        if matches!(i, 4 | 6 | 8 | 10) {
            out.push('-');
        }
        out.push_str(&format!("{b:02x}"));
    }
    out
}

impl SiloCore {
    pub(crate) fn bytes(&self) -> &[u8] {
        self.blob.bytes()
    }

    fn node_region(&self) -> &[u8] {
        &self.bytes()[HEADER_SIZE..self.strtab as usize]
    }

    /// Upper bound on the number of element records in the blob.
    pub(crate) fn max_element_count(&self) -> usize {
        self.node_region().len() / ELEMENT_FIXED_SIZE + 1
    }

    fn strtab_region(&self) -> &[u8] {
        &self.bytes()[self.strtab as usize..]
    }

    /// Read the tag byte at a node-region offset.
    fn record_tag(&self, off: u32) -> Result<u8> {
        self.node_region()
            .get(off as usize)
            .copied()
            .ok_or_else(|| {
                Error::invalid_data(format!("node record at offset {off} out of bounds"))
            })
    }

    /// Bounds-checked view of the element record at `off`.
    pub(crate) fn raw_element(&self, off: u32) -> Result<&RawElement> {
        let region = self.node_region();
        let start = off as usize;
        let end = start
            .checked_add(ELEMENT_FIXED_SIZE)
            .filter(|&end| end <= region.len())
            .ok_or_else(|| {
                Error::invalid_data(format!("element record at offset {off} out of bounds"))
            })?;

        if region[start] != TAG_ELEMENT {
            return Err(Error::invalid_data(format!(
                "expected element record at offset {off}, found tag {:#04x}",
                region[start]
            )));
        }

        let elem = RawElement::ref_from_bytes(&region[start + 1..end])
            .map_err(|e| Error::internal(format!("element view at offset {off}: {e:?}")))?;

        // the attribute records must fit as well
        if start + elem.record_size() > region.len() {
            return Err(Error::invalid_data(format!(
                "element at offset {off} claims {} attributes past end of node region",
                elem.attr_count()
            )));
        }
        Ok(elem)
    }

    /// Read the NUL-terminated string at a string-region offset.
    pub(crate) fn string_at(&self, soff: u32) -> Result<&str> {
        let region = self.strtab_region();
        let rest = region.get(soff as usize..).ok_or_else(|| {
            Error::invalid_data(format!("string offset {soff} out of bounds"))
        })?;
        let nul = memchr(0, rest).ok_or_else(|| {
            Error::invalid_data(format!("unterminated string at offset {soff}"))
        })?;
        std::str::from_utf8(&rest[..nul])
            .map_err(|e| Error::invalid_data(format!("string at offset {soff} is not UTF-8: {e}")))
    }

    /// Node offset of the sentinel root, `None` for an empty node region.
    pub(crate) fn root_off(&self) -> Option<u32> {
        if self.node_region().is_empty() {
            None
        } else {
            Some(0)
        }
    }

    /// Follow the parent back-pointer.
    pub(crate) fn parent_off(&self, off: u32) -> Result<Option<u32>> {
        let back = self.raw_element(off)?.parent();
        if back == 0 {
            return Ok(None);
        }
        let parent = off.checked_sub(back).ok_or_else(|| {
            Error::invalid_data(format!(
                "parent back-offset {back} at node offset {off} underflows"
            ))
        })?;
        self.raw_element(parent)?;
        Ok(Some(parent))
    }

    /// Follow the next-sibling pointer.
    pub(crate) fn next_off(&self, off: u32) -> Result<Option<u32>> {
        let fwd = self.raw_element(off)?.next();
        if fwd == 0 {
            return Ok(None);
        }
        let next = off.checked_add(fwd).ok_or_else(|| {
            Error::invalid_data(format!(
                "sibling offset {fwd} at node offset {off} overflows"
            ))
        })?;
        self.raw_element(next)?;
        Ok(Some(next))
    }

    /// First child: the record immediately after `off`'s attributes, or
    /// `None` when that record is the end-of-parent sentinel.
    pub(crate) fn child_off(&self, off: u32) -> Result<Option<u32>> {
        let elem = self.raw_element(off)?;
        let first = off + elem.record_size() as u32;
        match self.record_tag(first)? {
            TAG_SENTINEL => Ok(None),
            TAG_ELEMENT => Ok(Some(first)),
            tag => Err(Error::invalid_data(format!(
                "unknown record tag {tag:#04x} at node offset {first}"
            ))),
        }
    }

    /// Number of parent traversals to the sentinel root.
    pub(crate) fn depth_of(&self, off: u32) -> Result<u32> {
        let mut depth = 0;
        let mut cur = off;
        while let Some(parent) = self.parent_off(cur)? {
            depth += 1;
            cur = parent;
        }
        Ok(depth)
    }

    pub(crate) fn element_name(&self, off: u32) -> Result<&str> {
        let elem = self.raw_element(off)?;
        self.string_at(elem.name())
    }

    pub(crate) fn text_of(&self, off: u32) -> Result<Option<&str>> {
        let elem = self.raw_element(off)?;
        if elem.text() == 0 {
            return Ok(None);
        }
        self.string_at(elem.text()).map(Some)
    }

    /// Linear scan over the node's attributes; counts are small.
    pub(crate) fn attr_of(&self, off: u32, name: &str) -> Result<Option<&str>> {
        let elem = self.raw_element(off)?;
        for raw in self.raw_attrs(off, elem)? {
            if self.string_at(raw.name())? == name {
                return self.string_at(raw.value()).map(Some);
            }
        }
        Ok(None)
    }

    /// All attributes of a node as (name, value) pairs in stored order.
    pub(crate) fn attr_pairs(&self, off: u32) -> Result<SmallVec<[(&str, &str); 4]>> {
        let elem = self.raw_element(off)?;
        let mut pairs = SmallVec::new();
        for raw in self.raw_attrs(off, elem)? {
            pairs.push((self.string_at(raw.name())?, self.string_at(raw.value())?));
        }
        Ok(pairs)
    }

    fn raw_attrs(&self, off: u32, elem: &RawElement) -> Result<&[RawAttr]> {
        let start = off as usize + ELEMENT_FIXED_SIZE;
        let len = elem.attr_count() as usize * ATTR_SIZE;
        // raw_element already verified the range
        let bytes = &self.node_region()[start..start + len];
        <[RawAttr]>::ref_from_bytes(bytes)
            .map_err(|e| Error::internal(format!("attribute view at offset {off}: {e:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{Builder, CompileFlags};

    fn compile(xml: &str) -> Silo {
        let mut builder = Builder::new();
        builder.import_xml(xml).unwrap();
        builder.compile(CompileFlags::NONE).unwrap()
    }

    #[test]
    fn load_rejects_truncated_header() {
        let err = Silo::load_from_bytes(vec![0u8; 8], LoadFlags::NONE).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidData);
    }

    #[test]
    fn load_rejects_bad_magic_unless_forced() {
        let silo = compile("<a/>");
        let mut bytes = silo.core.bytes().to_vec();
        bytes[0] = b'?';

        let err = Silo::load_from_bytes(bytes.clone(), LoadFlags::NONE).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidData);

        // NO_MAGIC proceeds to the remaining header checks, which pass here
        assert!(Silo::load_from_bytes(bytes, LoadFlags::NO_MAGIC).is_ok());
    }

    #[test]
    fn load_rejects_strtab_out_of_bounds() {
        let silo = compile("<a/>");
        let mut bytes = silo.core.bytes().to_vec();
        // strtab field lives at header offset 24
        bytes[24..28].copy_from_slice(&u32::MAX.to_le_bytes());

        let err = Silo::load_from_bytes(bytes, LoadFlags::NONE).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidData);
    }

    #[test]
    fn navigation_over_small_document() {
        let silo = compile("<r><a><b/></a></r>");
        let root = silo.root().unwrap();
        assert_eq!(root.element().unwrap(), "");
        assert_eq!(root.depth().unwrap(), 0);

        let r = root.child().unwrap().unwrap();
        assert_eq!(r.element().unwrap(), "r");
        assert_eq!(r.depth().unwrap(), 1);

        let a = r.child().unwrap().unwrap();
        assert_eq!(a.element().unwrap(), "a");
        assert_eq!(a.depth().unwrap(), 2);
        assert_eq!(a.parent().unwrap().unwrap().element().unwrap(), "r");

        let b = a.child().unwrap().unwrap();
        assert_eq!(b.element().unwrap(), "b");
        assert!(b.child().unwrap().is_none());
        assert!(b.next().unwrap().is_none());
    }

    #[test]
    fn sibling_chain_in_document_order() {
        let silo = compile("<r><a/><b/><c/></r>");
        let r = silo.root().unwrap().child().unwrap().unwrap();

        let mut names = Vec::new();
        let mut cur = r.child().unwrap();
        while let Some(n) = cur {
            names.push(n.element().unwrap().to_string());
            cur = n.next().unwrap();
        }
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn attributes_and_text() {
        let silo = compile(r#"<r><item id="7" kind="x">hello</item></r>"#);
        let item = silo.query_first("r/item").unwrap();

        assert_eq!(item.attr("id").unwrap(), Some("7"));
        assert_eq!(item.attr("kind").unwrap(), Some("x"));
        assert_eq!(item.attr("missing").unwrap(), None);
        assert_eq!(item.text().unwrap(), Some("hello"));
    }

    #[test]
    fn guid_is_stable_and_hyphenated() {
        let a = compile("<a/>");
        let b = compile("<a/>");
        assert_eq!(a.guid(), b.guid());
        assert_eq!(a.guid().len(), 36);
        assert_eq!(a.guid().matches('-').count(), 4);
    }

    #[test]
    fn valid_reflects_header_state() {
        let silo = compile("<a/>");
        assert!(silo.valid());
    }

    #[test]
    fn dump_lists_records() {
        let silo = compile("<r><a>t</a></r>");
        let dump = silo.dump().unwrap();
        assert!(dump.contains("(root)"));
        assert!(dump.contains("<r>"));
        assert!(dump.contains("text=\"t\""));
    }
}
