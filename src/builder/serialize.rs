//! # Silo Serialization
//!
//! Turns a builder tree into the silo blob described in
//! [`crate::silo::format`]. Two traversals over the tree, both in
//! document order:
//!
//! 1. **String collection**: every element name, attribute name,
//!    attribute value and non-empty text is interned into the string
//!    table. First insertion wins, duplicates share one offset, and the
//!    table starts with the empty string so offset 0 can mean "unset".
//! 2. **Layout**: node records are emitted depth-first with a
//!    placeholder `next`; each element is followed by its children and
//!    one end-of-parent sentinel. When a following sibling's offset
//!    becomes known, the previous sibling's `next` field is patched in
//!    place. Parent back-offsets fall out of the frame stack.
//!
//! Both traversals are iterative and visit nodes in the same order, so
//! equal input produces byte-identical blobs.

use hashbrown::HashMap;
use zerocopy::IntoBytes;

use super::import::BuilderNode;
use crate::error::{Error, Result};
use crate::silo::format::{RawAttr, RawElement, SiloHeader, HEADER_SIZE, TAG_ELEMENT, TAG_SENTINEL};

/// Deduplicating, insertion-ordered string table.
struct StringTable {
    offsets: HashMap<String, u32>,
    buf: Vec<u8>,
}

impl StringTable {
    fn new() -> StringTable {
        let mut table = StringTable {
            offsets: HashMap::new(),
            buf: Vec::new(),
        };
        // offset 0 is reserved for the empty string ("unset" marker)
        table.buf.push(0);
        table.offsets.insert(String::new(), 0);
        table
    }

    fn intern(&mut self, s: &str) -> Result<u32> {
        if let Some(&off) = self.offsets.get(s) {
            return Ok(off);
        }
        let off = u32::try_from(self.buf.len())
            .map_err(|_| Error::invalid_argument("string table exceeds 4 GiB"))?;
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
        self.offsets.insert(s.to_string(), off);
        Ok(off)
    }
}

/// Serialize a builder tree into a silo blob.
pub(crate) fn serialize(roots: &[BuilderNode], guid: [u8; 16]) -> Result<Vec<u8>> {
    let mut strings = StringTable::new();
    collect_strings(roots, &mut strings)?;

    let nodes = layout_nodes(roots, &mut strings)?;

    let strtab = u32::try_from(HEADER_SIZE + nodes.len())
        .map_err(|_| Error::invalid_argument("node region exceeds 4 GiB"))?;
    let header = SiloHeader::new(guid, strtab);

    let mut blob = Vec::with_capacity(HEADER_SIZE + nodes.len() + strings.buf.len());
    blob.extend_from_slice(header.as_bytes());
    blob.extend_from_slice(&nodes);
    blob.extend_from_slice(&strings.buf);
    Ok(blob)
}

/// Pass 1: intern every referenced string in document order.
fn collect_strings(roots: &[BuilderNode], strings: &mut StringTable) -> Result<()> {
    let mut stack: Vec<&BuilderNode> = roots.iter().rev().collect();
    while let Some(node) = stack.pop() {
        strings.intern(&node.element)?;
        for (name, value) in &node.attrs {
            strings.intern(name)?;
            strings.intern(value)?;
        }
        if !node.text.is_empty() {
            strings.intern(&node.text)?;
        }
        stack.extend(node.children.iter().rev());
    }
    Ok(())
}

/// Pass 2: emit node records, patching sibling links as offsets become
/// known.
fn layout_nodes(roots: &[BuilderNode], strings: &mut StringTable) -> Result<Vec<u8>> {
    let mut nodes = Vec::new();

    // synthetic root sentinel: empty name, no parent, no text
    nodes.push(TAG_ELEMENT);
    nodes.extend_from_slice(RawElement::new(0, 0, 0, 0, 0).as_bytes());

    struct Frame<'a> {
        children: std::slice::Iter<'a, BuilderNode>,
        parent_off: u32,
        prev_off: Option<u32>,
    }

    let mut stack = vec![Frame {
        children: roots.iter(),
        parent_off: 0,
        prev_off: None,
    }];

    while let Some(frame) = stack.last_mut() {
        let Some(child) = frame.children.next() else {
            // end of this parent's child list
            nodes.push(TAG_SENTINEL);
            stack.pop();
            continue;
        };

        let off = u32::try_from(nodes.len())
            .map_err(|_| Error::invalid_argument("node region exceeds 4 GiB"))?;
        if let Some(prev) = frame.prev_off {
            patch_next(&mut nodes, prev, off - prev);
        }
        frame.prev_off = Some(off);

        let attr_count = u8::try_from(child.attrs.len()).map_err(|_| {
            Error::invalid_argument(format!(
                "element '{}' has {} attributes (maximum 255)",
                child.element,
                child.attrs.len()
            ))
        })?;

        let name_off = strings.intern(&child.element)?;
        let text_off = if child.text.is_empty() {
            0
        } else {
            strings.intern(&child.text)?
        };
        let parent_off = frame.parent_off;

        nodes.push(TAG_ELEMENT);
        nodes.extend_from_slice(
            RawElement::new(name_off, off - parent_off, 0, text_off, attr_count).as_bytes(),
        );
        for (name, value) in &child.attrs {
            let raw = RawAttr::new(strings.intern(name)?, strings.intern(value)?);
            nodes.extend_from_slice(raw.as_bytes());
        }

        stack.push(Frame {
            children: child.children.iter(),
            parent_off: off,
            prev_off: None,
        });
    }

    Ok(nodes)
}

/// Overwrite the `next` field of the element record at `off`.
fn patch_next(nodes: &mut [u8], off: u32, delta: u32) {
    // tag byte + name leaves `parent` at +5 and `next` at +9
    let pos = off as usize + 9;
    nodes[pos..pos + 4].copy_from_slice(&delta.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::import::{parse_document, ImportOptions};
    use crate::silo::format::ELEMENT_FIXED_SIZE;

    const PLAIN: ImportOptions<'static> = ImportOptions {
        literal_text: false,
        native_langs: false,
        ignore_invalid: false,
        locales: &[],
    };

    fn blob_for(xml: &str) -> Vec<u8> {
        let roots = parse_document(xml, &PLAIN).unwrap();
        serialize(&roots, [0u8; 16]).unwrap()
    }

    #[test]
    fn empty_tree_is_root_and_sentinel() {
        let blob = serialize(&[], [0u8; 16]).unwrap();
        // header + root element record + root sentinel + "" string
        assert_eq!(blob.len(), HEADER_SIZE + ELEMENT_FIXED_SIZE + 1 + 1);
        assert_eq!(blob[HEADER_SIZE], TAG_ELEMENT);
        assert_eq!(blob[HEADER_SIZE + ELEMENT_FIXED_SIZE], TAG_SENTINEL);
        assert_eq!(*blob.last().unwrap(), 0);
    }

    #[test]
    fn serialization_is_deterministic() {
        let xml = r#"<r><a id="1">x</a><b id="2"><c/></b></r>"#;
        assert_eq!(blob_for(xml), blob_for(xml));
    }

    #[test]
    fn strings_are_deduplicated() {
        let blob = blob_for("<a><a><a>a</a></a></a>");
        let strtab =
            u32::from_le_bytes(blob[24..28].try_into().unwrap()) as usize;
        let strings = &blob[strtab..];
        // "" plus exactly one copy of "a"
        assert_eq!(strings, b"\0a\0");
    }

    #[test]
    fn string_region_ends_with_nul() {
        let blob = blob_for("<r><x>text</x></r>");
        assert_eq!(*blob.last().unwrap(), 0);
    }

    #[test]
    fn sibling_links_skip_subtrees() {
        // <r><a><b/></a><c/></r>: a's next must jump over b to c
        let blob = blob_for("<r><a><b/></a><c/></r>");
        let silo = crate::Silo::load_from_bytes(blob, crate::LoadFlags::NONE).unwrap();
        let r = silo.root().unwrap().child().unwrap().unwrap();
        let a = r.child().unwrap().unwrap();
        let c = a.next().unwrap().unwrap();
        assert_eq!(c.element().unwrap(), "c");
        assert!(c.next().unwrap().is_none());
    }

    #[test]
    fn too_many_attributes_is_rejected() {
        let mut attrs = String::new();
        for i in 0..300 {
            attrs.push_str(&format!(" a{i}=\"v\""));
        }
        let roots = parse_document(&format!("<e{attrs}/>"), &PLAIN).unwrap();
        let err = serialize(&roots, [0u8; 16]).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
    }
}
