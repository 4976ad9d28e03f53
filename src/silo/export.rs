//! XML export.
//!
//! Walks a silo node and its descendants and re-emits XML text. The walk
//! is an iterative cursor loop over the child/next/parent primitives, so
//! a hostile blob with pathological nesting can make the export fail
//! with `InvalidData` but never exhaust the thread stack.

use crate::error::{Error, Result};
use crate::silo::Node;

bitflags::bitflags! {
    /// Flags controlling XML export formatting.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExportFlags: u32 {
        /// Prepend an XML declaration.
        const ADD_HEADER = 1 << 0;
        /// Emit a newline after each tag.
        const FORMAT_MULTILINE = 1 << 1;
        /// Indent nested tags by two spaces per level.
        const FORMAT_INDENT = 1 << 2;
        /// Also emit the start node's following siblings.
        const INCLUDE_SIBLINGS = 1 << 3;
        /// Emit childless, textless elements as `<name/>`.
        const COLLAPSE_EMPTY = 1 << 4;
    }
}

impl ExportFlags {
    pub const NONE: ExportFlags = ExportFlags::empty();
}

/// Export `node` (and per `flags` its following siblings) as XML text.
pub fn export_node(node: &Node, flags: ExportFlags) -> Result<String> {
    let core = node.core();

    // Export directed at the sentinel root means "the whole document".
    if node.element()?.is_empty() {
        return match node.child()? {
            Some(first) => export_node(&first, flags | ExportFlags::INCLUDE_SIBLINGS),
            None => Err(Error::not_found("silo has no root element")),
        };
    }

    let multiline = flags.contains(ExportFlags::FORMAT_MULTILINE);
    let mut out = String::new();

    if flags.contains(ExportFlags::ADD_HEADER) {
        out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    }

    let mut cur = node.offset();
    let mut depth = 0u32;

    // a well-formed silo visits each element at most once; corrupt
    // sibling links that revisit records trip this counter instead of
    // walking forever
    let mut budget = core.max_element_count();

    'node: loop {
        if budget == 0 {
            return Err(Error::invalid_data(format!(
                "node walk revisits records near offset {cur}"
            )));
        }
        budget -= 1;

        let name = core.element_name(cur)?;
        push_indent(&mut out, flags, depth);
        out.push('<');
        out.push_str(name);
        for (attr_name, attr_value) in core.attr_pairs(cur)? {
            out.push(' ');
            out.push_str(attr_name);
            out.push_str("=\"");
            push_escaped(&mut out, attr_value);
            out.push('"');
        }

        let text = core.text_of(cur)?;
        let child = core.child_off(cur)?;

        if child.is_none() && text.is_none() && flags.contains(ExportFlags::COLLAPSE_EMPTY) {
            out.push_str("/>");
            push_newline(&mut out, multiline);
        } else {
            out.push('>');
            if let Some(text) = text {
                push_escaped(&mut out, text);
            }
            if let Some(child) = child {
                if multiline {
                    out.push('\n');
                }
                depth += 1;
                cur = child;
                continue 'node;
            }
            out.push_str("</");
            out.push_str(name);
            out.push('>');
            push_newline(&mut out, multiline);
        }

        // Advance: next sibling, else climb and close parents until one
        // has a sibling or we are back at the start level.
        loop {
            let sibling = core.next_off(cur)?;
            if depth == 0 {
                match sibling {
                    Some(next) if flags.contains(ExportFlags::INCLUDE_SIBLINGS) => {
                        cur = next;
                        continue 'node;
                    }
                    _ => return Ok(out),
                }
            }
            if let Some(next) = sibling {
                cur = next;
                continue 'node;
            }

            depth -= 1;
            cur = core.parent_off(cur)?.ok_or_else(|| {
                Error::invalid_data(format!(
                    "walk reached a parentless record at offset {cur} below the start level"
                ))
            })?;
            push_indent(&mut out, flags, depth);
            out.push_str("</");
            out.push_str(core.element_name(cur)?);
            out.push('>');
            push_newline(&mut out, multiline);
        }
    }
}

fn push_newline(out: &mut String, multiline: bool) {
    if multiline {
        out.push('\n');
    }
}

fn push_indent(out: &mut String, flags: ExportFlags, depth: u32) {
    if flags.contains(ExportFlags::FORMAT_INDENT) {
        for _ in 0..depth {
            out.push_str("  ");
        }
    }
}

/// Entity-escape text and attribute values.
fn push_escaped(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{Builder, CompileFlags};
    use crate::Silo;

    fn compile(xml: &str) -> Silo {
        let mut builder = Builder::new();
        builder.import_xml(xml).unwrap();
        builder.compile(CompileFlags::NONE).unwrap()
    }

    #[test]
    fn plain_export_is_compact() {
        let silo = compile(r#"<r><a id="1">hi</a><b/></r>"#);
        let xml = silo.to_xml(ExportFlags::NONE).unwrap();
        assert_eq!(xml, r#"<r><a id="1">hi</a><b></b></r>"#);
    }

    #[test]
    fn collapse_empty_produces_self_closing_tags() {
        let silo = compile("<r><b/></r>");
        let xml = silo.to_xml(ExportFlags::COLLAPSE_EMPTY).unwrap();
        assert_eq!(xml, "<r><b/></r>");
    }

    #[test]
    fn multiline_indent_shape() {
        let silo = compile("<r><a>hi</a><b/></r>");
        let xml = silo
            .to_xml(
                ExportFlags::FORMAT_MULTILINE
                    | ExportFlags::FORMAT_INDENT
                    | ExportFlags::COLLAPSE_EMPTY,
            )
            .unwrap();
        assert_eq!(xml, "<r>\n  <a>hi</a>\n  <b/>\n</r>\n");
    }

    #[test]
    fn header_flag_prepends_declaration() {
        let silo = compile("<r/>");
        let xml = silo
            .to_xml(ExportFlags::ADD_HEADER | ExportFlags::COLLAPSE_EMPTY)
            .unwrap();
        assert_eq!(xml, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<r/>");
    }

    #[test]
    fn text_and_attributes_are_escaped() {
        let silo = compile(r#"<r><a note="a&amp;b">1 &lt; 2</a></r>"#);
        let xml = silo.to_xml(ExportFlags::NONE).unwrap();
        assert_eq!(xml, r#"<r><a note="a&amp;b">1 &lt; 2</a></r>"#);
    }

    #[test]
    fn node_export_excludes_siblings_by_default() {
        let silo = compile("<r><a>one</a><b>two</b></r>");
        let a = silo.query_first("r/a").unwrap();

        assert_eq!(a.export(ExportFlags::NONE).unwrap(), "<a>one</a>");
        assert_eq!(
            a.export(ExportFlags::INCLUDE_SIBLINGS).unwrap(),
            "<a>one</a><b>two</b>"
        );
    }
}
