//! XML import.
//!
//! A small hand-written parser that turns XML source text into the
//! builder tree consumed by the serializer. The accepted subset covers
//! elements, attributes, character data, CDATA sections and the five
//! predefined entities plus numeric character references; comments,
//! processing instructions and DOCTYPE declarations are skipped. Parsing
//! is iterative (open elements live on an explicit stack), so input
//! nesting depth is bounded only by memory.

use std::borrow::Cow;

use memchr::memchr;
use smallvec::SmallVec;

use crate::error::{Error, Result};

/// One element of the unbuilt tree handed to the serializer.
#[derive(Debug, Clone, Default)]
pub(crate) struct BuilderNode {
    pub element: String,
    /// Accumulated character data; empty means "no text".
    pub text: String,
    pub attrs: SmallVec<[(String, String); 4]>,
    pub children: Vec<BuilderNode>,
}

/// Canonicalization options derived from the compile flags.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ImportOptions<'a> {
    /// Preserve text whitespace verbatim instead of collapsing it.
    pub literal_text: bool,
    /// Drop elements whose `xml:lang` is not in `locales`.
    pub native_langs: bool,
    /// Skip malformed nodes instead of aborting the import.
    pub ignore_invalid: bool,
    pub locales: &'a [String],
}

/// Parse a document into its top-level elements.
pub(crate) fn parse_document(xml: &str, opts: &ImportOptions) -> Result<Vec<BuilderNode>> {
    let mut parser = Parser {
        input: xml,
        pos: 0,
        opts: *opts,
    };
    parser.run()
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    opts: ImportOptions<'a>,
}

impl<'a> Parser<'a> {
    fn run(&mut self) -> Result<Vec<BuilderNode>> {
        let mut roots = Vec::new();
        let mut stack: Vec<BuilderNode> = Vec::new();

        loop {
            self.take_text(&mut stack);
            if self.pos >= self.input.len() {
                break;
            }

            if self.starts_with("<!--") {
                self.skip_until("-->", "comment")?;
            } else if self.starts_with("<![CDATA[") {
                let content = self.take_cdata()?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(content);
                }
            } else if self.starts_with("<!") {
                self.skip_doctype()?;
            } else if self.starts_with("<?") {
                self.skip_until("?>", "processing instruction")?;
            } else if self.starts_with("</") {
                self.close_element(&mut stack, &mut roots)?;
            } else {
                self.open_element(&mut stack, &mut roots)?;
            }
        }

        if let Some(open) = stack.first() {
            if !self.opts.ignore_invalid {
                return Err(Error::invalid_data(format!(
                    "unclosed element '<{}>' at end of input",
                    open.element
                )));
            }
            // close whatever is left, innermost first
            while let Some(node) = stack.pop() {
                if let Some(node) = self.finish(node) {
                    self.attach(node, &mut stack, &mut roots);
                }
            }
        }

        Ok(roots)
    }

    /// Consume character data up to the next `<`, appending it (entity
    /// decoded) to the innermost open element. Text outside the root is
    /// discarded.
    fn take_text(&mut self, stack: &mut [BuilderNode]) {
        let rest = &self.input[self.pos..];
        let len = memchr(b'<', rest.as_bytes()).unwrap_or(rest.len());
        if len > 0 {
            if let Some(top) = stack.last_mut() {
                top.text.push_str(&decode_entities(&rest[..len]));
            }
            self.pos += len;
        }
    }

    fn open_element(
        &mut self,
        stack: &mut Vec<BuilderNode>,
        roots: &mut Vec<BuilderNode>,
    ) -> Result<()> {
        let tag_pos = self.pos;
        self.pos += 1; // '<'

        let name = match self.take_name() {
            Some(name) => name.to_string(),
            None => {
                if self.opts.ignore_invalid {
                    return self.skip_to_tag_end();
                }
                return Err(Error::invalid_data(format!(
                    "invalid element name at byte {tag_pos}"
                )));
            }
        };

        let mut node = BuilderNode {
            element: name,
            ..BuilderNode::default()
        };

        loop {
            self.skip_whitespace();
            if self.starts_with("/>") {
                self.pos += 2;
                if let Some(node) = self.finish(node) {
                    self.attach(node, stack, roots);
                }
                return Ok(());
            }
            if self.starts_with(">") {
                self.pos += 1;
                stack.push(node);
                return Ok(());
            }
            if self.pos >= self.input.len() {
                return Err(Error::invalid_data(format!(
                    "unterminated tag starting at byte {tag_pos}"
                )));
            }

            match self.take_attribute() {
                Ok(attr) => node.attrs.push(attr),
                Err(err) => {
                    if !self.opts.ignore_invalid {
                        return Err(err);
                    }
                    // drop the malformed attribute and resynchronize
                    self.skip_bad_attribute();
                }
            }
        }
    }

    fn close_element(
        &mut self,
        stack: &mut Vec<BuilderNode>,
        roots: &mut Vec<BuilderNode>,
    ) -> Result<()> {
        let tag_pos = self.pos;
        self.pos += 2; // '</'
        let name = self.take_name().unwrap_or("").to_string();
        self.skip_whitespace();
        if self.starts_with(">") {
            self.pos += 1;
        } else if !self.opts.ignore_invalid {
            return Err(Error::invalid_data(format!(
                "unterminated closing tag at byte {tag_pos}"
            )));
        } else {
            self.skip_to_tag_end()?;
        }

        match stack.last() {
            None => {
                if !self.opts.ignore_invalid {
                    return Err(Error::invalid_data(format!(
                        "unexpected closing tag '</{name}>' at byte {tag_pos}"
                    )));
                }
            }
            Some(top) if top.element != name && !self.opts.ignore_invalid => {
                return Err(Error::invalid_data(format!(
                    "mismatched closing tag '</{}>' at byte {} (expected '</{}>')",
                    name, tag_pos, top.element
                )));
            }
            Some(_) => {
                if let Some(node) = stack.pop() {
                    if let Some(node) = self.finish(node) {
                        self.attach(node, stack, roots);
                    }
                }
            }
        }
        Ok(())
    }

    /// Canonicalize a completed element; `None` drops it entirely.
    fn finish(&self, mut node: BuilderNode) -> Option<BuilderNode> {
        if !self.opts.literal_text {
            node.text = collapse_whitespace(&node.text);
        }
        if self.opts.native_langs {
            if let Some((_, lang)) = node.attrs.iter().find(|(name, _)| name == "xml:lang") {
                if !self.opts.locales.iter().any(|locale| locale == lang) {
                    return None;
                }
            }
        }
        Some(node)
    }

    fn attach(
        &self,
        node: BuilderNode,
        stack: &mut [BuilderNode],
        roots: &mut Vec<BuilderNode>,
    ) {
        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => roots.push(node),
        }
    }

    fn take_attribute(&mut self) -> Result<(String, String)> {
        let attr_pos = self.pos;
        let name = self
            .take_name()
            .ok_or_else(|| {
                Error::invalid_data(format!("invalid attribute name at byte {attr_pos}"))
            })?
            .to_string();

        self.skip_whitespace();
        if !self.starts_with("=") {
            return Err(Error::invalid_data(format!(
                "attribute '{name}' at byte {attr_pos} has no value"
            )));
        }
        self.pos += 1;
        self.skip_whitespace();

        let quote = match self.input.as_bytes().get(self.pos) {
            Some(&q @ (b'"' | b'\'')) => q,
            _ => {
                return Err(Error::invalid_data(format!(
                    "attribute '{name}' at byte {attr_pos} has an unquoted value"
                )));
            }
        };
        self.pos += 1;

        let rest = &self.input[self.pos..];
        let end = memchr(quote, rest.as_bytes()).ok_or_else(|| {
            Error::invalid_data(format!(
                "unterminated attribute value for '{name}' at byte {attr_pos}"
            ))
        })?;
        let value = decode_entities(&rest[..end]).into_owned();
        self.pos += end + 1;

        Ok((name, value))
    }

    /// After a bad attribute, advance to the next whitespace or tag end
    /// so parsing can continue with the rest of the tag. A lone `/` is
    /// consumed like any other byte; only `/>` terminates the tag.
    fn skip_bad_attribute(&mut self) {
        while let Some(&b) = self.input.as_bytes().get(self.pos) {
            if b.is_ascii_whitespace() || b == b'>' {
                break;
            }
            if b == b'/' && self.input.as_bytes().get(self.pos + 1) == Some(&b'>') {
                break;
            }
            self.pos += 1;
        }
    }

    fn take_name(&mut self) -> Option<&'a str> {
        let bytes = self.input.as_bytes();
        let start = self.pos;
        match bytes.get(start) {
            Some(&b) if is_name_start(b) => {}
            _ => return None,
        }
        let mut end = start + 1;
        while let Some(&b) = bytes.get(end) {
            if !is_name_byte(b) {
                break;
            }
            end += 1;
        }
        self.pos = end;
        Some(&self.input[start..end])
    }

    fn take_cdata(&mut self) -> Result<&'a str> {
        let start = self.pos + "<![CDATA[".len();
        let rest = &self.input[start..];
        let end = rest.find("]]>").ok_or_else(|| {
            Error::invalid_data(format!("unterminated CDATA section at byte {}", self.pos))
        })?;
        self.pos = start + end + 3;
        Ok(&rest[..end])
    }

    /// DOCTYPE declarations may nest an internal subset in brackets.
    fn skip_doctype(&mut self) -> Result<()> {
        let start = self.pos;
        let bytes = self.input.as_bytes();
        let mut depth = 0usize;
        let mut pos = self.pos;
        while let Some(&b) = bytes.get(pos) {
            match b {
                b'[' => depth += 1,
                b']' => depth = depth.saturating_sub(1),
                b'>' if depth == 0 => {
                    self.pos = pos + 1;
                    return Ok(());
                }
                _ => {}
            }
            pos += 1;
        }
        Err(Error::invalid_data(format!(
            "unterminated declaration at byte {start}"
        )))
    }

    fn skip_until(&mut self, terminator: &str, what: &str) -> Result<()> {
        let rest = &self.input[self.pos..];
        match rest.find(terminator) {
            Some(end) => {
                self.pos += end + terminator.len();
                Ok(())
            }
            None => Err(Error::invalid_data(format!(
                "unterminated {what} at byte {}",
                self.pos
            ))),
        }
    }

    fn skip_to_tag_end(&mut self) -> Result<()> {
        let rest = &self.input[self.pos..];
        match memchr(b'>', rest.as_bytes()) {
            Some(end) => {
                self.pos += end + 1;
                Ok(())
            }
            None => {
                self.pos = self.input.len();
                Ok(())
            }
        }
    }

    fn skip_whitespace(&mut self) {
        let bytes = self.input.as_bytes();
        while let Some(&b) = bytes.get(self.pos) {
            if !b.is_ascii_whitespace() {
                break;
            }
            self.pos += 1;
        }
    }

    fn starts_with(&self, prefix: &str) -> bool {
        self.input[self.pos..].starts_with(prefix)
    }
}

fn is_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b >= 0x80
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b':') || b >= 0x80
}

/// Decode the predefined entities and numeric character references.
/// Unknown entities are kept verbatim.
pub(crate) fn decode_entities(input: &str) -> Cow<'_, str> {
    if memchr(b'&', input.as_bytes()).is_none() {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        match rest.find(';') {
            // entity references are short; a distant ';' is unrelated
            Some(semi) if semi <= 10 => {
                match decode_entity(&rest[1..semi]) {
                    Some(c) => {
                        out.push(c);
                        rest = &rest[semi + 1..];
                    }
                    None => {
                        out.push('&');
                        rest = &rest[1..];
                    }
                }
            }
            _ => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let digits = entity.strip_prefix('#')?;
            let code = match digits.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => digits.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// Trim surrounding whitespace and collapse interior runs to one space.
pub(crate) fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            pending_space = !out.is_empty();
        } else {
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.push(c);
        }
    }
    out
}
