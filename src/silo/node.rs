//! Node handles.
//!
//! A [`Node`] pairs shared ownership of a silo with the offset of one
//! element record inside it. Handles are cheap to create and navigate;
//! all traversal is offset arithmetic on the silo blob. Each handle also
//! carries its own map of opaque user payloads; the map belongs to the
//! handle, not the silo, so payloads never leak into other handles for
//! the same element.

use std::sync::Arc;

use hashbrown::HashMap;

use super::export::{self, ExportFlags};
use super::SiloCore;
use crate::error::{Error, Result};
use crate::query::Query;

/// A lightweight reference to one element within a silo.
#[derive(Debug, Clone)]
pub struct Node {
    silo: Arc<SiloCore>,
    off: u32,
    data: HashMap<String, Vec<u8>>,
}

impl PartialEq for Node {
    /// Two handles are equal iff they refer to the same silo and the
    /// same record; user data does not participate.
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.silo, &other.silo) && self.off == other.off
    }
}

impl Eq for Node {}

impl Node {
    pub(crate) fn new(silo: Arc<SiloCore>, off: u32) -> Node {
        Node {
            silo,
            off,
            data: HashMap::new(),
        }
    }

    pub(crate) fn offset(&self) -> u32 {
        self.off
    }

    pub(crate) fn core(&self) -> &Arc<SiloCore> {
        &self.silo
    }

    /// The interned element name; empty for the sentinel root.
    pub fn element(&self) -> Result<&str> {
        self.silo.element_name(self.off)
    }

    /// The element's text content, or `None` when unset.
    pub fn text(&self) -> Result<Option<&str>> {
        self.silo.text_of(self.off)
    }

    /// Attribute value by name, or `None` when the attribute is absent.
    pub fn attr(&self, name: &str) -> Result<Option<&str>> {
        self.silo.attr_of(self.off, name)
    }

    /// The parent node; `None` for the sentinel root.
    pub fn parent(&self) -> Result<Option<Node>> {
        Ok(self
            .silo
            .parent_off(self.off)?
            .map(|off| Node::new(Arc::clone(&self.silo), off)))
    }

    /// The first child, or `None` for a childless element.
    pub fn child(&self) -> Result<Option<Node>> {
        Ok(self
            .silo
            .child_off(self.off)?
            .map(|off| Node::new(Arc::clone(&self.silo), off)))
    }

    /// The next sibling, or `None` at the end of the sibling chain.
    pub fn next(&self) -> Result<Option<Node>> {
        Ok(self
            .silo
            .next_off(self.off)?
            .map(|off| Node::new(Arc::clone(&self.silo), off)))
    }

    /// All children in document order.
    pub fn children(&self) -> Result<Vec<Node>> {
        let mut out = Vec::new();
        let mut cur = self.child()?;
        while let Some(n) = cur {
            cur = n.next()?;
            out.push(n);
        }
        Ok(out)
    }

    /// Number of parent traversals to the sentinel root (which has
    /// depth 0).
    pub fn depth(&self) -> Result<u32> {
        self.silo.depth_of(self.off)
    }

    /// Query the subtree rooted at this node.
    ///
    /// The path is relative: a leading `/` is rejected, and siblings of
    /// this node are never considered even when they share its element
    /// name. `limit` bounds the result count (0 = unlimited).
    pub fn query(&self, xpath: &str, limit: usize) -> Result<Vec<Node>> {
        if xpath.starts_with('/') {
            return Err(Error::invalid_argument(format!(
                "absolute path '{xpath}' not allowed in a node-scoped query"
            )));
        }
        let element = self.element()?;
        // a query on the sentinel root is a whole-document query
        if element.is_empty() {
            let query = Query::compile(xpath)?;
            return crate::query::execute(&self.silo, None, &query, limit);
        }
        // prefix the path with this node's element name so the first
        // step resolves to the node itself
        let query = Query::compile(&format!("{element}/{xpath}"))?;
        crate::query::execute(&self.silo, Some(self.off), &query, limit)
    }

    /// Query the subtree and return the first result, or
    /// [`ErrorKind::NotFound`](crate::ErrorKind::NotFound) if nothing matched.
    pub fn query_first(&self, xpath: &str) -> Result<Node> {
        let mut results = self.query(xpath, 1)?;
        results
            .pop()
            .ok_or_else(|| Error::not_found(format!("no results for query '{xpath}'")))
    }

    /// Query the subtree and return the first result's text.
    ///
    /// Missing results and results without text are both
    /// [`ErrorKind::NotFound`](crate::ErrorKind::NotFound).
    pub fn query_text(&self, xpath: &str) -> Result<String> {
        let node = self.query_first(xpath)?;
        match node.text()? {
            Some(text) => Ok(text.to_string()),
            None => Err(Error::not_found(format!(
                "no text data for query '{xpath}'"
            ))),
        }
    }

    /// Query the subtree and export the first result as XML.
    pub fn query_export(&self, xpath: &str) -> Result<String> {
        let node = self.query_first(xpath)?;
        node.export(ExportFlags::NONE)
    }

    /// Export this node (and per `flags` its siblings) back to XML.
    pub fn export(&self, flags: ExportFlags) -> Result<String> {
        export::export_node(self, flags)
    }

    /// User payload previously stored with [`Node::set_data`].
    pub fn get_data(&self, key: &str) -> Option<&[u8]> {
        self.data.get(key).map(Vec::as_slice)
    }

    /// Attach an opaque payload to this handle.
    ///
    /// The payload lives and dies with this handle; other handles to the
    /// same element do not observe it.
    pub fn set_data(&mut self, key: &str, bytes: Vec<u8>) {
        self.data.insert(key.to_string(), bytes);
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::{Builder, CompileFlags};
    use crate::Silo;

    fn compile(xml: &str) -> Silo {
        let mut builder = Builder::new();
        builder.import_xml(xml).unwrap();
        builder.compile(CompileFlags::NONE).unwrap()
    }

    #[test]
    fn handles_compare_by_silo_and_offset() {
        let silo = compile("<r><a/><a/></r>");
        let first = silo.query_first("r/a").unwrap();
        let again = silo.query_first("r/a").unwrap();
        let second = silo.query("r/a", 0).unwrap().pop().unwrap();

        assert_eq!(first, again);
        assert_ne!(first, second);

        // equal structure in a different silo is a different node
        let other = compile("<r><a/><a/></r>");
        let foreign = other.query_first("r/a").unwrap();
        assert_ne!(first, foreign);
    }

    #[test]
    fn user_data_is_handle_local() {
        let silo = compile("<r><a/></r>");
        let mut first = silo.query_first("r/a").unwrap();
        first.set_data("key", b"payload".to_vec());
        assert_eq!(first.get_data("key"), Some(&b"payload"[..]));
        assert_eq!(first.get_data("other"), None);

        // a freshly created handle to the same element has no data
        let second = silo.query_first("r/a").unwrap();
        assert_eq!(second.get_data("key"), None);
    }

    #[test]
    fn scoped_query_stays_inside_subtree() {
        let silo = compile("<r><a><b>one</b></a><a><b>two</b></a></r>");
        let second_a = silo.query("r/a", 0).unwrap().pop().unwrap();

        let hits = second_a.query("b", 0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text().unwrap(), Some("two"));
    }

    #[test]
    fn scoped_query_rejects_absolute_path() {
        let silo = compile("<r><a/></r>");
        let a = silo.query_first("r/a").unwrap();
        let err = a.query("/r", 0).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
    }

    #[test]
    fn query_text_reports_missing_text() {
        let silo = compile("<r><a><b>hi</b><c/></a></r>");
        let a = silo.query_first("r/a").unwrap();

        assert_eq!(a.query_text("b").unwrap(), "hi");
        let err = a.query_text("c").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
        let err = a.query_text("missing").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
    }

    #[test]
    fn children_returns_document_order() {
        let silo = compile("<r><a/><b/><c/></r>");
        let r = silo.query_first("r").unwrap();
        let names: Vec<_> = r
            .children()
            .unwrap()
            .iter()
            .map(|n| n.element().unwrap().to_string())
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
    }
}
