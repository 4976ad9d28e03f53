//! # xmlsilo - Compiled, Queryable XML
//!
//! xmlsilo compiles XML documents into "silos": compact binary blobs
//! that can be memory-mapped straight from disk, queried in
//! microseconds with a restricted XPath dialect, and shared between
//! processes without any parsing at load time. This implementation
//! prioritizes:
//!
//! - **Zero-copy reads**: element names, attributes and text are served
//!   as slices of the mapped blob; navigation is offset arithmetic
//! - **O(1) loading**: only the header is validated up front, every
//!   record dereference is bounds-checked on access instead
//! - **Deterministic output**: equal input compiles to byte-identical
//!   blobs, so silos can be cached and compared by content guid
//!
//! ## Quick Start
//!
//! ```ignore
//! use xmlsilo::{Builder, CompileFlags, LoadFlags, Silo};
//!
//! let mut builder = Builder::new();
//! builder.import_xml("<r><a id=\"1\">hello</a></r>")?;
//! let silo = builder.compile(CompileFlags::NONE)?;
//! silo.save_to_file("doc.silo")?;
//!
//! let silo = Silo::load_from_file("doc.silo", LoadFlags::NONE)?;
//! let node = silo.query_first("r/a[@id=\"1\"]")?;
//! assert_eq!(node.text()?, Some("hello"));
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │     Public API (Silo / Node)        │
//! ├──────────────────┬──────────────────┤
//! │  Query Engine    │     Exporter     │
//! │ (compile + eval) │   (silo → XML)   │
//! ├──────────────────┴──────────────────┤
//! │      Reader (cursor over blob)      │
//! ├─────────────────────────────────────┤
//! │  Builder (XML import → serializer)  │
//! ├─────────────────────────────────────┤
//! │   Blob (owned bytes or read-only    │
//! │            memory map)              │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`silo`]: blob format, loader, cursor navigation, node handles,
//!   XML export
//! - [`builder`]: XML import, canonicalization, serialization, rebuild
//!   caching
//! - [`query`]: the XPath-subset compiler and executor
//! - [`error`]: the closed error-kind set shared by everything
//! - [`cli`]: command layer behind the `xmlsilo` binary

pub mod builder;
pub mod cli;
pub mod error;
pub mod query;
pub mod silo;

pub use builder::{Builder, CompileFlags};
pub use error::{Error, ErrorKind, Result};
pub use query::Query;
pub use silo::export::ExportFlags;
pub use silo::{LoadFlags, Node, Silo};
