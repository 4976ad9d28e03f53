//! # Silo Builder
//!
//! Collects XML sources and compiles them into a [`Silo`]. Sources are
//! kept verbatim until [`Builder::compile`] so the canonicalization
//! flags (which arrive at compile time) apply uniformly, and so the
//! source guid can be computed without parsing, which is what lets
//! [`Builder::ensure`] decide between loading a cached silo and
//! rebuilding it.

mod import;
mod serialize;

use std::path::Path;

use crc::{Crc, CRC_64_ECMA_182, CRC_64_XZ};
use tracing::debug;

use crate::error::{Error, Result};
use crate::silo::{format_guid, LoadFlags, Silo};
use import::ImportOptions;

bitflags::bitflags! {
    /// Flags controlling compilation and canonicalization.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CompileFlags: u32 {
        /// Preserve text whitespace verbatim instead of collapsing it.
        const LITERAL_TEXT = 1 << 0;
        /// Keep only translations whose `xml:lang` matches an added
        /// locale; untranslated elements are always kept.
        const NATIVE_LANGS = 1 << 1;
        /// Skip malformed nodes instead of aborting the import.
        const IGNORE_INVALID = 1 << 2;
    }
}

impl CompileFlags {
    pub const NONE: CompileFlags = CompileFlags::empty();
}

static CRC_HI: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);
static CRC_LO: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// Accumulates XML sources and locale preferences, then compiles silos.
#[derive(Debug, Default)]
pub struct Builder {
    sources: Vec<String>,
    locales: Vec<String>,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Queue an XML document for compilation.
    pub fn import_xml(&mut self, xml: &str) -> Result<()> {
        if xml.trim().is_empty() {
            return Err(Error::invalid_argument("cannot import an empty document"));
        }
        self.sources.push(xml.to_string());
        Ok(())
    }

    /// Queue an XML file for compilation.
    pub fn import_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let xml = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("failed to read '{}'", path.display()), e))?;
        debug!(path = %path.display(), bytes = xml.len(), "imported source file");
        self.import_xml(&xml)
    }

    /// Add a locale to the preference list used by
    /// [`CompileFlags::NATIVE_LANGS`], e.g. `"de"` or `"en_GB"`.
    pub fn add_locale(&mut self, locale: &str) {
        if !locale.is_empty() && !self.locales.iter().any(|l| l == locale) {
            self.locales.push(locale.to_string());
        }
    }

    /// Parse the queued sources and serialize them into a silo.
    pub fn compile(&self, flags: CompileFlags) -> Result<Silo> {
        self.compile_with_guid(flags, self.source_guid(flags, None))
    }

    /// Load the silo at `dst` if it was built from these sources,
    /// otherwise compile, write to `dst`, and return the fresh silo.
    ///
    /// `cache_key` lets callers partition the cache beyond the source
    /// content itself; it participates in the guid.
    pub fn ensure<P: AsRef<Path>>(
        &self,
        dst: P,
        flags: CompileFlags,
        cache_key: Option<&str>,
    ) -> Result<Silo> {
        let dst = dst.as_ref();
        let guid = self.source_guid(flags, cache_key);
        let want = format_guid(&guid);

        if dst.exists() {
            match Silo::load_from_file(dst, LoadFlags::NONE) {
                Ok(cached) if cached.guid() == want => {
                    debug!(path = %dst.display(), guid = %want, "silo cache hit");
                    return Ok(cached);
                }
                Ok(cached) => {
                    debug!(
                        path = %dst.display(),
                        cached = cached.guid(),
                        want = %want,
                        "silo cache stale, rebuilding"
                    );
                }
                Err(err) => {
                    debug!(path = %dst.display(), %err, "cached silo unusable, rebuilding");
                }
            }
        }

        let silo = self.compile_with_guid(flags, guid)?;
        silo.save_to_file(dst)?;
        Ok(silo)
    }

    fn compile_with_guid(&self, flags: CompileFlags, guid: [u8; 16]) -> Result<Silo> {
        let opts = ImportOptions {
            literal_text: flags.contains(CompileFlags::LITERAL_TEXT),
            native_langs: flags.contains(CompileFlags::NATIVE_LANGS),
            ignore_invalid: flags.contains(CompileFlags::IGNORE_INVALID),
            locales: &self.locales,
        };

        let mut roots = Vec::new();
        for source in &self.sources {
            roots.append(&mut import::parse_document(source, &opts)?);
        }

        let blob = serialize::serialize(&roots, guid)?;
        debug!(
            roots = roots.len(),
            bytes = blob.len(),
            "compiled silo"
        );
        Silo::load_from_bytes(blob, LoadFlags::NONE)
    }

    /// Deterministic guid over the sources, locales, flags and cache key.
    fn source_guid(&self, flags: CompileFlags, cache_key: Option<&str>) -> [u8; 16] {
        let mut hi = CRC_HI.digest();
        let mut lo = CRC_LO.digest();

        let mut feed = |bytes: &[u8]| {
            hi.update(bytes);
            hi.update(&[0]);
            lo.update(bytes);
            lo.update(&[0]);
        };

        for source in &self.sources {
            feed(source.as_bytes());
        }
        for locale in &self.locales {
            feed(locale.as_bytes());
        }
        feed(&flags.bits().to_le_bytes());
        if let Some(key) = cache_key {
            feed(key.as_bytes());
        }

        let mut guid = [0u8; 16];
        guid[..8].copy_from_slice(&hi.finalize().to_be_bytes());
        guid[8..].copy_from_slice(&lo.finalize().to_be_bytes());
        guid
    }
}
