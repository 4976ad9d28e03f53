//! Fuzz testing for the XML importer.
//!
//! Arbitrary input must either compile into a loadable silo or fail
//! with a typed error, in both strict and recovering modes.

#![no_main]

use libfuzzer_sys::fuzz_target;
use xmlsilo::{Builder, CompileFlags, ExportFlags};

fuzz_target!(|xml: &str| {
    for flags in [CompileFlags::NONE, CompileFlags::IGNORE_INVALID] {
        let mut builder = Builder::new();
        if builder.import_xml(xml).is_err() {
            continue;
        }
        let Ok(silo) = builder.compile(flags) else {
            continue;
        };
        // whatever compiled must round-trip through the reader
        let _ = silo.to_xml(ExportFlags::NONE);
        let _ = silo.dump();
    }
});
