//! Fuzz testing for silo loading and navigation.
//!
//! Feeds arbitrary byte sequences to the loader and, when one passes
//! header validation, exercises every read path. Nothing here may
//! panic or read out of bounds; malformed records must surface as
//! errors.

#![no_main]

use libfuzzer_sys::fuzz_target;
use xmlsilo::{ExportFlags, LoadFlags, Silo};

fuzz_target!(|data: &[u8]| {
    for flags in [LoadFlags::NONE, LoadFlags::NO_MAGIC] {
        let Ok(silo) = Silo::load_from_bytes(data.to_vec(), flags) else {
            continue;
        };

        let _ = silo.valid();
        let _ = silo.dump();
        let _ = silo.to_xml(ExportFlags::FORMAT_MULTILINE | ExportFlags::FORMAT_INDENT);
        let _ = silo.query("*/*", 16);

        if let Some(root) = silo.root() {
            let mut cursor = root.child();
            while let Ok(Some(node)) = cursor {
                let _ = node.element();
                let _ = node.text();
                let _ = node.attr("id");
                let _ = node.depth();
                cursor = node.next();
            }
        }
    }
});
