//! Fuzz testing for the query compiler and executor.
//!
//! Arbitrary expressions must either compile or fail with a typed
//! error; running the compiled form against a fixed silo must never
//! panic.

#![no_main]

use std::sync::OnceLock;

use libfuzzer_sys::fuzz_target;
use xmlsilo::{Builder, CompileFlags, Silo};

fn silo() -> &'static Silo {
    static SILO: OnceLock<Silo> = OnceLock::new();
    SILO.get_or_init(|| {
        let mut builder = Builder::new();
        builder
            .import_xml(
                r#"<r><a id="1">one</a><a id="2">two</a><g><i n="0"/><i n="x"/></g></r>"#,
            )
            .expect("static document imports");
        builder.compile(CompileFlags::NONE).expect("static document compiles")
    })
}

fuzz_target!(|expr: &str| {
    let silo = silo();
    let _ = silo.query(expr, 8);
    if let Some(node) = silo.root().and_then(|r| r.child().ok().flatten()) {
        let _ = node.query(expr, 8);
    }
});
