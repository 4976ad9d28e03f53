//! # Command Layer
//!
//! Implements the `xmlsilo` subcommands. Each command is an entry in a
//! static table pairing the name with its argument synopsis, description
//! and handler; the binary entry point parses global flags and delegates
//! here. Errors bubble up as `eyre` reports and the binary turns them
//! into a non-zero exit.

use eyre::{bail, Result, WrapErr};

use crate::silo::export::ExportFlags;
use crate::{Builder, CompileFlags, LoadFlags, Silo};

/// Global options shared by all commands.
#[derive(Debug, Default)]
pub struct CliOptions {
    pub verbose: bool,
    /// Force parsing of invalid files (skips the magic check).
    pub force: bool,
}

impl CliOptions {
    fn load_flags(&self) -> LoadFlags {
        if self.force {
            LoadFlags::NO_MAGIC
        } else {
            LoadFlags::NONE
        }
    }
}

struct Command {
    name: &'static str,
    arguments: &'static str,
    description: &'static str,
    run: fn(&CliOptions, &[String]) -> Result<()>,
}

const COMMANDS: &[Command] = &[
    Command {
        name: "compile",
        arguments: "FILE-OUT FILE-IN...",
        description: "Compile XML to a silo",
        run: cmd_compile,
    },
    Command {
        name: "dump",
        arguments: "FILENAME",
        description: "Dump a silo's records",
        run: cmd_dump,
    },
    Command {
        name: "export",
        arguments: "FILENAME",
        description: "Export a silo back to XML",
        run: cmd_export,
    },
    Command {
        name: "query",
        arguments: "FILENAME XPATH",
        description: "Query a silo",
        run: cmd_query,
    },
];

/// Dispatch a subcommand by name.
pub fn run_command(name: &str, options: &CliOptions, args: &[String]) -> Result<()> {
    for command in COMMANDS {
        if command.name == name {
            return (command.run)(options, args);
        }
    }
    bail!("unknown command '{name}', expected one of: {}", command_names());
}

/// One line per command, for the usage text.
pub fn command_summaries() -> String {
    let mut out = String::new();
    for command in COMMANDS {
        out.push_str(&format!(
            "    {:<28}{}\n",
            format!("{} {}", command.name, command.arguments),
            command.description
        ));
    }
    out
}

fn command_names() -> String {
    COMMANDS
        .iter()
        .map(|c| c.name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn cmd_dump(options: &CliOptions, args: &[String]) -> Result<()> {
    if args.is_empty() {
        bail!("invalid arguments, expected FILENAME -- e.g. `example.silo`");
    }
    for path in args {
        let silo = Silo::load_from_file(path, options.load_flags())
            .wrap_err_with(|| format!("failed to load '{path}'"))?;
        print!("{}", silo.dump()?);
    }
    Ok(())
}

fn cmd_export(options: &CliOptions, args: &[String]) -> Result<()> {
    if args.is_empty() {
        bail!("invalid arguments, expected FILENAME -- e.g. `example.silo`");
    }
    for path in args {
        let silo = Silo::load_from_file(path, options.load_flags())
            .wrap_err_with(|| format!("failed to load '{path}'"))?;
        let xml = silo.to_xml(
            ExportFlags::ADD_HEADER
                | ExportFlags::FORMAT_MULTILINE
                | ExportFlags::FORMAT_INDENT
                | ExportFlags::INCLUDE_SIBLINGS,
        )?;
        print!("{xml}");
    }
    Ok(())
}

fn cmd_query(_options: &CliOptions, args: &[String]) -> Result<()> {
    if args.len() != 2 {
        bail!("invalid arguments, expected FILENAME XPATH -- e.g. `example.silo components/id`");
    }
    let silo = Silo::load_from_file(&args[0], LoadFlags::NONE)
        .wrap_err_with(|| format!("failed to load '{}'", args[0]))?;

    let results = silo.query(&args[1], 0)?;
    if results.is_empty() {
        bail!("no results for query '{}'", args[1]);
    }
    for node in results {
        match node.text()? {
            Some(text) => println!("RESULT: {text}"),
            None => println!("RESULT: {}", node.export(ExportFlags::COLLAPSE_EMPTY)?),
        }
    }
    Ok(())
}

fn cmd_compile(_options: &CliOptions, args: &[String]) -> Result<()> {
    if args.len() < 2 {
        bail!("invalid arguments, expected FILE-OUT FILE-IN... -- e.g. `example.silo example.xml`");
    }
    let mut builder = Builder::new();
    for path in &args[1..] {
        builder
            .import_file(path)
            .wrap_err_with(|| format!("failed to import '{path}'"))?;
    }
    builder
        .ensure(&args[0], CompileFlags::NONE, None)
        .wrap_err_with(|| format!("failed to compile '{}'", args[0]))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_command_is_an_error() {
        let err = run_command("frobnicate", &CliOptions::default(), &[]).unwrap_err();
        assert!(err.to_string().contains("unknown command"));
    }

    #[test]
    fn commands_validate_arguments() {
        let opts = CliOptions::default();
        assert!(run_command("dump", &opts, &[]).is_err());
        assert!(run_command("query", &opts, &["only-one".into()]).is_err());
        assert!(run_command("compile", &opts, &["only-one".into()]).is_err());
    }

    #[test]
    fn compile_then_query_through_the_table() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("doc.xml");
        let dst = dir.path().join("doc.silo");
        std::fs::write(&src, "<r><id>hello</id></r>").unwrap();

        let opts = CliOptions::default();
        run_command(
            "compile",
            &opts,
            &[dst.display().to_string(), src.display().to_string()],
        )
        .unwrap();

        run_command(
            "query",
            &opts,
            &[dst.display().to_string(), "r/id".to_string()],
        )
        .unwrap();
    }

    #[test]
    fn summaries_mention_every_command() {
        let text = command_summaries();
        for name in ["dump", "export", "query", "compile"] {
            assert!(text.contains(name));
        }
    }
}
