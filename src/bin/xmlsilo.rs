//! # xmlsilo CLI Entry Point
//!
//! Binary entry point for the silo command-line tool.
//!
//! ## Usage
//!
//! ```bash
//! # Compile XML into a silo
//! xmlsilo compile example.silo example.xml
//!
//! # Inspect a silo
//! xmlsilo dump example.silo
//! xmlsilo export example.silo
//!
//! # Query it
//! xmlsilo query example.silo "components/component[@type=\"desktop\"]/id"
//! ```

use eyre::Result;
use std::env;
use xmlsilo::cli::{self, CliOptions};

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    let mut options = CliOptions::default();
    let mut command: Option<String> = None;
    let mut command_args: Vec<String> = Vec::new();

    for arg in &args[1..] {
        match arg.as_str() {
            "--help" | "-h" if command.is_none() => {
                print_usage();
                return Ok(());
            }
            "--version" if command.is_none() => {
                println!("xmlsilo {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--verbose" | "-v" => options.verbose = true,
            "--force" => options.force = true,
            _ => {
                if command.is_none() {
                    command = Some(arg.clone());
                } else {
                    command_args.push(arg.clone());
                }
            }
        }
    }

    if options.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(std::io::stderr)
            .init();
    }

    let command = match command {
        Some(command) => command,
        None => {
            print_usage();
            return Ok(());
        }
    };

    cli::run_command(&command, &options, &command_args)
}

fn print_usage() {
    println!("xmlsilo - Binary XML utility");
    println!();
    println!("USAGE:");
    println!("    xmlsilo [OPTIONS] COMMAND [ARGS...]");
    println!();
    println!("COMMANDS:");
    print!("{}", cli::command_summaries());
    println!();
    println!("OPTIONS:");
    println!("    -v, --verbose      Print verbose debug statements");
    println!("        --force        Force parsing of invalid files");
    println!("    -h, --help         Print help information");
    println!("        --version      Print version information");
}
