//! cextc compiler CLI
//!
//! Usage: cextc <input.json> [-o output.c]

use cextc::driver::OptionOverrides;
use cextc::options::{CleanupLevel, StringEncoding};
use cextc::Driver;
use clap::Parser;
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cextc")]
#[command(version)]
#[command(about = "Compiles an analyzed module into a CPython extension C source", long_about = None)]
struct Args {
    /// Serialized module, symbol table and options (.json)
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output C file (defaults to <input>.c)
    #[arg(short, long, value_name = "OUTPUT")]
    output: Option<PathBuf>,

    /// Emit #line directives pointing back at the source
    #[arg(long, default_value_t = false)]
    line_directives: bool,

    /// Add a main() that embeds the interpreter and imports the module
    #[arg(long, default_value_t = false)]
    embed_main: bool,

    /// Module state released on unload (0-3)
    #[arg(long, value_name = "N", value_parser = parse_cleanup_level)]
    cleanup_level: Option<CleanupLevel>,

    /// Default freelist size for extension types
    #[arg(long, value_name = "N")]
    freelist: Option<usize>,

    /// Encoding for C string conversions
    #[arg(long, value_name = "E")]
    string_encoding: Option<String>,

    /// Do not take part in cyclic garbage collection
    #[arg(long, default_value_t = false)]
    no_gc: bool,

    /// Print the module tree for debugging
    #[arg(long, default_value_t = false)]
    dump_tree: bool,

    /// Verbose logging
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn parse_cleanup_level(s: &str) -> Result<CleanupLevel, String> {
    let level: u8 = s.parse().map_err(|e| format!("{}", e))?;
    CleanupLevel::try_from(level).map_err(|e| e.to_string())
}

fn write_output(path: &Path, text: &str) -> bool {
    match std::fs::write(path, text) {
        Ok(()) => true,
        Err(e) => {
            eprintln!("{}: could not write file '{}': {}", "error".red().bold(), path.display(), e);
            false
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_filter = if args.verbose { "cextc=debug" } else { "cextc=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with_writer(std::io::stderr)
        .init();

    if args.input.extension().map_or(true, |ext| ext != "json") {
        eprintln!(
            "{}: input file must have .json extension: {}",
            "error".red().bold(),
            args.input.display()
        );
        return ExitCode::FAILURE;
    }

    let output = args.output.clone().unwrap_or_else(|| args.input.with_extension("c"));

    let mut driver = match Driver::from_path(&args.input) {
        Ok(driver) => driver,
        Err(diag) => {
            eprintln!("{}", diag);
            return ExitCode::FAILURE;
        }
    };
    driver.set_overrides(OptionOverrides {
        line_directives: args.line_directives,
        embed_main: args.embed_main,
        cleanup_level: args.cleanup_level,
        freelist: args.freelist,
        string_encoding: args.string_encoding.map(StringEncoding::from),
        no_gc: args.no_gc,
    });
    driver.set_dump_tree(args.dump_tree);

    match driver.compile() {
        Ok(result) => {
            for diag in &result.diagnostics {
                eprintln!("{}", diag);
            }
            let Some(main_unit) = result.main_unit else {
                return ExitCode::FAILURE;
            };
            if !write_output(&output, &main_unit) {
                return ExitCode::FAILURE;
            }
            let headers = [(result.header, "h"), (result.api_header, "api.h")];
            for (text, ext) in headers {
                if let Some(text) = text {
                    if !write_output(&output.with_extension(ext), &text) {
                        return ExitCode::FAILURE;
                    }
                }
            }

            println!(
                "{}: {} -> {}",
                "compiled".green().bold(),
                args.input.display(),
                output.display()
            );
            ExitCode::SUCCESS
        }
        Err(diagnostics) => {
            for diag in &diagnostics {
                eprintln!("{}", diag);
            }

            let error_count = diagnostics.iter().filter(|d| d.is_error()).count();
            let warnings = diagnostics.len() - error_count;

            eprintln!(
                "\n{} generated{}",
                format!("{} error{}", error_count, if error_count == 1 { "" } else { "s" }).red().bold(),
                if warnings > 0 {
                    format!(", {} warning{}", warnings, if warnings == 1 { "" } else { "s" })
                } else {
                    String::new()
                }
            );

            ExitCode::FAILURE
        }
    }
}
