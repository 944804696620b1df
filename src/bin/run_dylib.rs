//! # fusedb-run
//!
//! Loads a pre-compiled query library, resolves the `compute` entry symbol,
//! invokes it, and releases the handle. The query's output goes to stdout
//! through the print runtime compiled into the library.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

#[derive(Parser)]
#[command(name = "fusedb-run", about = "Run a compiled query library")]
struct Cli {
    /// Path to the compiled shared object
    library: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match fusedb::exec::run_dylib(&cli.library) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
