//! buildtree - incremental project tree for multi-module builds

use std::process::ExitCode;

fn main() -> ExitCode {
    if let Err(e) = buildtree::cli::run() {
        eprintln!("Error: {:#}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
