//! Thin CLI entry point; all real logic lives in `lib.rs`/`cli.rs` so
//! it can be driven directly from tests without shelling out.

use std::process::ExitCode;

use clap::Parser as ClapParser;
use pvm::cli::{self, Cli};

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli::run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
