//! The `marlin` binary: resumable archive import and beacon-driven sync.

#[macro_use]
extern crate tracing;

use clap::Parser;

pub mod cli;
pub mod commands;
pub mod flags;
pub mod peer;

fn main() {
    marlin_cli::backtrace::enable();

    if let Err(err) = cli::Cli::parse().run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}
