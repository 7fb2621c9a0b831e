use clap::Parser;
use isid_runner::{run, Cli};
use std::process::ExitCode;

fn main() -> ExitCode {
    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
