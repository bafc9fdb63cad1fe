//! The turbofetch command line tool.

mod cli;
mod logger;

use std::process::ExitCode;

use clap::Parser;

#[tokio::main]
async fn main() -> ExitCode {
    cli::Cli::parse().exec().await
}
