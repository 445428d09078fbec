use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod artifacts;
mod cli;
mod config;
mod deck;
mod doctor;
mod finalize;
mod job;
mod launcher;
mod outcome;
mod resolver;
mod supervisor;
mod util;
mod workflow;

use cli::{Command, RootArgs};

fn main() -> ExitCode {
    let args = RootArgs::parse();
    init_tracing(args.command.verbose());

    let result = match args.command {
        Command::Run(args) => workflow::run_decks(args),
        Command::Resolve(args) => workflow::run_resolve(args),
        Command::Doctor(args) => workflow::run_doctor(args),
    };
    match result {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(workflow::EXIT_FAILED)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
