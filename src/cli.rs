//! CLI argument parsing for `atprun`.
//!
//! Subcommands only collect inputs; the workflow module owns the behavior.
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "atprun",
    version,
    about = "Run ATP decks under a supervised, timeout-bounded solver process",
    after_help = "Commands:\n  run --deck <path>...   Run one or more decks and collect their results\n  resolve                Show the solver invocation that would be used\n  doctor                 Report installed solvers and front-ends\n\nEnvironment:\n  ATP_TIMEOUT            Default timeout in whole seconds (default 300)\n  RUST_LOG               Log filter (overrides --verbose)\n\nExamples:\n  atprun run --deck cases/case1.atp\n  atprun run --deck a.atp --deck b.atp --dest out --timeout 60 --json\n  atprun resolve --solver /opt/atp/tpbig\n  atprun doctor --json",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Run(RunArgs),
    Resolve(ResolveArgs),
    Doctor(DoctorArgs),
}

impl Command {
    pub fn verbose(&self) -> bool {
        match self {
            Command::Run(args) => args.verbose,
            Command::Resolve(args) => args.verbose,
            Command::Doctor(args) => args.verbose,
        }
    }
}

/// Run command inputs; decks run one after another.
#[derive(Parser, Debug)]
#[command(about = "Run decks through the solver and collect results")]
pub struct RunArgs {
    /// Deck file to run (repeatable)
    #[arg(long = "deck", value_name = "PATH", required = true)]
    pub decks: Vec<PathBuf>,

    /// Solver executable or wrapper script (probed when omitted)
    #[arg(long, value_name = "PATH")]
    pub solver: Option<PathBuf>,

    /// Destination for results and logs (default: ACP beside each deck)
    #[arg(long, value_name = "DIR")]
    pub dest: Option<PathBuf>,

    /// Timeout in whole seconds; overrides ATP_TIMEOUT
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    /// Runner config JSON
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,

    /// Emit debug logs on stderr
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Show how the solver would be invoked")]
pub struct ResolveArgs {
    /// Solver executable or wrapper script (probed when omitted)
    #[arg(long, value_name = "PATH")]
    pub solver: Option<PathBuf>,

    /// Runner config JSON
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,

    /// Emit debug logs on stderr
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Report installed solvers, front-ends, and a recommendation")]
pub struct DoctorArgs {
    /// Runner config JSON
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,

    /// Emit debug logs on stderr
    #[arg(long)]
    pub verbose: bool,
}
