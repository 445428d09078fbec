use crate::cli::{DoctorArgs, ResolveArgs, RunArgs};
use crate::config::{load_config_or_default, RunnerConfig};
use crate::deck::DeckSource;
use crate::doctor::diagnose;
use crate::job::{JobRunner, SimulationJob};
use crate::outcome::OutcomeRecord;
use crate::resolver::{ExecutableDescriptor, ExecutableResolver};
use crate::supervisor::platform_terminator;
use crate::util::{display_path, truncate_string};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const EXIT_OK: u8 = 0;
pub const EXIT_FAILED: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;

const STDERR_PREVIEW_BYTES: usize = 400;

/// Per-deck entry of `run --json`.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum DeckReport {
    Ran(Box<OutcomeRecord>),
    /// The deck could not be read or its run log could not be written.
    Failed { deck: PathBuf, error: String },
}

pub fn run_decks(args: RunArgs) -> Result<u8> {
    let config = match load_config_or_default(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err:#}");
            return Ok(EXIT_CONFIG_ERROR);
        }
    };
    let timeout = args
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.effective_timeout());

    let Some(executable) = resolve_executable(&config, args.solver.as_deref()) else {
        return Ok(EXIT_CONFIG_ERROR);
    };
    tracing::info!(
        kind = ?executable.kind,
        program = %executable.program.display(),
        timeout_secs = timeout.as_secs(),
        decks = args.decks.len(),
        "starting batch"
    );

    let terminator = platform_terminator();
    let runner = JobRunner::new(&config, terminator.as_ref());
    let cwd = std::env::current_dir().ok();
    let mut reports = Vec::new();
    let mut all_returned = true;

    for deck in &args.decks {
        let ran = DeckSource::read(deck).and_then(|source| {
            let job = SimulationJob::new(
                source.origin.clone(),
                executable.clone(),
                timeout,
                args.dest.clone(),
            );
            runner
                .run(&job, &source)
                .with_context(|| format!("run deck {}", deck.display()))
        });
        let record = match ran {
            Ok(record) => record,
            Err(err) => {
                all_returned = false;
                let error = format!("{err:#}");
                if !args.json {
                    eprintln!("{}: {error}", deck.display());
                }
                reports.push(DeckReport::Failed {
                    deck: deck.clone(),
                    error,
                });
                continue;
            }
        };
        if record.result_path().is_none() {
            all_returned = false;
        }
        if !args.json {
            print_record(&record, cwd.as_deref());
        }
        reports.push(DeckReport::Ran(Box::new(record)));
    }

    if args.json {
        let text = serde_json::to_string_pretty(&reports).context("serialize run report")?;
        println!("{text}");
    }
    Ok(if all_returned { EXIT_OK } else { EXIT_FAILED })
}

pub fn run_resolve(args: ResolveArgs) -> Result<u8> {
    let config = match load_config_or_default(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err:#}");
            return Ok(EXIT_CONFIG_ERROR);
        }
    };
    let Some(descriptor) = resolve_executable(&config, args.solver.as_deref()) else {
        return Ok(EXIT_FAILED);
    };
    if args.json {
        let text = serde_json::to_string_pretty(&descriptor).context("serialize descriptor")?;
        println!("{text}");
    } else {
        print_descriptor(&descriptor);
    }
    Ok(EXIT_OK)
}

pub fn run_doctor(args: DoctorArgs) -> Result<u8> {
    let config = match load_config_or_default(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err:#}");
            return Ok(EXIT_CONFIG_ERROR);
        }
    };
    let resolver = ExecutableResolver::new(&config);
    let report = diagnose(&resolver, &config.compat_runtime);
    if args.json {
        let text = serde_json::to_string_pretty(&report).context("serialize doctor report")?;
        println!("{text}");
    } else {
        print!("{}", report.render_text());
    }
    Ok(EXIT_OK)
}

fn resolve_executable(config: &RunnerConfig, solver: Option<&Path>) -> Option<ExecutableDescriptor> {
    let descriptor = ExecutableResolver::new(config).resolve(solver);
    if descriptor.is_none() {
        match solver {
            Some(path) => eprintln!("error: solver {} is not usable on this host", path.display()),
            None => eprintln!("error: no ATP solver found (see `atprun doctor`)"),
        }
    }
    descriptor
}

fn print_descriptor(descriptor: &ExecutableDescriptor) {
    println!("kind: {:?}", descriptor.kind);
    println!("executable: {}", descriptor.executable.display());
    println!("program: {}", descriptor.program.display());
    println!("args: {}", shell_words::join(&descriptor.args));
    if let Some(dir) = descriptor.working_dir() {
        println!("working dir: {}", dir.display());
    }
}

fn print_record(record: &OutcomeRecord, cwd: Option<&Path>) {
    let deck = display_path(&record.deck, cwd);
    match record.result_path() {
        Some(result) => println!("{deck}: {} -> {}", record.outcome, display_path(result, cwd)),
        None => println!("{deck}: {}", record.outcome),
    }
    println!("  log: {}", display_path(&record.log_path, cwd));
    if !record.outcome.returns_result() || record.execution.exit_code != 0 {
        let stderr = record.execution.stderr.trim();
        if !stderr.is_empty() {
            println!("  stderr: {}", truncate_string(stderr, STDERR_PREVIEW_BYTES));
        }
    }
}
