//! One blocking simulation run: prepare, spawn, supervise, locate, classify,
//! finalize.
//!
//! [`JobRunner::run`] is the single boundary that turns any unexpected
//! failure into an `error` outcome. Scratch decks are removed on every path,
//! and a log is always attempted; only a log that cannot be written surfaces
//! as an `Err`.
use crate::artifacts::{monitored_dirs, ArtifactLocator, ArtifactSet};
use crate::config::RunnerConfig;
use crate::deck::{DeckPreparator, DeckSource, PreparedDeck};
use crate::finalize::{Finalizer, LogContents, RunNaming};
use crate::launcher::{launch, LaunchPlan};
use crate::outcome::{classify_run, OutcomeKind, OutcomeRecord};
use crate::resolver::ExecutableDescriptor;
use crate::supervisor::{ProcessExecution, Supervisor, TreeTerminator};
use crate::util::run_timestamp;
use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Immutable description of one requested run.
#[derive(Debug, Clone)]
pub struct SimulationJob {
    pub deck_path: PathBuf,
    /// Directory the solver runs in.
    pub working_dir: PathBuf,
    pub executable: ExecutableDescriptor,
    pub timeout: Duration,
    /// Explicit destination; `None` uses the default beside the deck.
    pub destination: Option<PathBuf>,
}

impl SimulationJob {
    /// Job for `deck_path`, running in the executable's own directory (or the
    /// deck's directory when the executable has none).
    pub fn new(
        deck_path: PathBuf,
        executable: ExecutableDescriptor,
        timeout: Duration,
        destination: Option<PathBuf>,
    ) -> Self {
        let working_dir = executable
            .working_dir()
            .map(Path::to_path_buf)
            .or_else(|| deck_path.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        let working_dir = fs::canonicalize(&working_dir).unwrap_or(working_dir);
        Self {
            deck_path,
            working_dir,
            executable,
            timeout,
            destination,
        }
    }

    pub fn deck_stem(&self) -> String {
        self.deck_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "deck".to_string())
    }

    pub fn deck_dir(&self) -> &Path {
        self.deck_path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Where results and logs go.
    pub fn destination_dir(&self, config: &RunnerConfig) -> PathBuf {
        match &self.destination {
            Some(dest) => dest.clone(),
            None => default_destination(self.deck_dir(), &config.default_destination_dir),
        }
    }
}

/// The deck directory itself when it already carries the destination name,
/// otherwise a child directory with that name.
pub fn default_destination(deck_dir: &Path, dir_name: &str) -> PathBuf {
    let already_there = deck_dir
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.eq_ignore_ascii_case(dir_name));
    if already_there {
        deck_dir.to_path_buf()
    } else {
        deck_dir.join(dir_name)
    }
}

/// State accumulated while a job runs, kept for the log even on failure.
#[derive(Default)]
struct Progress {
    prepared: Option<PreparedDeck>,
    plan: Option<LaunchPlan>,
    execution: Option<ProcessExecution>,
    artifacts: ArtifactSet,
}

/// Runs jobs with a fixed configuration and tree terminator.
pub struct JobRunner<'a> {
    config: &'a RunnerConfig,
    terminator: &'a dyn TreeTerminator,
}

impl<'a> JobRunner<'a> {
    pub fn new(config: &'a RunnerConfig, terminator: &'a dyn TreeTerminator) -> Self {
        Self { config, terminator }
    }

    /// Run `job` on the decoded deck text in `source`.
    pub fn run(&self, job: &SimulationJob, source: &DeckSource) -> Result<OutcomeRecord> {
        let _span = tracing::info_span!("job", deck = %job.deck_path.display()).entered();
        let timestamp = run_timestamp();
        let destination = job.destination_dir(self.config);
        let deck_stem = job.deck_stem();
        let naming = RunNaming {
            destination: &destination,
            deck_stem: &deck_stem,
            timestamp: &timestamp,
        };

        let mut progress = Progress::default();
        let (outcome, failure) = match self.execute(job, source, &mut progress) {
            Ok(outcome) => (outcome, None),
            Err(err) => {
                let message = format!("{err:#}");
                tracing::error!(error = %message, "job failed");
                progress.artifacts.result = None;
                (OutcomeKind::Error, Some(message))
            }
        };

        let finalizer = Finalizer::new(self.config);
        if outcome.returns_result() {
            finalizer.relocate(&mut progress.artifacts, &naming);
        }
        let removed_scratch = finalizer.purge_scratch(&progress.artifacts);
        if let Some(mut prepared) = progress.prepared.take() {
            prepared.cleanup();
        }

        let execution = match progress.execution.take() {
            Some(execution) => execution,
            None => {
                let (command_line, working_dir) = match &progress.plan {
                    Some(plan) => (plan.command_line.clone(), plan.working_dir.clone()),
                    None => (
                        job.executable.program.display().to_string(),
                        job.working_dir.clone(),
                    ),
                };
                ProcessExecution::not_started(
                    command_line,
                    working_dir,
                    failure.clone().unwrap_or_default(),
                )
            }
        };

        let log_path = finalizer.write_log(
            &naming,
            &LogContents {
                outcome,
                deck: &job.deck_path,
                execution: &execution,
                artifacts: &progress.artifacts,
                removed_scratch: &removed_scratch,
                failure: failure.as_deref(),
            },
        )?;

        tracing::info!(
            outcome = %outcome,
            exit_code = execution.exit_code,
            result = ?progress.artifacts.result,
            "job finished"
        );

        Ok(OutcomeRecord {
            outcome,
            deck: job.deck_path.clone(),
            execution,
            artifacts: progress.artifacts,
            removed_scratch,
            log_path,
        })
    }

    fn execute(
        &self,
        job: &SimulationJob,
        source: &DeckSource,
        progress: &mut Progress,
    ) -> Result<OutcomeKind> {
        let prepared = progress.prepared.insert(
            DeckPreparator::new(self.config).prepare(source, &job.working_dir)?,
        );
        let deck_argument = prepared.deck_argument(&job.working_dir);
        let solver_stem = prepared.solver_stem();

        let dirs = monitored_dirs(
            &job.working_dir,
            job.deck_dir(),
            job.executable.script_dir(),
        );
        let locator = ArtifactLocator::snapshot(self.config, &dirs)?;
        tracing::debug!(dirs = ?locator.monitored().collect::<Vec<_>>(), "directories snapshotted");

        let plan = LaunchPlan::build(&job.executable, &deck_argument, &job.working_dir);
        progress.plan = Some(plan.clone());
        let process = match launch(&plan) {
            Ok(process) => process,
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "solver could not be started");
                progress.execution = Some(ProcessExecution::spawn_failed(&plan, &err));
                return Ok(OutcomeKind::Error);
            }
        };

        let supervisor = Supervisor::new(self.terminator, &self.config.continuation_token);
        let execution = progress
            .execution
            .insert(supervisor.supervise(process, job.timeout));

        progress.artifacts = locator.locate(&job.deck_path, solver_stem.as_deref())?;
        Ok(classify_run(execution, &mut progress.artifacts))
    }
}
