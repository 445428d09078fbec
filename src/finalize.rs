//! Artifact finalization and run logs.
//!
//! Usable results (and their companion diagnostics) are moved into the
//! destination under `<deck-stem>_<timestamp>.<ext>`, solver scratch outputs
//! are purged, and a plain-text key/value log with the full captured streams
//! is written to `<destination>/logs/`.
use crate::artifacts::ArtifactSet;
use crate::config::RunnerConfig;
use crate::outcome::OutcomeKind;
use crate::supervisor::ProcessExecution;
use crate::util::{move_file, remove_file_best_effort, unique_path};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const LOGS_DIR: &str = "logs";

const NONE_LABEL: &str = "(none)";
const EMPTY_STREAM_LABEL: &str = "(empty)";

/// Naming inputs shared by every file a job writes to its destination.
#[derive(Debug, Clone)]
pub struct RunNaming<'a> {
    pub destination: &'a Path,
    pub deck_stem: &'a str,
    pub timestamp: &'a str,
}

impl RunNaming<'_> {
    fn base_name(&self) -> String {
        format!("{}_{}", self.deck_stem, self.timestamp)
    }
}

/// Everything the run log reports.
pub struct LogContents<'a> {
    pub outcome: OutcomeKind,
    pub deck: &'a Path,
    pub execution: &'a ProcessExecution,
    pub artifacts: &'a ArtifactSet,
    pub removed_scratch: &'a [PathBuf],
    pub failure: Option<&'a str>,
}

pub struct Finalizer<'a> {
    config: &'a RunnerConfig,
}

impl<'a> Finalizer<'a> {
    pub fn new(config: &'a RunnerConfig) -> Self {
        Self { config }
    }

    /// Move the result and diagnostic into the destination.
    ///
    /// A file that cannot be moved stays where it was located; the run keeps
    /// its result either way.
    pub fn relocate(&self, artifacts: &mut ArtifactSet, naming: &RunNaming<'_>) {
        if let Err(err) = fs::create_dir_all(naming.destination) {
            tracing::warn!(
                destination = %naming.destination.display(),
                error = %err,
                "could not create destination; leaving artifacts in place"
            );
            return;
        }
        let base = naming.base_name();
        if let Some(result) = artifacts.result.take() {
            let target = unique_path(naming.destination, &base, self.config.result_extension());
            artifacts.result = Some(relocate_one(result, target));
        }
        if let Some(diagnostic) = artifacts.diagnostic.take() {
            let target = unique_path(naming.destination, &base, self.config.diagnostic_extension());
            artifacts.diagnostic = Some(relocate_one(diagnostic, target));
        }
    }

    /// Delete new files carrying a scratch extension; returns what was removed.
    pub fn purge_scratch(&self, artifacts: &ArtifactSet) -> Vec<PathBuf> {
        let mut removed = Vec::new();
        for diff in &artifacts.new_files_per_dir {
            for path in diff.paths() {
                if !self.config.is_scratch_extension(&path) {
                    continue;
                }
                if artifacts.result.as_deref() == Some(path.as_path())
                    || artifacts.diagnostic.as_deref() == Some(path.as_path())
                {
                    continue;
                }
                if path.is_file() && remove_file_best_effort(&path) {
                    removed.push(path);
                }
            }
        }
        if !removed.is_empty() {
            tracing::debug!(count = removed.len(), "solver scratch files removed");
        }
        removed
    }

    /// Write the run log once and return its path.
    pub fn write_log(&self, naming: &RunNaming<'_>, contents: &LogContents<'_>) -> Result<PathBuf> {
        let logs_dir = naming.destination.join(LOGS_DIR);
        fs::create_dir_all(&logs_dir)
            .with_context(|| format!("create {}", logs_dir.display()))?;
        let path = unique_path(&logs_dir, &naming.base_name(), "log");
        fs::write(&path, render_log(contents).as_bytes())
            .with_context(|| format!("write run log {}", path.display()))?;
        tracing::info!(path = %path.display(), "run log written");
        Ok(path)
    }
}

fn relocate_one(source: PathBuf, target: PathBuf) -> PathBuf {
    match move_file(&source, &target) {
        Ok(()) => {
            tracing::info!(from = %source.display(), to = %target.display(), "artifact relocated");
            target
        }
        Err(err) => {
            tracing::warn!(
                path = %source.display(),
                error = %format!("{err:#}"),
                "could not relocate artifact; keeping it in place"
            );
            source
        }
    }
}

/// Render the plain-text run log.
pub fn render_log(contents: &LogContents<'_>) -> String {
    let execution = contents.execution;
    let artifacts = contents.artifacts;
    let mut out = String::new();
    out.push_str(&format!("Status: {}\n", contents.outcome));
    out.push_str(&format!("Return code: {}\n", execution.exit_code));
    out.push_str(&format!("Termination: {}\n", execution.termination));
    out.push_str(&format!("Deck: {}\n", contents.deck.display()));
    out.push_str(&format!("CWD: {}\n", execution.working_dir.display()));
    out.push_str(&format!("Command: {}\n", execution.command_line));
    out.push_str(&format!("Started: {}\n", execution.started_at.to_rfc3339()));
    out.push_str(&format!("Finished: {}\n", execution.finished_at.to_rfc3339()));
    if let Some(failure) = contents.failure {
        out.push_str(&format!("Failure: {failure}\n"));
    }
    out.push_str(&format!("New files: {}\n", join_or_none(&artifacts.new_files)));
    out.push_str("New files per directory:\n");
    for diff in &artifacts.new_files_per_dir {
        out.push_str(&format!(
            "  {}: {}\n",
            diff.dir.display(),
            join_or_none(&diff.new_entries)
        ));
    }
    match (&artifacts.result, contents.outcome) {
        (Some(result), OutcomeKind::TimeoutWithSalvagedResult) => {
            out.push_str(&format!(
                "Result: {} (produced despite failure; may be incomplete)\n",
                result.display()
            ));
        }
        (Some(result), _) => {
            out.push_str(&format!("Result: {}\n", result.display()));
        }
        (None, _) => {
            out.push_str(&format!("Result: {NONE_LABEL}\n"));
        }
    }
    out.push_str(&format!(
        "Diagnostic: {}\n",
        display_or_none(artifacts.diagnostic.as_deref())
    ));
    let removed: Vec<String> = contents
        .removed_scratch
        .iter()
        .map(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string())
        })
        .collect();
    out.push_str(&format!("Removed temps: {}\n", join_or_none(&removed)));
    out.push_str("---- STDOUT ----\n");
    out.push_str(stream_or_empty(&execution.stdout));
    out.push('\n');
    out.push_str("---- STDERR ----\n");
    out.push_str(stream_or_empty(&execution.stderr));
    out.push('\n');
    out
}

fn join_or_none(values: &[String]) -> String {
    if values.is_empty() {
        NONE_LABEL.to_string()
    } else {
        values.join(", ")
    }
}

fn display_or_none(path: Option<&Path>) -> String {
    path.map(|path| path.display().to_string())
        .unwrap_or_else(|| NONE_LABEL.to_string())
}

fn stream_or_empty(text: &str) -> &str {
    let trimmed = text.trim_end_matches('\n');
    if trimmed.is_empty() {
        EMPTY_STREAM_LABEL
    } else {
        trimmed
    }
}
