//! Outcome classification.
//!
//! A clean exit is not enough for success, and a failed exit does not throw
//! away a usable result: a located result file counts as usable when its size
//! is strictly greater than zero, with no further content validation.
use crate::artifacts::ArtifactSet;
use crate::supervisor::ProcessExecution;
use crate::util::{file_size, remove_file_best_effort};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Terminal category of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeKind {
    Success,
    EmptyResult,
    /// Non-zero exit (including timeout) that still left a usable result.
    TimeoutWithSalvagedResult,
    NoResult,
    Error,
}

impl OutcomeKind {
    /// Whether the located result is handed back to the caller.
    pub fn returns_result(self) -> bool {
        matches!(
            self,
            OutcomeKind::Success | OutcomeKind::TimeoutWithSalvagedResult
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::EmptyResult => "empty-result",
            OutcomeKind::TimeoutWithSalvagedResult => "timeout-with-salvaged-result",
            OutcomeKind::NoResult => "no-result",
            OutcomeKind::Error => "error",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification plus whether the located result must be deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: OutcomeKind,
    pub delete_result: bool,
}

/// Decide the outcome from the exit code and the located result's size.
///
/// `result_size` is `None` when no result file was located.
pub fn classify(exit_code: i32, result_size: Option<u64>) -> Classification {
    let (kind, delete_result) = match (exit_code, result_size) {
        (0, None) => (OutcomeKind::NoResult, false),
        (0, Some(0)) => (OutcomeKind::EmptyResult, true),
        (0, Some(_)) => (OutcomeKind::Success, false),
        (_, Some(0)) => (OutcomeKind::Error, true),
        (_, Some(_)) => (OutcomeKind::TimeoutWithSalvagedResult, false),
        (_, None) => (OutcomeKind::Error, false),
    };
    Classification {
        kind,
        delete_result,
    }
}

/// Classify a finished run, deleting a zero-byte result and clearing it from
/// `artifacts` so it is never reported.
pub fn classify_run(execution: &ProcessExecution, artifacts: &mut ArtifactSet) -> OutcomeKind {
    let size = artifacts.result.as_deref().map(result_size);
    let classification = classify(execution.exit_code, size);
    if classification.delete_result {
        if let Some(path) = artifacts.result.take() {
            tracing::info!(path = %path.display(), "removing zero-byte result");
            remove_file_best_effort(&path);
        }
    } else if !classification.kind.returns_result() {
        artifacts.result = None;
    }
    classification.kind
}

fn result_size(path: &Path) -> u64 {
    file_size(path).unwrap_or(0)
}

/// Terminal record of one job attempt.
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeRecord {
    pub outcome: OutcomeKind,
    pub deck: PathBuf,
    pub execution: ProcessExecution,
    pub artifacts: ArtifactSet,
    /// Scratch files purged after the run.
    pub removed_scratch: Vec<PathBuf>,
    pub log_path: PathBuf,
}

impl OutcomeRecord {
    /// The usable result handed back to the caller, if any.
    pub fn result_path(&self) -> Option<&Path> {
        if self.outcome.returns_result() {
            self.artifacts.result.as_deref()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_table() {
        let cases = [
            (0, Some(120), OutcomeKind::Success, false),
            (0, Some(0), OutcomeKind::EmptyResult, true),
            (0, None, OutcomeKind::NoResult, false),
            (1, Some(4096), OutcomeKind::TimeoutWithSalvagedResult, false),
            (-9, Some(10), OutcomeKind::TimeoutWithSalvagedResult, false),
            (-9, None, OutcomeKind::Error, false),
            (-1, None, OutcomeKind::Error, false),
            (2, Some(0), OutcomeKind::Error, true),
        ];
        for (exit_code, size, kind, delete) in cases {
            let classification = classify(exit_code, size);
            assert_eq!(classification.kind, kind, "exit {exit_code} size {size:?}");
            assert_eq!(classification.delete_result, delete, "exit {exit_code} size {size:?}");
        }
    }

    #[test]
    fn tags_render_in_kebab_case() {
        assert_eq!(
            OutcomeKind::TimeoutWithSalvagedResult.to_string(),
            "timeout-with-salvaged-result"
        );
        assert_eq!(
            serde_json::to_value(OutcomeKind::EmptyResult).expect("serialize"),
            serde_json::json!("empty-result")
        );
    }

    #[test]
    fn only_success_and_salvage_return_results() {
        assert!(OutcomeKind::Success.returns_result());
        assert!(OutcomeKind::TimeoutWithSalvagedResult.returns_result());
        assert!(!OutcomeKind::EmptyResult.returns_result());
        assert!(!OutcomeKind::NoResult.returns_result());
        assert!(!OutcomeKind::Error.returns_result());
    }
}
