//! Shared test infrastructure for integration tests.
//!
//! Each fixture owns a temp tree with a `solver/` install holding a fake
//! `tpbig` shell script and a `decks/` directory, and drives the compiled
//! `atprun` binary against them.

use serde::Deserialize;
use std::ffi::OsStr;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Subset of one `run --json` entry the tests assert on.
#[derive(Debug, Deserialize)]
pub struct RunRecord {
    pub outcome: String,
    pub deck: PathBuf,
    pub execution: ExecutionRecord,
    pub artifacts: ArtifactRecord,
    #[serde(default)]
    pub removed_scratch: Vec<PathBuf>,
    pub log_path: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct ExecutionRecord {
    pub exit_code: i32,
    pub termination: String,
    pub command_line: String,
    pub working_dir: PathBuf,
    pub stderr: String,
}

#[derive(Debug, Deserialize)]
pub struct ArtifactRecord {
    pub new_files: Vec<String>,
    pub result: Option<PathBuf>,
    pub diagnostic: Option<PathBuf>,
}

/// Result of one `atprun` invocation.
#[derive(Debug)]
pub struct TestResult {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl TestResult {
    pub fn records(&self) -> Vec<RunRecord> {
        serde_json::from_str(&self.stdout).unwrap_or_else(|err| {
            panic!(
                "run output is not a JSON record list ({err}):\n{}\nstderr:\n{}",
                self.stdout, self.stderr
            )
        })
    }

    pub fn single_record(&self) -> RunRecord {
        let mut records = self.records();
        assert_eq!(records.len(), 1, "expected one record: {}", self.stdout);
        records.remove(0)
    }
}

pub struct TestFixture {
    _temp: TempDir,
    pub root: PathBuf,
    pub solver_dir: PathBuf,
    pub deck_dir: PathBuf,
}

impl TestFixture {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("create temp dir");
        let root = temp.path().canonicalize().expect("canonical temp dir");
        let solver_dir = root.join("solver");
        let deck_dir = root.join("decks");
        fs::create_dir_all(&solver_dir).expect("create solver dir");
        fs::create_dir_all(&deck_dir).expect("create deck dir");
        Self {
            _temp: temp,
            root,
            solver_dir,
            deck_dir,
        }
    }

    /// Install a fake solver whose body runs under `/bin/sh` with the deck
    /// argument in `$1`.
    pub fn install_solver(&self, body: &str) -> PathBuf {
        let path = self.solver_dir.join("tpbig");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write fake solver");
        let mut perms = fs::metadata(&path).expect("solver metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("chmod fake solver");
        path
    }

    pub fn write_deck(&self, name: &str) -> PathBuf {
        let path = self.deck_dir.join(name);
        fs::write(&path, b"BEGIN NEW DATA CASE\nC test deck\nBLANK\n").expect("write deck");
        path
    }

    /// Default destination for decks in `decks/`.
    pub fn destination(&self) -> PathBuf {
        self.deck_dir.join("ACP")
    }

    pub fn destination_entries(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(self.destination()) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Run `atprun` with `args`, isolated from the host's solvers and
    /// timeout override.
    pub fn atprun(&self, args: &[&OsStr], envs: &[(&str, &str)]) -> TestResult {
        let mut command = Command::new(env!("CARGO_BIN_EXE_atprun"));
        command
            .args(args)
            .current_dir(&self.root)
            .env_remove("ATP_TIMEOUT")
            .env("RUST_LOG", "warn");
        for (key, value) in envs {
            command.env(key, value);
        }
        let start = Instant::now();
        let output = command.output().expect("spawn atprun");
        TestResult {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            elapsed: start.elapsed(),
        }
    }

    /// `atprun run --json` for one deck against the installed fake solver.
    pub fn run_deck(&self, deck: &Path, envs: &[(&str, &str)]) -> TestResult {
        let solver = self.solver_dir.join("tpbig");
        self.atprun(
            &[
                OsStr::new("run"),
                OsStr::new("--json"),
                OsStr::new("--solver"),
                solver.as_os_str(),
                OsStr::new("--deck"),
                deck.as_os_str(),
            ],
            envs,
        )
    }
}

/// Whether `pid` no longer names a live (non-zombie) process.
#[cfg(target_os = "linux")]
pub fn process_gone(pid: i32) -> bool {
    let Ok(stat) = fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return true;
    };
    let state = stat
        .rsplit_once(") ")
        .and_then(|(_, rest)| rest.chars().next());
    matches!(state, Some('Z') | Some('X') | None)
}
