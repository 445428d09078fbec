//! Runner configuration.
//!
//! Every extension list, marker, and default that the pipeline stages consult
//! lives in one immutable [`RunnerConfig`] value handed to each stage, so tests
//! can vary them without touching process-wide state.
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides the default timeout, in whole seconds.
pub const TIMEOUT_ENV_VAR: &str = "ATP_TIMEOUT";

/// Built-in wall-clock limit for a single solver run.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Immutable settings shared by every stage of a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct RunnerConfig {
    /// Extension given to the scratch deck handed to the solver.
    pub deck_extension: String,
    /// Extensions that identify the primary result file.
    pub result_extensions: Vec<String>,
    /// Extensions that identify the companion diagnostic file.
    pub diagnostic_extensions: Vec<String>,
    /// Transient solver outputs purged after every run.
    pub scratch_extensions: Vec<String>,
    /// Executable extensions that must go through a command interpreter.
    pub script_extensions: Vec<String>,
    /// Line fed on stdin so decks paused at a breakpoint resume.
    pub continuation_token: String,
    pub default_timeout_secs: u64,
    /// Ordered list of native solver names or absolute locations.
    pub native_candidates: Vec<String>,
    /// Compatibility-layer runtime used for Windows binaries off Windows.
    pub compat_runtime: String,
    /// File name of the drag-and-drop front-end executable.
    pub frontend_executable: String,
    /// Roots searched recursively for the front-end executable.
    pub frontend_search_roots: Vec<PathBuf>,
    /// Name of the directory used as the default destination.
    pub default_destination_dir: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            deck_extension: "atp".to_string(),
            result_extensions: vec!["lis".to_string()],
            diagnostic_extensions: vec!["dbg".to_string()],
            scratch_extensions: vec!["tmp".to_string(), "bin".to_string()],
            script_extensions: vec!["bat".to_string(), "cmd".to_string()],
            continuation_token: "go\n".to_string(),
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            native_candidates: default_native_candidates(),
            compat_runtime: "wine".to_string(),
            frontend_executable: "Atpdraw.exe".to_string(),
            frontend_search_roots: default_frontend_roots(),
            default_destination_dir: "ACP".to_string(),
        }
    }
}

impl RunnerConfig {
    /// Default timeout after applying the environment override.
    pub fn effective_timeout(&self) -> Duration {
        let raw = std::env::var(TIMEOUT_ENV_VAR).ok();
        timeout_with_override(self.default_timeout_secs, raw.as_deref())
    }

    /// Primary result extension used when naming relocated results.
    pub fn result_extension(&self) -> &str {
        self.result_extensions
            .first()
            .map(String::as_str)
            .unwrap_or("lis")
    }

    /// Diagnostic extension used when naming relocated companion files.
    pub fn diagnostic_extension(&self) -> &str {
        self.diagnostic_extensions
            .first()
            .map(String::as_str)
            .unwrap_or("dbg")
    }

    pub fn is_script_extension(&self, path: &Path) -> bool {
        has_extension(path, &self.script_extensions)
    }

    pub fn is_scratch_extension(&self, path: &Path) -> bool {
        has_extension(path, &self.scratch_extensions)
    }
}

/// Case-insensitive extension membership test.
pub fn has_extension(path: &Path, extensions: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return false;
    };
    extensions
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(ext))
}

/// Load a JSON config file; omitted fields keep their built-in defaults.
pub fn load_config(path: &Path) -> Result<RunnerConfig> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let config: RunnerConfig =
        serde_json::from_slice(&bytes).context("parse runner config JSON")?;
    validate_config(&config)?;
    Ok(config)
}

/// Load the config at `path` when given, otherwise the built-in defaults.
pub fn load_config_or_default(path: Option<&Path>) -> Result<RunnerConfig> {
    match path {
        Some(path) => load_config(path),
        None => Ok(RunnerConfig::default()),
    }
}

fn validate_config(config: &RunnerConfig) -> Result<()> {
    if config.deck_extension.trim().is_empty() {
        return Err(anyhow!("deck_extension must not be empty"));
    }
    if config.result_extensions.is_empty() {
        return Err(anyhow!("result_extensions must list at least one extension"));
    }
    if config.default_timeout_secs == 0 {
        return Err(anyhow!("default_timeout_secs must be greater than 0"));
    }
    Ok(())
}

/// Resolve the timeout from a raw override value.
///
/// Absent, non-numeric, and zero values fall back to `default_secs`.
pub fn timeout_with_override(default_secs: u64, raw: Option<&str>) -> Duration {
    let secs = raw
        .and_then(parse_timeout_override)
        .unwrap_or(default_secs);
    Duration::from_secs(secs)
}

pub fn parse_timeout_override(raw: &str) -> Option<u64> {
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => None,
        Ok(secs) => Some(secs),
    }
}

#[cfg(windows)]
fn default_native_candidates() -> Vec<String> {
    [
        "runATP.bat",
        "tpbig.exe",
        "atpmingw.exe",
        "/usr/local/bin/tpbig",
        "/usr/bin/tpbig",
        "/opt/atp/tpbig",
        "tpbig",
        "atpmingw",
        "/usr/local/bin/atpmingw",
    ]
    .iter()
    .map(|name| name.to_string())
    .collect()
}

#[cfg(not(windows))]
fn default_native_candidates() -> Vec<String> {
    [
        "/usr/local/bin/tpbig",
        "/usr/bin/tpbig",
        "/opt/atp/tpbig",
        "tpbig",
        "atpmingw",
        "/usr/local/bin/atpmingw",
    ]
    .iter()
    .map(|name| name.to_string())
    .collect()
}

fn default_frontend_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Some(home) = dirs::home_dir() {
        let wine_c = home.join(".wine").join("drive_c");
        roots.push(home.join("ATPDraw"));
        roots.push(wine_c.join("ATP"));
        roots.push(wine_c.join("Program Files").join("ATP"));
        roots.push(wine_c.join("Program Files (x86)").join("ATP"));
    }
    roots.push(PathBuf::from("/opt/atpdraw"));
    roots.push(PathBuf::from("/opt/ATP"));
    roots
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_override_rejects_invalid_values() {
        assert_eq!(timeout_with_override(300, None), Duration::from_secs(300));
        assert_eq!(
            timeout_with_override(300, Some("12")),
            Duration::from_secs(12)
        );
        assert_eq!(
            timeout_with_override(300, Some(" 7 ")),
            Duration::from_secs(7)
        );
        for raw in ["", "abc", "-5", "0", "1.5"] {
            assert_eq!(
                timeout_with_override(300, Some(raw)),
                Duration::from_secs(300),
                "override {raw:?} should fall back"
            );
        }
    }

    #[test]
    fn extension_checks_ignore_case() {
        let config = RunnerConfig::default();
        assert!(config.is_script_extension(Path::new("runATP.BAT")));
        assert!(config.is_scratch_extension(Path::new("/x/fort.TMP")));
        assert!(!config.is_scratch_extension(Path::new("case1.lis")));
        assert!(!config.is_script_extension(Path::new("tpbig")));
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(&path, br#"{"default_timeout_secs": 42, "scratch_extensions": ["tmp"]}"#)
            .expect("write config");
        let config = load_config(&path).expect("load config");
        assert_eq!(config.default_timeout_secs, 42);
        assert_eq!(config.scratch_extensions, vec!["tmp".to_string()]);
        assert_eq!(config.result_extension(), "lis");
        assert_eq!(config.continuation_token, "go\n");
    }

    #[test]
    fn config_rejects_unknown_fields_and_zero_timeout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(&path, br#"{"timeout": 5}"#).expect("write config");
        assert!(load_config(&path).is_err());
        fs::write(&path, br#"{"default_timeout_secs": 0}"#).expect("write config");
        assert!(load_config(&path).is_err());
    }
}
