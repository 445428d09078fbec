//! Solver executable resolution.
//!
//! Produces an [`ExecutableDescriptor`] describing how to invoke the solver on
//! this host. Not finding anything is a normal answer (`None`): the caller
//! reports a configuration problem instead of attempting a run.
use crate::config::RunnerConfig;
use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

/// Placeholder in an argument template replaced by the deck argument.
pub const DECK_PLACEHOLDER: &str = "{deck}";

const FRONTEND_SEARCH_DEPTH: usize = 6;

/// How the solver is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvocationKind {
    Native,
    /// Script run through the host's command interpreter.
    ScriptedViaShell,
    /// Windows script or front-end run through the compatibility layer.
    ScriptedViaCompatibilityLayer,
}

/// Resolved solver invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutableDescriptor {
    pub kind: InvocationKind,
    /// Solver binary, wrapper script, or front-end executable.
    pub executable: PathBuf,
    /// Program actually spawned.
    pub program: PathBuf,
    /// Argument template; [`DECK_PLACEHOLDER`] marks the deck argument.
    pub args: Vec<String>,
}

impl ExecutableDescriptor {
    pub fn native(executable: PathBuf) -> Self {
        Self {
            kind: InvocationKind::Native,
            program: executable.clone(),
            executable,
            args: vec![DECK_PLACEHOLDER.to_string()],
        }
    }

    pub fn script_via_shell(script: PathBuf, shell: PathBuf) -> Self {
        Self {
            kind: InvocationKind::ScriptedViaShell,
            args: vec![
                "/c".to_string(),
                script.display().to_string(),
                DECK_PLACEHOLDER.to_string(),
            ],
            executable: script,
            program: shell,
        }
    }

    pub fn script_via_compat(script: PathBuf, runtime: PathBuf) -> Self {
        Self {
            kind: InvocationKind::ScriptedViaCompatibilityLayer,
            args: vec![
                "cmd".to_string(),
                "/c".to_string(),
                script.display().to_string(),
                DECK_PLACEHOLDER.to_string(),
            ],
            executable: script,
            program: runtime,
        }
    }

    pub fn frontend_via_compat(frontend: PathBuf, runtime: PathBuf) -> Self {
        Self {
            kind: InvocationKind::ScriptedViaCompatibilityLayer,
            args: vec![
                frontend.display().to_string(),
                DECK_PLACEHOLDER.to_string(),
            ],
            executable: frontend,
            program: runtime,
        }
    }

    /// Directory the solver runs in, so it finds its startup files.
    pub fn working_dir(&self) -> Option<&Path> {
        self.executable
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
    }

    /// Directory of a wrapper script or front-end, which may receive output.
    pub fn script_dir(&self) -> Option<&Path> {
        match self.kind {
            InvocationKind::Native => None,
            _ => self.working_dir(),
        }
    }

    /// Arguments with the deck placeholder filled in.
    pub fn render_args(&self, deck_argument: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                if arg == DECK_PLACEHOLDER {
                    deck_argument.to_string()
                } else {
                    arg.clone()
                }
            })
            .collect()
    }
}

/// Locates a usable solver on the host.
pub struct ExecutableResolver<'a> {
    config: &'a RunnerConfig,
    search_path: Option<OsString>,
    cwd: PathBuf,
}

impl<'a> ExecutableResolver<'a> {
    pub fn new(config: &'a RunnerConfig) -> Self {
        Self {
            config,
            search_path: std::env::var_os("PATH"),
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Replace the search path used for name lookups.
    #[cfg(test)]
    pub fn with_search_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.search_path = Some(search_path.into());
        self
    }

    /// Resolve an explicit path, or probe the known locations when absent.
    pub fn resolve(&self, explicit: Option<&Path>) -> Option<ExecutableDescriptor> {
        if let Some(explicit) = explicit {
            let found = self
                .lookup(explicit.as_os_str())
                .or_else(|| explicit.is_file().then(|| self.absolute(explicit)));
            let Some(found) = found else {
                tracing::warn!(path = %explicit.display(), "explicit solver path not found");
                return None;
            };
            return self.describe(found);
        }

        for candidate in &self.config.native_candidates {
            if let Some(found) = self.lookup(candidate.as_ref()) {
                tracing::debug!(candidate = %candidate, path = %found.display(), "solver candidate found");
                if let Some(descriptor) = self.describe(found) {
                    return Some(descriptor);
                }
            }
        }

        if cfg!(windows) {
            return None;
        }
        let runtime = self.compat_runtime()?;
        let frontend = self.find_frontends().into_iter().next()?;
        tracing::info!(
            runtime = %runtime.display(),
            frontend = %frontend.display(),
            "no native solver; using front-end through compatibility layer"
        );
        Some(ExecutableDescriptor::frontend_via_compat(frontend, runtime))
    }

    /// Path of the compatibility-layer runtime, when installed.
    pub fn compat_runtime(&self) -> Option<PathBuf> {
        self.lookup(self.config.compat_runtime.as_ref())
    }

    /// Every native candidate that resolves, in probe order.
    pub fn native_matches(&self) -> Vec<(String, PathBuf)> {
        self.config
            .native_candidates
            .iter()
            .filter_map(|candidate| {
                self.lookup(candidate.as_ref())
                    .map(|path| (candidate.clone(), path))
            })
            .collect()
    }

    /// Front-end executables found under the configured install roots.
    pub fn find_frontends(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        for root in &self.config.frontend_search_roots {
            if root.is_dir() {
                find_named_files(
                    root,
                    &self.config.frontend_executable,
                    FRONTEND_SEARCH_DEPTH,
                    &mut found,
                );
            }
        }
        found
    }

    fn describe(&self, executable: PathBuf) -> Option<ExecutableDescriptor> {
        if self.config.is_script_extension(&executable) {
            if cfg!(windows) {
                return Some(ExecutableDescriptor::script_via_shell(
                    executable,
                    PathBuf::from("cmd"),
                ));
            }
            let Some(runtime) = self.compat_runtime() else {
                tracing::warn!(
                    script = %executable.display(),
                    runtime = %self.config.compat_runtime,
                    "script solvers need the compatibility layer, which was not found"
                );
                return None;
            };
            return Some(ExecutableDescriptor::script_via_compat(executable, runtime));
        }

        let is_windows_binary = executable
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("exe"));
        if is_windows_binary && !cfg!(windows) {
            let runtime = self.compat_runtime()?;
            return Some(ExecutableDescriptor::frontend_via_compat(
                executable, runtime,
            ));
        }

        Some(ExecutableDescriptor::native(executable))
    }

    fn lookup(&self, name: &std::ffi::OsStr) -> Option<PathBuf> {
        which::which_in(name, self.search_path.as_ref(), &self.cwd).ok()
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        }
    }
}

fn find_named_files(dir: &Path, name: &str, depth: usize, found: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    let mut paths: Vec<PathBuf> = entries.filter_map(|entry| entry.ok()).map(|e| e.path()).collect();
    paths.sort();
    for path in paths {
        if path.is_dir() {
            if depth > 0 {
                find_named_files(&path, name, depth - 1, found);
            }
        } else if path
            .file_name()
            .and_then(|file| file.to_str())
            .is_some_and(|file| file.eq_ignore_ascii_case(name))
        {
            found.push(path);
        }
    }
}
