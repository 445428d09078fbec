//! Host diagnostics for `atprun doctor`.
//!
//! Read-only: looks for the compatibility layer, native solvers, and
//! front-end installs, then recommends one. Never launches anything.
use crate::resolver::ExecutableResolver;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize)]
pub struct NativeSolver {
    /// Probe entry as configured.
    pub candidate: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrontendInstall {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub executable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Recommendation {
    Native { path: PathBuf },
    CompatibilityLayer { runtime: PathBuf, frontend: PathBuf },
    NothingUsable,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorReport {
    pub compat_runtime_name: String,
    pub compat_runtime: Option<PathBuf>,
    pub native_solvers: Vec<NativeSolver>,
    pub frontends: Vec<FrontendInstall>,
    pub recommendation: Recommendation,
}

pub fn diagnose(resolver: &ExecutableResolver<'_>, compat_runtime_name: &str) -> DoctorReport {
    let compat_runtime = resolver.compat_runtime();
    let native_solvers: Vec<NativeSolver> = resolver
        .native_matches()
        .into_iter()
        .map(|(candidate, path)| NativeSolver { candidate, path })
        .collect();
    let frontends: Vec<FrontendInstall> = resolver
        .find_frontends()
        .into_iter()
        .map(|path| FrontendInstall {
            size_bytes: fs::metadata(&path).map(|meta| meta.len()).unwrap_or(0),
            executable: is_executable(&path),
            path,
        })
        .collect();
    let recommendation = recommend(compat_runtime.as_deref(), &native_solvers, &frontends);
    tracing::debug!(?recommendation, "diagnostics complete");
    DoctorReport {
        compat_runtime_name: compat_runtime_name.to_string(),
        compat_runtime,
        native_solvers,
        frontends,
        recommendation,
    }
}

/// Native solvers win; otherwise the compatibility layer plus a front-end.
pub fn recommend(
    compat_runtime: Option<&Path>,
    native_solvers: &[NativeSolver],
    frontends: &[FrontendInstall],
) -> Recommendation {
    if let Some(native) = native_solvers.first() {
        return Recommendation::Native {
            path: native.path.clone(),
        };
    }
    match (compat_runtime, frontends.first()) {
        (Some(runtime), Some(frontend)) => Recommendation::CompatibilityLayer {
            runtime: runtime.to_path_buf(),
            frontend: frontend.path.clone(),
        },
        _ => Recommendation::NothingUsable,
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt as _;
    fs::metadata(path)
        .map(|meta| meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

impl DoctorReport {
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        match &self.compat_runtime {
            Some(path) => {
                out.push_str(&format!("compatibility layer: {}\n", path.display()));
            }
            None => {
                out.push_str(&format!(
                    "compatibility layer: {} not found\n",
                    self.compat_runtime_name
                ));
            }
        }

        if self.native_solvers.is_empty() {
            out.push_str("native solvers: none\n");
        } else {
            out.push_str("native solvers:\n");
            for solver in &self.native_solvers {
                out.push_str(&format!(
                    "  {} -> {}\n",
                    solver.candidate,
                    solver.path.display()
                ));
            }
        }

        if self.frontends.is_empty() {
            out.push_str("front-ends: none\n");
        } else {
            out.push_str("front-ends:\n");
            for frontend in &self.frontends {
                let note = if frontend.executable { "" } else { ", not executable" };
                out.push_str(&format!(
                    "  {} ({:.1} KB{})\n",
                    frontend.path.display(),
                    frontend.size_bytes as f64 / 1024.0,
                    note
                ));
            }
        }

        out.push('\n');
        match &self.recommendation {
            Recommendation::Native { path } => {
                out.push_str(&format!("recommended: native solver {}\n", path.display()));
            }
            Recommendation::CompatibilityLayer { runtime, frontend } => {
                out.push_str(&format!(
                    "recommended: {} {}\n",
                    runtime.display(),
                    frontend.display()
                ));
                if self
                    .frontends
                    .first()
                    .is_some_and(|install| !install.executable)
                {
                    out.push_str(&format!("  hint: chmod +x {}\n", frontend.display()));
                }
            }
            Recommendation::NothingUsable => {
                out.push_str("recommended: nothing usable found\n");
                if self.compat_runtime.is_none() {
                    out.push_str(&format!("  hint: install {}\n", self.compat_runtime_name));
                }
                if self.frontends.is_empty() {
                    out.push_str("  hint: install ATPDraw or copy it under ~/ATPDraw\n");
                }
                out.push_str("  hint: or install a native ATP solver (tpbig)\n");
            }
        }
        out
    }
}
