//! Artifact discovery from directory snapshots.
//!
//! Every monitored directory is listed before launch and again after the
//! supervisor returns. Only names present afterwards but not before count as
//! new, so a stale result from an earlier run is never mistaken for this
//! run's output. The matching itself is a pure function of the snapshot diff,
//! the expected stems, and the expected extensions.
use crate::config::{has_extension, RunnerConfig};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// File timestamps come from a coarse kernel clock and can trail
/// `SystemTime::now()` by a tick.
const MTIME_SLACK: Duration = Duration::from_millis(20);

/// Entry names of one directory at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectorySnapshot {
    pub dir: PathBuf,
    pub entries: BTreeSet<String>,
}

impl DirectorySnapshot {
    /// List `dir`; a missing directory snapshots as empty.
    pub fn capture(dir: &Path) -> Result<Self> {
        let mut entries = BTreeSet::new();
        if dir.is_dir() {
            for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
                let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
                entries.insert(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            entries,
        })
    }

    /// Names in `after` that this snapshot did not contain, sorted.
    pub fn new_entries(&self, after: &DirectorySnapshot) -> Vec<String> {
        after.entries.difference(&self.entries).cloned().collect()
    }
}

/// New entries found in one monitored directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryDiff {
    pub dir: PathBuf,
    pub new_entries: Vec<String>,
}

impl DirectoryDiff {
    pub fn paths(&self) -> impl Iterator<Item = PathBuf> + '_ {
        self.new_entries.iter().map(|name| self.dir.join(name))
    }
}

/// Everything a run produced, derived from snapshot diffs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArtifactSet {
    /// Sorted union of new names across all monitored directories.
    pub new_files: Vec<String>,
    pub new_files_per_dir: Vec<DirectoryDiff>,
    pub result: Option<PathBuf>,
    pub diagnostic: Option<PathBuf>,
}

/// Monitored directories in priority order, without duplicates.
pub fn monitored_dirs(working_dir: &Path, deck_dir: &Path, script_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    for dir in [Some(working_dir), Some(deck_dir), script_dir].into_iter().flatten() {
        if !dirs.iter().any(|known| known == dir) {
            dirs.push(dir.to_path_buf());
        }
    }
    dirs
}

/// Pair pre- and post-launch snapshots by directory and diff them.
pub fn diff_snapshots(before: &[DirectorySnapshot], after: &[DirectorySnapshot]) -> Vec<DirectoryDiff> {
    before
        .iter()
        .map(|pre| {
            let new_entries = after
                .iter()
                .find(|post| post.dir == pre.dir)
                .map(|post| pre.new_entries(post))
                .unwrap_or_default();
            DirectoryDiff {
                dir: pre.dir.clone(),
                new_entries,
            }
        })
        .collect()
}

/// Sorted, deduplicated union of new names.
pub fn union_new_files(diffs: &[DirectoryDiff]) -> Vec<String> {
    let names: BTreeSet<&String> = diffs.iter().flat_map(|diff| diff.new_entries.iter()).collect();
    names.into_iter().cloned().collect()
}

/// New paths whose extension is in `extensions` and whose stem equals one of
/// `stems`, both compared case-insensitively, in directory priority order.
pub fn match_new_artifacts(
    diffs: &[DirectoryDiff],
    stems: &[String],
    extensions: &[String],
) -> Vec<PathBuf> {
    let stems: Vec<String> = stems.iter().map(|stem| stem.to_lowercase()).collect();
    diffs
        .iter()
        .flat_map(|diff| diff.paths())
        .filter(|path| has_extension(path, extensions))
        .filter(|path| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().to_lowercase())
                .is_some_and(|stem| stems.contains(&stem))
        })
        .collect()
}

/// `<dir>/<stem>.<ext>` for each extension, in lower then upper case.
pub fn result_candidates(dir: &Path, stem: &str, extensions: &[String]) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    for ext in extensions {
        for variant in [ext.to_lowercase(), ext.to_uppercase()] {
            let path = dir.join(format!("{stem}.{variant}"));
            if !candidates.contains(&path) {
                candidates.push(path);
            }
        }
    }
    candidates
}

/// Holds the pre-launch snapshots and finds the run's artifacts afterwards.
pub struct ArtifactLocator<'a> {
    config: &'a RunnerConfig,
    before: Vec<DirectorySnapshot>,
    taken_at: SystemTime,
}

impl<'a> ArtifactLocator<'a> {
    /// Snapshot every monitored directory; call before spawning.
    pub fn snapshot(config: &'a RunnerConfig, dirs: &[PathBuf]) -> Result<Self> {
        let taken_at = SystemTime::now();
        let before = dirs
            .iter()
            .map(|dir| DirectorySnapshot::capture(dir))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            config,
            before,
            taken_at,
        })
    }

    pub fn monitored(&self) -> impl Iterator<Item = &Path> {
        self.before.iter().map(|snapshot| snapshot.dir.as_path())
    }

    /// Re-snapshot and identify the result and diagnostic files.
    ///
    /// `deck_origin` is the archive or raw deck; `solver_stem` is the stem of
    /// the sanitized deck the solver actually read.
    pub fn locate(&self, deck_origin: &Path, solver_stem: Option<&str>) -> Result<ArtifactSet> {
        let after = self
            .before
            .iter()
            .map(|snapshot| DirectorySnapshot::capture(&snapshot.dir))
            .collect::<Result<Vec<_>>>()?;
        let new_files_per_dir = diff_snapshots(&self.before, &after);
        let new_files = union_new_files(&new_files_per_dir);

        let deck_stem = deck_origin
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let deck_dir = deck_origin.parent().unwrap_or_else(|| Path::new("."));

        let mut result_stems = vec![deck_stem.clone()];
        if let Some(stem) = solver_stem {
            if !stem.eq_ignore_ascii_case(&deck_stem) {
                result_stems.push(stem.to_string());
            }
        }

        let deck_dir_new: &[String] = new_files_per_dir
            .iter()
            .find(|diff| diff.dir == deck_dir)
            .map(|diff| diff.new_entries.as_slice())
            .unwrap_or_default();
        let result = result_candidates(deck_dir, &deck_stem, &self.config.result_extensions)
            .into_iter()
            .filter(|path| path.is_file())
            .find(|path| self.written_this_run(path, deck_dir_new))
            .or_else(|| {
                match_new_artifacts(&new_files_per_dir, &result_stems, &self.config.result_extensions)
                    .into_iter()
                    .find(|path| path.is_file())
            });

        let diagnostic = match_new_artifacts(
            &new_files_per_dir,
            std::slice::from_ref(&deck_stem),
            &self.config.diagnostic_extensions,
        )
        .into_iter()
        .find(|path| path.is_file());

        tracing::debug!(
            new_files = new_files.len(),
            result = ?result,
            diagnostic = ?diagnostic,
            "artifacts located"
        );

        Ok(ArtifactSet {
            new_files,
            new_files_per_dir,
            result,
            diagnostic,
        })
    }

    /// A file beside the deck counts only when it appeared after the snapshot
    /// or was rewritten in place since then.
    fn written_this_run(&self, path: &Path, new_in_dir: &[String]) -> bool {
        let is_new = path
            .file_name()
            .map(|name| name.to_string_lossy())
            .is_some_and(|name| new_in_dir.iter().any(|entry| entry.as_str() == name.as_ref()));
        if is_new {
            return true;
        }
        let threshold = self.taken_at.checked_sub(MTIME_SLACK).unwrap_or(self.taken_at);
        match fs::metadata(path).and_then(|meta| meta.modified()) {
            Ok(modified) => modified >= threshold,
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "no modification time; treating as stale");
                false
            }
        }
    }
}
