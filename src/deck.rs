//! Deck preparation.
//!
//! Turns decoded deck text into the files the solver reads: a scratch deck
//! beside the originating archive, a sanitized copy inside the solver's
//! working directory, and any include files the deck references. Every file
//! this module creates for a single run is owned by [`PreparedDeck`] and
//! removed when it is cleaned up or dropped.
use crate::config::RunnerConfig;
use crate::util::remove_file_best_effort;
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Decoded deck text plus the path it came from.
#[derive(Debug, Clone)]
pub struct DeckSource {
    pub text: String,
    /// The archive (or raw deck file) the text was extracted from.
    pub origin: PathBuf,
}

impl DeckSource {
    pub fn new(text: impl Into<String>, origin: impl Into<PathBuf>) -> Self {
        Self {
            text: text.into(),
            origin: origin.into(),
        }
    }

    /// Read a raw deck file from disk.
    pub fn read(path: &Path) -> Result<Self> {
        let origin = fs::canonicalize(path)
            .with_context(|| format!("resolve deck {}", path.display()))?;
        let bytes = fs::read(&origin).with_context(|| format!("read deck {}", origin.display()))?;
        Ok(Self::new(decode_deck_bytes(&bytes), origin))
    }

    pub fn origin_dir(&self) -> &Path {
        self.origin.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// Decks are UTF-8 when they can be; otherwise the solver's Latin-1.
pub fn decode_deck_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&byte| char::from(byte)).collect(),
    }
}

/// Encode deck text as Latin-1, dropping characters it cannot represent.
pub fn encode_deck_text(text: &str) -> Vec<u8> {
    text.chars()
        .filter_map(|ch| u8::try_from(u32::from(ch)).ok())
        .collect()
}

/// Replace `=` and whitespace runs with `_` so the solver accepts the name.
pub fn sanitize_deck_name(name: &str) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let re = UNSAFE.get_or_init(|| Regex::new(r"[=\s]+").expect("valid sanitize regex"));
    re.replace_all(name, "_").into_owned()
}

/// Paths referenced by include directives, in deck order.
///
/// A quoted path wins; otherwise the last whitespace-separated token of the
/// directive line is taken.
pub fn include_references(text: &str) -> Vec<String> {
    static DIRECTIVE: OnceLock<Regex> = OnceLock::new();
    static QUOTED: OnceLock<Regex> = OnceLock::new();
    let directive = DIRECTIVE.get_or_init(|| {
        Regex::new(r"(?i)(?:\$INCLUDE|\.INC|\bINCLUDE)\b").expect("valid include regex")
    });
    let quoted = QUOTED
        .get_or_init(|| Regex::new(r#""([^"]+)"|'([^']+)'"#).expect("valid quote regex"));

    let mut references = Vec::new();
    for line in text.lines() {
        if !directive.is_match(line) {
            continue;
        }
        let candidate = match quoted.captures(line) {
            Some(caps) => caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str().to_string()),
            None => line.split_whitespace().last().map(str::to_string),
        };
        if let Some(candidate) = candidate {
            references.push(candidate);
        }
    }
    references
}

/// Files created for one run, removed on [`PreparedDeck::cleanup`] or drop.
#[derive(Debug)]
pub struct PreparedDeck {
    /// Scratch deck beside the archive (the archive itself for raw decks).
    pub scratch_path: PathBuf,
    /// The deck file the solver is pointed at.
    pub solver_deck: PathBuf,
    /// Include files copied into the solver's working directory.
    pub copied_includes: Vec<PathBuf>,
    owned: Vec<PathBuf>,
}

impl PreparedDeck {
    /// Argument passed to the solver: a bare name when the deck sits in the
    /// working directory, the full path otherwise.
    pub fn deck_argument(&self, working_dir: &Path) -> String {
        match (self.solver_deck.parent(), self.solver_deck.file_name()) {
            (Some(parent), Some(name)) if parent == working_dir => {
                name.to_string_lossy().into_owned()
            }
            _ => self.solver_deck.display().to_string(),
        }
    }

    /// Stem of the deck file the solver actually read.
    pub fn solver_stem(&self) -> Option<String> {
        self.solver_deck
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
    }

    /// Remove every owned scratch file; safe to call more than once.
    pub fn cleanup(&mut self) -> Vec<PathBuf> {
        let mut removed = Vec::new();
        for path in self.owned.drain(..) {
            if remove_file_best_effort(&path) {
                removed.push(path);
            }
        }
        removed
    }
}

impl Drop for PreparedDeck {
    fn drop(&mut self) {
        let removed = self.cleanup();
        if !removed.is_empty() {
            tracing::debug!(count = removed.len(), "scratch decks removed on drop");
        }
    }
}

/// Writes scratch decks and stages them for the solver.
pub struct DeckPreparator<'a> {
    config: &'a RunnerConfig,
}

impl<'a> DeckPreparator<'a> {
    pub fn new(config: &'a RunnerConfig) -> Self {
        Self { config }
    }

    pub fn prepare(&self, source: &DeckSource, working_dir: &Path) -> Result<PreparedDeck> {
        let mut prepared = PreparedDeck {
            scratch_path: source.origin.clone(),
            solver_deck: source.origin.clone(),
            copied_includes: Vec::new(),
            owned: Vec::new(),
        };

        if !self.is_raw_deck(&source.origin) {
            let scratch = source.origin.with_extension(&self.config.deck_extension);
            // Owned before writing so a partial write is still removed.
            prepared.owned.push(scratch.clone());
            fs::write(&scratch, encode_deck_text(&source.text))
                .with_context(|| format!("write scratch deck {}", scratch.display()))?;
            prepared.scratch_path = scratch.clone();
            prepared.solver_deck = scratch;
        }

        let scratch_name = prepared
            .scratch_path
            .file_name()
            .ok_or_else(|| anyhow!("scratch deck has no file name"))?
            .to_string_lossy()
            .into_owned();
        let staged = working_dir.join(sanitize_deck_name(&scratch_name));
        if staged != prepared.scratch_path {
            match copy_to_new_file(&prepared.scratch_path, &staged) {
                Ok(()) => {
                    prepared.owned.push(staged.clone());
                    prepared.solver_deck = staged;
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    tracing::warn!(
                        staged = %staged.display(),
                        "solver directory already holds a file with the deck's name; using original path"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        staged = %staged.display(),
                        error = %err,
                        "could not stage deck in solver directory; using original path"
                    );
                }
            }
        }

        prepared.copied_includes = self.copy_includes(source, working_dir);
        tracing::debug!(
            deck = %prepared.solver_deck.display(),
            includes = prepared.copied_includes.len(),
            "deck prepared"
        );
        Ok(prepared)
    }

    fn is_raw_deck(&self, origin: &Path) -> bool {
        origin
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.config.deck_extension))
    }

    fn copy_includes(&self, source: &DeckSource, working_dir: &Path) -> Vec<PathBuf> {
        let mut copied = Vec::new();
        for reference in include_references(&source.text) {
            let include = source.origin_dir().join(&reference);
            if !include.is_file() {
                tracing::debug!(include = %include.display(), "include not found; skipped");
                continue;
            }
            let Some(name) = include.file_name() else {
                continue;
            };
            let target = working_dir.join(name);
            if target.exists() {
                continue;
            }
            match fs::copy(&include, &target) {
                Ok(_) => copied.push(target),
                Err(err) => tracing::warn!(
                    include = %include.display(),
                    error = %err,
                    "could not copy include"
                ),
            }
        }
        copied
    }
}

/// Copy `from` into a file that must not exist yet; a partly written
/// destination is removed again.
fn copy_to_new_file(from: &Path, to: &Path) -> io::Result<()> {
    let mut reader = fs::File::open(from)?;
    let mut writer = fs::OpenOptions::new().write(true).create_new(true).open(to)?;
    if let Err(err) = io::copy(&mut reader, &mut writer) {
        drop(writer);
        remove_file_best_effort(to);
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_equals_and_whitespace_runs() {
        assert_eq!(sanitize_deck_name("RPI=400 ohm.atp"), "RPI_400_ohm.atp");
        assert_eq!(sanitize_deck_name("a = \t b.atp"), "a_b.atp");
        assert_eq!(sanitize_deck_name("plain.atp"), "plain.atp");
    }

    #[test]
    fn include_references_prefer_quoted_paths() {
        let text = "BEGIN\n$INCLUDE 'lib/cable.lib'\n  include  models/line.pch\n.inc \"x y.dat\"\nINCLUDED_NOT\nC comment\n";
        assert_eq!(
            include_references(text),
            vec![
                "lib/cable.lib".to_string(),
                "models/line.pch".to_string(),
                "x y.dat".to_string(),
            ]
        );
    }

    #[test]
    fn decode_falls_back_to_latin1() {
        assert_eq!(decode_deck_bytes(b"abc"), "abc");
        assert_eq!(decode_deck_bytes(&[0x61, 0xE9]), "a\u{e9}");
        assert_eq!(encode_deck_text("a\u{e9}\u{20ac}"), vec![0x61, 0xE9]);
    }

    #[test]
    fn prepare_stages_scratch_deck_and_includes() {
        let project = tempfile::tempdir().expect("project dir");
        let solver = tempfile::tempdir().expect("solver dir");
        let archive = project.path().join("RPI=400 case.acp");
        fs::write(&archive, b"archive").expect("write archive");
        fs::write(project.path().join("line.pch"), b"PCH").expect("write include");
        let source = DeckSource::new("BEGIN\n$INCLUDE line.pch\nEND\n", &archive);

        let config = RunnerConfig::default();
        let mut prepared = DeckPreparator::new(&config)
            .prepare(&source, solver.path())
            .expect("prepare deck");

        let scratch = project.path().join("RPI=400 case.atp");
        let staged = solver.path().join("RPI_400_case.atp");
        assert_eq!(prepared.scratch_path, scratch);
        assert_eq!(prepared.solver_deck, staged);
        assert!(scratch.is_file());
        assert!(staged.is_file());
        assert_eq!(prepared.deck_argument(solver.path()), "RPI_400_case.atp");
        assert_eq!(prepared.solver_stem().as_deref(), Some("RPI_400_case"));
        assert_eq!(
            prepared.copied_includes,
            vec![solver.path().join("line.pch")]
        );

        let removed = prepared.cleanup();
        assert_eq!(removed.len(), 2);
        assert!(!scratch.exists());
        assert!(!staged.exists());
        assert!(archive.exists(), "archive must never be touched");
        assert!(solver.path().join("line.pch").exists());
    }

    #[test]
    fn raw_deck_is_never_deleted() {
        let dir = tempfile::tempdir().expect("dir");
        let deck = dir.path().join("case1.atp");
        fs::write(&deck, b"BEGIN\n").expect("write deck");
        let source = DeckSource::read(&deck).expect("read deck");
        let config = RunnerConfig::default();
        {
            let prepared = DeckPreparator::new(&config)
                .prepare(&source, source.origin_dir())
                .expect("prepare deck");
            assert_eq!(prepared.solver_deck, source.origin);
        }
        assert!(deck.exists());
    }

    #[test]
    fn drop_removes_scratch_files() {
        let project = tempfile::tempdir().expect("project dir");
        let solver = tempfile::tempdir().expect("solver dir");
        let archive = project.path().join("case2.acp");
        let source = DeckSource::new("BEGIN\n", &archive);
        let config = RunnerConfig::default();
        let staged = {
            let prepared = DeckPreparator::new(&config)
                .prepare(&source, solver.path())
                .expect("prepare deck");
            prepared.solver_deck.clone()
        };
        assert!(!staged.exists());
        assert!(!project.path().join("case2.atp").exists());
    }

    #[test]
    fn existing_include_in_solver_dir_is_kept() {
        let project = tempfile::tempdir().expect("project dir");
        let solver = tempfile::tempdir().expect("solver dir");
        fs::write(project.path().join("lib.dat"), b"new").expect("write include");
        fs::write(solver.path().join("lib.dat"), b"old").expect("write existing");
        let source = DeckSource::new("INCLUDE lib.dat\n", project.path().join("c.acp"));
        let config = RunnerConfig::default();
        let prepared = DeckPreparator::new(&config)
            .prepare(&source, solver.path())
            .expect("prepare deck");
        assert!(prepared.copied_includes.is_empty());
        assert_eq!(
            fs::read(solver.path().join("lib.dat")).expect("read"),
            b"old".to_vec()
        );
    }

    #[test]
    fn existing_file_with_staged_name_is_left_alone() {
        let solver = tempfile::tempdir().expect("solver dir");
        let decks = tempfile::tempdir().expect("deck dir");
        let users_deck = solver.path().join("case8.atp");
        fs::write(&users_deck, b"USER OWN DECK").expect("write user deck");
        let deck = decks.path().join("case8.atp");
        fs::write(&deck, b"BEGIN\n").expect("write deck");
        let source = DeckSource::read(&deck).expect("read deck");

        let config = RunnerConfig::default();
        let mut prepared = DeckPreparator::new(&config)
            .prepare(&source, solver.path())
            .expect("prepare deck");
        assert_eq!(prepared.solver_deck, source.origin);
        assert_eq!(prepared.deck_argument(solver.path()), source.origin.display().to_string());

        assert!(prepared.cleanup().is_empty());
        drop(prepared);
        assert_eq!(fs::read(&users_deck).expect("read user deck"), b"USER OWN DECK".to_vec());
        assert!(deck.exists());
    }
}
