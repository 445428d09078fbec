use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub fn display_path(path: &Path, base: Option<&Path>) -> String {
    if let Some(base) = base {
        if let Ok(relative) = path.strip_prefix(base) {
            return relative.display().to_string();
        }
    }
    path.display().to_string()
}

pub fn truncate_string(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut truncated = String::new();
    for ch in text.chars() {
        if truncated.len() + ch.len_utf8() > max_bytes {
            break;
        }
        truncated.push(ch);
    }
    truncated
}

/// Delete a file, treating "already gone" as success.
///
/// Returns whether a file was actually removed. Other failures are logged and
/// swallowed so cleanup never masks the primary outcome.
pub fn remove_file_best_effort(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(err) if err.kind() == ErrorKind::NotFound => false,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "cleanup failed");
            false
        }
    }
}

/// File size in bytes, or `None` when the path is missing or not a file.
pub fn file_size(path: &Path) -> Option<u64> {
    let meta = fs::metadata(path).ok()?;
    meta.is_file().then_some(meta.len())
}

/// Local timestamp used in relocated artifact and log names.
pub fn run_timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// First path of the form `<dir>/<stem>.<ext>`, `<dir>/<stem>_1.<ext>`, ...
/// that does not exist yet.
pub fn unique_path(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    let first = dir.join(format!("{stem}.{ext}"));
    if !first.exists() {
        return first;
    }
    let mut counter = 1u32;
    loop {
        let candidate = dir.join(format!("{stem}_{counter}.{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Move a file, falling back to copy-then-delete across filesystems.
pub fn move_file(source: &Path, dest: &Path) -> Result<()> {
    if fs::rename(source, dest).is_ok() {
        return Ok(());
    }
    fs::copy(source, dest)
        .with_context(|| format!("copy {} to {}", source.display(), dest.display()))?;
    remove_file_best_effort(source);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_path_appends_counter_on_collision() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = unique_path(dir.path(), "case1_20240101_000000", "lis");
        assert_eq!(first, dir.path().join("case1_20240101_000000.lis"));
        fs::write(&first, b"x").expect("write");
        let second = unique_path(dir.path(), "case1_20240101_000000", "lis");
        assert_eq!(second, dir.path().join("case1_20240101_000000_1.lis"));
    }

    #[test]
    fn remove_best_effort_tolerates_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gone.atp");
        assert!(!remove_file_best_effort(&path));
        fs::write(&path, b"deck").expect("write");
        assert!(remove_file_best_effort(&path));
        assert!(!path.exists());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_string("abcdef", 3), "abc");
        assert_eq!(truncate_string("é€x", 3), "é");
        assert_eq!(truncate_string("short", 100), "short");
    }

    #[test]
    fn timestamp_has_expected_shape() {
        let stamp = run_timestamp();
        assert_eq!(stamp.len(), 15);
        assert_eq!(stamp.as_bytes()[8], b'_');
        assert!(stamp
            .chars()
            .enumerate()
            .all(|(idx, ch)| idx == 8 || ch.is_ascii_digit()));
    }
}
