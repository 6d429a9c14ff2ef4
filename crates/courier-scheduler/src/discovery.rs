//! Candidate discovery in the source folder.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::debug;

/// A file that matches the naming convention.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// File name; the document identity in the ledger.
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl Candidate {
    pub fn stem(&self) -> &str {
        Path::new(&self.name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.name)
    }

    /// True once the file has not been modified for `min_age`. Files whose
    /// mtime is unknown or in the future count as settled / unsettled
    /// respectively.
    pub fn is_settled(&self, now: SystemTime, min_age: Duration) -> bool {
        if min_age.is_zero() {
            return true;
        }
        match self.modified {
            None => true,
            Some(modified) => now
                .duration_since(modified)
                .map(|age| age >= min_age)
                .unwrap_or(false),
        }
    }
}

/// True if `name` starts with `prefix` and has one of `extensions`
/// (case-insensitive, without the dot).
pub fn matches_convention(name: &str, prefix: &str, extensions: &[String]) -> bool {
    if !name.starts_with(prefix) || name.starts_with('.') {
        return false;
    }
    let Some(ext) = Path::new(name).extension().and_then(|e| e.to_str()) else {
        return false;
    };
    extensions
        .iter()
        .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(ext))
}

/// List regular files in `source` matching the convention, sorted by name.
pub fn discover(
    source: &Path,
    prefix: &str,
    extensions: &[String],
) -> std::io::Result<Vec<Candidate>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            debug!(path = %entry.path().display(), "skipping non-UTF-8 file name");
            continue;
        };
        if !matches_convention(&name, prefix, extensions) {
            continue;
        }
        let meta = match entry.metadata() {
            Ok(meta) if meta.is_file() => meta,
            _ => continue,
        };
        out.push(Candidate {
            name,
            path: entry.path(),
            size: meta.len(),
            modified: meta.modified().ok(),
        });
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}
