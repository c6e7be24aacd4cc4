use anyhow::{anyhow, Result};
use regex::Regex;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::SweepError;

/// Substituted when the caller passes an empty pattern.
pub const DEFAULT_PATTERN: &str = r"freq([.0-9]+)";

/// Numeric frequency parsed from a file name. Ordered with `f64::total_cmp`.
#[derive(Debug, Clone, Copy)]
pub struct FreqKey(pub f64);

impl PartialEq for FreqKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FreqKey {}

impl PartialOrd for FreqKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FreqKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for FreqKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategorizedFile {
    pub key: FreqKey,
    /// The captured substring as written in the file name, e.g. `"0.10"`.
    pub raw_label: String,
    pub path: PathBuf,
}

/// Maps every entry of `dir` whose name matches `pattern` to its captured key.
///
/// Names without a match are skipped. Two files yielding the same key are
/// rejected with [`SweepError::DuplicateKey`].
pub fn categorize(dir: &Path, pattern: &str) -> Result<BTreeMap<FreqKey, CategorizedFile>> {
    let pattern = if pattern.is_empty() {
        DEFAULT_PATTERN
    } else {
        pattern
    };
    let re = Regex::new(pattern).map_err(|e| SweepError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })?;
    if re.captures_len() != 2 {
        return Err(SweepError::InvalidPattern {
            pattern: pattern.to_string(),
            message: format!(
                "expected exactly one capturing group, found {}",
                re.captures_len() - 1
            ),
        }
        .into());
    }

    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| anyhow!("failed to list {}: {}", dir.display(), e))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;
    entries.sort();

    let mut files: BTreeMap<FreqKey, CategorizedFile> = BTreeMap::new();
    for path in entries {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(label) = re
            .captures(name)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
        else {
            continue;
        };
        let value: f64 = label.parse().map_err(|_| SweepError::InvalidKey {
            label: label.clone(),
            path: path.clone(),
        })?;
        let key = FreqKey(value);
        debug!(file = name, key = value, "categorized input");
        if let Some(existing) = files.get(&key) {
            return Err(SweepError::DuplicateKey {
                key: value,
                first: existing.path.clone(),
                second: path,
            }
            .into());
        }
        files.insert(
            key,
            CategorizedFile {
                key,
                raw_label: label,
                path,
            },
        );
    }
    Ok(files)
}
