//! Rollover: splitting a logical output file into numbered siblings.
//!
//! A file family is a base path (`part.csv`) plus its rolled siblings
//! (`part_1.csv`, `part_2.csv`, ...). The selector only names files; the
//! append path decides when to roll by checking [`RolloverPolicy`] against
//! the state of the active file.
//!
//! Nothing here locks. Two writers racing on the same family can pick the same
//! sibling name; callers must serialize appends per base path.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ExportError, Result};
use crate::sidecar::{sidecar_path, SIDECAR_EXTENSION};

/// Thresholds that close the active file of a family.
///
/// A file is full once it holds at least `max_rows` rows or `max_size_bytes`
/// bytes. Either, both or neither may be set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloverPolicy {
    /// Row count at which a file is considered full
    pub max_rows: Option<u64>,
    /// Byte size at which a file is considered full
    pub max_size_bytes: Option<u64>,
}

impl RolloverPolicy {
    /// Never roll over.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Sets the row threshold.
    pub fn with_max_rows(mut self, max_rows: u64) -> Self {
        self.max_rows = Some(max_rows);
        self
    }

    /// Sets the size threshold.
    pub fn with_max_size_bytes(mut self, max_size_bytes: u64) -> Self {
        self.max_size_bytes = Some(max_size_bytes);
        self
    }

    /// Returns true when at least one threshold is configured.
    pub fn is_enabled(&self) -> bool {
        self.max_rows.is_some() || self.max_size_bytes.is_some()
    }

    /// Rejects zero thresholds, which would roll on every append.
    pub fn validate(&self) -> Result<()> {
        if self.max_rows == Some(0) {
            return Err(ExportError::configuration("max_rows must be greater than zero"));
        }
        if self.max_size_bytes == Some(0) {
            return Err(ExportError::configuration(
                "max_size_bytes must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Evaluates the thresholds against a file's state.
    pub fn evaluate(&self, state: &FileState) -> Threshold {
        if let (Some(max), Some(size)) = (self.max_size_bytes, state.size_bytes) {
            if size >= max {
                return Threshold::Exceeded(format!("size {size} bytes reached limit {max}"));
            }
        }
        match (self.max_rows, state.rows) {
            (Some(max), Some(rows)) if rows >= max => {
                Threshold::Exceeded(format!("{rows} rows reached limit {max}"))
            }
            (Some(_), None) => Threshold::Unknown,
            _ => Threshold::WithinLimits,
        }
    }
}

/// Observed state of the active file, as far as it is known.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileState {
    /// Whether the data file exists
    pub exists: bool,
    /// Data rows in the file, when derivable
    pub rows: Option<u64>,
    /// File size on disk
    pub size_bytes: Option<u64>,
}

/// Outcome of a threshold check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Threshold {
    /// No configured threshold is reached
    WithinLimits,
    /// A threshold is reached; carries a description
    Exceeded(String),
    /// The row threshold could not be evaluated because the row count is unknown
    Unknown,
}

/// Picks the file that should receive a write.
///
/// Directories, missing paths and existing files are returned unchanged unless
/// `force_new` is set. With `force_new`, the first non-existent
/// `<stem>_<n><suffix>` sibling (n = 1, 2, ...) is returned.
pub fn select_target(base: &Path, force_new: bool) -> Result<PathBuf> {
    if base.is_dir() || !base.exists() || !force_new {
        return Ok(base.to_path_buf());
    }
    let (stem, suffix) = split_name(base)?;
    let mut n: u64 = 1;
    loop {
        let candidate = base.with_file_name(format!("{stem}_{n}{suffix}"));
        if !candidate.exists() {
            debug!(base = %base.display(), target = %candidate.display(), "Rolled over to new file");
            return Ok(candidate);
        }
        n += 1;
    }
}

/// Every existing file of `base`'s family, ordered by roll number (base first).
pub fn family_members(base: &Path) -> Result<Vec<PathBuf>> {
    let mut members: Vec<(u64, PathBuf)> = Vec::new();
    if base.is_file() {
        members.push((0, base.to_path_buf()));
    }
    members.extend(rolled_siblings(base)?);
    members.sort_by_key(|(n, _)| *n);
    Ok(members.into_iter().map(|(_, path)| path).collect())
}

/// The family member currently receiving writes: the highest-numbered
/// existing sibling, else `base`.
///
/// Siblings are `<stem>_<n><suffix>` files that have a sidecar. A rolled file
/// whose sidecar write was interrupted is skipped here and by
/// [`family_members`]; [`select_target`] still never reuses its name.
pub fn active_member(base: &Path) -> Result<PathBuf> {
    Ok(rolled_siblings(base)?
        .into_iter()
        .max_by_key(|(n, _)| *n)
        .map(|(_, path)| path)
        .unwrap_or_else(|| base.to_path_buf()))
}

fn rolled_siblings(base: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let (stem, suffix) = split_name(base)?;
    let dir = match base.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let pattern = format!(
        "{}/{}_*{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        glob::Pattern::escape(&stem),
        glob::Pattern::escape(&suffix)
    );
    let matches = glob::glob(&pattern).map_err(|e| {
        ExportError::configuration(format!("Invalid rollover pattern '{pattern}': {e}"))
    })?;

    let prefix = format!("{stem}_");
    let mut siblings = Vec::new();
    for entry in matches {
        let path = entry.map_err(|e| ExportError::Io(e.into_error()))?;
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) == Some(SIDECAR_EXTENSION)
        {
            continue;
        }
        // Only files this crate wrote carry a sidecar; `report_2023.csv` is not a sibling.
        if !sidecar_path(&path).is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let number = name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(suffix.as_str()))
            .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|digits| digits.parse::<u64>().ok());
        if let Some(n) = number {
            siblings.push((n, path));
        }
    }
    Ok(siblings)
}

/// Splits `part.tar.csv` into (`part.tar`, `.csv`); names without an
/// extension get an empty suffix.
fn split_name(path: &Path) -> Result<(String, String)> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| {
            ExportError::configuration(format!(
                "target '{}' has no usable file name",
                path.display()
            ))
        })?
        .to_string();
    let suffix = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    Ok((stem, suffix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_select_target_unchanged_cases() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("part.csv");
        assert_eq!(select_target(&missing, true).unwrap(), missing);

        fs::write(&missing, "id\n1\n").unwrap();
        assert_eq!(select_target(&missing, false).unwrap(), missing);

        assert_eq!(select_target(temp.path(), true).unwrap(), temp.path());
    }

    #[test]
    fn test_select_target_force_new_skips_existing() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("part.csv");
        fs::write(&base, "id\n").unwrap();
        assert_eq!(
            select_target(&base, true).unwrap(),
            temp.path().join("part_1.csv")
        );

        fs::write(temp.path().join("part_1.csv"), "id\n").unwrap();
        assert_eq!(
            select_target(&base, true).unwrap(),
            temp.path().join("part_2.csv")
        );
    }

    #[test]
    fn test_family_and_active_member() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("part.csv");
        assert_eq!(active_member(&base).unwrap(), base);

        for name in [
            "part.csv",
            "part_2.csv",
            "part_2.csv.meta",
            "part_10.csv",
            "part_10.csv.meta",
            "part_x.csv",
            "part_2023.csv",
            "other_3.csv",
        ] {
            fs::write(temp.path().join(name), "").unwrap();
        }

        let family = family_members(&base).unwrap();
        assert_eq!(
            family,
            vec![
                base.clone(),
                temp.path().join("part_2.csv"),
                temp.path().join("part_10.csv"),
            ]
        );
        assert_eq!(active_member(&base).unwrap(), temp.path().join("part_10.csv"));
    }

    #[test]
    fn test_evaluate_thresholds() {
        let policy = RolloverPolicy::disabled().with_max_rows(3);
        let full = FileState {
            exists: true,
            rows: Some(3),
            size_bytes: Some(10),
        };
        assert!(matches!(policy.evaluate(&full), Threshold::Exceeded(_)));

        let partial = FileState {
            rows: Some(2),
            ..full
        };
        assert_eq!(policy.evaluate(&partial), Threshold::WithinLimits);

        let unknown = FileState { rows: None, ..full };
        assert_eq!(policy.evaluate(&unknown), Threshold::Unknown);

        let by_size = RolloverPolicy::disabled().with_max_size_bytes(10);
        assert!(matches!(by_size.evaluate(&unknown), Threshold::Exceeded(_)));
    }

    #[test]
    fn test_zero_thresholds_rejected() {
        assert!(RolloverPolicy::disabled().with_max_rows(0).validate().is_err());
        assert!(RolloverPolicy::disabled()
            .with_max_size_bytes(0)
            .validate()
            .is_err());
        assert!(RolloverPolicy::disabled().validate().is_ok());
    }

    #[test]
    fn test_numbered_file_without_sidecar_is_not_a_sibling() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("report.csv");
        fs::write(&base, "id\n1\n").unwrap();
        fs::write(temp.path().join("report_2023.csv"), "id\n9\n").unwrap();

        assert_eq!(active_member(&base).unwrap(), base);
        assert_eq!(family_members(&base).unwrap(), vec![base.clone()]);
        // The foreign file's name is still never reused.
        assert_eq!(
            select_target(&base, true).unwrap(),
            temp.path().join("report_1.csv")
        );
    }
}
