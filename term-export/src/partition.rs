//! Partition routing: maps rows to partition keys and keys to directories.
//!
//! Keys double as path segments (`<base>/<column>=<value>/<file>`), so every
//! key is checked before it can reach the filesystem. Hash bucketing uses a
//! truncated SHA-256 digest, which is stable across processes and platforms.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{ExportError, Result};
use crate::logging::truncate_field;
use crate::value::{RowBatch, RowRef, Value};

/// Maximum length of a partition value echoed back in errors.
const MAX_REPORTED_VALUE: usize = 64;

/// How rows are assigned to partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionScheme {
    /// Every row lands in a single bucket
    #[default]
    None,
    /// One bucket per distinct value of `column`
    ByColumn,
    /// `buckets` buckets chosen by a stable hash of `column`
    Hash,
}

/// Partition configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionPolicy {
    /// Routing scheme
    pub scheme: PartitionScheme,
    /// Column the key is derived from (`by_column` and `hash`)
    pub column: Option<String>,
    /// Number of hash buckets (`hash` only)
    pub buckets: Option<u32>,
}

impl PartitionPolicy {
    /// A single unpartitioned bucket.
    pub fn none() -> Self {
        Self::default()
    }

    /// One directory per distinct value of `column`.
    pub fn by_column(column: impl Into<String>) -> Self {
        Self {
            scheme: PartitionScheme::ByColumn,
            column: Some(column.into()),
            buckets: None,
        }
    }

    /// `buckets` directories chosen by a stable hash of `column`.
    pub fn hash(column: impl Into<String>, buckets: u32) -> Self {
        Self {
            scheme: PartitionScheme::Hash,
            column: Some(column.into()),
            buckets: Some(buckets),
        }
    }

    /// Checks that the scheme has everything it needs.
    pub fn validate(&self) -> Result<()> {
        match self.scheme {
            PartitionScheme::None => Ok(()),
            PartitionScheme::ByColumn => self.required_column().map(|_| ()),
            PartitionScheme::Hash => {
                self.required_column()?;
                self.bucket_count().map(|_| ())
            }
        }
    }

    fn required_column(&self) -> Result<&str> {
        match self.column.as_deref() {
            Some(column) if !column.trim().is_empty() => Ok(column),
            _ => Err(ExportError::configuration(format!(
                "partition scheme '{:?}' requires a column",
                self.scheme
            ))),
        }
    }

    fn bucket_count(&self) -> Result<u32> {
        match self.buckets {
            Some(n) if n > 0 => Ok(n),
            Some(_) => Err(ExportError::configuration(
                "hash partitioning requires at least one bucket",
            )),
            None => Err(ExportError::configuration(
                "hash partitioning requires a bucket count",
            )),
        }
    }
}

/// Partition a row belongs to: `None` for the single bucket, or a
/// `column=value` token used as a directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct PartitionKey(Option<String>);

impl PartitionKey {
    /// The single, unpartitioned bucket.
    pub fn none() -> Self {
        Self(None)
    }

    /// Builds a key from a `column=value` token, rejecting unsafe segments.
    pub fn segment(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        check_segment(&token)?;
        Ok(Self(Some(token)))
    }

    /// The directory segment, or `None` for the single bucket.
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// Returns true for the single, unpartitioned bucket.
    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_deref().unwrap_or("<none>"))
    }
}

/// Rows of one partition, in their original relative order.
#[derive(Debug, Clone)]
pub struct Bucket {
    /// Partition the rows belong to
    pub key: PartitionKey,
    /// The rows
    pub rows: RowBatch,
}

/// Maps a row to its partition key. Pure: the same row always yields the same key.
pub fn route(row: &RowRef<'_>, policy: &PartitionPolicy) -> Result<PartitionKey> {
    match policy.scheme {
        PartitionScheme::None => Ok(PartitionKey::none()),
        PartitionScheme::ByColumn => {
            let column = policy.required_column()?;
            let value = partition_value(row, column)?;
            PartitionKey::segment(format!("{column}={value}"))
        }
        PartitionScheme::Hash => {
            let column = policy.required_column()?;
            let buckets = policy.bucket_count()?;
            let value = row_value(row, column)?;
            if value.is_null() {
                return Err(ExportError::partition_key(
                    "null",
                    format!("column '{column}' is null"),
                ));
            }
            let bucket = stable_hash(value) % u64::from(buckets);
            PartitionKey::segment(format!("{column}={bucket}"))
        }
    }
}

/// Deterministic 64-bit hash of a value's canonical text.
///
/// The first eight bytes of the SHA-256 digest, big-endian. Null hashes as the
/// empty string; callers reject null partition values before hashing.
pub fn stable_hash(value: &Value) -> u64 {
    let text = value.canonical().unwrap_or_default();
    let digest = Sha256::digest(text.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// Groups `batch` into buckets in first-seen key order.
pub fn bucket_rows(batch: &RowBatch, policy: &PartitionPolicy) -> Result<Vec<Bucket>> {
    policy.validate()?;

    let mut order: Vec<PartitionKey> = Vec::new();
    let mut members: HashMap<PartitionKey, Vec<usize>> = HashMap::new();
    for (idx, row) in batch.iter().enumerate() {
        let key = route(&row, policy)?;
        members
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(idx);
    }

    let buckets: Vec<Bucket> = order
        .into_iter()
        .map(|key| {
            let indices = members.remove(&key).unwrap_or_default();
            Bucket {
                rows: batch.take(&indices),
                key,
            }
        })
        .collect();
    debug!(
        buckets = buckets.len(),
        rows = batch.len(),
        "Routed rows to partitions"
    );
    Ok(buckets)
}

/// Directory holding a partition's files, without touching the filesystem.
pub fn partition_dir(base: &Path, key: &PartitionKey) -> PathBuf {
    match key.as_str() {
        Some(segment) => base.join(segment),
        None => base.to_path_buf(),
    }
}

/// Creates (if needed) and returns the directory for `key` under `base`.
pub fn ensure_directory(base: &Path, key: &PartitionKey) -> Result<PathBuf> {
    let dir = partition_dir(base, key);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn row_value<'a>(row: &RowRef<'a>, column: &str) -> Result<&'a Value> {
    row.get(column).ok_or_else(|| {
        ExportError::configuration(format!("partition column '{column}' not found in batch"))
    })
}

fn partition_value(row: &RowRef<'_>, column: &str) -> Result<String> {
    let value = row_value(row, column)?;
    match value.canonical() {
        Some(text) => Ok(text.trim().to_string()),
        None => Err(ExportError::partition_key(
            "null",
            format!("column '{column}' is null"),
        )),
    }
}

fn check_segment(token: &str) -> Result<()> {
    let value = token.split_once('=').map_or(token, |(_, v)| v);
    let reject = |reason: &str| {
        Err(ExportError::partition_key(
            truncate_field(token, MAX_REPORTED_VALUE),
            reason,
        ))
    };

    if value.trim().is_empty() {
        return reject("value is empty after normalization");
    }
    if token.contains('/') || token.contains('\\') {
        return reject("value contains a path separator");
    }
    if token.contains('\0') {
        return reject("value contains a null byte");
    }
    if value == "." || value == ".." {
        return reject("value is a relative path component");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn batch(rows: Vec<Vec<Value>>) -> RowBatch {
        RowBatch::new(vec!["id".to_string(), "region".to_string()], rows).unwrap()
    }

    #[test]
    fn test_none_scheme_single_bucket() {
        let b = batch(vec![vec![1.into(), "eu".into()], vec![2.into(), "us".into()]]);
        let row = b.row(0).unwrap();
        assert!(route(&row, &PartitionPolicy::none()).unwrap().is_none());

        let buckets = bucket_rows(&b, &PartitionPolicy::none()).unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].rows.len(), 2);
    }

    #[test]
    fn test_by_column_key() {
        let b = batch(vec![vec![1.into(), "eu".into()]]);
        let key = route(&b.row(0).unwrap(), &PartitionPolicy::by_column("region")).unwrap();
        assert_eq!(key.as_str(), Some("region=eu"));
    }

    #[test]
    fn test_by_column_requires_column() {
        let policy = PartitionPolicy {
            scheme: PartitionScheme::ByColumn,
            column: None,
            buckets: None,
        };
        let b = batch(vec![vec![1.into(), "eu".into()]]);
        let err = route(&b.row(0).unwrap(), &policy).unwrap_err();
        assert!(matches!(err, ExportError::Configuration(_)));
    }

    #[test]
    fn test_hash_requires_buckets() {
        let mut policy = PartitionPolicy::hash("id", 0);
        assert!(matches!(
            policy.validate(),
            Err(ExportError::Configuration(_))
        ));
        policy.buckets = None;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_stable_hash_golden_values() {
        // Fixed digests: these must never change between releases.
        assert_eq!(stable_hash(&Value::from("42")), 8306709966045482637);
        assert_eq!(stable_hash(&Value::Int(42)), 8306709966045482637);
        assert_eq!(stable_hash(&Value::from("alice")), 3159282601090220207);
    }

    #[test]
    fn test_hash_bucket_key() {
        let b = batch(vec![vec![42.into(), "eu".into()], vec![7.into(), "eu".into()]]);
        let policy = PartitionPolicy::hash("id", 8);
        assert_eq!(
            route(&b.row(0).unwrap(), &policy).unwrap().as_str(),
            Some("id=5")
        );
        assert_eq!(
            route(&b.row(1).unwrap(), &policy).unwrap().as_str(),
            Some("id=6")
        );
    }

    #[test]
    fn test_unsafe_values_rejected() {
        for bad in ["a/b", "..\\x", "  ", "..", "."] {
            let b = batch(vec![vec![1.into(), bad.into()]]);
            let err = route(&b.row(0).unwrap(), &PartitionPolicy::by_column("region")).unwrap_err();
            assert!(
                matches!(err, ExportError::PartitionKey { .. }),
                "expected PartitionKey error for {bad:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn test_null_value_rejected() {
        let b = batch(vec![vec![1.into(), Value::Null]]);
        let err = route(&b.row(0).unwrap(), &PartitionPolicy::by_column("region")).unwrap_err();
        assert!(matches!(err, ExportError::PartitionKey { .. }));
    }

    #[test]
    fn test_bucket_rows_first_seen_order() {
        let b = batch(vec![
            vec![1.into(), "us".into()],
            vec![2.into(), "eu".into()],
            vec![3.into(), "us".into()],
        ]);
        let buckets = bucket_rows(&b, &PartitionPolicy::by_column("region")).unwrap();
        let keys: Vec<_> = buckets.iter().map(|b| b.key.to_string()).collect();
        assert_eq!(keys, vec!["region=us", "region=eu"]);
        assert_eq!(buckets[0].rows.rows()[1][0], Value::Int(3));
    }

    #[test]
    fn test_ensure_directory_idempotent() {
        let temp = TempDir::new().unwrap();
        let key = PartitionKey::segment("region=eu").unwrap();
        let first = ensure_directory(temp.path(), &key).unwrap();
        let second = ensure_directory(temp.path(), &key).unwrap();
        assert_eq!(first, second);
        assert!(first.is_dir());
        assert_eq!(
            ensure_directory(temp.path(), &PartitionKey::none()).unwrap(),
            temp.path()
        );
    }
}
