//! Anti-join deduplication against previously written rows.
//!
//! Candidates whose key tuple already appears in the baseline are dropped.
//! Keys compare by [`NormalizedKey`], so a typed candidate matches the text it
//! was serialized to; callers must not rely on type-sensitive equality.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{ExportError, Result};
use crate::value::{NormalizedKey, RowBatch};

/// Deduplication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupMode {
    /// Write every candidate
    #[default]
    None,
    /// Drop candidates whose key exists in the baseline
    AntiJoin,
}

/// Which files of a rollover family form the dedup baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineScope {
    /// Only the original, un-rolled base file
    #[default]
    BaseFile,
    /// The base file and every rolled sibling
    Family,
}

/// Deduplication configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupPolicy {
    /// Deduplication mode
    pub mode: DedupMode,
    /// Key columns; empty means all columns
    pub keys: Vec<String>,
    /// Compare on every column regardless of `keys`
    pub on_all_columns: bool,
    /// Files consulted for existing keys
    pub scope: BaselineScope,
}

impl DedupPolicy {
    /// No deduplication.
    pub fn none() -> Self {
        Self::default()
    }

    /// Anti-join on the given key columns.
    pub fn anti_join<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mode: DedupMode::AntiJoin,
            keys: keys.into_iter().map(Into::into).collect(),
            on_all_columns: false,
            scope: BaselineScope::BaseFile,
        }
    }

    /// Anti-join on every column.
    pub fn on_all_columns() -> Self {
        Self {
            mode: DedupMode::AntiJoin,
            keys: Vec::new(),
            on_all_columns: true,
            scope: BaselineScope::BaseFile,
        }
    }

    /// Sets the baseline scope.
    pub fn with_scope(mut self, scope: BaselineScope) -> Self {
        self.scope = scope;
        self
    }

    /// Returns true when candidates are filtered.
    pub fn is_enabled(&self) -> bool {
        self.mode == DedupMode::AntiJoin
    }

    /// Key columns actually compared for a batch with `all_columns`.
    pub fn effective_keys(&self, all_columns: &[String]) -> Result<Vec<String>> {
        let keys = if self.on_all_columns || self.keys.is_empty() {
            all_columns.to_vec()
        } else {
            self.keys.clone()
        };
        if keys.is_empty() {
            return Err(ExportError::configuration(
                "anti_join deduplication resolved to an empty key list",
            ));
        }
        if let Some(missing) = keys.iter().find(|k| !all_columns.contains(k)) {
            return Err(ExportError::configuration(format!(
                "dedup key '{missing}' is not a column of the batch"
            )));
        }
        Ok(keys)
    }

    /// Removes candidates already present in `baseline`.
    pub fn apply(&self, baseline: &[RowBatch], candidates: &RowBatch) -> Result<RowBatch> {
        filter(
            baseline,
            candidates,
            candidates.columns(),
            self.mode,
            &self.keys,
            self.on_all_columns,
        )
    }
}

/// Set of normalized key tuples seen in a baseline. Lives for one call.
#[derive(Debug, Default)]
pub struct DedupIndex {
    keys: Vec<String>,
    seen: HashSet<NormalizedKey>,
}

impl DedupIndex {
    /// Indexes every row of `baseline` on `keys`.
    pub fn build(keys: &[String], baseline: &[RowBatch]) -> Result<Self> {
        let mut seen = HashSet::new();
        // Empty files have no header to resolve keys against.
        for batch in baseline.iter().filter(|b| !b.is_empty()) {
            let positions = key_positions(batch, keys, "baseline")?;
            seen.extend(
                batch
                    .rows()
                    .iter()
                    .map(|row| NormalizedKey::from_positions(row, &positions)),
            );
        }
        Ok(Self {
            keys: keys.to_vec(),
            seen,
        })
    }

    /// Indices of `candidates` whose keys are absent from the index, in order.
    pub fn survivors(&self, candidates: &RowBatch) -> Result<Vec<usize>> {
        let positions = key_positions(candidates, &self.keys, "batch")?;
        Ok(candidates
            .rows()
            .iter()
            .enumerate()
            .filter(|(_, row)| !self.seen.contains(&NormalizedKey::from_positions(row, &positions)))
            .map(|(idx, _)| idx)
            .collect())
    }

    /// Number of distinct keys indexed.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Returns true when the baseline contributed no keys.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Keeps the candidates whose key tuple is absent from `baseline`.
///
/// With `on_all_columns` the key is `all_columns`; otherwise `keys`, falling
/// back to `all_columns` when `keys` is empty. Order-preserving and linear in
/// baseline plus candidate size.
pub fn filter(
    baseline: &[RowBatch],
    candidates: &RowBatch,
    all_columns: &[String],
    mode: DedupMode,
    keys: &[String],
    on_all_columns: bool,
) -> Result<RowBatch> {
    if mode == DedupMode::None {
        return Ok(candidates.clone());
    }
    let policy = DedupPolicy {
        mode,
        keys: keys.to_vec(),
        on_all_columns,
        scope: BaselineScope::BaseFile,
    };
    let keys = policy.effective_keys(all_columns)?;
    let index = DedupIndex::build(&keys, baseline)?;
    Ok(candidates.take(&index.survivors(candidates)?))
}

fn key_positions(batch: &RowBatch, keys: &[String], what: &str) -> Result<Vec<usize>> {
    keys.iter()
        .map(|key| {
            batch.column_index(key).ok_or_else(|| {
                ExportError::configuration(format!("dedup key '{key}' not found in {what}"))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn batch(rows: Vec<(i64, &str)>) -> RowBatch {
        RowBatch::new(
            vec!["id".to_string(), "name".to_string()],
            rows.into_iter()
                .map(|(id, name)| vec![Value::Int(id), Value::from(name)])
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_mode_none_is_identity() {
        let candidates = batch(vec![(1, "a"), (1, "a")]);
        let out = DedupPolicy::none()
            .apply(&[batch(vec![(1, "a")])], &candidates)
            .unwrap();
        assert_eq!(out, candidates);
    }

    #[test]
    fn test_anti_join_on_key() {
        let baseline = batch(vec![(1, "a")]);
        let out = DedupPolicy::anti_join(["id"])
            .apply(&[baseline], &batch(vec![(1, "a"), (2, "b")]))
            .unwrap();
        assert_eq!(out, batch(vec![(2, "b")]));
    }

    #[test]
    fn test_anti_join_on_all_columns() {
        let baseline = batch(vec![(1, "a")]);
        let out = DedupPolicy::on_all_columns()
            .apply(&[baseline], &batch(vec![(1, "a"), (1, "z")]))
            .unwrap();
        assert_eq!(out, batch(vec![(1, "z")]));
    }

    #[test]
    fn test_text_baseline_matches_typed_candidates() {
        let baseline = RowBatch::new(
            vec!["id".to_string(), "name".to_string()],
            vec![vec![Value::from("1"), Value::from("a")]],
        )
        .unwrap();
        let out = DedupPolicy::anti_join(["id"])
            .apply(&[baseline], &batch(vec![(1, "a"), (3, "c")]))
            .unwrap();
        assert_eq!(out, batch(vec![(3, "c")]));
    }

    #[test]
    fn test_empty_key_list_is_configuration_error() {
        let empty = RowBatch::empty(vec![]);
        let err = DedupPolicy::anti_join(Vec::<String>::new())
            .apply(&[], &empty)
            .unwrap_err();
        assert!(matches!(err, ExportError::Configuration(_)));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = DedupPolicy::anti_join(["missing"])
            .apply(&[], &batch(vec![(1, "a")]))
            .unwrap_err();
        assert!(matches!(err, ExportError::Configuration(_)));
    }

    #[test]
    fn test_order_preserved_and_intra_batch_duplicates_kept() {
        let out = DedupPolicy::anti_join(["id"])
            .apply(
                &[batch(vec![(2, "b")])],
                &batch(vec![(3, "c"), (2, "b"), (1, "a"), (3, "c")]),
            )
            .unwrap();
        assert_eq!(out, batch(vec![(3, "c"), (1, "a"), (3, "c")]));
    }

    #[test]
    fn test_index_over_multiple_baselines() {
        let keys = vec!["id".to_string()];
        let index = DedupIndex::build(&keys, &[batch(vec![(1, "a")]), batch(vec![(2, "b")])]).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(
            index.survivors(&batch(vec![(1, "x"), (2, "y"), (3, "z")])).unwrap(),
            vec![2]
        );
    }

    #[test]
    fn test_empty_baseline_file_is_skipped() {
        let keys = vec!["id".to_string()];
        let index = DedupIndex::build(&keys, &[RowBatch::empty(Vec::new())]).unwrap();
        assert!(index.is_empty());
    }
}
