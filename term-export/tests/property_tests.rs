//! Property-based tests for routing, deduplication and simulate/append parity.
//!
//! ## Test Categories
//!
//! ### 1. Routing
//! - Routing is a pure function of the row and the policy
//! - Hash buckets stay within range and ignore the value's type
//! - Bucketing keeps every row and its relative order
//!
//! ### 2. Deduplication
//! - Survivors keep the candidates' order
//! - A candidate survives exactly when its key is absent from the baseline
//!
//! ### 3. Parity
//! - A simulation predicts the append that follows it, across rollovers

use std::collections::HashSet;

use proptest::prelude::*;
use tempfile::TempDir;
use term_export::dedup::filter;
use term_export::partition::{bucket_rows, route, stable_hash};
use term_export::prelude::*;
use term_export::value::NormalizedKey;

fn id_batch(ids: &[i64]) -> RowBatch {
    RowBatch::new(
        vec!["id".to_string(), "tag".to_string()],
        ids.iter()
            .map(|id| vec![Value::from(*id), Value::from(format!("t{}", id % 3))])
            .collect(),
    )
    .unwrap()
}

// ============================================================================
// Routing
// ============================================================================

proptest! {
    /// Properties tested:
    /// - Routing the same row twice yields the same key
    /// - The bucket number is below the bucket count
    #[test]
    fn test_hash_route_is_pure(value in "[a-z0-9]{1,12}", buckets in 1u32..64) {
        let batch = RowBatch::new(vec!["k".to_string()], vec![vec![Value::from(value.as_str())]]).unwrap();
        let policy = PartitionPolicy::hash("k", buckets);
        let row = batch.row(0).unwrap();

        let first = route(&row, &policy).unwrap();
        let second = route(&row, &policy).unwrap();
        prop_assert_eq!(&first, &second);

        let segment = first.as_str().unwrap().to_string();
        let bucket: u64 = segment.strip_prefix("k=").unwrap().parse().unwrap();
        prop_assert!(bucket < u64::from(buckets));
    }

    /// Integers hash like their text and integral floats.
    #[test]
    fn test_hash_ignores_value_type(n in -1_000_000i64..1_000_000) {
        let text = stable_hash(&Value::from(n.to_string()));
        prop_assert_eq!(stable_hash(&Value::from(n)), text);
        prop_assert_eq!(stable_hash(&Value::from(n as f64)), text);
    }

    /// Properties tested:
    /// - Every row lands in exactly one bucket
    /// - Rows keep their relative order within a bucket
    /// - Buckets appear in first-seen order
    #[test]
    fn test_bucketing_preserves_rows(ids in prop::collection::vec(0i64..50, 0..60)) {
        let batch = id_batch(&ids);
        let buckets = bucket_rows(&batch, &PartitionPolicy::by_column("tag")).unwrap();

        let total: usize = buckets.iter().map(|b| b.rows.len()).sum();
        prop_assert_eq!(total, ids.len());

        let mut seen_tags = Vec::new();
        for id in &ids {
            let tag = format!("tag=t{}", id % 3);
            if !seen_tags.contains(&tag) {
                seen_tags.push(tag);
            }
        }
        let bucket_tags: Vec<String> = buckets.iter().map(|b| b.key.to_string()).collect();
        prop_assert_eq!(bucket_tags, seen_tags);

        for bucket in &buckets {
            let expected: Vec<i64> = ids
                .iter()
                .copied()
                .filter(|id| bucket.key.to_string() == format!("tag=t{}", id % 3))
                .collect();
            let actual: Vec<i64> = bucket
                .rows
                .iter()
                .map(|row| match row.get("id") {
                    Some(Value::Int(id)) => *id,
                    other => panic!("unexpected id {other:?}"),
                })
                .collect();
            prop_assert_eq!(actual, expected);
        }
    }
}

// ============================================================================
// Deduplication
// ============================================================================

proptest! {
    /// Properties tested:
    /// - Survivors are exactly the candidates whose key is not in the baseline
    /// - Survivors keep the candidates' relative order
    #[test]
    fn test_anti_join_filters_exactly_baseline_keys(
        baseline_ids in prop::collection::vec(0i64..40, 0..40),
        candidate_ids in prop::collection::vec(0i64..40, 0..40)
    ) {
        let baseline = id_batch(&baseline_ids);
        let candidates = id_batch(&candidate_ids);
        let columns = candidates.columns().to_vec();
        let keys = vec!["id".to_string()];

        let survivors = filter(&[baseline], &candidates, &columns, DedupMode::AntiJoin, &keys, false).unwrap();

        let existing: HashSet<i64> = baseline_ids.iter().copied().collect();
        let expected = id_batch(
            &candidate_ids
                .iter()
                .copied()
                .filter(|id| !existing.contains(id))
                .collect::<Vec<_>>(),
        );
        prop_assert_eq!(survivors, expected);
    }

    /// Keys read back from text compare equal to the typed values that wrote them.
    #[test]
    fn test_normalized_key_ignores_value_type(n in any::<i32>(), s in "[a-z]{0,8}") {
        let typed = NormalizedKey::from_values(vec![Value::from(n), Value::from(s.as_str())]);
        let text = NormalizedKey::from_values(vec![Value::from(n.to_string()), Value::from(s.clone())]);
        prop_assert_eq!(typed, text);
    }
}

// ============================================================================
// Simulate/append parity
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Properties tested:
    /// - Each simulation predicts target, row count, creation and rollover of
    ///   the append that follows it
    /// - A second simulation after the append finds nothing new to write
    #[test]
    fn test_simulation_predicts_append(
        batches in prop::collection::vec(prop::collection::vec(0i64..30, 0..8), 1..6),
        max_rows in 1u64..6,
        partitioned in any::<bool>()
    ) {
        let temp = TempDir::new().unwrap();
        let mut options = AppendOptions::new(temp.path().join("ids.csv"))
            .with_rollover(RolloverPolicy::disabled().with_max_rows(max_rows))
            .with_dedup(DedupPolicy::anti_join(["id"]).with_scope(BaselineScope::Family));
        if partitioned {
            options = options.with_partition(PartitionPolicy::by_column("tag"));
        }
        let appender = Appender::new();

        for ids in &batches {
            let batch = id_batch(ids);
            let plan = appender.simulate(&batch, &options).unwrap();
            let report = appender.append_with_report(&batch, &options).unwrap();

            prop_assert_eq!(plan.actions.len(), report.actions.len());
            for (planned, applied) in plan.actions.iter().zip(&report.actions) {
                prop_assert_eq!(&planned.path, &applied.path);
                prop_assert_eq!(planned.rows_to_append, applied.rows_written);
                prop_assert_eq!(planned.will_create, applied.created);
                prop_assert_eq!(planned.rollover_applied, applied.rollover_applied);
            }
            prop_assert_eq!(plan.paths(), report.written);

            let replay = appender.simulate(&batch, &options).unwrap();
            prop_assert_eq!(replay.rows_to_append(), 0);
        }
    }
}
