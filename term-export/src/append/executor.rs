//! The real append path: prepares each bucket, then writes survivors and
//! refreshes sidecars.

use std::path::PathBuf;

use serde::Serialize;
use tracing::debug;

use super::engine::{Engine, PreparedBucket};
use crate::error::{ExportError, Result};
use crate::log_data_op;
use crate::partition::{ensure_directory, Bucket};

/// What an append did for one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedAction {
    /// File that received (or would have received) the rows
    pub path: PathBuf,
    /// Partition directory segment, `None` when unpartitioned
    pub partition_key: Option<String>,
    /// Rows written after dedup
    pub rows_written: usize,
    /// Rows dropped as duplicates
    pub rows_dropped: usize,
    /// The write created `path`
    pub created: bool,
    /// A threshold forced a new rolled file
    pub rollover_applied: bool,
    /// Candidates were filtered against a baseline
    pub dedupe_applied: bool,
}

/// Outcome of an append call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AppendReport {
    /// Distinct written paths in first-seen partition order
    pub written: Vec<PathBuf>,
    /// One entry per partition, in processing order
    pub actions: Vec<AppliedAction>,
}

impl AppendReport {
    /// Total rows written across partitions.
    pub fn rows_written(&self) -> usize {
        self.actions.iter().map(|a| a.rows_written).sum()
    }
}

/// Runs every bucket, stopping at the first failing partition.
pub(crate) fn execute(engine: &Engine<'_>, buckets: &[Bucket]) -> Result<AppendReport> {
    let mut report = AppendReport::default();
    for bucket in buckets {
        let action = engine
            .prepare(bucket)
            .and_then(|prepared| commit(engine, prepared))
            .map_err(|e| ExportError::partial(report.written.clone(), bucket.key.to_string(), e))?;

        if action.rows_written > 0 && !report.written.contains(&action.path) {
            report.written.push(action.path.clone());
        }
        report.actions.push(action);
    }
    Ok(report)
}

fn commit(engine: &Engine<'_>, prepared: PreparedBucket) -> Result<AppliedAction> {
    let created = prepared.will_create();
    let mut action = AppliedAction {
        path: prepared.path.clone(),
        partition_key: prepared.key.as_str().map(str::to_string),
        rows_written: 0,
        rows_dropped: prepared.candidate_rows - prepared.survivors.len(),
        created,
        rollover_applied: prepared.rollover_applied,
        dedupe_applied: prepared.dedupe_applied,
    };

    if prepared.survivors.is_empty() {
        debug!(path = %prepared.path.display(), "Skipping write of zero rows");
        return Ok(action);
    }

    ensure_directory(&engine.options.base_dir(), &prepared.key)?;
    let sidecar = engine
        .backend
        .write(&prepared.path, &prepared.survivors, &prepared.existing)?;
    // Sidecar only after the data write succeeded.
    engine.store.write(&prepared.path, &sidecar)?;

    action.rows_written = prepared.survivors.len();
    log_data_op!(
        engine.log,
        path = %prepared.path.display(),
        rows = action.rows_written,
        dropped = action.rows_dropped,
        created,
        rollover = action.rollover_applied,
        "Appended rows"
    );
    Ok(action)
}
