//! Dry-run planning: the same per-partition decisions as a real append,
//! reported instead of written.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use super::engine::{Engine, PreparedBucket};
use crate::error::Result;
use crate::partition::Bucket;

/// What an append would do for one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedAction {
    /// File that would receive the rows
    pub path: PathBuf,
    /// Un-rolled file of the partition's family
    pub base_path: PathBuf,
    /// Partition directory segment, `None` when unpartitioned
    pub partition_key: Option<String>,
    /// Rows currently in `path`, when known
    pub existing_rows: Option<u64>,
    /// Rows routed to this partition
    pub candidate_rows: usize,
    /// Rows that would be written after dedup
    pub rows_to_append: usize,
    /// The write would create `path`
    pub will_create: bool,
    /// Candidates were filtered against a baseline
    pub dedupe_applied: bool,
    /// A threshold would force a new rolled file
    pub rollover_applied: bool,
    /// Decisions and skipped steps
    pub notes: Vec<String>,
}

/// Read-only outcome of a simulated append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppendPlan {
    /// Sink backend name
    pub backend: String,
    /// One action per partition, in processing order
    pub actions: Vec<PlannedAction>,
    /// Suspicious state found while planning
    pub warnings: Vec<String>,
    /// Skipped reads and other remarks
    pub notes: Vec<String>,
    /// Rows in the input batch
    pub total_rows: usize,
}

impl AppendPlan {
    /// Total rows the append would write.
    pub fn rows_to_append(&self) -> usize {
        self.actions.iter().map(|a| a.rows_to_append).sum()
    }

    /// Paths that would be written, in first-seen partition order.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = Vec::new();
        for action in self.actions.iter().filter(|a| a.rows_to_append > 0) {
            if !paths.contains(&action.path) {
                paths.push(action.path.clone());
            }
        }
        paths
    }

    /// Serializes the plan as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for AppendPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Append plan ({}): {} of {} rows across {} partition(s)",
            self.backend,
            self.rows_to_append(),
            self.total_rows,
            self.actions.len()
        )?;
        for action in &self.actions {
            let mut flags = Vec::new();
            if action.will_create {
                flags.push("create");
            }
            if action.rollover_applied {
                flags.push("rollover");
            }
            if action.dedupe_applied {
                flags.push("dedup");
            }
            writeln!(
                f,
                "  {} <- {} row(s) [{}]",
                action.path.display(),
                action.rows_to_append,
                flags.join(", ")
            )?;
        }
        for warning in &self.warnings {
            writeln!(f, "  warning: {warning}")?;
        }
        for note in &self.notes {
            writeln!(f, "  note: {note}")?;
        }
        Ok(())
    }
}

/// Prepares every bucket without writing.
pub(crate) fn plan(engine: &Engine<'_>, buckets: &[Bucket], total_rows: usize) -> Result<AppendPlan> {
    let mut plan = AppendPlan {
        backend: engine.backend.name().to_string(),
        actions: Vec::with_capacity(buckets.len()),
        warnings: Vec::new(),
        notes: Vec::new(),
        total_rows,
    };
    for bucket in buckets {
        let prepared = engine.prepare(bucket)?;
        plan.warnings.extend(prepared.warnings.iter().cloned());
        plan.notes.extend(
            prepared
                .notes
                .iter()
                .map(|note| format!("[{}] {note}", prepared.key)),
        );
        plan.actions.push(to_action(prepared));
    }
    Ok(plan)
}

fn to_action(prepared: PreparedBucket) -> PlannedAction {
    PlannedAction {
        will_create: prepared.will_create(),
        rows_to_append: prepared.survivors.len(),
        partition_key: prepared.key.as_str().map(str::to_string),
        path: prepared.path,
        base_path: prepared.base_path,
        existing_rows: prepared.existing_rows,
        candidate_rows: prepared.candidate_rows,
        dedupe_applied: prepared.dedupe_applied,
        rollover_applied: prepared.rollover_applied,
        notes: prepared.notes,
    }
}
