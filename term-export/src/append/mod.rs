//! Incremental append and dry-run planning.
//!
//! An append routes a batch into partitions, picks the active file of each
//! partition's rollover family, rolls to a new sibling when a threshold is
//! reached, validates the existing file against the batch, drops rows already
//! present in the dedup baseline and writes the survivors.
//!
//! ## Architecture
//!
//! - `engine`: per-partition decisions shared by both paths
//! - `executor`: writes survivors and sidecars, produces an [`AppendReport`]
//! - `plan`: reports the same decisions as an [`AppendPlan`] without writing
//!
//! ## Example
//!
//! ```rust,no_run
//! use term_export::append::{append, simulate_append};
//! use term_export::config::AppendOptions;
//! use term_export::dedup::DedupPolicy;
//! use term_export::value::{RowBatch, Value};
//!
//! # fn main() -> term_export::error::Result<()> {
//! let batch = RowBatch::from_records(vec![
//!     vec![("id", Value::from(1)), ("name", Value::from("Ada"))],
//!     vec![("id", Value::from(2)), ("name", Value::from("Bob"))],
//! ])?;
//! let options = AppendOptions::new("out/people.csv").with_dedup(DedupPolicy::anti_join(["id"]));
//!
//! let plan = simulate_append(&batch, &options)?;
//! println!("{plan}");
//! let written = append(&batch, &options)?;
//! # Ok(())
//! # }
//! ```
//!
//! Appends are not safe for concurrent writers on the same target: rollover
//! name selection and sidecar updates are unlocked read-modify-write steps.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, instrument};

use crate::codec::CodecRegistry;
use crate::config::AppendOptions;
use crate::error::Result;
use crate::logging::LogConfig;
use crate::partition::bucket_rows;
use crate::sidecar::{FileSidecarStore, MetadataStore};
use crate::sink::backend_for;
use crate::value::RowBatch;

mod engine;
mod executor;
mod plan;


use engine::{Engine, Mode};

pub use executor::{AppendReport, AppliedAction};
pub use plan::{AppendPlan, PlannedAction};

/// Appends batches to partitioned, rolled files and plans appends without
/// writing.
#[derive(Clone)]
pub struct Appender {
    registry: CodecRegistry,
    store: Arc<dyn MetadataStore>,
    log_config: LogConfig,
}

impl Default for Appender {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Appender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Appender")
            .field("registry", &self.registry)
            .field("log_config", &self.log_config)
            .finish_non_exhaustive()
    }
}

impl Appender {
    /// An appender with every compiled-in codec and file sidecars.
    pub fn new() -> Self {
        Self {
            registry: CodecRegistry::default(),
            store: Arc::new(FileSidecarStore::new()),
            log_config: LogConfig::default(),
        }
    }

    /// Replaces the codec registry.
    pub fn with_registry(mut self, registry: CodecRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replaces the sidecar store.
    pub fn with_metadata_store(mut self, store: Arc<dyn MetadataStore>) -> Self {
        self.store = store;
        self
    }

    /// Sets the logging configuration.
    pub fn with_log_config(mut self, log_config: LogConfig) -> Self {
        self.log_config = log_config;
        self
    }

    /// Codecs available to this appender.
    pub fn registry(&self) -> &CodecRegistry {
        &self.registry
    }

    /// Appends `batch` and returns the distinct written paths in first-seen
    /// partition order.
    pub fn append(&self, batch: &RowBatch, options: &AppendOptions) -> Result<Vec<PathBuf>> {
        Ok(self.append_with_report(batch, options)?.written)
    }

    /// Appends `batch` and reports what happened per partition.
    ///
    /// A failure stops the call at the failing partition; files written for
    /// earlier partitions stay written and are listed by the error's
    /// [`written_paths`](crate::error::ExportError::written_paths).
    #[instrument(skip(self, batch, options), fields(target = %options.target.display(), rows = batch.len()))]
    pub fn append_with_report(
        &self,
        batch: &RowBatch,
        options: &AppendOptions,
    ) -> Result<AppendReport> {
        options.validate()?;
        let format = options.sink_format()?;
        if batch.is_empty() {
            return Ok(AppendReport::default());
        }
        let buckets = bucket_rows(batch, &options.partition)?;
        let backend = backend_for(&format, &self.registry);
        let engine = Engine {
            options,
            backend: backend.as_ref(),
            store: self.store.as_ref(),
            log: &self.log_config,
            mode: Mode::Execute,
        };
        let report = executor::execute(&engine, &buckets)?;
        info!(
            files = report.written.len(),
            rows = report.rows_written(),
            "Append completed"
        );
        Ok(report)
    }

    /// Computes what [`append`](Self::append) would do, without writing.
    ///
    /// Fails wherever the real append would fail, except that reads needing an
    /// unregistered codec are skipped: the affected action reports
    /// `dedupe_applied = false` and carries a note.
    #[instrument(skip(self, batch, options), fields(target = %options.target.display(), rows = batch.len()))]
    pub fn simulate(&self, batch: &RowBatch, options: &AppendOptions) -> Result<AppendPlan> {
        options.validate()?;
        let format = options.sink_format()?;
        let backend = backend_for(&format, &self.registry);
        if batch.is_empty() {
            return Ok(AppendPlan {
                backend: backend.name().to_string(),
                actions: Vec::new(),
                warnings: Vec::new(),
                notes: Vec::new(),
                total_rows: 0,
            });
        }
        let buckets = bucket_rows(batch, &options.partition)?;
        let engine = Engine {
            options,
            backend: backend.as_ref(),
            store: self.store.as_ref(),
            log: &self.log_config,
            mode: Mode::Simulate,
        };
        plan::plan(&engine, &buckets, batch.len())
    }
}

/// Appends `batch` with a default [`Appender`].
pub fn append(batch: &RowBatch, options: &AppendOptions) -> Result<Vec<PathBuf>> {
    Appender::new().append(batch, options)
}

/// Simulates an append with a default [`Appender`].
pub fn simulate_append(batch: &RowBatch, options: &AppendOptions) -> Result<AppendPlan> {
    Appender::new().simulate(batch, options)
}
