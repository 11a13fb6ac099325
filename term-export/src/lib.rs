//! # Term Export - Incremental, Partitioned File Export
//!
//! Term Export writes computed row batches repeatedly and safely to
//! partitioned, size- and row-bounded files. Each call routes rows into
//! partitions, rolls over to a new sibling file once a threshold is reached,
//! drops rows that were already written and records the file format in a
//! sidecar so later appends can detect incompatible settings.
//!
//! Every append can first be simulated. A simulation runs the same
//! per-partition decisions as the real write path and reports them as an
//! [`AppendPlan`](append::AppendPlan) without touching the filesystem.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use term_export::prelude::*;
//!
//! # fn example() -> Result<()> {
//! let batch = RowBatch::from_records(vec![
//!     vec![("id", Value::from(1)), ("region", Value::from("eu"))],
//!     vec![("id", Value::from(2)), ("region", Value::from("us"))],
//! ])?;
//!
//! let options = AppendOptions::new("exports/orders.csv")
//!     .with_partition(PartitionPolicy::by_column("region"))
//!     .with_rollover(RolloverPolicy::disabled().with_max_rows(100_000))
//!     .with_dedup(DedupPolicy::anti_join(["id"]));
//!
//! // Dry run first
//! let plan = simulate_append(&batch, &options)?;
//! for action in &plan.actions {
//!     println!("{} <- {} rows", action.path.display(), action.rows_to_append);
//! }
//!
//! // Then write; repeating the call writes nothing new
//! let written = append(&batch, &options)?;
//! assert_eq!(written.len(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **`value`**: cells, row batches and normalized dedup keys
//! - **`config`**: [`AppendOptions`](config::AppendOptions) and sink formats
//! - **`partition`**: routing rows to partition directories
//! - **`rollover`**: thresholds and rolled file naming
//! - **`dedup`**: anti-join filtering against previously written rows
//! - **`sidecar`**: per-file metadata records
//! - **`codec`**: pluggable columnar table codecs
//! - **`sink`**: delimited-text and columnar file backends
//! - **`append`**: the append engine and simulation
//! - **`logging`**: structured logging configuration
//!
//! ## Features
//!
//! - `parquet` (default): registers a Parquet codec for columnar sinks.
//!   Without it, columnar appends fail with
//!   [`ExportError::CodecUnavailable`](error::ExportError::CodecUnavailable)
//!   and simulations skip columnar reads with a note.

pub mod append;
pub mod codec;
pub mod config;
pub mod dedup;
pub mod error;
pub mod logging;
pub mod partition;
pub mod prelude;
pub mod rollover;
pub mod sidecar;
pub mod sink;
pub mod value;
