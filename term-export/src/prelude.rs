//! Prelude for commonly used types and functions in term-export.

pub use crate::append::{
    append, simulate_append, AppendPlan, AppendReport, Appender, AppliedAction, PlannedAction,
};
pub use crate::codec::CodecRegistry;
pub use crate::config::{AppendOptions, CsvOptions, SinkFormat};
pub use crate::dedup::{BaselineScope, DedupMode, DedupPolicy};
pub use crate::error::{ExportError, Result};
pub use crate::logging::LogConfig;
pub use crate::partition::{PartitionPolicy, PartitionScheme};
pub use crate::rollover::RolloverPolicy;
pub use crate::value::{RowBatch, Value};
