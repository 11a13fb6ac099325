//! Error types for the export engine.
//!
//! All fallible operations return [`ExportError`] through the [`Result`] alias.
//! Configuration, partition-key, format and schema errors abort the offending
//! partition before anything is written to it. When an earlier partition of the
//! same call was already committed, the failure is wrapped in
//! [`ExportError::PartialAppend`] so callers can see which files changed.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for the export engine.
#[derive(Error, Debug)]
pub enum ExportError {
    /// Invalid or incomplete policy configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A partition value cannot be used as a path segment.
    #[error("Invalid partition key '{value}': {reason}")]
    PartitionKey {
        /// The offending (possibly truncated) value
        value: String,
        /// Why the value was rejected
        reason: String,
    },

    /// The requested delimiter/quote differ from those recorded for an existing file.
    #[error("Format incompatible with existing file {}: {message}", path.display())]
    FormatIncompatible {
        /// Data file being appended to
        path: PathBuf,
        /// Description of the mismatch
        message: String,
    },

    /// The batch columns differ from the columns already stored in a file.
    #[error("Schema mismatch for {}: expected {expected:?}, found {found:?}", path.display())]
    SchemaMismatch {
        /// Data file whose header/schema was checked
        path: PathBuf,
        /// Columns (or column types) stored in the file
        expected: Vec<String>,
        /// Columns (or offending values) of the incoming batch
        found: Vec<String>,
    },

    /// An optional codec needed for the operation is not registered.
    #[error("Codec unavailable: {codec} ({message})")]
    CodecUnavailable {
        /// Name of the missing codec capability
        codec: String,
        /// What the codec was needed for
        message: String,
    },

    /// An append stopped at `partition` after other partitions were written.
    #[error("Append aborted at partition '{partition}' after writing {} file(s): {source}", written.len())]
    PartialAppend {
        /// Paths committed before the failure, in first-seen partition order
        written: Vec<PathBuf>,
        /// Partition that failed
        partition: String,
        /// Underlying cause
        #[source]
        source: Box<ExportError>,
    },

    /// Error from I/O operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the delimited-text reader/writer.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Error from Arrow conversions.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Error from the Parquet codec.
    #[cfg(feature = "parquet")]
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Error from serialization/deserialization operations.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic internal error for unexpected conditions.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A type alias for `Result<T, ExportError>`.
pub type Result<T> = std::result::Result<T, ExportError>;

impl ExportError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates a partition key error.
    pub fn partition_key(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PartitionKey {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Creates a format incompatibility error for `path`.
    pub fn format_incompatible(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::FormatIncompatible {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a schema mismatch error for `path`.
    pub fn schema_mismatch(
        path: impl Into<PathBuf>,
        expected: Vec<String>,
        found: Vec<String>,
    ) -> Self {
        Self::SchemaMismatch {
            path: path.into(),
            expected,
            found,
        }
    }

    /// Creates a codec unavailable error.
    pub fn codec_unavailable(codec: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CodecUnavailable {
            codec: codec.into(),
            message: message.into(),
        }
    }

    /// Wraps `source` with the paths already committed in the same call.
    ///
    /// Returns `source` unchanged when nothing was written.
    pub fn partial(written: Vec<PathBuf>, partition: impl Into<String>, source: Self) -> Self {
        if written.is_empty() {
            return source;
        }
        Self::PartialAppend {
            written,
            partition: partition.into(),
            source: Box::new(source),
        }
    }

    /// Paths written before this error occurred.
    pub fn written_paths(&self) -> &[PathBuf] {
        match self {
            Self::PartialAppend { written, .. } => written,
            _ => &[],
        }
    }

    /// The underlying error, looking through [`ExportError::PartialAppend`].
    pub fn root(&self) -> &ExportError {
        match self {
            Self::PartialAppend { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns true when the error only reflects a missing optional codec.
    pub fn is_codec_unavailable(&self) -> bool {
        matches!(self.root(), Self::CodecUnavailable { .. })
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
