//! Append configuration: sink format, policies and target path.
//!
//! Options can be built in code or loaded from JSON:
//!
//! ```rust
//! use term_export::config::AppendOptions;
//!
//! let options = AppendOptions::from_json_str(r#"{
//!     "target": "out/events.csv",
//!     "format": {"kind": "delimited", "delimiter": ";"},
//!     "partition": {"scheme": "hash", "column": "user_id", "buckets": 16},
//!     "rollover": {"max_rows": 100000},
//!     "dedup": {"mode": "anti_join", "keys": ["event_id"]}
//! }"#).unwrap();
//! assert_eq!(options.partition.buckets, Some(16));
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dedup::DedupPolicy;
use crate::error::{ExportError, Result};
use crate::partition::PartitionPolicy;
use crate::rollover::RolloverPolicy;

/// Dialect for delimited-text sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvOptions {
    /// Field delimiter (default: ',')
    pub delimiter: char,
    /// Quote character (default: '"')
    pub quote: char,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            quote: '"',
        }
    }
}

impl CsvOptions {
    /// Tab-separated values.
    pub fn tsv() -> Self {
        Self {
            delimiter: '\t',
            ..Self::default()
        }
    }

    /// Sets the field delimiter.
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Sets the quote character.
    pub fn with_quote(mut self, quote: char) -> Self {
        self.quote = quote;
        self
    }

    /// Checks that delimiter and quote are distinct single-byte characters
    /// other than line terminators.
    pub fn validate(&self) -> Result<()> {
        for (name, c) in [("delimiter", self.delimiter), ("quote", self.quote)] {
            if !c.is_ascii() || c == '\n' || c == '\r' {
                return Err(ExportError::configuration(format!(
                    "{name} {c:?} must be a single ASCII character other than a line break"
                )));
            }
        }
        if self.delimiter == self.quote {
            return Err(ExportError::configuration(
                "delimiter and quote must differ",
            ));
        }
        Ok(())
    }

    pub(crate) fn delimiter_byte(&self) -> u8 {
        self.delimiter as u8
    }

    pub(crate) fn quote_byte(&self) -> u8 {
        self.quote as u8
    }
}

/// Destination file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkFormat {
    /// Row-oriented delimited text
    Delimited(CsvOptions),
    /// Columnar file written through the registered table codec
    Columnar,
}

impl SinkFormat {
    /// Infers the format from a target's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "csv" | "txt" => Some(Self::Delimited(CsvOptions::default())),
            "tsv" => Some(Self::Delimited(CsvOptions::tsv())),
            "parquet" | "pq" => Some(Self::Columnar),
            _ => None,
        }
    }

    /// Backend name reported in plans.
    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Delimited(_) => "delimited",
            Self::Columnar => "columnar",
        }
    }
}

/// Everything an append or simulation needs besides the rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendOptions {
    /// Conceptual target file; partitions nest between its directory and name
    pub target: PathBuf,
    /// Sink format; inferred from the target extension when absent
    #[serde(default)]
    pub format: Option<SinkFormat>,
    /// Deduplication policy
    #[serde(default)]
    pub dedup: DedupPolicy,
    /// Partitioning policy
    #[serde(default)]
    pub partition: PartitionPolicy,
    /// Rollover thresholds
    #[serde(default)]
    pub rollover: RolloverPolicy,
}

impl AppendOptions {
    /// Options for `target` with every policy disabled.
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            format: None,
            dedup: DedupPolicy::default(),
            partition: PartitionPolicy::default(),
            rollover: RolloverPolicy::default(),
        }
    }

    /// Sets the sink format explicitly.
    pub fn with_format(mut self, format: SinkFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Sets the deduplication policy.
    pub fn with_dedup(mut self, dedup: DedupPolicy) -> Self {
        self.dedup = dedup;
        self
    }

    /// Sets the partitioning policy.
    pub fn with_partition(mut self, partition: PartitionPolicy) -> Self {
        self.partition = partition;
        self
    }

    /// Sets the rollover thresholds.
    pub fn with_rollover(mut self, rollover: RolloverPolicy) -> Self {
        self.rollover = rollover;
        self
    }

    /// The effective sink format.
    pub fn sink_format(&self) -> Result<SinkFormat> {
        self.format
            .or_else(|| SinkFormat::from_path(&self.target))
            .ok_or_else(|| {
                ExportError::configuration(format!(
                    "cannot infer sink format for '{}'; set it explicitly",
                    self.target.display()
                ))
            })
    }

    /// Directory that partition directories are created under.
    pub fn base_dir(&self) -> PathBuf {
        match self.target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Checks every policy. Dedup keys are checked later against the batch.
    pub fn validate(&self) -> Result<()> {
        if self.target.file_name().is_none() || self.target.is_dir() {
            return Err(ExportError::configuration(format!(
                "target '{}' must name a file",
                self.target.display()
            )));
        }
        if let SinkFormat::Delimited(csv) = self.sink_format()? {
            csv.validate()?;
        }
        self.partition.validate()?;
        self.rollover.validate()?;
        Ok(())
    }

    /// Parses options from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads options from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::DedupMode;
    use crate::partition::PartitionScheme;

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            SinkFormat::from_path(Path::new("a/b.CSV")),
            Some(SinkFormat::Delimited(CsvOptions::default()))
        );
        assert_eq!(
            SinkFormat::from_path(Path::new("b.tsv")),
            Some(SinkFormat::Delimited(CsvOptions::tsv()))
        );
        assert_eq!(
            SinkFormat::from_path(Path::new("b.parquet")),
            Some(SinkFormat::Columnar)
        );
        assert_eq!(SinkFormat::from_path(Path::new("b.bin")), None);
    }

    #[test]
    fn test_unknown_extension_requires_format() {
        let options = AppendOptions::new("out/data.bin");
        assert!(matches!(
            options.validate(),
            Err(ExportError::Configuration(_))
        ));
        assert!(options
            .with_format(SinkFormat::Columnar)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_csv_options_validation() {
        assert!(CsvOptions::default().validate().is_ok());
        assert!(CsvOptions::default().with_quote(',').validate().is_err());
        assert!(CsvOptions::default().with_delimiter('\n').validate().is_err());
        assert!(CsvOptions::default().with_delimiter('§').validate().is_err());
    }

    #[test]
    fn test_from_json() {
        let options = AppendOptions::from_json_str(
            r#"{
                "target": "out/part.csv",
                "format": {"kind": "delimited", "delimiter": ";"},
                "partition": {"scheme": "by_column", "column": "region"},
                "dedup": {"mode": "anti_join", "keys": ["id"], "scope": "family"}
            }"#,
        )
        .unwrap();
        assert_eq!(
            options.sink_format().unwrap(),
            SinkFormat::Delimited(CsvOptions::default().with_delimiter(';'))
        );
        assert_eq!(options.partition.scheme, PartitionScheme::ByColumn);
        assert_eq!(options.dedup.mode, DedupMode::AntiJoin);
        assert_eq!(options.rollover, RolloverPolicy::default());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_incomplete_partition() {
        let options = AppendOptions::from_json_str(
            r#"{"target": "out/part.csv", "partition": {"scheme": "hash", "column": "id"}}"#,
        )
        .unwrap();
        assert!(matches!(
            options.validate(),
            Err(ExportError::Configuration(_))
        ));
    }

    #[test]
    fn test_base_dir() {
        assert_eq!(AppendOptions::new("part.csv").base_dir(), PathBuf::from("."));
        assert_eq!(
            AppendOptions::new("out/part.csv").base_dir(),
            PathBuf::from("out")
        );
    }
}
