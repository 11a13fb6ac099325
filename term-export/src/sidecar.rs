//! Sidecar metadata stored next to each data file.
//!
//! Every data file `part.csv` may have a companion `part.csv.meta` holding a
//! small JSON document:
//!
//! ```text
//! {"delimiter": ",", "quote": "\""}   delimited-text sinks
//! {"row_count": 1200}                 columnar sinks
//! ```
//!
//! The sidecar is written only after the data write succeeded, and never for a
//! zero-row write. A data file without a sidecar is not "compatible with
//! anything": callers must re-derive what the sidecar would have told them.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::Result;

/// File extension appended to a data file's name to form its sidecar path.
pub const SIDECAR_EXTENSION: &str = "meta";

/// Facts recorded about one data file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SidecarMetadata {
    /// Dialect of a delimited-text file
    Delimited {
        /// Field delimiter
        delimiter: String,
        /// Quote character
        quote: String,
    },
    /// Row count of a columnar file
    Columnar {
        /// Data rows in the file
        row_count: u64,
    },
}

impl SidecarMetadata {
    /// Metadata for a delimited file.
    pub fn delimited(delimiter: char, quote: char) -> Self {
        Self::Delimited {
            delimiter: delimiter.to_string(),
            quote: quote.to_string(),
        }
    }

    /// Metadata for a columnar file.
    pub fn columnar(row_count: u64) -> Self {
        Self::Columnar { row_count }
    }

    /// Row count, for columnar metadata.
    pub fn row_count(&self) -> Option<u64> {
        match self {
            Self::Columnar { row_count } => Some(*row_count),
            Self::Delimited { .. } => None,
        }
    }
}

/// Path of the sidecar for `data_path` (`<file>.meta`).
pub fn sidecar_path(data_path: &Path) -> PathBuf {
    let mut name: OsString = data_path
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(".");
    name.push(SIDECAR_EXTENSION);
    data_path.with_file_name(name)
}

/// Storage for sidecar metadata.
pub trait MetadataStore: Send + Sync {
    /// Reads the metadata for `data_path`.
    ///
    /// Returns `None` when no usable sidecar exists.
    fn read(&self, data_path: &Path) -> Result<Option<SidecarMetadata>>;

    /// Replaces the metadata for `data_path`.
    fn write(&self, data_path: &Path, metadata: &SidecarMetadata) -> Result<()>;
}

/// Stores sidecars as JSON files beside their data files.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSidecarStore;

impl FileSidecarStore {
    /// Creates a new file-backed store.
    pub fn new() -> Self {
        Self
    }
}

impl MetadataStore for FileSidecarStore {
    #[instrument(skip(self))]
    fn read(&self, data_path: &Path) -> Result<Option<SidecarMetadata>> {
        let path = sidecar_path(data_path);
        if !path.is_file() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        match serde_json::from_str(&raw) {
            Ok(metadata) => Ok(Some(metadata)),
            Err(e) => {
                // Interrupted writes leave truncated JSON behind; treat as missing.
                warn!(sidecar = %path.display(), error = %e, "Ignoring unreadable sidecar");
                Ok(None)
            }
        }
    }

    #[instrument(skip(self))]
    fn write(&self, data_path: &Path, metadata: &SidecarMetadata) -> Result<()> {
        let path = sidecar_path(data_path);
        let mut tmp_name = path.file_name().map(OsString::from).unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp = path.with_file_name(tmp_name);

        std::fs::write(&tmp, serde_json::to_vec(metadata)?)?;
        std::fs::rename(&tmp, &path)?;
        debug!(sidecar = %path.display(), "Wrote sidecar");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            sidecar_path(Path::new("out/region=eu/part_2.csv")),
            PathBuf::from("out/region=eu/part_2.csv.meta")
        );
    }

    #[test]
    fn test_json_layout() {
        let delimited = serde_json::to_string(&SidecarMetadata::delimited(',', '"')).unwrap();
        assert_eq!(delimited, r#"{"delimiter":",","quote":"\""}"#);
        let columnar = serde_json::to_string(&SidecarMetadata::columnar(12)).unwrap();
        assert_eq!(columnar, r#"{"row_count":12}"#);

        let parsed: SidecarMetadata = serde_json::from_str(r#"{"row_count": 3}"#).unwrap();
        assert_eq!(parsed.row_count(), Some(3));
    }

    #[test]
    fn test_read_missing_is_none() {
        let temp = TempDir::new().unwrap();
        let store = FileSidecarStore::new();
        assert_eq!(store.read(&temp.path().join("part.csv")).unwrap(), None);
    }

    #[test]
    fn test_write_then_read_overwrites() {
        let temp = TempDir::new().unwrap();
        let data = temp.path().join("part.parquet");
        let store = FileSidecarStore::new();

        store.write(&data, &SidecarMetadata::columnar(1)).unwrap();
        store.write(&data, &SidecarMetadata::columnar(5)).unwrap();
        assert_eq!(store.read(&data).unwrap(), Some(SidecarMetadata::columnar(5)));
        assert!(!temp.path().join("part.parquet.meta.tmp").exists());
    }

    #[test]
    fn test_truncated_sidecar_treated_as_missing() {
        let temp = TempDir::new().unwrap();
        let data = temp.path().join("part.csv");
        std::fs::write(sidecar_path(&data), r#"{"delimiter":","#).unwrap();
        assert_eq!(FileSidecarStore::new().read(&data).unwrap(), None);
    }
}
