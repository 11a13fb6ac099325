//! Sink backends: format-specific reads and writes used by the append engine.
//!
//! Each backend answers the same questions for its format: how many rows does
//! an existing file hold, may a batch be appended to it, what rows does it
//! contain, and how are new rows written. The engine makes every routing,
//! rollover and dedup decision; backends only touch files.

use std::borrow::Cow;
use std::path::Path;

use arrow::datatypes::SchemaRef;

use crate::codec::CodecRegistry;
use crate::config::SinkFormat;
use crate::error::Result;
use crate::sidecar::SidecarMetadata;
use crate::value::RowBatch;

mod columnar;
mod delimited;

pub use columnar::ColumnarSink;
pub use delimited::DelimitedSink;

/// What is known about an existing file after a compatibility check.
#[derive(Debug, Clone, Default)]
pub struct ExistingFile {
    /// Column order stored in the file; `None` for a new or empty file
    pub columns: Option<Vec<String>>,
    /// Rows already decoded during the check, reused by the write
    pub rows: Option<RowBatch>,
    /// Stored column types of a columnar file
    pub schema: Option<SchemaRef>,
}

impl ExistingFile {
    /// A file that does not exist yet (or holds nothing).
    pub fn new_file() -> Self {
        Self::default()
    }

    /// Returns true when a header/schema must be written.
    pub fn needs_init(&self) -> bool {
        self.columns.is_none()
    }
}

/// Format-specific file access.
pub trait SinkBackend {
    /// Backend name reported in plans.
    fn name(&self) -> &'static str;

    /// Number of data rows in the existing file at `path`.
    ///
    /// Uses the sidecar when it records the count, otherwise re-derives it
    /// from the file.
    fn existing_rows(&self, path: &Path, sidecar: Option<&SidecarMetadata>) -> Result<u64>;

    /// Checks that `batch` can be appended to the existing file at `path`.
    fn check_compatible(
        &self,
        path: &Path,
        sidecar: Option<&SidecarMetadata>,
        batch: &RowBatch,
    ) -> Result<ExistingFile>;

    /// Every row stored in the existing file at `path`.
    fn read_rows(&self, path: &Path, sidecar: Option<&SidecarMetadata>) -> Result<RowBatch>;

    /// Writes `rows` to `path`, creating it or appending after `existing`.
    ///
    /// Returns the sidecar describing the file after the write.
    fn write(&self, path: &Path, rows: &RowBatch, existing: &ExistingFile)
        -> Result<SidecarMetadata>;

    /// `rows` as a later read of the file returns them.
    ///
    /// Dedup compares candidates in this form so that a value the format
    /// cannot tell apart from another (an empty string and a null in a
    /// delimited file) matches on the next append.
    fn stored_form<'r>(&self, rows: &'r RowBatch) -> Cow<'r, RowBatch> {
        Cow::Borrowed(rows)
    }

    /// Whether writing requires a codec that is not registered.
    fn write_unavailable(&self) -> Option<String> {
        None
    }
}

/// The backend for `format`.
pub fn backend_for<'a>(
    format: &SinkFormat,
    registry: &'a CodecRegistry,
) -> Box<dyn SinkBackend + 'a> {
    match format {
        SinkFormat::Delimited(options) => Box::new(DelimitedSink::new(*options)),
        SinkFormat::Columnar => Box::new(ColumnarSink::new(registry)),
    }
}

/// Writes through a sibling temporary file so a failed write leaves the
/// previous contents in place.
pub(crate) fn replace_file<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let mut tmp_name = path
        .file_name()
        .map(std::ffi::OsString::from)
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    if let Err(e) = write(&tmp) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}
