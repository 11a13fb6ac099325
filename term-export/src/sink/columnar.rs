//! Columnar backend on top of the registered [`TableCodec`](crate::codec::TableCodec).
//!
//! Columnar files cannot be appended in place: an append reads the stored
//! table, concatenates the new rows and rewrites the file through a temporary
//! sibling. Stored column types are kept; a batch value the stored type cannot
//! hold is a schema mismatch. The sidecar records the resulting row count so
//! thresholds can be checked without decoding the file.

use std::path::Path;

use tracing::{debug, instrument, warn};

use super::{replace_file, ExistingFile, SinkBackend};
use crate::codec::{representable, CodecRegistry};
use crate::error::{ExportError, Result};
use crate::sidecar::SidecarMetadata;
use crate::value::RowBatch;

/// Backend for columnar files.
#[derive(Debug, Clone, Copy)]
pub struct ColumnarSink<'a> {
    registry: &'a CodecRegistry,
}

impl<'a> ColumnarSink<'a> {
    /// Creates a backend using the codecs in `registry`.
    pub fn new(registry: &'a CodecRegistry) -> Self {
        Self { registry }
    }

    fn reject_delimited(path: &Path, sidecar: Option<&SidecarMetadata>) -> Result<()> {
        if let Some(SidecarMetadata::Delimited { .. }) = sidecar {
            return Err(ExportError::format_incompatible(
                path,
                "sidecar describes a delimited-text file",
            ));
        }
        Ok(())
    }
}

impl SinkBackend for ColumnarSink<'_> {
    fn name(&self) -> &'static str {
        "columnar"
    }

    fn existing_rows(&self, path: &Path, sidecar: Option<&SidecarMetadata>) -> Result<u64> {
        Self::reject_delimited(path, sidecar)?;
        if let Some(count) = sidecar.and_then(SidecarMetadata::row_count) {
            return Ok(count);
        }
        warn!(path = %path.display(), "Columnar file has no sidecar; reading stored row count");
        let codec = self
            .registry
            .require_columnar("derive row count of a file without sidecar")?;
        Ok(codec.read_table(path)?.1)
    }

    #[instrument(skip(self, sidecar, batch))]
    fn check_compatible(
        &self,
        path: &Path,
        sidecar: Option<&SidecarMetadata>,
        batch: &RowBatch,
    ) -> Result<ExistingFile> {
        Self::reject_delimited(path, sidecar)?;
        let codec = self.registry.require_columnar("check schema of existing file")?;
        let (stored, _) = codec.read_table(path)?;
        if !stored.same_column_set(batch.columns()) {
            return Err(ExportError::schema_mismatch(
                path,
                stored.columns().to_vec(),
                batch.columns().to_vec(),
            ));
        }

        let schema = codec.read_schema(path)?;
        for (idx, column) in batch.columns().iter().enumerate() {
            let Ok(field) = schema.field_with_name(column) else {
                continue;
            };
            if let Some(row) = batch
                .rows()
                .iter()
                .find(|row| !representable(&row[idx], field.data_type()))
            {
                return Err(ExportError::schema_mismatch(
                    path,
                    vec![format!("{column}: {}", field.data_type())],
                    vec![format!("{column}: {}", row[idx])],
                ));
            }
        }

        Ok(ExistingFile {
            columns: Some(stored.columns().to_vec()),
            rows: Some(stored),
            schema: Some(schema),
        })
    }

    fn read_rows(&self, path: &Path, sidecar: Option<&SidecarMetadata>) -> Result<RowBatch> {
        Self::reject_delimited(path, sidecar)?;
        let codec = self.registry.require_columnar("read dedup baseline")?;
        Ok(codec.read_table(path)?.0)
    }

    #[instrument(skip(self, rows, existing), fields(rows = rows.len()))]
    fn write(
        &self,
        path: &Path,
        rows: &RowBatch,
        existing: &ExistingFile,
    ) -> Result<SidecarMetadata> {
        let codec = self.registry.require_columnar("write table")?;
        let table = match (&existing.columns, &existing.rows) {
            (None, _) => rows.clone(),
            (Some(_), Some(stored)) => stored.concat(rows)?,
            (Some(_), None) => codec.read_table(path)?.0.concat(rows)?,
        };
        let schema = match (&existing.schema, &existing.columns) {
            (Some(schema), _) => Some(schema.clone()),
            (None, Some(_)) => Some(codec.read_schema(path)?),
            (None, None) => None,
        };
        replace_file(path, |tmp| codec.write_table(&table, schema.as_deref(), tmp))?;
        debug!(path = %path.display(), total_rows = table.len(), "Rewrote columnar file");
        Ok(SidecarMetadata::columnar(table.len() as u64))
    }

    fn write_unavailable(&self) -> Option<String> {
        self.registry
            .columnar()
            .is_none()
            .then(|| "no columnar codec registered; a real append will fail".to_string())
    }
}
