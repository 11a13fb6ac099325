//! Delimited-text (CSV/TSV) backend.
//!
//! Files start with a header row. Nulls and empty strings are both written as
//! empty fields and read back as nulls. The dialect is recorded in the sidecar;
//! when the sidecar is missing the header line is sniffed for a different
//! delimiter and then re-read with the requested dialect.

use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, instrument, warn};

use super::{ExistingFile, SinkBackend};
use crate::config::CsvOptions;
use crate::error::{ExportError, Result};
use crate::sidecar::SidecarMetadata;
use crate::value::{RowBatch, Value};

/// Delimiters recognized when a file has no sidecar.
const SNIFFED_DELIMITERS: [char; 4] = [',', ';', '\t', '|'];

/// Backend for row-oriented delimited text.
#[derive(Debug, Clone, Copy)]
pub struct DelimitedSink {
    options: CsvOptions,
}

impl DelimitedSink {
    /// Creates a backend writing with `options`.
    pub fn new(options: CsvOptions) -> Self {
        Self { options }
    }

    /// Dialect recorded in `sidecar`, falling back to the requested one.
    fn dialect(&self, sidecar: Option<&SidecarMetadata>) -> CsvOptions {
        match sidecar {
            Some(SidecarMetadata::Delimited { delimiter, quote }) => {
                match (single_char(delimiter), single_char(quote)) {
                    (Some(d), Some(q)) => CsvOptions {
                        delimiter: d,
                        quote: q,
                    },
                    _ => self.options,
                }
            }
            _ => self.options,
        }
    }

    fn reader(&self, path: &Path, dialect: CsvOptions) -> Result<csv::Reader<File>> {
        Ok(csv::ReaderBuilder::new()
            .delimiter(dialect.delimiter_byte())
            .quote(dialect.quote_byte())
            .has_headers(true)
            .flexible(true)
            .from_path(path)?)
    }

    /// Header of the file at `path`, or `None` when the file is empty.
    fn read_header(&self, path: &Path, dialect: CsvOptions) -> Result<Option<Vec<String>>> {
        let mut reader = self.reader(path, dialect)?;
        let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if header.is_empty() {
            Ok(None)
        } else {
            Ok(Some(header))
        }
    }

    fn writer(&self, file: File) -> csv::Writer<File> {
        csv::WriterBuilder::new()
            .delimiter(self.options.delimiter_byte())
            .quote(self.options.quote_byte())
            .has_headers(false)
            .from_writer(file)
    }
}

impl SinkBackend for DelimitedSink {
    fn name(&self) -> &'static str {
        "delimited"
    }

    fn existing_rows(&self, path: &Path, sidecar: Option<&SidecarMetadata>) -> Result<u64> {
        let mut reader = self.reader(path, self.dialect(sidecar))?;
        let mut count = 0u64;
        for record in reader.records() {
            record?;
            count += 1;
        }
        Ok(count)
    }

    #[instrument(skip(self, sidecar, batch))]
    fn check_compatible(
        &self,
        path: &Path,
        sidecar: Option<&SidecarMetadata>,
        batch: &RowBatch,
    ) -> Result<ExistingFile> {
        let columns = batch.columns();
        match sidecar {
            Some(SidecarMetadata::Delimited { delimiter, quote }) => {
                let requested_delimiter = self.options.delimiter.to_string();
                let requested_quote = self.options.quote.to_string();
                if *delimiter != requested_delimiter || *quote != requested_quote {
                    return Err(ExportError::format_incompatible(
                        path,
                        format!(
                            "file uses delimiter {delimiter:?} and quote {quote:?}, \
                             requested delimiter {requested_delimiter:?} and quote {requested_quote:?}"
                        ),
                    ));
                }
            }
            Some(SidecarMetadata::Columnar { .. }) => {
                return Err(ExportError::format_incompatible(
                    path,
                    "sidecar describes a columnar file",
                ));
            }
            None => {
                warn!(path = %path.display(), "Data file has no sidecar; re-deriving header");
                let line = first_line(path)?;
                let requested = self.options.delimiter;
                if let Some(found) = sniff_delimiter(&line) {
                    if found != requested && !line.contains(requested) {
                        return Err(ExportError::format_incompatible(
                            path,
                            format!(
                                "header line is delimited by {found:?}, requested delimiter {requested:?}"
                            ),
                        ));
                    }
                }
            }
        }

        let Some(header) = self.read_header(path, self.options)? else {
            debug!(path = %path.display(), "Existing file is empty; header will be written");
            return Ok(ExistingFile::new_file());
        };
        if header.len() != columns.len() || !columns.iter().all(|c| header.contains(c)) {
            return Err(ExportError::schema_mismatch(path, header, columns.to_vec()));
        }
        Ok(ExistingFile {
            columns: Some(header),
            ..ExistingFile::default()
        })
    }

    fn read_rows(&self, path: &Path, sidecar: Option<&SidecarMetadata>) -> Result<RowBatch> {
        let mut reader = self.reader(path, self.dialect(sidecar))?;
        let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            // A truncated trailing line yields a short record; pad it.
            let mut row: Vec<Value> = record
                .iter()
                .take(header.len())
                .map(|field| {
                    if field.is_empty() {
                        Value::Null
                    } else {
                        Value::from(field)
                    }
                })
                .collect();
            row.resize(header.len(), Value::Null);
            rows.push(row);
        }
        RowBatch::new(header, rows)
    }

    #[instrument(skip(self, rows, existing), fields(rows = rows.len()))]
    fn write(
        &self,
        path: &Path,
        rows: &RowBatch,
        existing: &ExistingFile,
    ) -> Result<SidecarMetadata> {
        let (file, ordered) = match &existing.columns {
            Some(header) => {
                let mut file = OpenOptions::new().read(true).append(true).open(path)?;
                terminate_last_line(&mut file, path)?;
                (file, rows.project(header)?)
            }
            None => {
                let file = File::create(path)?;
                (file, rows.clone())
            }
        };

        let mut writer = self.writer(file);
        if existing.needs_init() {
            writer.write_record(ordered.columns())?;
        }
        for row in ordered.rows() {
            writer.write_record(row.iter().map(|v| v.canonical().unwrap_or_default()))?;
        }
        writer.flush()?;

        Ok(SidecarMetadata::delimited(
            self.options.delimiter,
            self.options.quote,
        ))
    }

    fn stored_form<'r>(&self, rows: &'r RowBatch) -> Cow<'r, RowBatch> {
        let has_empty = rows
            .rows()
            .iter()
            .flatten()
            .any(|v| matches!(v, Value::Str(s) if s.is_empty()));
        if !has_empty {
            return Cow::Borrowed(rows);
        }
        Cow::Owned(rows.map_values(|v| match v {
            Value::Str(s) if s.is_empty() => Value::Null,
            other => other.clone(),
        }))
    }
}

/// First line of the file at `path`, without its line terminator.
fn first_line(path: &Path) -> Result<String> {
    let mut buf = Vec::new();
    BufReader::new(File::open(path)?).read_until(b'\n', &mut buf)?;
    Ok(String::from_utf8_lossy(&buf)
        .trim_end_matches(['\r', '\n'])
        .to_string())
}

/// The most frequent known delimiter in `line`, if any occurs.
fn sniff_delimiter(line: &str) -> Option<char> {
    SNIFFED_DELIMITERS
        .iter()
        .map(|&d| (d, line.matches(d).count()))
        .filter(|(_, n)| *n > 0)
        .max_by_key(|(_, n)| *n)
        .map(|(d, _)| d)
}

/// Ends a last line that was written without a terminator, so appended
/// records start on a line of their own.
fn terminate_last_line(file: &mut File, path: &Path) -> Result<()> {
    if file.metadata()?.len() == 0 {
        return Ok(());
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    if last[0] != b'\n' {
        warn!(path = %path.display(), "Existing file lacks a trailing newline");
        file.write_all(b"\n")?;
    }
    Ok(())
}

fn single_char(s: &str) -> Option<char> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii() => Some(c),
        _ => None,
    }
}
