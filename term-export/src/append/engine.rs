//! Per-partition decisions shared by the executor and the planner.
//!
//! Both paths run [`Engine::prepare`] for every bucket, so a plan reflects the
//! exact target, rollover and dedup outcome the real append would reach. The
//! only divergence is [`Mode::Simulate`]: reads that need an unavailable codec
//! are skipped with a note instead of failing.

use std::path::{Path, PathBuf};

use tracing::{instrument, warn};

use crate::config::AppendOptions;
use crate::dedup::BaselineScope;
use crate::error::Result;
use crate::logging::{truncate_field, LogConfig};
use crate::partition::{partition_dir, Bucket, PartitionKey};
use crate::perf_debug;
use crate::rollover::{active_member, family_members, select_target, FileState, Threshold};
use crate::sidecar::{MetadataStore, SidecarMetadata};
use crate::sink::{ExistingFile, SinkBackend};
use crate::value::RowBatch;

/// Whether the engine may fail on a missing codec or must degrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Execute,
    Simulate,
}

/// Everything decided for one partition before any write.
#[derive(Debug)]
pub(crate) struct PreparedBucket {
    pub key: PartitionKey,
    pub base_path: PathBuf,
    pub path: PathBuf,
    pub exists: bool,
    pub existing_rows: Option<u64>,
    pub candidate_rows: usize,
    pub survivors: RowBatch,
    pub existing: ExistingFile,
    pub rollover_applied: bool,
    pub dedupe_applied: bool,
    pub notes: Vec<String>,
    pub warnings: Vec<String>,
}

impl PreparedBucket {
    /// A write would create a new file.
    pub fn will_create(&self) -> bool {
        !self.exists && !self.survivors.is_empty()
    }
}

pub(crate) struct Engine<'a> {
    pub options: &'a AppendOptions,
    pub backend: &'a dyn SinkBackend,
    pub store: &'a dyn MetadataStore,
    pub log: &'a LogConfig,
    pub mode: Mode,
}

impl Engine<'_> {
    /// The un-rolled file a partition's rows belong to.
    pub fn base_path(&self, key: &PartitionKey) -> PathBuf {
        if key.is_none() {
            return self.options.target.clone();
        }
        let file_name = self.options.target.file_name().unwrap_or_default();
        partition_dir(&self.options.base_dir(), key).join(file_name)
    }

    #[instrument(skip(self, bucket), fields(partition = %bucket.key, rows = bucket.rows.len()))]
    pub fn prepare(&self, bucket: &Bucket) -> Result<PreparedBucket> {
        let mut notes = Vec::new();
        let mut warnings = Vec::new();
        let base_path = self.base_path(&bucket.key);

        // Resolve the active file, then roll if it is full.
        let active = if self.options.rollover.is_enabled() {
            active_member(&base_path)?
        } else {
            base_path.clone()
        };
        let mut path = select_target(&active, false)?;
        let mut sidecar = self.store.read(&path)?;
        let mut state = self.file_state(&path, sidecar.as_ref(), &mut notes, &mut warnings)?;
        let mut rollover_applied = false;
        while state.exists {
            match self.options.rollover.evaluate(&state) {
                Threshold::Exceeded(reason) => {
                    let next = select_target(&base_path, true)?;
                    perf_debug!(
                        self.log,
                        from = %path.display(),
                        to = %next.display(),
                        %reason,
                        "Rollover threshold reached"
                    );
                    notes.push(format!("rolled over from {}: {reason}", path.display()));
                    path = next;
                    rollover_applied = true;
                    sidecar = self.store.read(&path)?;
                    state = self.file_state(&path, sidecar.as_ref(), &mut notes, &mut warnings)?;
                }
                Threshold::Unknown => {
                    warnings.push(format!(
                        "row threshold not evaluated for {}: row count unknown",
                        path.display()
                    ));
                    break;
                }
                Threshold::WithinLimits => break,
            }
        }

        let candidates = self.backend.stored_form(&bucket.rows);
        let existing = if state.exists {
            self.degrade(
                self.backend
                    .check_compatible(&path, sidecar.as_ref(), &candidates),
                &mut notes,
                "schema check",
            )?
            .unwrap_or_default()
        } else {
            ExistingFile::new_file()
        };

        let (survivors, dedupe_applied) = self.deduplicate(&base_path, &candidates, &mut notes)?;

        if survivors.is_empty() {
            perf_debug!(self.log, path = %path.display(), "Nothing left to write after dedup");
        }
        if let Some(reason) = self.backend.write_unavailable() {
            if self.mode == Mode::Simulate && !survivors.is_empty() {
                warnings.push(format!("{}: {reason}", path.display()));
            }
        }

        Ok(PreparedBucket {
            key: bucket.key.clone(),
            base_path,
            path,
            exists: state.exists,
            existing_rows: state.rows,
            candidate_rows: bucket.rows.len(),
            survivors,
            existing,
            rollover_applied,
            dedupe_applied,
            notes,
            warnings,
        })
    }

    fn file_state(
        &self,
        path: &Path,
        sidecar: Option<&SidecarMetadata>,
        notes: &mut Vec<String>,
        warnings: &mut Vec<String>,
    ) -> Result<FileState> {
        if !path.is_file() {
            return Ok(FileState {
                exists: false,
                rows: Some(0),
                size_bytes: Some(0),
            });
        }
        if sidecar.is_none() {
            warn!(path = %path.display(), "Data file exists without sidecar");
            warnings.push(format!(
                "{} has no sidecar; metadata re-derived from the file",
                path.display()
            ));
        }
        let size_bytes = std::fs::metadata(path)?.len();
        let rows = if self.options.rollover.max_rows.is_some() {
            self.degrade(self.backend.existing_rows(path, sidecar), notes, "row count")?
        } else if self.mode == Mode::Simulate {
            // Informational only; never fails a plan the real run would not fail.
            match self.backend.existing_rows(path, sidecar) {
                Ok(rows) => Some(rows),
                Err(e) => {
                    notes.push(format!("row count of {} unavailable: {e}", path.display()));
                    None
                }
            }
        } else {
            None
        };
        Ok(FileState {
            exists: true,
            rows,
            size_bytes: Some(size_bytes),
        })
    }

    /// Applies the dedup policy against the baseline files of `base_path`.
    fn deduplicate(
        &self,
        base_path: &Path,
        candidates: &RowBatch,
        notes: &mut Vec<String>,
    ) -> Result<(RowBatch, bool)> {
        let policy = &self.options.dedup;
        if !policy.is_enabled() {
            return Ok((candidates.clone(), false));
        }
        // Key errors must surface even when the baseline read is skipped.
        policy.effective_keys(candidates.columns())?;

        let files = match policy.scope {
            BaselineScope::BaseFile if base_path.is_file() => vec![base_path.to_path_buf()],
            BaselineScope::BaseFile => Vec::new(),
            BaselineScope::Family => family_members(base_path)?,
        };

        let mut baseline = Vec::with_capacity(files.len());
        for file in &files {
            let sidecar = self.store.read(file)?;
            match self.degrade(
                self.backend.read_rows(file, sidecar.as_ref()),
                notes,
                "dedup baseline read",
            )? {
                Some(rows) => baseline.push(rows),
                None => return Ok((candidates.clone(), false)),
            }
        }

        let survivors = policy.apply(&baseline, candidates)?;
        perf_debug!(
            self.log,
            baseline_files = files.len(),
            candidates = candidates.len(),
            survivors = survivors.len(),
            "Applied anti-join dedup"
        );
        Ok((survivors, true))
    }

    /// In simulate mode, turns a codec-unavailable failure into a note.
    fn degrade<T>(&self, result: Result<T>, notes: &mut Vec<String>, what: &str) -> Result<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) if self.mode == Mode::Simulate && e.is_codec_unavailable() => {
                notes.push(format!(
                    "{what} skipped: {}",
                    truncate_field(&e.to_string(), self.log.max_field_length)
                ));
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
