//! Per-experiment record directory: append, scan, attachments.

use parking_lot::RwLock;
use ro_types::{validation_error, Assignment, RoResult, StoreError, RESULT_FIELD};
use serde_json::{Map, Number, Value};
use std::fs::{self, ReadDir};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::record::{Record, RecordId};

/// Sub-directory holding attachments, keyed by record id.
pub const ATTACHMENT_DIR: &str = "_attachments";

const RECORD_EXT: &str = "json";
const ATTACHMENT_EXT: &str = "json";

/// Diagnostic counters accumulated across every scan of a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Records successfully parsed.
    pub parsed: u64,
    /// Record files skipped because they could not be read or parsed.
    pub skipped: u64,
}

/// Everything needed to write one record.
#[derive(Debug, Clone, Default)]
pub struct RecordDraft {
    pub result: f64,
    pub params: Assignment,
    pub data: Map<String, Value>,
    pub attachment: Option<Value>,
}

impl RecordDraft {
    pub fn new(result: f64) -> Self {
        Self {
            result,
            ..Self::default()
        }
    }

    pub fn with_params(mut self, params: Assignment) -> Self {
        self.params = params;
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Auxiliary fields merged into the top-level record object.
    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    /// Out-of-band blob stored next to, but not inside, the record.
    pub fn with_attachment(mut self, attachment: Value) -> Self {
        self.attachment = Some(attachment);
        self
    }

    fn into_object(self) -> RoResult<(Map<String, Value>, Option<Value>)> {
        let result = Number::from_f64(self.result)
            .ok_or_else(|| validation_error!("result must be finite, got {}", self.result))?;

        let mut object = Map::new();
        object.insert(RESULT_FIELD.to_string(), Value::Number(result));
        for (name, value) in self.params {
            object.insert(name, value);
        }
        for (key, value) in self.data {
            if object.contains_key(&key) {
                warn!("Auxiliary field `{}` collides with a stored field, dropped", key);
                continue;
            }
            object.insert(key, value);
        }
        Ok((object, self.attachment))
    }
}

/// Durable, append-only store for one experiment.
///
/// No locking: concurrent writers rely on distinct record ids, readers skip
/// anything they cannot parse.
#[derive(Debug, Clone)]
pub struct RecordStore {
    name: String,
    dir: PathBuf,
    config: StoreConfig,
    stats: Arc<RwLock<ScanStats>>,
}

impl RecordStore {
    /// Open (creating if needed) the named experiment under `config.root`.
    pub fn open(config: &StoreConfig, name: &str) -> RoResult<Self> {
        config.validate(name)?;
        let dir = config.experiment_dir(name);
        Self::ensure_dir(&dir)?;
        Self::ensure_dir(&dir.join(ATTACHMENT_DIR))?;
        info!("Opened experiment store {}", dir.display());

        Ok(Self {
            name: name.to_string(),
            dir,
            config: config.clone(),
            stats: Arc::new(RwLock::new(ScanStats::default())),
        })
    }

    fn ensure_dir(dir: &Path) -> RoResult<()> {
        fs::create_dir_all(dir).map_err(|e| {
            StoreError::DirectoryUnavailable {
                path: dir.display().to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Snapshot of the scan diagnostics gathered so far.
    pub fn stats(&self) -> ScanStats {
        *self.stats.read()
    }

    /// Write a new record file (and its attachment, if any).
    pub fn append(&self, draft: RecordDraft) -> RoResult<RecordId> {
        let (object, attachment) = draft.into_object()?;
        let id = RecordId::generate();

        Self::ensure_dir(&self.dir)?;
        let path = self.dir.join(id.file_name());
        fs::write(&path, serde_json::to_vec(&Value::Object(object))?)?;

        if let Some(attachment) = attachment {
            let att_dir = self.dir.join(ATTACHMENT_DIR);
            Self::ensure_dir(&att_dir)?;
            fs::write(
                attachment_path(&self.dir, &id),
                serde_json::to_vec(&attachment)?,
            )?;
        }

        debug!("Appended record {} to {}", id, self.name);
        Ok(id)
    }

    /// Lazily iterate every currently listable record, in directory order.
    ///
    /// Each call starts a fresh listing.
    pub fn scan(&self) -> RoResult<Scan> {
        Ok(Scan {
            entries: fs::read_dir(&self.dir)?,
            stats: Arc::clone(&self.stats),
        })
    }

    /// Paths of every record file, unparsed.
    pub fn record_paths(&self) -> RoResult<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let Ok(entry) = entry else { continue };
            if is_record_entry(&entry) {
                paths.push(entry.path());
            }
        }
        Ok(paths)
    }

    /// Number of record files currently listed.
    pub fn count(&self) -> RoResult<usize> {
        Ok(self.record_paths()?.len())
    }

    /// Load a single record by id.
    pub fn get(&self, id: &RecordId) -> RoResult<Record> {
        Record::load(self.dir.join(id.file_name()))
    }

    /// Load the attachment written alongside `id`.
    pub fn attachment(&self, id: &RecordId) -> RoResult<Value> {
        read_attachment(&self.dir, id)
    }

    pub(crate) fn note_parsed(&self, parsed: u64, skipped: u64) {
        let mut stats = self.stats.write();
        stats.parsed += parsed;
        stats.skipped += skipped;
    }
}

/// Lazy, finite, unordered sequence of the records in a store.
#[derive(Debug)]
pub struct Scan {
    entries: ReadDir,
    stats: Arc<RwLock<ScanStats>>,
}

impl Iterator for Scan {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        loop {
            let entry = match self.entries.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable directory entry: {}", e);
                    continue;
                }
            };
            if !is_record_entry(&entry) {
                continue;
            }
            match Record::load(entry.path()) {
                Ok(record) => {
                    self.stats.write().parsed += 1;
                    return Some(record);
                }
                Err(e) => {
                    warn!("Skipping record {}: {}", entry.path().display(), e);
                    self.stats.write().skipped += 1;
                }
            }
        }
    }
}

fn is_record_entry(entry: &fs::DirEntry) -> bool {
    let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
    is_file && entry.path().extension().and_then(|e| e.to_str()) == Some(RECORD_EXT)
}

pub(crate) fn attachment_path(dir: &Path, id: &RecordId) -> PathBuf {
    dir.join(ATTACHMENT_DIR)
        .join(format!("{}.{}", id, ATTACHMENT_EXT))
}

pub(crate) fn read_attachment(dir: &Path, id: &RecordId) -> RoResult<Value> {
    let bytes = match fs::read(attachment_path(dir, id)) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(StoreError::MissingAttachment {
                record_id: id.to_string(),
            }
            .into())
        }
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_slice(&bytes)?)
}
