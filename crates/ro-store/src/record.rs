//! Immutable result records and their identifiers.

use chrono::Utc;
use ro_types::{RoResult, StoreError, RESULT_FIELD};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use uuid::Uuid;

use crate::store::read_attachment;

/// Record identifier: the record file's stem.
///
/// Built from a nanosecond write timestamp plus a random suffix. Distinct
/// writers are expected, not guaranteed, to produce distinct identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn generate() -> Self {
        let now = Utc::now();
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}.{:09}_{}",
            now.timestamp(),
            now.timestamp_subsec_nanos(),
            &suffix[..16]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.0)
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One stored outcome: `result`, the sampled parameters and any auxiliary
/// fields, all flattened into a single JSON object.
///
/// The attachment is not part of the object; it is read from disk on first
/// access and cached.
#[derive(Debug, Clone)]
pub struct Record {
    id: RecordId,
    dir: PathBuf,
    result: f64,
    fields: Map<String, Value>,
    attachment: OnceLock<Value>,
}

impl Record {
    /// Parse a record file.
    pub fn load<P: AsRef<Path>>(path: P) -> RoResult<Self> {
        let path = path.as_ref();
        let malformed = |message: String| StoreError::MalformedRecord {
            path: path.display().to_string(),
            message,
        };

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| malformed("record file name is not valid UTF-8".to_string()))?;
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        let contents = std::fs::read_to_string(path)?;
        let value: Value =
            serde_json::from_str(&contents).map_err(|e| malformed(e.to_string()))?;
        Self::from_value(RecordId::from(stem), dir, value).map_err(|message| malformed(message).into())
    }

    fn from_value(id: RecordId, dir: PathBuf, value: Value) -> Result<Self, String> {
        let Value::Object(fields) = value else {
            return Err("record is not a JSON object".to_string());
        };
        let result = match fields.get(RESULT_FIELD) {
            Some(Value::Number(n)) => n.as_f64(),
            // Older writers stringified every value.
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .ok_or_else(|| format!("missing or non-numeric `{RESULT_FIELD}` field"))?;

        Ok(Self {
            id,
            dir,
            result,
            fields,
            attachment: OnceLock::new(),
        })
    }

    pub fn id(&self) -> &RecordId {
        &self.id
    }

    pub fn result(&self) -> f64 {
        self.result
    }

    /// Path of the backing record file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(self.id.file_name())
    }

    /// Raw value of any stored field, `result` included.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Numeric value of a field, accepting stringified numbers.
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        match self.fields.get(name)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Every stored field except `result`: parameters and auxiliary data.
    pub fn params(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter().filter(|(k, _)| k.as_str() != RESULT_FIELD)
    }

    /// The whole stored object.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Lazily load and cache this record's attachment.
    pub fn attachment(&self) -> RoResult<&Value> {
        if let Some(value) = self.attachment.get() {
            return Ok(value);
        }
        let loaded = read_attachment(&self.dir, &self.id)?;
        Ok(self.attachment.get_or_init(|| loaded))
    }

    /// Attachment decoded into a concrete type.
    pub fn attachment_as<T: DeserializeOwned>(&self) -> RoResult<T> {
        Ok(serde_json::from_value(self.attachment()?.clone())?)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Record {} with result {}", self.id, self.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn generated_ids_are_distinct() {
        let ids: HashSet<RecordId> = (0..200).map(|_| RecordId::generate()).collect();
        assert_eq!(ids.len(), 200);
    }

    #[test]
    fn generated_id_shape() {
        let id = RecordId::generate();
        let (stamp, suffix) = id.as_str().split_once('_').unwrap();
        assert!(stamp.contains('.'));
        assert_eq!(suffix.len(), 16);
        assert!(id.file_name().ends_with(".json"));
    }

    #[test]
    fn load_reads_fields() {
        let tmp = TempDir::new().unwrap();
        let path = write(
            tmp.path(),
            "1.5_abc.json",
            r#"{"result": 0.25, "alpha": 3, "curve": [1, 2]}"#,
        );
        let record = Record::load(&path).unwrap();
        assert_eq!(record.id().as_str(), "1.5_abc");
        assert_eq!(record.result(), 0.25);
        assert_eq!(record.get("alpha"), Some(&json!(3)));
        assert_eq!(record.get_f64("alpha"), Some(3.0));
        assert_eq!(record.params().count(), 2);
        assert_eq!(record.path(), path);
    }

    #[test]
    fn load_accepts_stringified_result() {
        let tmp = TempDir::new().unwrap();
        let path = write(tmp.path(), "old.json", r#"{"result": "1.5", "x": "2"}"#);
        let record = Record::load(&path).unwrap();
        assert_eq!(record.result(), 1.5);
        assert_eq!(record.get_f64("x"), Some(2.0));
    }

    #[test]
    fn load_rejects_truncated_file() {
        let tmp = TempDir::new().unwrap();
        let path = write(tmp.path(), "partial.json", r#"{"result": 1.0, "al"#);
        match Record::load(&path) {
            Err(ro_types::RoError::Store(StoreError::MalformedRecord { .. })) => {}
            other => panic!("Expected MalformedRecord, got: {:?}", other),
        }
    }

    #[test]
    fn load_rejects_missing_result() {
        let tmp = TempDir::new().unwrap();
        let path = write(tmp.path(), "nores.json", r#"{"alpha": 1}"#);
        assert!(Record::load(&path).is_err());
        let path = write(tmp.path(), "array.json", "[1, 2]");
        assert!(Record::load(&path).is_err());
    }
}
