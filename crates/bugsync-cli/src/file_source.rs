//! Vulnerability source backed by a JSON file
//!
//! The file holds either a bare array of records or a document:
//!
//! ```json
//! { "records": [ { "id": 1, "comments": [] } ], "resources": { "/vulns/1": {} } }
//! ```
//!
//! `resources` backs on-demand fields. Comments written back are persisted
//! immediately.

use anyhow::{Context, Result};
use bugsync_pipeline::{Page, SourceCommenter, SourceQuery};
use bugsync_record::{FetchError, Record, ResourceFetcher};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Serialize, Deserialize)]
struct SourceDocument {
    records: Vec<Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    resources: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSource {
    Document(SourceDocument),
    Records(Vec<Value>),
}

/// Records, resources and comment write-back from one JSON file
pub(crate) struct JsonFileSource {
    path: PathBuf,
    id_field: String,
    document: Mutex<SourceDocument>,
}

impl JsonFileSource {
    /// Load source file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed
    pub(crate) fn open(path: impl AsRef<Path>, id_field: impl Into<String>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read records from {}", path.display()))?;
        let raw: RawSource = serde_json::from_str(&text)
            .with_context(|| format!("invalid records file {}", path.display()))?;
        let document = match raw {
            RawSource::Document(document) => document,
            RawSource::Records(records) => SourceDocument {
                records,
                resources: Map::new(),
            },
        };
        Ok(Self {
            path: path.to_path_buf(),
            id_field: id_field.into(),
            document: Mutex::new(document),
        })
    }

    fn persist(&self, document: &SourceDocument) -> Result<(), FetchError> {
        let text = serde_json::to_string_pretty(document)
            .map_err(|e| FetchError::InvalidResponse(e.to_string()))?;
        std::fs::write(&self.path, text)
            .map_err(|e| FetchError::transport(format!("{}: {e}", self.path.display())))
    }
}

impl SourceQuery for JsonFileSource {
    fn fetch_page(&self, offset: usize, limit: usize) -> Result<Page, FetchError> {
        let document = self.document.lock();
        let records = document
            .records
            .iter()
            .skip(offset)
            .take(limit)
            .map(|value| {
                Record::from_json(value.clone()).map_err(|e| FetchError::InvalidResponse(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(records, document.records.len()))
    }

    fn total_count(&self) -> Result<Option<usize>, FetchError> {
        Ok(Some(self.document.lock().records.len()))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

impl ResourceFetcher for JsonFileSource {
    fn fetch_resource(&self, uri: &str) -> Result<Value, FetchError> {
        self.document
            .lock()
            .resources
            .get(uri)
            .cloned()
            .ok_or_else(|| FetchError::not_found(uri))
    }
}

impl SourceCommenter for JsonFileSource {
    fn add_comment(&self, record: &Record, text: &str) -> Result<(), FetchError> {
        let id = record.peek(&self.id_field).cloned().ok_or_else(|| {
            FetchError::InvalidResponse(format!("record has no '{}' field", self.id_field))
        })?;
        let mut document = self.document.lock();
        let stored = document
            .records
            .iter_mut()
            .find(|r| r.get(&self.id_field) == Some(&id))
            .ok_or_else(|| FetchError::not_found(format!("{}#{id}", self.path.display())))?;
        let Some(object) = stored.as_object_mut() else {
            return Err(FetchError::InvalidResponse("record is not an object".to_string()));
        };
        match object.get_mut("comments") {
            Some(Value::Array(comments)) => comments.push(Value::String(text.to_string())),
            _ => {
                object.insert("comments".to_string(), Value::Array(vec![Value::String(text.to_string())]));
            }
        }
        self.persist(&document)
    }
}
