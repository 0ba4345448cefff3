//! Stored document shapes
//!
//! Both collections are JSON documents owned by other parts of the system.
//! Only the fields this crate reads or writes are typed; everything else
//! rides along in `extra` and is written back verbatim.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Respno held by a freshly appended transcript until sequencing runs
pub const PENDING_RESPNO: &str = "TEMP";

/// One uploaded interview transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    /// Opaque id, assigned once at creation
    pub id: String,

    /// Derived chronological identifier, recomputed on every sequencing run
    #[serde(default)]
    pub respno: String,

    /// Omitted from the stored record while unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interview_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interview_time: Option<String>,

    /// Filename, sizes, cleaned flag, upload timestamps, ...
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Transcript {
    /// Create a transcript with a pending respno and no schedule
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            respno: PENDING_RESPNO.to_string(),
            interview_date: None,
            interview_time: None,
            extra: Map::new(),
        }
    }

    /// Builder-style date setter
    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.interview_date = Some(date.into());
        self
    }

    /// Builder-style time setter
    pub fn with_time(mut self, time: impl Into<String>) -> Self {
        self.interview_time = Some(time.into());
        self
    }

    /// Builder-style setter for a pass-through field
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Caller input for the create operation
#[derive(Debug, Clone, Default)]
pub struct NewTranscript {
    /// Plain text extracted upstream; scanned for an interview date/time
    pub text: String,

    /// Explicit date, overrides whatever the text yields
    pub interview_date: Option<String>,

    /// Explicit time, overrides whatever the text yields
    pub interview_time: Option<String>,

    /// Pass-through fields stored on the record (filename, size, ...)
    pub fields: Map<String, Value>,
}

/// Coded analysis for a project
///
/// `data` maps sheet name to an array of row objects. It is kept as a raw
/// value so that malformed documents still load; the reconciler validates
/// shape per document and skips the ones it cannot handle.
///
/// An entry whose top-level fields do not even deserialize (a numeric `id`,
/// a `null` in the array) is carried as an unreadable document: see
/// [`AnalysisDocument::from_value`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// `context[sheet][respno]` notes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,

    /// `quotes[respno]` (or `quotes[sheet][respno]`) verbatim quotes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quotes: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,

    /// Set when the stored entry could not be read
    #[serde(skip)]
    pub unreadable: Option<UnreadableEntry>,
}

/// A stored analysis entry kept exactly as it was found
#[derive(Debug, Clone, PartialEq)]
pub struct UnreadableEntry {
    pub raw: Value,
    pub error: String,
}

impl AnalysisDocument {
    /// Empty document for a project
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            id: None,
            project_id: Some(project_id.into()),
            data: Some(Value::Object(Map::new())),
            context: None,
            quotes: None,
            extra: Map::new(),
            unreadable: None,
        }
    }

    /// Read one stored entry
    ///
    /// Never fails. An entry that does not deserialize becomes an unreadable
    /// document holding the raw value; its `id` and `projectId` are still
    /// picked out when present so the entry can be attributed and reported.
    pub fn from_value(raw: Value) -> Self {
        match serde_json::from_value::<AnalysisDocument>(raw.clone()) {
            Ok(doc) => doc,
            Err(e) => Self {
                id: raw.get("id").map(|id| match id {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                }),
                project_id: raw
                    .get("projectId")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                data: None,
                context: None,
                quotes: None,
                extra: Map::new(),
                unreadable: Some(UnreadableEntry {
                    raw,
                    error: e.to_string(),
                }),
            },
        }
    }

    /// Stored form of the document; unreadable entries come back unchanged
    pub fn to_value(&self) -> serde_json::Result<Value> {
        match &self.unreadable {
            Some(entry) => Ok(entry.raw.clone()),
            None => serde_json::to_value(self),
        }
    }

    /// True when the document carries this project's id
    pub fn belongs_to(&self, project_id: &str) -> bool {
        self.project_id.as_deref() == Some(project_id)
    }

    /// Label used in logs and skip reports
    pub fn label(&self) -> String {
        self.id.clone().unwrap_or_else(|| "<unnamed>".to_string())
    }

    /// Rows of a sheet, when the document is well formed
    pub fn sheet(&self, name: &str) -> Option<&Vec<Value>> {
        self.data.as_ref()?.get(name)?.as_array()
    }
}
