//! JSON-file stores under the data folder
//!
//! - `transcripts.json`: `{ "<projectId>": [ transcript, ... ], ... }`
//! - `analyses.json`: `[ analysis document, ... ]`
//!
//! A missing file reads as an empty collection. Writes go to a `.tmp`
//! sibling first and are renamed into place, so a crash mid-write leaves the
//! previous file intact. An analysis entry that does not deserialize is
//! loaded as an unreadable document and written back exactly as found.

use super::{AnalysisStore, TranscriptStore};
use crate::model::{AnalysisDocument, Transcript};
use async_trait::async_trait;
use respno_common::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

pub const TRANSCRIPTS_FILE: &str = "transcripts.json";
pub const ANALYSES_FILE: &str = "analyses.json";

/// Transcripts of every project in one JSON object
pub struct JsonTranscriptStore {
    path: PathBuf,
    // Read-modify-write of the shared file within this process
    write_lock: Mutex<()>,
}

impl JsonTranscriptStore {
    pub fn new(data_folder: &Path) -> Self {
        Self::at(data_folder.join(TRANSCRIPTS_FILE))
    }

    /// Store backed by an explicit file path
    pub fn at(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TranscriptStore for JsonTranscriptStore {
    async fn load(&self, project_id: &str) -> Result<Vec<Transcript>> {
        let mut projects: Map<String, Value> = read_json(&self.path).await?.unwrap_or_default();
        match projects.remove(project_id) {
            Some(list) => Ok(serde_json::from_value(list)?),
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, project_id: &str, transcripts: &[Transcript]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut projects: Map<String, Value> = read_json(&self.path).await?.unwrap_or_default();
        projects.insert(project_id.to_string(), serde_json::to_value(transcripts)?);
        write_json(&self.path, &projects).await?;
        debug!(
            project_id = %project_id,
            count = transcripts.len(),
            path = %self.path.display(),
            "Transcripts saved"
        );
        Ok(())
    }
}

/// All analysis documents in one JSON array
pub struct JsonAnalysisStore {
    path: PathBuf,
}

impl JsonAnalysisStore {
    pub fn new(data_folder: &Path) -> Self {
        Self::at(data_folder.join(ANALYSES_FILE))
    }

    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AnalysisStore for JsonAnalysisStore {
    async fn load_all(&self) -> Result<Vec<AnalysisDocument>> {
        let entries: Vec<Value> = read_json(&self.path).await?.unwrap_or_default();
        let documents: Vec<AnalysisDocument> =
            entries.into_iter().map(AnalysisDocument::from_value).collect();
        for doc in documents.iter().filter(|d| d.unreadable.is_some()) {
            debug!(document = %doc.label(), "Unreadable analysis entry loaded as-is");
        }
        Ok(documents)
    }

    async fn save(&self, documents: &[AnalysisDocument]) -> Result<()> {
        let entries = documents
            .iter()
            .map(AnalysisDocument::to_value)
            .collect::<serde_json::Result<Vec<Value>>>()?;
        write_json(&self.path, &entries).await?;
        debug!(
            count = documents.len(),
            path = %self.path.display(),
            "Analysis documents saved"
        );
        Ok(())
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use respno_common::Error;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_files_read_empty() {
        let dir = TempDir::new().unwrap();
        let transcripts = JsonTranscriptStore::new(dir.path());
        let analyses = JsonAnalysisStore::new(dir.path());

        assert!(transcripts.load("p1").await.unwrap().is_empty());
        assert!(analyses.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_keeps_other_projects() {
        let dir = TempDir::new().unwrap();
        let store = JsonTranscriptStore::new(dir.path());

        store.save("p1", &[Transcript::new("a")]).await.unwrap();
        store.save("p2", &[Transcript::new("b"), Transcript::new("c")]).await.unwrap();
        store.save("p1", &[Transcript::new("d")]).await.unwrap();

        let p1 = store.load("p1").await.unwrap();
        let p2 = store.load("p2").await.unwrap();
        assert_eq!(p1.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(), vec!["d"]);
        assert_eq!(p2.len(), 2);
        assert!(!dir.path().join("transcripts.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_analysis_file_round_trips_unknown_fields() {
        let dir = TempDir::new().unwrap();
        let raw = json!([{
            "id": "a1",
            "projectId": "p1",
            "name": "Wave 1",
            "data": { "Demographics": [ { "respno": "R01", "Age": 30 } ] }
        }]);
        tokio::fs::write(dir.path().join(ANALYSES_FILE), raw.to_string())
            .await
            .unwrap();

        let store = JsonAnalysisStore::new(dir.path());
        let docs = store.load_all().await.unwrap();
        store.save(&docs).await.unwrap();

        let written: Value =
            serde_json::from_slice(&tokio::fs::read(store.path()).await.unwrap()).unwrap();
        assert_eq!(written, raw);
    }

    #[tokio::test]
    async fn test_unreadable_entries_survive_load_and_save() {
        let dir = TempDir::new().unwrap();
        let raw = json!([
            { "id": "a1", "projectId": "p1", "data": { "Demographics": [] } },
            { "id": 17, "projectId": "p1", "data": { "Demographics": [ { "respno": "R01" } ] } },
            null,
            { "id": "a2", "projectId": ["p1"] }
        ]);
        tokio::fs::write(dir.path().join(ANALYSES_FILE), raw.to_string())
            .await
            .unwrap();

        let store = JsonAnalysisStore::new(dir.path());
        let docs = store.load_all().await.unwrap();
        assert_eq!(docs.len(), 4);
        assert!(docs[0].unreadable.is_none());
        assert!(docs[1..].iter().all(|d| d.unreadable.is_some()));

        store.save(&docs).await.unwrap();
        let written: Value =
            serde_json::from_slice(&tokio::fs::read(store.path()).await.unwrap()).unwrap();
        assert_eq!(written, raw);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join(TRANSCRIPTS_FILE), "{ not json")
            .await
            .unwrap();
        let store = JsonTranscriptStore::new(dir.path());
        assert!(matches!(store.load("p1").await, Err(Error::Json(_))));
    }

    #[tokio::test]
    async fn test_creates_missing_data_folder() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("nested").join("data");
        let store = JsonAnalysisStore::new(&nested);
        store.save(&[AnalysisDocument::new("p1")]).await.unwrap();
        assert!(nested.join(ANALYSES_FILE).exists());
    }
}
