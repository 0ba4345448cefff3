//! In-memory stores for tests and embedding
//!
//! Both stores can be told to fail their next saves, which is how the
//! failure paths of the orchestrator are exercised.

use super::{AnalysisStore, TranscriptStore};
use crate::model::{AnalysisDocument, Transcript};
use async_trait::async_trait;
use respno_common::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryTranscriptStore {
    projects: RwLock<HashMap<String, Vec<Transcript>>>,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryTranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with one project
    pub fn with_project(project_id: impl Into<String>, transcripts: Vec<Transcript>) -> Self {
        let mut projects = HashMap::new();
        projects.insert(project_id.into(), transcripts);
        Self {
            projects: RwLock::new(projects),
            ..Self::default()
        }
    }

    /// Make every following save fail until reset
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscriptStore for MemoryTranscriptStore {
    async fn load(&self, project_id: &str) -> Result<Vec<Transcript>> {
        Ok(self
            .projects
            .read()
            .await
            .get(project_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, project_id: &str, transcripts: &[Transcript]) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Error::Internal("transcript store unavailable".to_string()));
        }
        self.projects
            .write()
            .await
            .insert(project_id.to_string(), transcripts.to_vec());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryAnalysisStore {
    documents: RwLock<Vec<AnalysisDocument>>,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryAnalysisStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(documents: Vec<AnalysisDocument>) -> Self {
        Self {
            documents: RwLock::new(documents),
            ..Self::default()
        }
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisStore for MemoryAnalysisStore {
    async fn load_all(&self) -> Result<Vec<AnalysisDocument>> {
        Ok(self.documents.read().await.clone())
    }

    async fn save(&self, documents: &[AnalysisDocument]) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Error::Internal("analysis store unavailable".to_string()));
        }
        *self.documents.write().await = documents.to_vec();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
