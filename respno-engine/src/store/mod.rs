//! Persistence seams for the two collections
//!
//! The engine reads and writes whole collections: all transcripts of one
//! project, and all analysis documents across projects. Concurrent writers
//! are not coordinated; the last save wins.

use crate::model::{AnalysisDocument, Transcript};
use async_trait::async_trait;
use respno_common::Result;

pub mod json;
pub mod memory;

pub use json::{JsonAnalysisStore, JsonTranscriptStore, ANALYSES_FILE, TRANSCRIPTS_FILE};
pub use memory::{MemoryAnalysisStore, MemoryTranscriptStore};

/// Transcript collection, keyed by project
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    /// All transcripts of a project in stored order (empty when unknown)
    async fn load(&self, project_id: &str) -> Result<Vec<Transcript>>;

    /// Replace the project's transcript list
    async fn save(&self, project_id: &str, transcripts: &[Transcript]) -> Result<()>;
}

/// Analysis document collection, shared by all projects
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<AnalysisDocument>>;

    /// Replace the whole collection
    async fn save(&self, documents: &[AnalysisDocument]) -> Result<()>;
}
