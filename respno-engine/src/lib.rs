//! respno-engine library interface
//!
//! Assigns chronological respondent identifiers (`R01`, `R02`, ...) to the
//! transcripts of a project and keeps every analysis document that refers
//! to those respondents in step when the transcript set changes.
//!
//! Pipeline per mutation:
//! 1. [`temporal`] pulls an interview date/time out of transcript text
//! 2. [`sequencer`] orders transcripts by date and assigns respnos
//! 3. [`reconciler`] rewrites analysis rows, context notes and quotes
//! 4. [`orchestrator`] runs the steps and persists through [`store`]

pub mod model;
pub mod orchestrator;
pub mod reconciler;
pub mod row_schema;
pub mod sequencer;
pub mod store;
pub mod temporal;

pub use model::{AnalysisDocument, NewTranscript, Transcript, UnreadableEntry};
pub use orchestrator::{MutationError, MutationReport, RespondentEngine};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use sequencer::{format_respno, parse_respno, sequence, RespondentOrder};
pub use temporal::{parse_schedule, ParsedSchedule};
