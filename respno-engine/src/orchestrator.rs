//! Mutation orchestrator
//!
//! Every change to a project's transcript set runs the same pipeline:
//!
//! RECEIVED → VALIDATED → OLD_ORDER_CAPTURED → NEW_ORDER_COMPUTED →
//! TRANSCRIPTS_PERSISTED → ANALYSES_RECONCILED → ANALYSES_PERSISTED → DONE
//!
//! Any step may end the run in FAILED. Transcripts are saved before analyses
//! are touched; when that save fails nothing is reconciled. Each transition
//! is logged and published on the [`EventBus`].
//!
//! There is no locking across mutations. Two concurrent runs on the same
//! project both read, both write, and the later write wins.

use crate::model::{NewTranscript, Transcript};
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::sequencer::{sequence, RespondentOrder};
use crate::store::{AnalysisStore, TranscriptStore};
use crate::temporal::{normalize_date, normalize_time, parse_schedule};
use respno_common::events::{EventBus, MutationEvent, MutationKind, MutationState};
use respno_common::{time, uuid_utils, Error};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Transcript fields owned by the engine; never taken from caller pass-through fields
const RESERVED_FIELDS: [&str; 4] = ["id", "respno", "interviewDate", "interviewTime"];

/// A mutation that ended in FAILED
#[derive(Debug, Error)]
#[error("{kind} of project '{project_id}' failed after {state}: {source}")]
pub struct MutationError {
    pub kind: MutationKind,
    pub project_id: String,
    pub run_id: Uuid,
    /// Last state reached before the failure
    pub state: MutationState,
    pub source: Error,
}

impl MutationError {
    /// Unknown transcript or unusable input, as opposed to a storage failure
    pub fn is_client_error(&self) -> bool {
        self.source.is_client_error()
    }

    /// True when nothing was written
    pub fn nothing_persisted(&self) -> bool {
        self.state < MutationState::TranscriptsPersisted
    }
}

/// Final respno of one transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RespondentAssignment {
    pub transcript_id: String,
    pub respno: String,
}

/// Result of a successful mutation
#[derive(Debug, Clone, Serialize)]
pub struct MutationReport {
    pub run_id: Uuid,
    pub kind: MutationKind,
    pub project_id: String,
    /// Transcript created, deleted or edited (none for project-wide runs)
    pub transcript_id: Option<String>,
    /// States visited, in order
    pub states: Vec<MutationState>,
    /// Ordering after the run
    pub assignments: Vec<RespondentAssignment>,
    pub reconcile: ReconcileOutcome,
}

impl MutationReport {
    /// Respno now held by a transcript
    pub fn respno_of(&self, transcript_id: &str) -> Option<&str> {
        self.assignments
            .iter()
            .find(|a| a.transcript_id == transcript_id)
            .map(|a| a.respno.as_str())
    }
}

/// Per-run state tracking
struct MutationRun<'a> {
    run_id: Uuid,
    kind: MutationKind,
    project_id: String,
    state: MutationState,
    trail: Vec<MutationState>,
    event_bus: &'a EventBus,
}

impl<'a> MutationRun<'a> {
    fn start(kind: MutationKind, project_id: &str, event_bus: &'a EventBus) -> Self {
        let run_id = uuid_utils::generate();
        info!(run_id = %run_id, kind = %kind, project_id = %project_id, "Mutation received");
        Self {
            run_id,
            kind,
            project_id: project_id.to_string(),
            state: MutationState::Received,
            trail: vec![MutationState::Received],
            event_bus,
        }
    }

    fn transition_to(&mut self, next: MutationState) {
        if !self.state.can_transition_to(next) {
            warn!(
                run_id = %self.run_id,
                from = %self.state,
                to = %next,
                "Unexpected state transition"
            );
        }
        debug!(run_id = %self.run_id, "{} -> {}", self.state, next);

        self.event_bus.emit_lossy(MutationEvent::StateChanged {
            run_id: self.run_id,
            kind: self.kind,
            project_id: self.project_id.clone(),
            old_state: self.state,
            new_state: next,
            timestamp: time::now(),
        });
        self.state = next;
        self.trail.push(next);
    }

    fn fail(&mut self, source: Error) -> MutationError {
        let reached = self.state;
        error!(
            run_id = %self.run_id,
            kind = %self.kind,
            project_id = %self.project_id,
            state = %reached,
            error = %source,
            "Mutation failed"
        );
        self.transition_to(MutationState::Failed);
        MutationError {
            kind: self.kind,
            project_id: self.project_id.clone(),
            run_id: self.run_id,
            state: reached,
            source,
        }
    }

    fn finish(
        &mut self,
        transcript_id: Option<String>,
        order: &RespondentOrder,
        reconcile: ReconcileOutcome,
    ) -> MutationReport {
        self.transition_to(MutationState::Done);
        self.event_bus.emit_lossy(MutationEvent::Completed {
            run_id: self.run_id,
            kind: self.kind,
            project_id: self.project_id.clone(),
            respondents: order.len(),
            timestamp: time::now(),
        });
        info!(
            run_id = %self.run_id,
            kind = %self.kind,
            project_id = %self.project_id,
            respondents = order.len(),
            documents = reconcile.documents_reconciled,
            skipped = reconcile.documents_skipped.len(),
            "Mutation complete"
        );

        MutationReport {
            run_id: self.run_id,
            kind: self.kind,
            project_id: self.project_id.clone(),
            transcript_id,
            states: self.trail.clone(),
            assignments: order
                .iter()
                .map(|(id, respno)| RespondentAssignment {
                    transcript_id: id.to_string(),
                    respno: respno.to_string(),
                })
                .collect(),
            reconcile,
        }
    }
}

/// Entry point for transcript mutations
pub struct RespondentEngine<T, A> {
    transcripts: Arc<T>,
    analyses: Arc<A>,
    reconciler: Reconciler,
    event_bus: EventBus,
}

impl<T, A> RespondentEngine<T, A>
where
    T: TranscriptStore,
    A: AnalysisStore,
{
    pub fn new(
        transcripts: Arc<T>,
        analyses: Arc<A>,
        reconciler: Reconciler,
        event_bus: EventBus,
    ) -> Self {
        Self {
            transcripts,
            analyses,
            reconciler,
            event_bus,
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Append a transcript and resequence the project
    ///
    /// Explicit date/time on `input` win over what the text yields. The new
    /// transcript starts with a pending respno and gets its real one from
    /// sequencing.
    pub async fn create_transcript(
        &self,
        project_id: &str,
        input: NewTranscript,
    ) -> Result<MutationReport, MutationError> {
        let mut run = MutationRun::start(MutationKind::Create, project_id, &self.event_bus);
        require(project_id, "project id").map_err(|e| run.fail(e))?;

        let parsed = parse_schedule(&input.text);
        let date = match explicit(input.interview_date.as_deref(), normalize_date, "date") {
            Ok(Some(date)) => Some(date),
            Ok(None) => parsed.interview_date,
            Err(e) => return Err(run.fail(e)),
        };
        let clock = match explicit(input.interview_time.as_deref(), normalize_time, "time") {
            Ok(Some(clock)) => Some(clock),
            Ok(None) => parsed.interview_time,
            Err(e) => return Err(run.fail(e)),
        };
        run.transition_to(MutationState::Validated);

        let stored = self.load_transcripts(&mut run).await?;

        let mut transcript = Transcript::new(uuid_utils::generate_id());
        transcript.interview_date = date;
        transcript.interview_time = clock;
        transcript.extra = input.fields;
        for field in RESERVED_FIELDS {
            transcript.extra.remove(field);
        }
        transcript
            .extra
            .entry("uploadedAt")
            .or_insert_with(|| time::now_rfc3339().into());
        info!(
            transcript_id = %transcript.id,
            date = ?transcript.interview_date,
            time = ?transcript.interview_time,
            "Transcript created"
        );

        let transcript_id = transcript.id.clone();
        let mut updated = stored.clone();
        updated.push(transcript);

        self.commit(run, Some(transcript_id), &stored, updated).await
    }

    /// Remove a transcript, resequence, and drop its analysis rows
    pub async fn delete_transcript(
        &self,
        project_id: &str,
        transcript_id: &str,
    ) -> Result<MutationReport, MutationError> {
        let mut run = MutationRun::start(MutationKind::Delete, project_id, &self.event_bus);
        require(project_id, "project id").map_err(|e| run.fail(e))?;
        require(transcript_id, "transcript id").map_err(|e| run.fail(e))?;
        run.transition_to(MutationState::Validated);

        let stored = self.load_transcripts(&mut run).await?;
        let updated: Vec<Transcript> = stored
            .iter()
            .filter(|t| t.id != transcript_id)
            .cloned()
            .collect();
        if updated.len() == stored.len() {
            return Err(run.fail(not_found(project_id, transcript_id)));
        }

        self.commit(run, Some(transcript_id.to_string()), &stored, updated)
            .await
    }

    /// Change a transcript's interview date and/or time and resequence
    ///
    /// `None` leaves a field as it is, an empty string clears it, anything
    /// else must be a recognizable date/time and is stored normalized.
    pub async fn edit_transcript_schedule(
        &self,
        project_id: &str,
        transcript_id: &str,
        date: Option<&str>,
        time: Option<&str>,
    ) -> Result<MutationReport, MutationError> {
        let mut run = MutationRun::start(MutationKind::EditSchedule, project_id, &self.event_bus);
        require(project_id, "project id").map_err(|e| run.fail(e))?;
        require(transcript_id, "transcript id").map_err(|e| run.fail(e))?;
        let date = edit_value(date, normalize_date, "date").map_err(|e| run.fail(e))?;
        let clock = edit_value(time, normalize_time, "time").map_err(|e| run.fail(e))?;
        run.transition_to(MutationState::Validated);

        let stored = self.load_transcripts(&mut run).await?;
        let mut updated = stored.clone();
        let Some(target) = updated.iter_mut().find(|t| t.id == transcript_id) else {
            return Err(run.fail(not_found(project_id, transcript_id)));
        };
        if let Some(date) = date {
            target.interview_date = date;
        }
        if let Some(clock) = clock {
            target.interview_time = clock;
        }
        target
            .extra
            .insert("updatedAt".to_string(), time::now_rfc3339().into());
        info!(
            transcript_id = %transcript_id,
            date = ?target.interview_date,
            time = ?target.interview_time,
            "Interview schedule edited"
        );

        self.commit(run, Some(transcript_id.to_string()), &stored, updated)
            .await
    }

    /// Resequence without changing the transcript set
    ///
    /// Repairs projects whose stored respnos drifted from date order.
    pub async fn resequence(&self, project_id: &str) -> Result<MutationReport, MutationError> {
        let mut run = MutationRun::start(MutationKind::Resequence, project_id, &self.event_bus);
        require(project_id, "project id").map_err(|e| run.fail(e))?;
        run.transition_to(MutationState::Validated);

        let stored = self.load_transcripts(&mut run).await?;
        let updated = stored.clone();
        self.commit(run, None, &stored, updated).await
    }

    /// Drop analysis rows and notes that point at no live transcript
    ///
    /// Uses the stored ordering as-is; transcripts are not rewritten.
    pub async fn prune_orphans(&self, project_id: &str) -> Result<MutationReport, MutationError> {
        let mut run = MutationRun::start(MutationKind::PruneOrphans, project_id, &self.event_bus);
        require(project_id, "project id").map_err(|e| run.fail(e))?;
        run.transition_to(MutationState::Validated);

        let stored = self.load_transcripts(&mut run).await?;
        let order = RespondentOrder::from_transcripts(&stored);
        run.transition_to(MutationState::OldOrderCaptured);

        let documents = self.analyses.load_all().await.map_err(|e| run.fail(e))?;
        let (documents, outcome) = self.reconciler.prune_orphans(project_id, &order, documents);
        self.report_skips(&run, &outcome);
        run.transition_to(MutationState::AnalysesReconciled);

        if outcome.documents_reconciled > 0 {
            self.analyses
                .save(&documents)
                .await
                .map_err(|e| run.fail(e))?;
        }
        run.transition_to(MutationState::AnalysesPersisted);

        Ok(run.finish(None, &order, outcome))
    }

    async fn load_transcripts(
        &self,
        run: &mut MutationRun<'_>,
    ) -> Result<Vec<Transcript>, MutationError> {
        let project_id = run.project_id.clone();
        self.transcripts
            .load(&project_id)
            .await
            .map_err(|e| run.fail(e))
    }

    /// Shared tail of every transcript mutation
    async fn commit(
        &self,
        mut run: MutationRun<'_>,
        transcript_id: Option<String>,
        stored: &[Transcript],
        updated: Vec<Transcript>,
    ) -> Result<MutationReport, MutationError> {
        let project_id = run.project_id.clone();
        let old_order = RespondentOrder::from_transcripts(stored);
        run.transition_to(MutationState::OldOrderCaptured);

        let sequenced = sequence(&updated);
        let new_order = RespondentOrder::from_transcripts(&sequenced);
        run.transition_to(MutationState::NewOrderComputed);

        self.transcripts
            .save(&project_id, &sequenced)
            .await
            .map_err(|e| run.fail(e))?;
        run.transition_to(MutationState::TranscriptsPersisted);

        let documents = self.analyses.load_all().await.map_err(|e| run.fail(e))?;
        let (documents, outcome) =
            self.reconciler
                .reconcile(&project_id, &old_order, &new_order, documents);
        self.report_skips(&run, &outcome);
        run.transition_to(MutationState::AnalysesReconciled);

        if outcome.documents_reconciled > 0 {
            self.analyses
                .save(&documents)
                .await
                .map_err(|e| run.fail(e))?;
        }
        run.transition_to(MutationState::AnalysesPersisted);

        Ok(run.finish(transcript_id, &new_order, outcome))
    }

    fn report_skips(&self, run: &MutationRun<'_>, outcome: &ReconcileOutcome) {
        for skipped in &outcome.documents_skipped {
            self.event_bus.emit_lossy(MutationEvent::DocumentSkipped {
                run_id: run.run_id,
                project_id: run.project_id.clone(),
                document_id: skipped.document_id.clone(),
                reason: skipped.reason.clone(),
                timestamp: time::now(),
            });
        }
    }
}

fn require(value: &str, what: &str) -> Result<(), Error> {
    if value.trim().is_empty() {
        return Err(Error::InvalidInput(format!("{what} must not be empty")));
    }
    Ok(())
}

fn not_found(project_id: &str, transcript_id: &str) -> Error {
    Error::NotFound(format!(
        "transcript '{transcript_id}' in project '{project_id}'"
    ))
}

/// Explicit value supplied on create: blank means "not given"
fn explicit(
    value: Option<&str>,
    normalize: fn(&str) -> Option<String>,
    what: &str,
) -> Result<Option<String>, Error> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => normalize(v)
            .map(Some)
            .ok_or_else(|| Error::InvalidInput(format!("unrecognized {what} '{v}'"))),
    }
}

/// Edit value: `None` keeps, blank clears, anything else is normalized
fn edit_value(
    value: Option<&str>,
    normalize: fn(&str) -> Option<String>,
    what: &str,
) -> Result<Option<Option<String>>, Error> {
    match value.map(str::trim) {
        None => Ok(None),
        Some("") => Ok(Some(None)),
        Some(v) => normalize(v)
            .map(|n| Some(Some(n)))
            .ok_or_else(|| Error::InvalidInput(format!("unrecognized {what} '{v}'"))),
    }
}
