//! Cross-collection reconciliation
//!
//! After the transcript ordering of a project changes, every analysis
//! document of that project is rewritten so its rows, context notes and
//! quotes use the new respnos.
//!
//! **Row identity.** A row is tied to a transcript by its back-reference
//! field when it has one, otherwise by its respondent id looked up in the
//! *old* ordering. Rows whose transcript is gone are dropped. Secondary-sheet
//! rows with no resolvable identity fall back to positional alignment with
//! the primary sheet; past the end of the primary sheet they are left
//! untouched and reported as orphan candidates.
//!
//! **Failure isolation.** Each document is processed on a copy. A malformed
//! document (non-array sheet, non-object row) is logged, reported in the
//! outcome and passed through unchanged; the rest of the batch continues.

use crate::model::AnalysisDocument;
use crate::row_schema::{Row, RowSchema};
use crate::sequencer::{parse_respno, RespondentOrder};
use respno_common::config::ReconcileSettings;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a single document could not be reconciled
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReconcileError {
    #[error("document has no sheet data")]
    MissingData,

    #[error("sheet data is not an object")]
    DataNotObject,

    #[error("sheet '{0}' is not an array")]
    SheetNotArray(String),

    #[error("row {index} of sheet '{sheet}' is not an object")]
    RowNotObject { sheet: String, index: usize },

    #[error("'{0}' is neither an object nor an array")]
    NotesMalformed(&'static str),

    #[error("unreadable document: {0}")]
    Unreadable(String),
}

/// A document left as-is
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedDocument {
    pub document_id: Option<String>,
    pub reason: String,
}

/// Totals for one reconcile (or prune) run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileOutcome {
    pub documents_reconciled: usize,
    pub documents_skipped: Vec<SkippedDocument>,
    pub rows_rekeyed: usize,
    pub rows_aligned_by_position: usize,
    pub rows_dropped: usize,
    pub orphan_candidates: usize,
    pub notes_rekeyed: usize,
    pub notes_dropped: usize,
}

impl ReconcileOutcome {
    fn absorb(&mut self, stats: &DocumentStats) {
        self.documents_reconciled += 1;
        self.rows_rekeyed += stats.rows_rekeyed;
        self.rows_aligned_by_position += stats.rows_aligned_by_position;
        self.rows_dropped += stats.rows_dropped;
        self.orphan_candidates += stats.orphan_candidates;
        self.notes_rekeyed += stats.notes_rekeyed;
        self.notes_dropped += stats.notes_dropped;
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct DocumentStats {
    rows_rekeyed: usize,
    rows_aligned_by_position: usize,
    rows_dropped: usize,
    orphan_candidates: usize,
    notes_rekeyed: usize,
    notes_dropped: usize,
}

/// Where a row points after the ordering change
#[derive(Debug, Clone, PartialEq)]
enum Resolution {
    /// Transcript still live, with its new respno
    Live { id: String, respno: String },
    /// Transcript deleted, or back-reference to an unknown transcript
    Gone,
    /// Carries a respondent id no ordering knows about
    Unknown,
    /// No identity fields at all
    Anonymous,
}

/// Identity inherited by position from the primary sheet
type Anchor = Option<(String, String)>;

/// Rewrites analysis documents to follow a new respondent ordering
#[derive(Debug, Clone)]
pub struct Reconciler {
    schema: RowSchema,
    primary_sheet: String,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(&ReconcileSettings::default())
    }
}

impl Reconciler {
    pub fn new(settings: &ReconcileSettings) -> Self {
        Self {
            schema: RowSchema::from_settings(settings),
            primary_sheet: settings.primary_sheet.trim().to_string(),
        }
    }

    pub fn schema(&self) -> &RowSchema {
        &self.schema
    }

    /// Reconcile every document of `project_id` from `old` to `new`
    ///
    /// Documents of other projects are passed through untouched. The output
    /// keeps the input document order.
    pub fn reconcile(
        &self,
        project_id: &str,
        old: &RespondentOrder,
        new: &RespondentOrder,
        documents: Vec<AnalysisDocument>,
    ) -> (Vec<AnalysisDocument>, ReconcileOutcome) {
        self.run(project_id, documents, |doc| self.reconcile_document(old, new, doc))
    }

    /// Explicit cleanup: drop rows and notes that no longer resolve to a live transcript
    pub fn prune_orphans(
        &self,
        project_id: &str,
        order: &RespondentOrder,
        documents: Vec<AnalysisDocument>,
    ) -> (Vec<AnalysisDocument>, ReconcileOutcome) {
        self.run(project_id, documents, |doc| self.prune_document(order, doc))
    }

    fn run<F>(
        &self,
        project_id: &str,
        documents: Vec<AnalysisDocument>,
        process: F,
    ) -> (Vec<AnalysisDocument>, ReconcileOutcome)
    where
        F: Fn(&AnalysisDocument) -> Result<(AnalysisDocument, DocumentStats), ReconcileError>,
    {
        let mut outcome = ReconcileOutcome::default();
        let mut output = Vec::with_capacity(documents.len());

        for doc in documents {
            if !doc.belongs_to(project_id) {
                output.push(doc);
                continue;
            }

            let result = match &doc.unreadable {
                Some(entry) => Err(ReconcileError::Unreadable(entry.error.clone())),
                None => process(&doc),
            };

            match result {
                Ok((updated, stats)) => {
                    debug!(
                        project_id = %project_id,
                        document = %doc.label(),
                        rekeyed = stats.rows_rekeyed,
                        dropped = stats.rows_dropped,
                        orphan_candidates = stats.orphan_candidates,
                        "Analysis document reconciled"
                    );
                    outcome.absorb(&stats);
                    output.push(updated);
                }
                Err(e) => {
                    warn!(
                        project_id = %project_id,
                        document = %doc.label(),
                        error = %e,
                        "Skipping malformed analysis document"
                    );
                    outcome.documents_skipped.push(SkippedDocument {
                        document_id: doc.id.clone(),
                        reason: e.to_string(),
                    });
                    output.push(doc);
                }
            }
        }

        info!(
            project_id = %project_id,
            reconciled = outcome.documents_reconciled,
            skipped = outcome.documents_skipped.len(),
            rows_dropped = outcome.rows_dropped,
            "Reconciliation finished"
        );

        (output, outcome)
    }

    fn reconcile_document(
        &self,
        old: &RespondentOrder,
        new: &RespondentOrder,
        doc: &AnalysisDocument,
    ) -> Result<(AnalysisDocument, DocumentStats), ReconcileError> {
        let mut doc = doc.clone();
        let mut stats = DocumentStats::default();

        {
            let sheets = validated_sheets(&mut doc)?;
            if let Some(primary_name) = self.primary_sheet_name(sheets) {
                let anchors = match sheets.get_mut(&primary_name) {
                    Some(value) => {
                        let rows = take_rows(value);
                        let (rows, anchors) = self.rekey_primary(rows, old, new, &mut stats);
                        put_rows(value, rows);
                        anchors
                    }
                    None => Vec::new(),
                };

                for (name, value) in sheets.iter_mut() {
                    if *name == primary_name {
                        continue;
                    }
                    let rows = take_rows(value);
                    let rows = self.rekey_secondary(rows, &anchors, old, new, &mut stats);
                    put_rows(value, rows);
                }
            }
        }

        self.rekey_notes(&mut doc, old, new, &mut stats)?;
        Ok((doc, stats))
    }

    fn prune_document(
        &self,
        order: &RespondentOrder,
        doc: &AnalysisDocument,
    ) -> Result<(AnalysisDocument, DocumentStats), ReconcileError> {
        let mut doc = doc.clone();
        let mut stats = DocumentStats::default();

        {
            let sheets = validated_sheets(&mut doc)?;
            for value in sheets.values_mut() {
                let rows = take_rows(value);
                let before = rows.len();
                let kept: Vec<Row> = rows
                    .into_iter()
                    .filter(|row| {
                        matches!(
                            self.resolve(row, order, order),
                            Resolution::Live { .. } | Resolution::Anonymous
                        )
                    })
                    .collect();
                stats.rows_dropped += before - kept.len();
                put_rows(value, kept);
            }
        }

        self.rekey_notes(&mut doc, order, order, &mut stats)?;
        Ok((doc, stats))
    }

    /// Configured primary sheet, else the first sheet in document order
    fn primary_sheet_name(&self, sheets: &Map<String, Value>) -> Option<String> {
        if sheets.contains_key(&self.primary_sheet) {
            return Some(self.primary_sheet.clone());
        }
        sheets.keys().next().cloned()
    }

    fn resolve(&self, row: &Row, old: &RespondentOrder, new: &RespondentOrder) -> Resolution {
        let id = match self.schema.back_reference(row) {
            Some(id) => id,
            None => match self.schema.respondent_id(row) {
                Some(respno) => match old.id_for(respno) {
                    Some(id) => id,
                    None => return Resolution::Unknown,
                },
                None => return Resolution::Anonymous,
            },
        };

        match new.respno_for(id) {
            Some(respno) => Resolution::Live {
                id: id.to_string(),
                respno: respno.to_string(),
            },
            None => Resolution::Gone,
        }
    }

    fn apply(&self, row: &mut Row, respno: &str, id: &str) {
        self.schema.set_respondent_id(row, respno);
        self.schema.set_back_reference(row, id);
    }

    /// Drop dead and duplicate rows, re-key the rest, sort by respno
    fn rekey_primary(
        &self,
        rows: Vec<Row>,
        old: &RespondentOrder,
        new: &RespondentOrder,
        stats: &mut DocumentStats,
    ) -> (Vec<Row>, Vec<Anchor>) {
        let mut seen = HashSet::new();
        let mut kept: Vec<(Option<u32>, Row, Anchor)> = Vec::with_capacity(rows.len());

        for mut row in rows {
            match self.resolve(&row, old, new) {
                Resolution::Live { id, respno } => {
                    if !seen.insert(id.clone()) {
                        debug!(transcript_id = %id, "Dropping duplicate primary row");
                        stats.rows_dropped += 1;
                        continue;
                    }
                    self.apply(&mut row, &respno, &id);
                    stats.rows_rekeyed += 1;
                    kept.push((parse_respno(&respno), row, Some((respno, id))));
                }
                Resolution::Gone | Resolution::Unknown => {
                    debug!(
                        respondent = ?self.schema.respondent_id(&row),
                        "Dropping primary row for missing transcript"
                    );
                    stats.rows_dropped += 1;
                }
                Resolution::Anonymous => kept.push((None, row, None)),
            }
        }

        // Stable: anonymous rows keep their relative order at the end
        kept.sort_by_key(|(number, _, _)| (number.is_none(), *number));

        kept.into_iter()
            .map(|(_, row, anchor)| (row, anchor))
            .unzip()
    }

    fn rekey_secondary(
        &self,
        rows: Vec<Row>,
        anchors: &[Anchor],
        old: &RespondentOrder,
        new: &RespondentOrder,
        stats: &mut DocumentStats,
    ) -> Vec<Row> {
        let mut kept = Vec::with_capacity(rows.len());

        for (index, mut row) in rows.into_iter().enumerate() {
            match self.resolve(&row, old, new) {
                Resolution::Live { id, respno } => {
                    self.apply(&mut row, &respno, &id);
                    stats.rows_rekeyed += 1;
                    kept.push(row);
                }
                Resolution::Gone => stats.rows_dropped += 1,
                Resolution::Unknown | Resolution::Anonymous => {
                    match anchors.get(index) {
                        Some(Some((respno, id))) => {
                            self.apply(&mut row, respno, id);
                            stats.rows_aligned_by_position += 1;
                        }
                        _ => stats.orphan_candidates += 1,
                    }
                    kept.push(row);
                }
            }
        }

        kept.sort_by_key(|row| {
            let number = self.schema.respondent_id(row).and_then(parse_respno);
            (number.is_none(), number)
        });
        kept
    }

    fn rekey_notes(
        &self,
        doc: &mut AnalysisDocument,
        old: &RespondentOrder,
        new: &RespondentOrder,
        stats: &mut DocumentStats,
    ) -> Result<(), ReconcileError> {
        if let Some(context) = doc.context.as_mut() {
            self.rekey_note_value(context, "context", old, new, 0, stats)?;
        }
        if let Some(quotes) = doc.quotes.as_mut() {
            self.rekey_note_value(quotes, "quotes", old, new, 0, stats)?;
        }
        Ok(())
    }

    /// Re-key a respno-keyed map (or a list of quote rows)
    ///
    /// Non-respno keys holding objects are treated as sheet names and
    /// descended into once, so both `quotes[respno]` and
    /// `quotes[sheet][respno]` layouts work.
    fn rekey_note_value(
        &self,
        value: &mut Value,
        field: &'static str,
        old: &RespondentOrder,
        new: &RespondentOrder,
        depth: usize,
        stats: &mut DocumentStats,
    ) -> Result<(), ReconcileError> {
        match value {
            Value::Null => Ok(()),
            Value::Array(items) => {
                let before = items.len();
                let mut kept = Vec::with_capacity(before);
                for item in items.drain(..) {
                    let mut row = match item {
                        Value::Object(row) => row,
                        other => {
                            kept.push(other);
                            continue;
                        }
                    };
                    match self.resolve(&row, old, new) {
                        Resolution::Live { id, respno } => {
                            self.apply(&mut row, &respno, &id);
                            stats.notes_rekeyed += 1;
                            kept.push(Value::Object(row));
                        }
                        Resolution::Anonymous => kept.push(Value::Object(row)),
                        Resolution::Gone | Resolution::Unknown => stats.notes_dropped += 1,
                    }
                }
                *items = kept;
                Ok(())
            }
            Value::Object(map) => {
                let entries = std::mem::take(map);
                let mut rekeyed = Map::new();
                let mut carried = Vec::new();

                for (key, mut inner) in entries {
                    if parse_respno(&key).is_none() {
                        if depth == 0 && inner.is_object() {
                            self.rekey_note_value(&mut inner, field, old, new, depth + 1, stats)?;
                        }
                        carried.push((key, inner));
                        continue;
                    }

                    // Keys the old order cannot resolve are dropped like unknown rows.
                    // The old-to-new mapping is one-to-one, so no two keys share a target.
                    let target = old
                        .id_for(&key)
                        .and_then(|id| new.respno_for(id))
                        .map(str::to_string);
                    match target {
                        Some(respno) if !rekeyed.contains_key(&respno) => {
                            if respno != key {
                                stats.notes_rekeyed += 1;
                            }
                            rekeyed.insert(respno, inner);
                        }
                        _ => {
                            debug!(field, respno = %key, "Dropping note for removed respondent");
                            stats.notes_dropped += 1;
                        }
                    }
                }

                let mut keys: Vec<String> = rekeyed.keys().cloned().collect();
                keys.sort_by_key(|k| parse_respno(k));
                for key in keys {
                    if let Some(inner) = rekeyed.remove(&key) {
                        map.insert(key, inner);
                    }
                }
                for (key, inner) in carried {
                    map.insert(key, inner);
                }
                Ok(())
            }
            _ => Err(ReconcileError::NotesMalformed(field)),
        }
    }
}

/// Sheet map of a document, checked to be `{ name: [ {row}, ... ] }`
fn validated_sheets(doc: &mut AnalysisDocument) -> Result<&mut Map<String, Value>, ReconcileError> {
    let sheets = doc
        .data
        .as_mut()
        .ok_or(ReconcileError::MissingData)?
        .as_object_mut()
        .ok_or(ReconcileError::DataNotObject)?;

    for (name, value) in sheets.iter() {
        let rows = value
            .as_array()
            .ok_or_else(|| ReconcileError::SheetNotArray(name.clone()))?;
        if let Some(index) = rows.iter().position(|row| !row.is_object()) {
            return Err(ReconcileError::RowNotObject {
                sheet: name.clone(),
                index,
            });
        }
    }
    Ok(sheets)
}

fn take_rows(value: &mut Value) -> Vec<Row> {
    match std::mem::take(value) {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(row) => Some(row),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Sheets always go back as arrays, empty ones included
fn put_rows(value: &mut Value, rows: Vec<Row>) {
    *value = Value::Array(rows.into_iter().map(Value::Object).collect());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Transcript;
    use crate::sequencer::sequence;
    use serde_json::json;

    fn order(pairs: &[(&str, &str)]) -> RespondentOrder {
        let transcripts: Vec<Transcript> = pairs
            .iter()
            .map(|(id, respno)| {
                let mut t = Transcript::new(*id);
                t.respno = respno.to_string();
                t
            })
            .collect();
        RespondentOrder::from_transcripts(&transcripts)
    }

    fn doc(value: Value) -> AnalysisDocument {
        serde_json::from_value(value).unwrap()
    }

    fn column(doc: &AnalysisDocument, sheet: &str, field: &str) -> Vec<Value> {
        doc.sheet(sheet)
            .unwrap()
            .iter()
            .map(|row| row.get(field).cloned().unwrap_or(Value::Null))
            .collect()
    }

    #[test]
    fn test_delete_drops_rows_and_shifts_identifiers() {
        let old = order(&[("mar1", "R01"), ("mar5", "R02"), ("undated", "R03")]);
        let new = order(&[("mar5", "R01"), ("undated", "R02")]);
        let input = doc(json!({
            "id": "a1",
            "projectId": "p1",
            "data": {
                "Demographics": [
                    {"Respondent ID": "R01", "Age": 30},
                    {"Respondent ID": "R02", "Age": 41},
                    {"Respondent ID": "R03", "Age": 52}
                ],
                "Themes": [
                    {"respno": "R01", "Theme": "price"},
                    {"respno": "R02", "Theme": "speed"},
                    {"respno": "R03", "Theme": "trust"}
                ]
            }
        }));

        let (out, outcome) = Reconciler::default().reconcile("p1", &old, &new, vec![input]);
        let out = &out[0];
        assert_eq!(column(out, "Demographics", "Respondent ID"), vec![json!("R01"), json!("R02")]);
        assert_eq!(column(out, "Demographics", "Age"), vec![json!(41), json!(52)]);
        assert_eq!(column(out, "Themes", "respno"), vec![json!("R01"), json!("R02")]);
        assert_eq!(column(out, "Themes", "Theme"), vec![json!("speed"), json!("trust")]);
        assert_eq!(outcome.documents_reconciled, 1);
        assert_eq!(outcome.rows_dropped, 2);
    }

    #[test]
    fn test_back_reference_wins_over_stale_respondent_id() {
        let old = order(&[("a", "R01"), ("b", "R02")]);
        let new = order(&[("b", "R01"), ("a", "R02")]);
        let input = doc(json!({
            "projectId": "p1",
            "data": { "Demographics": [
                {"Respondent ID": "R09", "transcriptId": "a"},
                {"Respondent ID": "R01", "transcriptId": "b"}
            ]}
        }));

        let (out, _) = Reconciler::default().reconcile("p1", &old, &new, vec![input]);
        assert_eq!(column(&out[0], "Demographics", "transcriptId"), vec![json!("b"), json!("a")]);
        assert_eq!(column(&out[0], "Demographics", "Respondent ID"), vec![json!("R01"), json!("R02")]);
    }

    #[test]
    fn test_back_reference_to_unknown_transcript_is_dropped() {
        let current = order(&[("a", "R01")]);
        let input = doc(json!({
            "projectId": "p1",
            "data": { "Demographics": [
                {"respno": "R01", "transcriptId": "a"},
                {"respno": "R02", "transcriptId": "ghost"}
            ]}
        }));
        let (out, outcome) = Reconciler::default().reconcile("p1", &current, &current, vec![input]);
        assert_eq!(out[0].sheet("Demographics").unwrap().len(), 1);
        assert_eq!(outcome.rows_dropped, 1);
    }

    #[test]
    fn test_primary_sheet_sorted_and_deduplicated() {
        let old = order(&[("a", "R01"), ("b", "R02"), ("c", "R03")]);
        let new = order(&[("c", "R01"), ("a", "R02"), ("b", "R03")]);
        let input = doc(json!({
            "projectId": "p1",
            "data": { "Demographics": [
                {"respno": "R01"},
                {"respno": "R02"},
                {"respno": "R03"},
                {"respno": "R01", "note": "duplicate"}
            ]}
        }));
        let (out, outcome) = Reconciler::default().reconcile("p1", &old, &new, vec![input]);
        assert_eq!(
            column(&out[0], "Demographics", "respno"),
            vec![json!("R01"), json!("R02"), json!("R03")]
        );
        assert_eq!(outcome.rows_dropped, 1);
    }

    #[test]
    fn test_anonymous_secondary_rows_align_by_position() {
        let old = order(&[("a", "R01"), ("b", "R02")]);
        let new = order(&[("b", "R01"), ("a", "R02")]);
        let input = doc(json!({
            "projectId": "p1",
            "data": {
                "Demographics": [ {"respno": "R01"}, {"respno": "R02"} ],
                "Notes": [ {"Note": "first"}, {"Note": "second"}, {"Note": "extra"} ]
            }
        }));
        let (out, outcome) = Reconciler::default().reconcile("p1", &old, &new, vec![input]);
        let notes = out[0].sheet("Notes").unwrap();
        assert_eq!(notes[0]["Respondent ID"], json!("R01"));
        assert_eq!(notes[1]["Respondent ID"], json!("R02"));
        // Beyond the primary sheet: untouched, reported
        assert_eq!(notes[2], json!({"Note": "extra"}));
        assert_eq!(outcome.rows_aligned_by_position, 2);
        assert_eq!(outcome.orphan_candidates, 1);
    }

    #[test]
    fn test_configured_primary_sheet_falls_back_to_first() {
        let old = order(&[("a", "R01"), ("b", "R02")]);
        let new = order(&[("b", "R01")]);
        let input = doc(json!({
            "projectId": "p1",
            "data": {
                "Background": [ {"respno": "R01"}, {"respno": "R02"} ],
                "Themes": [ {"Theme": "x"} ]
            }
        }));
        let (out, _) = Reconciler::default().reconcile("p1", &old, &new, vec![input]);
        assert_eq!(column(&out[0], "Background", "respno"), vec![json!("R01")]);
        assert_eq!(out[0].sheet("Themes").unwrap()[0]["Respondent ID"], json!("R01"));
    }

    #[test]
    fn test_all_rows_removed_leaves_empty_arrays() {
        let old = order(&[("a", "R01")]);
        let new = RespondentOrder::default();
        let input = doc(json!({
            "projectId": "p1",
            "data": {
                "Demographics": [ {"respno": "R01"} ],
                "Themes": [ {"respno": "R01"} ],
                "Empty": []
            },
            "context": { "Demographics": { "R01": "note" } },
            "quotes": { "R01": ["q"] }
        }));
        let (out, _) = Reconciler::default().reconcile("p1", &old, &new, vec![input]);
        let data = out[0].data.as_ref().unwrap();
        assert_eq!(data["Demographics"], json!([]));
        assert_eq!(data["Themes"], json!([]));
        assert_eq!(data["Empty"], json!([]));
        assert_eq!(out[0].context, Some(json!({ "Demographics": {} })));
        assert_eq!(out[0].quotes, Some(json!({})));
    }

    #[test]
    fn test_notes_rekeyed_and_pruned() {
        let old = order(&[("mar1", "R01"), ("mar5", "R02"), ("undated", "R03")]);
        let new = order(&[("mar5", "R01"), ("undated", "R02")]);
        let input = doc(json!({
            "projectId": "p1",
            "data": { "Demographics": [] },
            "context": { "Demographics": { "R01": "gone", "R02": "five", "R03": "later" } },
            "quotes": { "R02": ["from five"], "R03": ["from later"], "R01": ["gone"] }
        }));
        let (out, outcome) = Reconciler::default().reconcile("p1", &old, &new, vec![input]);
        assert_eq!(
            out[0].context,
            Some(json!({ "Demographics": { "R01": "five", "R02": "later" } }))
        );
        assert_eq!(out[0].quotes, Some(json!({ "R01": ["from five"], "R02": ["from later"] })));
        assert_eq!(outcome.notes_dropped, 2);
        assert_eq!(outcome.notes_rekeyed, 4);
    }

    #[test]
    fn test_note_keys_unknown_to_old_order_never_overwrite() {
        let old = order(&[("a", "R01"), ("b", "R02")]);
        let new = order(&[("c", "R01"), ("a", "R02"), ("b", "R03")]);
        let input = doc(json!({
            "projectId": "p1",
            "data": {},
            "quotes": { "R01": ["from a"], "R02": ["from b"], "R03": ["stale"] },
            "context": { "Themes": { "R03": "stale", "R02": "from b", "R01": "from a" } }
        }));
        let (out, outcome) = Reconciler::default().reconcile("p1", &old, &new, vec![input]);
        assert_eq!(
            out[0].quotes,
            Some(json!({ "R02": ["from a"], "R03": ["from b"] }))
        );
        assert_eq!(
            out[0].context,
            Some(json!({ "Themes": { "R02": "from a", "R03": "from b" } }))
        );
        assert_eq!(outcome.notes_dropped, 2);
        assert_eq!(outcome.notes_rekeyed, 4);
    }

    #[test]
    fn test_unreadable_document_reported_and_kept() {
        let old = order(&[("a", "R01"), ("b", "R02")]);
        let new = order(&[("b", "R01")]);
        let raw = json!({
            "id": 17,
            "projectId": "p1",
            "data": { "Demographics": [ {"respno": "R01"}, {"respno": "R02"} ] }
        });
        let good = doc(json!({
            "id": "good",
            "projectId": "p1",
            "data": { "Demographics": [ {"respno": "R01"}, {"respno": "R02"} ] }
        }));

        let (out, outcome) = Reconciler::default().reconcile(
            "p1",
            &old,
            &new,
            vec![AnalysisDocument::from_value(raw.clone()), good],
        );
        assert_eq!(outcome.documents_reconciled, 1);
        assert_eq!(outcome.documents_skipped.len(), 1);
        assert_eq!(outcome.documents_skipped[0].document_id.as_deref(), Some("17"));
        assert!(outcome.documents_skipped[0].reason.starts_with("unreadable document"));
        assert_eq!(out[0].to_value().unwrap(), raw);
        assert_eq!(column(&out[1], "Demographics", "respno"), vec![json!("R01")]);
    }

    #[test]
    fn test_quote_rows_list() {
        let old = order(&[("a", "R01"), ("b", "R02")]);
        let new = order(&[("b", "R01")]);
        let input = doc(json!({
            "projectId": "p1",
            "data": {},
            "quotes": [
                {"respno": "R01", "text": "from a"},
                {"respno": "R02", "text": "from b"}
            ]
        }));
        let (out, _) = Reconciler::default().reconcile("p1", &old, &new, vec![input]);
        assert_eq!(out[0].quotes, Some(json!([{"respno": "R01", "text": "from b"}])));
    }

    #[test]
    fn test_malformed_document_skipped_others_reconciled() {
        let old = order(&[("a", "R01"), ("b", "R02")]);
        let new = order(&[("b", "R01")]);
        let good = json!({
            "id": "good",
            "projectId": "p1",
            "data": { "Demographics": [ {"respno": "R01"}, {"respno": "R02"} ] }
        });
        let bad = json!({
            "id": "bad",
            "projectId": "p1",
            "data": { "Demographics": { "R01": {} } }
        });
        let other_project = json!({
            "id": "other",
            "projectId": "p2",
            "data": { "Demographics": [ {"respno": "R01"} ] }
        });

        let (out, outcome) = Reconciler::default().reconcile(
            "p1",
            &old,
            &new,
            vec![doc(good), doc(bad.clone()), doc(other_project.clone())],
        );
        assert_eq!(out.len(), 3);
        assert_eq!(column(&out[0], "Demographics", "respno"), vec![json!("R01")]);
        assert_eq!(serde_json::to_value(&out[1]).unwrap(), bad);
        assert_eq!(serde_json::to_value(&out[2]).unwrap(), other_project);
        assert_eq!(outcome.documents_reconciled, 1);
        assert_eq!(outcome.documents_skipped.len(), 1);
        assert_eq!(outcome.documents_skipped[0].document_id.as_deref(), Some("bad"));
    }

    #[test]
    fn test_non_object_row_is_a_document_error() {
        let current = order(&[("a", "R01")]);
        let input = doc(json!({
            "projectId": "p1",
            "data": { "Demographics": [ {"respno": "R01"}, "stray text" ] }
        }));
        let (_, outcome) = Reconciler::default().reconcile("p1", &current, &current, vec![input]);
        assert_eq!(outcome.documents_skipped.len(), 1);
        assert!(outcome.documents_skipped[0].reason.contains("row 1"));
    }

    #[test]
    fn test_missing_data_is_a_document_error() {
        let current = order(&[("a", "R01")]);
        let input = doc(json!({ "id": "empty", "projectId": "p1" }));
        let (_, outcome) = Reconciler::default().reconcile("p1", &current, &current, vec![input]);
        assert_eq!(
            outcome.documents_skipped,
            vec![SkippedDocument {
                document_id: Some("empty".to_string()),
                reason: ReconcileError::MissingData.to_string(),
            }]
        );
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let transcripts = sequence(&[
            Transcript::new("a").with_date("Mar 5, 2024"),
            Transcript::new("b").with_date("Mar 1, 2024"),
        ]);
        let current = RespondentOrder::from_transcripts(&transcripts);
        let input = doc(json!({
            "projectId": "p1",
            "data": {
                "Demographics": [ {"respno": "R02", "transcriptId": "a"}, {"respno": "R01", "transcriptId": "b"} ],
                "Themes": [ {"respno": "R01"}, {"respno": "R02"} ]
            },
            "quotes": { "R01": [], "R02": [] }
        }));
        let reconciler = Reconciler::default();
        let (once, _) = reconciler.reconcile("p1", &current, &current, vec![input]);
        let (twice, _) = reconciler.reconcile("p1", &current, &current, once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_prune_removes_stale_orphan_candidates() {
        let current = order(&[("a", "R01")]);
        let input = doc(json!({
            "projectId": "p1",
            "data": {
                "Demographics": [ {"respno": "R01"} ],
                "Themes": [ {"respno": "R01"}, {"respno": "R04"}, {"Theme": "anonymous"} ]
            },
            "quotes": { "R01": [], "R04": [] }
        }));
        let (out, outcome) = Reconciler::default().prune_orphans("p1", &current, vec![input]);
        assert_eq!(
            out[0].sheet("Themes").unwrap(),
            &vec![json!({"respno": "R01"}), json!({"Theme": "anonymous"})]
        );
        assert_eq!(out[0].quotes, Some(json!({ "R01": [] })));
        assert_eq!(outcome.rows_dropped, 1);
        assert_eq!(outcome.notes_dropped, 1);
    }
}
