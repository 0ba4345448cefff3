//! Respondent sequencing
//!
//! Orders a project's transcripts by interview date and hands out `R01`,
//! `R02`, ... by position. Undated transcripts go last. Equal dates and all
//! undated transcripts keep their input order, so re-running on an
//! unchanged set reproduces the same identifiers.

use crate::model::Transcript;
use crate::temporal::parse_date_value;
use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::debug;

/// Respno for a 1-based position: `R01` ... `R99`, then `R100` and up
pub fn format_respno(position: usize) -> String {
    format!("R{:02}", position)
}

/// Numeric suffix of a respno (`"R07"` -> `7`)
pub fn parse_respno(respno: &str) -> Option<u32> {
    let digits = respno.trim().strip_prefix('R')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Sort key: dated before undated, then ascending date
fn chronological_key(transcript: &Transcript) -> (bool, Option<NaiveDate>) {
    let date = transcript
        .interview_date
        .as_deref()
        .and_then(parse_date_value);
    (date.is_none(), date)
}

/// Produce a new chronologically ordered sequence with respnos assigned
///
/// The input is left untouched; callers commit by persisting the result.
pub fn sequence(transcripts: &[Transcript]) -> Vec<Transcript> {
    let mut keyed: Vec<_> = transcripts
        .iter()
        .map(|t| (chronological_key(t), t.clone()))
        .collect();
    // sort_by is stable: ties keep input order
    keyed.sort_by(|a, b| a.0.cmp(&b.0));

    keyed
        .into_iter()
        .enumerate()
        .map(|(index, (_, mut transcript))| {
            let respno = format_respno(index + 1);
            if transcript.respno != respno {
                debug!(
                    transcript_id = %transcript.id,
                    old = %transcript.respno,
                    new = %respno,
                    "Respno reassigned"
                );
            }
            transcript.respno = respno;
            transcript
        })
        .collect()
}

/// Bidirectional id <-> respno lookup for one ordering of a project
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RespondentOrder {
    entries: Vec<(String, String)>,
    by_id: HashMap<String, String>,
    by_respno: HashMap<String, String>,
}

impl RespondentOrder {
    /// Capture the ordering as stored (respnos taken as-is)
    pub fn from_transcripts(transcripts: &[Transcript]) -> Self {
        let mut order = Self::default();
        for transcript in transcripts {
            order.insert(transcript.id.clone(), transcript.respno.clone());
        }
        order
    }

    fn insert(&mut self, id: String, respno: String) {
        self.by_id.insert(id.clone(), respno.clone());
        if parse_respno(&respno).is_some() {
            self.by_respno.insert(respno.clone(), id.clone());
        }
        self.entries.push((id, respno));
    }

    /// Respno currently held by a transcript id
    pub fn respno_for(&self, id: &str) -> Option<&str> {
        self.by_id.get(id).map(String::as_str)
    }

    /// Transcript id holding a respno
    pub fn id_for(&self, respno: &str) -> Option<&str> {
        self.by_respno.get(respno.trim()).map(String::as_str)
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn contains_respno(&self, respno: &str) -> bool {
        self.by_respno.contains_key(respno.trim())
    }

    /// `(id, respno)` pairs in sequence order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(id, r)| (id.as_str(), r.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// respno -> id map, the form reconciled documents are checked against
    pub fn respno_map(&self) -> HashMap<String, String> {
        self.by_respno.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(seq: &[Transcript]) -> Vec<&str> {
        seq.iter().map(|t| t.id.as_str()).collect()
    }

    fn respnos(seq: &[Transcript]) -> Vec<&str> {
        seq.iter().map(|t| t.respno.as_str()).collect()
    }

    #[test]
    fn test_uploaded_out_of_order() {
        let input = vec![
            Transcript::new("mar5").with_date("Mar 5, 2024"),
            Transcript::new("mar1").with_date("Mar 1, 2024"),
            Transcript::new("undated"),
        ];
        let seq = sequence(&input);
        assert_eq!(ids(&seq), vec!["mar1", "mar5", "undated"]);
        assert_eq!(respnos(&seq), vec!["R01", "R02", "R03"]);

        // Input untouched
        assert!(input.iter().all(|t| t.respno == "TEMP"));
    }

    #[test]
    fn test_sequencing_is_idempotent() {
        let input = vec![
            Transcript::new("a").with_date("2024-02-10"),
            Transcript::new("b"),
            Transcript::new("c").with_date("01/15/2024"),
            Transcript::new("d").with_date("Feb 10, 2024"),
        ];
        let first = sequence(&input);
        let second = sequence(&first);
        assert_eq!(first, second);
    }

    #[test]
    fn test_mixed_date_formats_compare_by_calendar_date() {
        let input = vec![
            Transcript::new("iso").with_date("2024-03-02"),
            Transcript::new("us").with_date("03/01/2024"),
            Transcript::new("long").with_date("March 3, 2024"),
        ];
        assert_eq!(ids(&sequence(&input)), vec!["us", "iso", "long"]);
    }

    #[test]
    fn test_undated_and_unparseable_sort_last_in_input_order() {
        let input = vec![
            Transcript::new("u1"),
            Transcript::new("junk").with_date("sometime in spring"),
            Transcript::new("dated").with_date("Dec 31, 2023"),
            Transcript::new("u2"),
        ];
        let seq = sequence(&input);
        assert_eq!(ids(&seq), vec!["dated", "u1", "junk", "u2"]);
    }

    #[test]
    fn test_equal_dates_keep_input_order() {
        let input = vec![
            Transcript::new("second").with_date("Mar 1, 2024").with_time("4:00 PM"),
            Transcript::new("first").with_date("Mar 1, 2024").with_time("9:00 AM"),
        ];
        // No time-of-day tie-break
        assert_eq!(ids(&sequence(&input)), vec!["second", "first"]);
    }

    #[test]
    fn test_respno_widens_past_99() {
        let input: Vec<_> = (0..101).map(|i| Transcript::new(format!("t{i}"))).collect();
        let seq = sequence(&input);
        assert_eq!(seq[0].respno, "R01");
        assert_eq!(seq[98].respno, "R99");
        assert_eq!(seq[99].respno, "R100");
        assert_eq!(seq[100].respno, "R101");
    }

    #[test]
    fn test_parse_respno() {
        assert_eq!(parse_respno("R01"), Some(1));
        assert_eq!(parse_respno(" R12 "), Some(12));
        assert_eq!(parse_respno("R100"), Some(100));
        assert_eq!(parse_respno("TEMP"), None);
        assert_eq!(parse_respno("R"), None);
        assert_eq!(parse_respno("R1a"), None);
        assert_eq!(parse_respno(""), None);
    }

    #[test]
    fn test_order_lookups() {
        let seq = sequence(&[
            Transcript::new("b").with_date("Mar 2, 2024"),
            Transcript::new("a").with_date("Mar 1, 2024"),
        ]);
        let order = RespondentOrder::from_transcripts(&seq);
        assert_eq!(order.len(), 2);
        assert_eq!(order.respno_for("a"), Some("R01"));
        assert_eq!(order.id_for("R02"), Some("b"));
        assert!(order.contains_respno("R01"));
        assert!(!order.contains_respno("R03"));
        assert_eq!(order.iter().collect::<Vec<_>>(), vec![("a", "R01"), ("b", "R02")]);
    }

    #[test]
    fn test_pending_respno_not_indexed() {
        let order = RespondentOrder::from_transcripts(&[Transcript::new("new")]);
        assert!(order.contains_id("new"));
        assert_eq!(order.id_for("TEMP"), None);
    }
}
