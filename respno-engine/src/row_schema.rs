//! Row-schema adapter for analysis sheet rows
//!
//! Rows come from spreadsheets generated at different times and name the
//! respondent column differently ("Respondent ID" in older exports,
//! `respno` in newer ones). The reconciler only talks to rows through this
//! adapter, which reads whichever configured field is present and writes
//! every one that is.

use respno_common::config::ReconcileSettings;
use serde_json::{Map, Value};

/// One analysis row
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct RowSchema {
    respondent_fields: Vec<String>,
    back_reference_fields: Vec<String>,
    stamp_back_references: bool,
}

impl Default for RowSchema {
    fn default() -> Self {
        Self::from_settings(&ReconcileSettings::default())
    }
}

impl RowSchema {
    pub fn from_settings(settings: &ReconcileSettings) -> Self {
        let clean = |fields: &[String]| -> Vec<String> {
            fields
                .iter()
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect()
        };
        Self {
            respondent_fields: clean(&settings.respondent_fields),
            back_reference_fields: clean(&settings.back_reference_fields),
            stamp_back_references: settings.stamp_back_references,
        }
    }

    /// Respondent identifier, from the first configured field holding one
    pub fn respondent_id<'a>(&self, row: &'a Row) -> Option<&'a str> {
        first_text(row, &self.respondent_fields)
    }

    /// Overwrite every respondent field present on the row
    ///
    /// A row with none of them gets the canonical (first configured) field.
    pub fn set_respondent_id(&self, row: &mut Row, respno: &str) {
        let mut written = false;
        for field in &self.respondent_fields {
            if let Some(slot) = row.get_mut(field) {
                *slot = Value::String(respno.to_string());
                written = true;
            }
        }
        if !written {
            if let Some(canonical) = self.respondent_fields.first() {
                row.insert(canonical.clone(), Value::String(respno.to_string()));
            }
        }
    }

    /// Transcript id the row points back to, if it carries one
    pub fn back_reference<'a>(&self, row: &'a Row) -> Option<&'a str> {
        first_text(row, &self.back_reference_fields)
    }

    /// Refresh the back-reference fields present on the row
    ///
    /// Rows without one are only stamped when `stamp_back_references` is on.
    pub fn set_back_reference(&self, row: &mut Row, transcript_id: &str) {
        let mut written = false;
        for field in &self.back_reference_fields {
            if let Some(slot) = row.get_mut(field) {
                *slot = Value::String(transcript_id.to_string());
                written = true;
            }
        }
        if !written && self.stamp_back_references {
            if let Some(canonical) = self.back_reference_fields.first() {
                row.insert(canonical.clone(), Value::String(transcript_id.to_string()));
            }
        }
    }

    /// True when the row carries no identity at all
    pub fn is_anonymous(&self, row: &Row) -> bool {
        self.respondent_id(row).is_none() && self.back_reference(row).is_none()
    }
}

fn first_text<'a>(row: &'a Row, fields: &[String]) -> Option<&'a str> {
    fields
        .iter()
        .filter_map(|field| row.get(field))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|value| !value.is_empty())
}
