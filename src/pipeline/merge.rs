//! Schema-aware fusion of extractor fragments into the working record.
//!
//! Merge policy is chosen by the field's schema type. Booleans take the
//! latest value, dates are normalized before deduplication, emails are
//! canonicalized, and everything else accumulates as a first-seen-ordered
//! union with the placeholder eliminated once a real value arrives. Every
//! effective change is recorded so a reviewer can replay how the record
//! was assembled.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::document::{
    value_to_bool, Document, Fragment, FragmentSection, Observation, SectionValue,
    SENTINEL,
};
use crate::schema::{DocumentSchema, FieldType};

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("section '{section}' has an unexpected shape: {detail}")]
    SectionShape { section: String, detail: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Create,
    Update,
}

/// One effective mutation of the working record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeChange {
    pub section: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    pub new_value: Value,
    pub change_type: ChangeType,
}

impl fmt::Display for MergeChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.change_type {
            ChangeType::Create => "created",
            ChangeType::Update => "updated",
        };
        match &self.field {
            Some(field) => write!(f, "{verb} {} -> {field}", self.section),
            None => write!(f, "{verb} {}", self.section),
        }
    }
}

/// Free-form list sections the record always carries.
const FREE_LIST_SECTIONS: &[&str] =
    &["Attachment(s)", "Additional details/Special Instructions"];

/// Opaque scalar sections kept for auditability.
const FREE_SCALAR_SECTIONS: &[&str] = &["Entities", "TransformerEntities"];

pub struct DataMerger {
    schema: Arc<DocumentSchema>,
    date_formats: Vec<String>,
}

impl DataMerger {
    pub fn new(schema: Arc<DocumentSchema>, date_formats: Vec<String>) -> Self {
        Self { schema, date_formats }
    }

    /// Fuses one fragment into a copy of the record, then runs the
    /// structural completion pass. Returns the updated record and the
    /// changes that were actually applied. A malformed section spoils only
    /// itself.
    pub fn merge(
        &self,
        base: &Document,
        fragment: &Fragment,
    ) -> (Document, Vec<MergeChange>) {
        let mut doc = base.clone();
        let mut changes = Vec::new();

        for (section, body) in &fragment.sections {
            if let Err(e) = self.merge_section(&mut doc, &mut changes, section, body)
            {
                warn!(section = %section, error = %e, "skipping malformed section");
            }
        }
        self.ensure_complete(&mut doc);
        (doc, changes)
    }

    fn merge_section(
        &self,
        doc: &mut Document,
        changes: &mut Vec<MergeChange>,
        section: &str,
        body: &FragmentSection,
    ) -> Result<(), MergeError> {
        // Section creation is one Create record of its own. Value mutations
        // below are always Update records, with an absent field reading as
        // the placeholder, so update-record count matches changed-field
        // count exactly.
        if !doc.sections.contains_key(section) {
            let empty_shape = match body {
                FragmentSection::Fields(_) => json!({}),
                FragmentSection::Items(_) => json!([]),
                FragmentSection::Scalar(_) => Value::Null,
            };
            changes.push(MergeChange {
                section: section.to_string(),
                field: None,
                old_value: None,
                new_value: empty_shape,
                change_type: ChangeType::Create,
            });
        }

        match body {
            FragmentSection::Fields(fields) => {
                let entry = doc
                    .sections
                    .entry(section.to_string())
                    .or_insert_with(|| SectionValue::Fields(BTreeMap::new()));
                let SectionValue::Fields(existing) = entry else {
                    return Err(MergeError::SectionShape {
                        section: section.to_string(),
                        detail: "fragment has fields but record does not".into(),
                    });
                };
                for (field, observations) in fields {
                    let old = existing
                        .get(field)
                        .cloned()
                        .unwrap_or_else(|| vec![Value::String(SENTINEL.into())]);
                    let merged =
                        self.merge_field_values(section, field, &old, observations);
                    if merged != old {
                        changes.push(MergeChange {
                            section: section.to_string(),
                            field: Some(field.clone()),
                            old_value: Some(Value::Array(old)),
                            new_value: Value::Array(merged.clone()),
                            change_type: ChangeType::Update,
                        });
                        existing.insert(field.clone(), merged);
                    } else if !existing.contains_key(field) {
                        existing.insert(field.clone(), merged);
                    }
                }
            }
            FragmentSection::Items(items) => {
                let entry = doc
                    .sections
                    .entry(section.to_string())
                    .or_insert_with(|| SectionValue::Items(Vec::new()));
                let SectionValue::Items(existing) = entry else {
                    return Err(MergeError::SectionShape {
                        section: section.to_string(),
                        detail: "fragment has a list but record does not".into(),
                    });
                };
                let fresh: Vec<Value> = items
                    .iter()
                    .filter(|item| !existing.contains(item))
                    .cloned()
                    .collect();
                if !fresh.is_empty() {
                    let old = existing.clone();
                    existing.extend(fresh);
                    changes.push(MergeChange {
                        section: section.to_string(),
                        field: None,
                        old_value: Some(Value::Array(old)),
                        new_value: Value::Array(existing.clone()),
                        change_type: ChangeType::Update,
                    });
                }
            }
            FragmentSection::Scalar(value) => {
                let old = doc.sections.get(section).cloned();
                let differs = !matches!(
                    &old,
                    Some(SectionValue::Scalar(existing)) if existing == value
                );
                if differs {
                    doc.sections
                        .insert(section.to_string(), SectionValue::Scalar(value.clone()));
                    changes.push(MergeChange {
                        section: section.to_string(),
                        field: None,
                        old_value: old.map(|o| serde_json::to_value(o).unwrap_or(Value::Null)),
                        new_value: value.clone(),
                        change_type: ChangeType::Update,
                    });
                }
            }
        }
        Ok(())
    }

    /// Applies the type-specific merge policy for one field.
    fn merge_field_values(
        &self,
        section: &str,
        field: &str,
        old: &[Value],
        incoming: &[Observation],
    ) -> Vec<Value> {
        let field_type = self
            .schema
            .field(section, field)
            .map(|f| f.field_type)
            .unwrap_or(FieldType::String);

        match field_type {
            FieldType::Boolean => {
                // Last write wins: the most recent observation decides.
                match incoming.last() {
                    Some(obs) => vec![Value::Bool(value_to_bool(&obs.value))],
                    None => old.to_vec(),
                }
            }
            FieldType::Date => {
                let mut normalized = Vec::new();
                for obs in incoming {
                    match obs.value.as_str() {
                        Some(raw) => match self.normalize_date(raw) {
                            Some(date) => normalized.push(Value::String(date)),
                            None => {
                                warn!(section, field, value = raw, "unparsable date dropped");
                            }
                        },
                        None => {
                            warn!(section, field, "non-string date value dropped");
                        }
                    }
                }
                union_dedupe(old, &normalized)
            }
            FieldType::Email => {
                let canonical: Vec<Value> = incoming
                    .iter()
                    .filter_map(|obs| obs.value.as_str())
                    .map(|s| s.trim().to_ascii_lowercase())
                    .filter(|s| !s.is_empty() && s != &SENTINEL.to_ascii_lowercase())
                    .map(Value::String)
                    .collect();
                union_dedupe(old, &canonical)
            }
            _ => {
                let trimmed: Vec<Value> = incoming
                    .iter()
                    .map(|obs| match obs.value.as_str() {
                        Some(s) => Value::String(s.trim().to_string()),
                        None => obs.value.clone(),
                    })
                    .filter(|v| v.as_str().map(|s| !s.is_empty()).unwrap_or(true))
                    .collect();
                union_dedupe(old, &trimmed)
            }
        }
    }

    /// Parses a date in any accepted format and renders it as YYYY-MM-DD.
    pub(crate) fn normalize_date(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        for format in &self.date_formats {
            if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
                return Some(date.format("%Y-%m-%d").to_string());
            }
        }
        if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
            return Some(ts.date_naive().format("%Y-%m-%d").to_string());
        }
        None
    }

    /// Structural completion: every schema field exists afterwards, the
    /// free-form sections exist, and the catch-all assignment checkbox has
    /// its canonical object shape. Records no changes.
    pub fn ensure_complete(&self, doc: &mut Document) {
        for (section, fields) in &self.schema.sections {
            let entry = doc
                .sections
                .entry(section.clone())
                .or_insert_with(|| SectionValue::Fields(BTreeMap::new()));
            if let SectionValue::Fields(existing) = entry {
                for field in fields.keys() {
                    existing
                        .entry(field.clone())
                        .or_insert_with(|| vec![Value::String(SENTINEL.into())]);
                }
            }
        }
        for section in FREE_LIST_SECTIONS {
            doc.sections
                .entry(section.to_string())
                .or_insert_with(|| SectionValue::Items(Vec::new()));
        }
        for section in FREE_SCALAR_SECTIONS {
            doc.sections
                .entry(section.to_string())
                .or_insert_with(|| SectionValue::Scalar(json!({})));
        }
        self.normalize_other_checkbox(doc);
    }

    fn normalize_other_checkbox(&self, doc: &mut Document) {
        let Some(SectionValue::Fields(fields)) =
            doc.sections.get_mut("Assignment Type")
        else {
            return;
        };
        let Some(values) = fields.get_mut("Other") else {
            return;
        };
        let canonical = match values.first() {
            Some(Value::Object(map))
                if map.contains_key("Checked") && map.contains_key("Details") =>
            {
                let checked = map
                    .get("Checked")
                    .map(value_to_bool)
                    .unwrap_or(false);
                let details = map
                    .get("Details")
                    .and_then(Value::as_str)
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or(SENTINEL)
                    .to_string();
                json!({"Checked": checked, "Details": details})
            }
            _ => {
                debug!("resetting malformed 'Other' checkbox");
                json!({"Checked": false, "Details": SENTINEL})
            }
        };
        *values = vec![canonical];
    }
}

/// Union preserving first-seen order, deduplicated by serialized equality.
/// The placeholder survives only while no real value is present.
fn union_dedupe(old: &[Value], incoming: &[Value]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    let mut seen: Vec<String> = Vec::new();
    for value in old.iter().chain(incoming) {
        let key = value.to_string();
        if !seen.contains(&key) {
            seen.push(key);
            out.push(value.clone());
        }
    }
    let has_real = out
        .iter()
        .any(|v| v.as_str().map(|s| s != SENTINEL).unwrap_or(true));
    if has_real {
        out.retain(|v| v.as_str().map(|s| s != SENTINEL).unwrap_or(true));
    }
    if out.is_empty() {
        out.push(Value::String(SENTINEL.into()));
    }
    out
}
