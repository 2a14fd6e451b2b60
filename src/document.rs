//! Working claim record and the fragments that feed it.
//!
//! A [`Document`] is the mutable record a parse run accumulates into. Its
//! shape mirrors the claim schema: named sections holding either field maps
//! (field name to a list of observed values), free-form item lists, or a
//! single scalar blob. A [`Fragment`] is one extractor's partial view of the
//! same shape, carrying per-value provenance so the merge step can log where
//! a value came from.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Placeholder written into any schema field no extractor produced a value
/// for. Validation treats a required field holding only this as missing.
pub const SENTINEL: &str = "N/A";

/// Reserved top-level lists the validation step writes into.
pub const VALIDATION_ISSUES: &str = "validation_issues";
pub const MISSING_FIELDS: &str = "missing_fields";
pub const INCONSISTENT_FIELDS: &str = "inconsistent_fields";
pub const USER_NOTIFICATIONS: &str = "user_notifications";

#[derive(Debug, Error)]
pub enum FragmentError {
    #[error("fragment root must be a JSON object, got {0}")]
    NotAMapping(&'static str),
}

/// One section of the working record.
///
/// Untagged: deserialization tries field map first, then item list, then
/// scalar. Keep the variant order, it is load-bearing for serde.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SectionValue {
    Fields(BTreeMap<String, Vec<Value>>),
    Items(Vec<Value>),
    Scalar(Value),
}

/// The record a parse run builds up. Serializes as a flat JSON object of
/// sections, matching what downstream intake systems consume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(flatten)]
    pub sections: BTreeMap<String, SectionValue>,
}

impl Document {
    /// Appends a string to one of the reserved issue lists, creating the
    /// list if the validation step has not touched it yet. A reserved
    /// section that lost its list shape is reset rather than swallowing
    /// the message.
    pub fn push_issue(&mut self, list: &str, message: impl Into<String>) {
        let entry = self
            .sections
            .entry(list.to_string())
            .or_insert_with(|| SectionValue::Items(Vec::new()));
        if !matches!(entry, SectionValue::Items(_)) {
            warn!(list, "reserved issue section had a non-list shape, resetting");
            *entry = SectionValue::Items(Vec::new());
        }
        if let SectionValue::Items(items) = entry {
            items.push(Value::String(message.into()));
        }
    }

    /// All issue strings across the three reserved problem lists, in list
    /// order (general issues, then missing, then inconsistent).
    pub fn collected_issues(&self) -> Vec<String> {
        let mut out = Vec::new();
        for list in [VALIDATION_ISSUES, MISSING_FIELDS, INCONSISTENT_FIELDS] {
            if let Some(SectionValue::Items(items)) = self.sections.get(list) {
                for item in items {
                    if let Value::String(s) = item {
                        out.push(s.clone());
                    }
                }
            }
        }
        out
    }

    /// Values currently held by a schema field, if the section is a field map.
    pub fn field_values(&self, section: &str, field: &str) -> Option<&Vec<Value>> {
        match self.sections.get(section)? {
            SectionValue::Fields(fields) => fields.get(field),
            _ => None,
        }
    }
}

/// One observed value with optional provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Observation {
    pub fn new(value: impl Into<Value>) -> Self {
        Self { value: value.into(), confidence: None, source: None }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// One section of a fragment. Same shapes as [`SectionValue`], but field
/// values carry provenance.
#[derive(Debug, Clone, PartialEq)]
pub enum FragmentSection {
    Fields(BTreeMap<String, Vec<Observation>>),
    Items(Vec<Value>),
    Scalar(Value),
}

/// A partial record emitted by a single extraction stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    pub sections: BTreeMap<String, FragmentSection>,
}

impl Fragment {
    /// Records one observed value for a schema field, creating the section
    /// and field on first use.
    pub fn observe(&mut self, section: &str, field: &str, obs: Observation) {
        let entry = self
            .sections
            .entry(section.to_string())
            .or_insert_with(|| FragmentSection::Fields(BTreeMap::new()));
        if let FragmentSection::Fields(fields) = entry {
            fields.entry(field.to_string()).or_default().push(obs);
        }
    }

    /// Appends an item to a free-form list section.
    pub fn push_item(&mut self, section: &str, item: impl Into<Value>) {
        let entry = self
            .sections
            .entry(section.to_string())
            .or_insert_with(|| FragmentSection::Items(Vec::new()));
        if let FragmentSection::Items(items) = entry {
            items.push(item.into());
        }
    }

    /// Sets a scalar section, replacing any previous shape.
    pub fn set_scalar(&mut self, section: &str, value: Value) {
        self.sections
            .insert(section.to_string(), FragmentSection::Scalar(value));
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Builds a fragment from loose extractor JSON.
    ///
    /// The root must be an object. Each section value may be an object
    /// (field map), an array (item list), or anything else (scalar). Field
    /// values may be bare values, arrays of values, or provenance objects
    /// of the form `{"value": .., "confidence": .., "source": ..}`.
    pub fn from_json(root: Value) -> Result<Fragment, FragmentError> {
        let Value::Object(map) = root else {
            return Err(FragmentError::NotAMapping(json_type_name(&root)));
        };
        let mut fragment = Fragment::default();
        for (section, body) in map {
            let parsed = match body {
                Value::Object(fields) => {
                    let mut out: BTreeMap<String, Vec<Observation>> = BTreeMap::new();
                    for (field, raw) in fields {
                        let observations = match raw {
                            Value::Array(values) => {
                                values.into_iter().map(obs_from_value).collect()
                            }
                            other => vec![obs_from_value(other)],
                        };
                        out.insert(field, observations);
                    }
                    FragmentSection::Fields(out)
                }
                Value::Array(items) => FragmentSection::Items(items),
                other => FragmentSection::Scalar(other),
            };
            fragment.sections.insert(section, parsed);
        }
        Ok(fragment)
    }
}

fn obs_from_value(raw: Value) -> Observation {
    if let Value::Object(map) = &raw {
        if map.contains_key("value") {
            let value = map.get("value").cloned().unwrap_or(Value::Null);
            let confidence = map
                .get("confidence")
                .and_then(Value::as_f64)
                .map(|c| c as f32);
            let source = map
                .get("source")
                .and_then(Value::as_str)
                .map(str::to_string);
            return Observation { value, confidence, source };
        }
    }
    Observation::new(raw)
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Lossy truthiness used when a boolean field arrives as text or a number.
pub(crate) fn value_to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => {
            let lowered = s.trim().to_ascii_lowercase();
            match lowered.as_str() {
                "true" | "yes" => true,
                "false" | "no" | "" => false,
                _ => !lowered.is_empty(),
            }
        }
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fragment_from_json_parses_all_shapes() {
        let fragment = Fragment::from_json(json!({
            "Insured Information": {
                "Name": "Jane Doe",
                "Contact #": ["555-0101", {"value": "555-0102", "confidence": 0.8, "source": "entity"}]
            },
            "Attachment(s)": ["photo1.jpg"],
            "Entities": {"value": "opaque"}
        }))
        .unwrap();

        match fragment.sections.get("Insured Information").unwrap() {
            FragmentSection::Fields(fields) => {
                assert_eq!(fields["Name"].len(), 1);
                assert_eq!(fields["Contact #"].len(), 2);
                assert_eq!(fields["Contact #"][1].confidence, Some(0.8));
                assert_eq!(fields["Contact #"][1].source.as_deref(), Some("entity"));
            }
            other => panic!("expected fields, got {other:?}"),
        }
        assert!(matches!(
            fragment.sections.get("Attachment(s)"),
            Some(FragmentSection::Items(items)) if items.len() == 1
        ));
    }

    #[test]
    fn fragment_from_json_rejects_non_object_root() {
        let err = Fragment::from_json(json!(["not", "a", "map"])).unwrap_err();
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn push_issue_creates_and_appends() {
        let mut doc = Document::default();
        doc.push_issue(MISSING_FIELDS, "Insured Information -> Name");
        doc.push_issue(VALIDATION_ISSUES, "bad phone");
        assert_eq!(
            doc.collected_issues(),
            vec!["bad phone".to_string(), "Insured Information -> Name".to_string()]
        );
    }

    #[test]
    fn push_issue_recovers_a_clobbered_list() {
        let mut doc = Document::default();
        doc.sections.insert(
            VALIDATION_ISSUES.to_string(),
            SectionValue::Scalar(json!("not a list")),
        );
        doc.push_issue(VALIDATION_ISSUES, "bad phone");
        assert_eq!(doc.collected_issues(), vec!["bad phone".to_string()]);
    }

    #[test]
    fn value_to_bool_accepts_common_spellings() {
        assert!(value_to_bool(&json!("Yes")));
        assert!(value_to_bool(&json!(true)));
        assert!(value_to_bool(&json!(1)));
        assert!(!value_to_bool(&json!("no")));
        assert!(!value_to_bool(&json!("")));
        assert!(!value_to_bool(&json!(null)));
    }

    #[test]
    fn document_round_trips_through_json() {
        let mut doc = Document::default();
        doc.sections.insert(
            "Insured Information".into(),
            SectionValue::Fields(BTreeMap::from([(
                "Name".into(),
                vec![json!("Jane Doe")],
            )])),
        );
        let raw = serde_json::to_value(&doc).unwrap();
        assert_eq!(raw["Insured Information"]["Name"][0], "Jane Doe");
        let back: Document = serde_json::from_value(raw).unwrap();
        assert_eq!(back, doc);
    }
}
