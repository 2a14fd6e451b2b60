//! Model-backed extraction over a local inference server.
//!
//! Four extractors share one [`ModelClient`] seam: named-entity tagging,
//! free-text summarization, direct structured JSON extraction, and
//! document-image understanding for scanned attachments. The HTTP client
//! speaks the Ollama generate API; tests swap in [`MockModelClient`].

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::document::{Fragment, Observation};
use crate::schema::DocumentSchema;

use super::{ExtractionInput, Extractor, ExtractorError, ExtractorKind};

/// Transport seam for local model inference.
pub trait ModelClient: Send + Sync {
    fn generate(
        &self,
        model: &str,
        prompt: &str,
        system: &str,
        image_b64: Option<&str>,
    ) -> Result<String, ExtractorError>;

    fn is_available(&self) -> bool;

    /// Tears down and rebuilds any underlying connection state.
    fn reset(&mut self) -> Result<(), ExtractorError> {
        Ok(())
    }
}

/// HTTP client for a local inference server speaking the generate API.
pub struct HttpModelClient {
    base_url: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl HttpModelClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, ExtractorError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Self::build_client(timeout_secs)?,
            timeout_secs,
        })
    }

    fn build_client(
        timeout_secs: u64,
    ) -> Result<reqwest::blocking::Client, ExtractorError> {
        reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ExtractorError::Initialization(e.to_string()))
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<&'a str>>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl ModelClient for HttpModelClient {
    fn generate(
        &self,
        model: &str,
        prompt: &str,
        system: &str,
        image_b64: Option<&str>,
    ) -> Result<String, ExtractorError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model,
            prompt,
            system,
            stream: false,
            images: image_b64.map(|b64| vec![b64]),
        };

        let response = self.client.post(&url).json(&body).send().map_err(|e| {
            if e.is_connect() {
                ExtractorError::Unavailable(self.base_url.clone())
            } else if e.is_timeout() {
                ExtractorError::Http(format!(
                    "request timed out after {}s",
                    self.timeout_secs
                ))
            } else {
                ExtractorError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ExtractorError::Backend { status: status.as_u16(), body });
        }

        let parsed: GenerateResponse = response
            .json()
            .map_err(|e| ExtractorError::MalformedResponse(e.to_string()))?;
        Ok(parsed.response)
    }

    fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).send() {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    fn reset(&mut self) -> Result<(), ExtractorError> {
        self.client = Self::build_client(self.timeout_secs)?;
        Ok(())
    }
}

/// Mock model client for testing. Returns a configurable response.
pub struct MockModelClient {
    response: String,
    available: bool,
    reset_fails: bool,
}

impl MockModelClient {
    pub fn new(response: &str) -> Self {
        Self { response: response.to_string(), available: true, reset_fails: false }
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn failing_reset(mut self) -> Self {
        self.reset_fails = true;
        self
    }
}

impl ModelClient for MockModelClient {
    fn generate(
        &self,
        _model: &str,
        _prompt: &str,
        _system: &str,
        _image_b64: Option<&str>,
    ) -> Result<String, ExtractorError> {
        if !self.available {
            return Err(ExtractorError::Unavailable("mock".to_string()));
        }
        Ok(self.response.clone())
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn reset(&mut self) -> Result<(), ExtractorError> {
        if self.reset_fails {
            return Err(ExtractorError::Initialization("mock reset failed".into()));
        }
        self.available = true;
        Ok(())
    }
}

/// Strips markdown code fences models wrap JSON answers in.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim().strip_suffix("```").unwrap_or(rest).trim()
}

/// NER label to schema field mapping. One label can feed several fields;
/// validation sorts out which one actually fits later.
const LABEL_FIELDS: &[(&str, &[(&str, &str)])] = &[
    ("PER", &[("Insured Information", "Name"), ("Adjuster Information", "Adjuster Name")]),
    ("ORG", &[("Requesting Party", "Insurance Company")]),
    ("LOC", &[("Insured Information", "Loss Address")]),
    ("GPE", &[("Insured Information", "Loss Address")]),
    ("DATE", &[("Assignment Information", "Date of Loss/Occurrence")]),
    ("PRODUCT", &[("Adjuster Information", "Policy #")]),
    ("EVENT", &[("Assignment Information", "Cause of loss")]),
];

const ENTITY_SYSTEM: &str = "You are a named entity tagger for insurance \
correspondence. Return a JSON array of objects with keys \"label\" and \
\"text\". Labels: PER, ORG, LOC, GPE, DATE, PRODUCT, EVENT. No prose.";

/// Tags entities in the email body and routes them onto schema fields.
pub struct EntityExtractor {
    client: Box<dyn ModelClient>,
    model: String,
}

#[derive(Deserialize)]
struct TaggedEntity {
    label: String,
    text: String,
}

impl EntityExtractor {
    pub fn new(client: Box<dyn ModelClient>, model: impl Into<String>) -> Self {
        Self { client, model: model.into() }
    }
}

impl Extractor for EntityExtractor {
    fn kind(&self) -> ExtractorKind {
        ExtractorKind::Entity
    }

    fn health_check(&self) -> bool {
        self.client.is_available()
    }

    fn extract(&self, input: &ExtractionInput) -> Result<Fragment, ExtractorError> {
        let text = input
            .text
            .as_deref()
            .ok_or(ExtractorError::MissingInput("text"))?;

        let raw = self
            .client
            .generate(&self.model, text, ENTITY_SYSTEM, None)?;
        let entities: Vec<TaggedEntity> =
            serde_json::from_str(strip_code_fences(&raw))
                .map_err(|e| ExtractorError::MalformedResponse(e.to_string()))?;

        let mut fragment = Fragment::default();
        let mut raw_map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for entity in &entities {
            let text = entity.text.trim();
            if text.is_empty() {
                continue;
            }
            raw_map
                .entry(entity.label.clone())
                .or_default()
                .push(text.to_string());
            let Some((_, targets)) =
                LABEL_FIELDS.iter().find(|(label, _)| *label == entity.label)
            else {
                debug!(label = %entity.label, "unmapped entity label");
                continue;
            };
            for (section, field) in *targets {
                fragment.observe(
                    section,
                    field,
                    Observation::new(text).with_source("entity"),
                );
            }
        }
        // Raw tags kept alongside the routed fields for auditability.
        if !raw_map.is_empty() {
            fragment.set_scalar(
                "Entities",
                serde_json::to_value(&raw_map)
                    .map_err(|e| ExtractorError::MalformedResponse(e.to_string()))?,
            );
        }
        Ok(fragment)
    }

    fn reinitialize(&mut self) -> Result<(), ExtractorError> {
        self.client.reset()
    }
}

const SUMMARY_SYSTEM: &str = "Summarize the insurance assignment email as a \
comma-separated list of \"Field: value\" pairs using the claim intake field \
names. No prose.";

/// Summarizes the email and lifts "Field: value" pairs that match schema
/// field names.
pub struct SummaryExtractor {
    client: Box<dyn ModelClient>,
    model: String,
    schema: Arc<DocumentSchema>,
}

impl SummaryExtractor {
    pub fn new(
        client: Box<dyn ModelClient>,
        model: impl Into<String>,
        schema: Arc<DocumentSchema>,
    ) -> Self {
        Self { client, model: model.into(), schema }
    }
}

impl Extractor for SummaryExtractor {
    fn kind(&self) -> ExtractorKind {
        ExtractorKind::Summary
    }

    fn health_check(&self) -> bool {
        self.client.is_available()
    }

    fn extract(&self, input: &ExtractionInput) -> Result<Fragment, ExtractorError> {
        let text = input
            .text
            .as_deref()
            .ok_or(ExtractorError::MissingInput("text"))?;

        let summary = self
            .client
            .generate(&self.model, text, SUMMARY_SYSTEM, None)?;

        let mut fragment = Fragment::default();
        for item in summary.split(',') {
            let Some((key, value)) = item.split_once(':') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            for (section, fields) in &self.schema.sections {
                for field in fields.keys() {
                    if key.eq_ignore_ascii_case(field) {
                        fragment.observe(
                            section,
                            field,
                            Observation::new(value).with_source("summary"),
                        );
                    }
                }
            }
        }
        Ok(fragment)
    }

    fn reinitialize(&mut self) -> Result<(), ExtractorError> {
        self.client.reset()
    }
}

const STRUCTURED_SYSTEM: &str = "Extract the insurance assignment into JSON \
shaped as {\"Section\": {\"Field\": [\"value\"]}} using the claim intake \
schema sections. Output JSON only.";

/// Asks the model for the record shape directly.
pub struct StructuredExtractor {
    client: Box<dyn ModelClient>,
    model: String,
}

impl StructuredExtractor {
    pub fn new(client: Box<dyn ModelClient>, model: impl Into<String>) -> Self {
        Self { client, model: model.into() }
    }
}

impl Extractor for StructuredExtractor {
    fn kind(&self) -> ExtractorKind {
        ExtractorKind::Structured
    }

    fn health_check(&self) -> bool {
        self.client.is_available()
    }

    fn extract(&self, input: &ExtractionInput) -> Result<Fragment, ExtractorError> {
        let text = input
            .text
            .as_deref()
            .ok_or(ExtractorError::MissingInput("text"))?;

        let raw = self
            .client
            .generate(&self.model, text, STRUCTURED_SYSTEM, None)?;
        let value: serde_json::Value = serde_json::from_str(strip_code_fences(&raw))
            .map_err(|e| ExtractorError::MalformedResponse(e.to_string()))?;
        Fragment::from_json(value)
            .map_err(|e| ExtractorError::MalformedResponse(e.to_string()))
    }

    fn reinitialize(&mut self) -> Result<(), ExtractorError> {
        self.client.reset()
    }
}

/// Scanned-form field name to schema field mapping.
const FORM_FIELDS: &[(&str, (&str, &str))] = &[
    ("policy_number", ("Adjuster Information", "Policy #")),
    ("claim_number", ("Requesting Party", "Carrier Claim Number")),
    ("insured_name", ("Insured Information", "Name")),
    ("loss_address", ("Insured Information", "Loss Address")),
    ("adjuster_name", ("Adjuster Information", "Adjuster Name")),
    ("adjuster_phone", ("Adjuster Information", "Adjuster Phone Number")),
    ("adjuster_email", ("Adjuster Information", "Adjuster Email")),
    ("date_of_loss", ("Assignment Information", "Date of Loss/Occurrence")),
    ("cause_of_loss", ("Assignment Information", "Cause of loss")),
    ("loss_description", ("Assignment Information", "Loss Description")),
];

const VISION_SYSTEM: &str = "Read the scanned insurance form and return JSON \
{\"form\": [{\"name\": \"...\", \"value\": \"...\"}]} using snake_case field \
names. Output JSON only.";

#[derive(Deserialize)]
struct FormResponse {
    #[serde(default)]
    form: Vec<FormField>,
}

#[derive(Deserialize)]
struct FormField {
    name: String,
    value: serde_json::Value,
}

/// Reads scanned attachments through a vision model.
pub struct VisionExtractor {
    client: Box<dyn ModelClient>,
    model: String,
}

impl VisionExtractor {
    pub fn new(client: Box<dyn ModelClient>, model: impl Into<String>) -> Self {
        Self { client, model: model.into() }
    }
}

impl Extractor for VisionExtractor {
    fn kind(&self) -> ExtractorKind {
        ExtractorKind::Vision
    }

    fn health_check(&self) -> bool {
        self.client.is_available()
    }

    fn extract(&self, input: &ExtractionInput) -> Result<Fragment, ExtractorError> {
        let image = input
            .image
            .as_deref()
            .ok_or(ExtractorError::MissingInput("image"))?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);

        let raw = self.client.generate(
            &self.model,
            "Extract all form fields.",
            VISION_SYSTEM,
            Some(&encoded),
        )?;
        let parsed: FormResponse = serde_json::from_str(strip_code_fences(&raw))
            .map_err(|e| ExtractorError::MalformedResponse(e.to_string()))?;

        let mut fragment = Fragment::default();
        for field in parsed.form {
            let Some((_, (section, schema_field))) =
                FORM_FIELDS.iter().find(|(name, _)| *name == field.name)
            else {
                warn!(name = %field.name, "unmapped form field from vision model");
                continue;
            };
            fragment.observe(
                section,
                schema_field,
                Observation {
                    value: field.value,
                    confidence: None,
                    source: Some("vision".to_string()),
                },
            );
        }
        Ok(fragment)
    }

    fn reinitialize(&mut self) -> Result<(), ExtractorError> {
        self.client.reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::FragmentSection;

    fn field_texts(fragment: &Fragment, section: &str, field: &str) -> Vec<String> {
        match fragment.sections.get(section) {
            Some(FragmentSection::Fields(fields)) => fields
                .get(field)
                .map(|obs| {
                    obs.iter()
                        .map(|o| o.value.as_str().unwrap_or_default().to_string())
                        .collect()
                })
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    #[test]
    fn strip_code_fences_handles_variants() {
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n[]\n```"), "[]");
    }

    #[test]
    fn entity_extractor_routes_labels_to_fields() {
        let client = MockModelClient::new(
            r#"[{"label": "PER", "text": "Jane Doe"},
                {"label": "ORG", "text": "GEICO"},
                {"label": "ZZZ", "text": "ignored"}]"#,
        );
        let extractor = EntityExtractor::new(Box::new(client), "tagger");
        let fragment = extractor
            .extract(&ExtractionInput::text("body"))
            .unwrap();

        assert_eq!(
            field_texts(&fragment, "Insured Information", "Name"),
            vec!["Jane Doe"]
        );
        assert_eq!(
            field_texts(&fragment, "Adjuster Information", "Adjuster Name"),
            vec!["Jane Doe"]
        );
        assert_eq!(
            field_texts(&fragment, "Requesting Party", "Insurance Company"),
            vec!["GEICO"]
        );
        match fragment.sections.get("Entities") {
            Some(FragmentSection::Scalar(raw)) => {
                assert_eq!(raw["PER"][0], "Jane Doe");
                assert_eq!(raw["ZZZ"][0], "ignored");
            }
            other => panic!("expected scalar entities, got {other:?}"),
        }
    }

    #[test]
    fn entity_extractor_rejects_garbage() {
        let client = MockModelClient::new("the model rambled instead of JSON");
        let extractor = EntityExtractor::new(Box::new(client), "tagger");
        let err = extractor
            .extract(&ExtractionInput::text("body"))
            .unwrap_err();
        assert!(matches!(err, ExtractorError::MalformedResponse(_)));
    }

    #[test]
    fn summary_extractor_matches_schema_fields_case_insensitively() {
        let schema = Arc::new(DocumentSchema::claim_assignment());
        let client = MockModelClient::new(
            "name: Jane Doe, cause of loss: Hail, not a field: skipped",
        );
        let extractor = SummaryExtractor::new(Box::new(client), "summarizer", schema);
        let fragment = extractor
            .extract(&ExtractionInput::text("body"))
            .unwrap();

        assert_eq!(
            field_texts(&fragment, "Insured Information", "Name"),
            vec!["Jane Doe"]
        );
        assert_eq!(
            field_texts(&fragment, "Assignment Information", "Cause of loss"),
            vec!["Hail"]
        );
        assert_eq!(fragment.sections.len(), 2);
    }

    #[test]
    fn structured_extractor_parses_fenced_json() {
        let client = MockModelClient::new(
            "```json\n{\"Insured Information\": {\"Name\": [\"Jane Doe\"]}}\n```",
        );
        let extractor = StructuredExtractor::new(Box::new(client), "extractor");
        let fragment = extractor
            .extract(&ExtractionInput::text("body"))
            .unwrap();
        assert_eq!(
            field_texts(&fragment, "Insured Information", "Name"),
            vec!["Jane Doe"]
        );
    }

    #[test]
    fn vision_extractor_requires_image() {
        let client = MockModelClient::new("{}");
        let extractor = VisionExtractor::new(Box::new(client), "vision");
        let err = extractor
            .extract(&ExtractionInput::text("no image"))
            .unwrap_err();
        assert!(matches!(err, ExtractorError::MissingInput("image")));
    }

    #[test]
    fn vision_extractor_maps_form_fields() {
        let client = MockModelClient::new(
            r#"{"form": [{"name": "policy_number", "value": "POL123456"},
                         {"name": "unknown_box", "value": "x"}]}"#,
        );
        let extractor = VisionExtractor::new(Box::new(client), "vision");
        let fragment = extractor
            .extract(&ExtractionInput::image(vec![1, 2, 3]))
            .unwrap();
        assert_eq!(
            field_texts(&fragment, "Adjuster Information", "Policy #"),
            vec!["POL123456"]
        );
        assert_eq!(fragment.sections.len(), 1);
    }

    #[test]
    fn unavailable_client_surfaces_as_unavailable() {
        let client = MockModelClient::new("[]").unavailable();
        let extractor = EntityExtractor::new(Box::new(client), "tagger");
        assert!(!extractor.health_check());
        let err = extractor
            .extract(&ExtractionInput::text("body"))
            .unwrap_err();
        assert!(matches!(err, ExtractorError::Unavailable(_)));
    }
}
