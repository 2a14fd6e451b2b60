//! Post-merge validation and coercion of the assembled record.
//!
//! Runs after structural completion, so every schema field exists. Findings
//! land in the record's reserved lists rather than aborting the run: a
//! record full of problems is still a record the intake team can triage.

use std::sync::Arc;

use chrono::NaiveDate;
use regex::Regex;
use serde_json::Value;
use strsim::jaro_winkler;
use tracing::{debug, warn};

use crate::config::ParserConfig;
use crate::document::{
    value_to_bool, Document, SectionValue, INCONSISTENT_FIELDS, MISSING_FIELDS,
    SENTINEL, USER_NOTIFICATIONS, VALIDATION_ISSUES,
};
use crate::schema::{DocumentSchema, FieldType};

const PHONE_PATTERN: &str = r"^\+?1?\d{9,15}$";
const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub issues: Vec<String>,
}

pub struct ValidationEngine {
    schema: Arc<DocumentSchema>,
    config: Arc<ParserConfig>,
    phone_re: Regex,
    email_re: Regex,
}

enum Finding {
    Issue(String),
    Missing(String),
    Inconsistent(String),
    Notification(String),
}

impl ValidationEngine {
    pub fn new(schema: Arc<DocumentSchema>, config: Arc<ParserConfig>) -> Self {
        let phone_re = Regex::new(PHONE_PATTERN).expect("phone pattern is static");
        let email_re = Regex::new(EMAIL_PATTERN).expect("email pattern is static");
        Self { schema, config, phone_re, email_re }
    }

    /// Validates and coerces the record in place, then reports what it
    /// found. Never fails the run.
    pub fn validate(&self, doc: &mut Document) -> ValidationOutcome {
        let mut findings = Vec::new();

        for (section_name, fields) in &self.schema.sections {
            for (field_name, field_schema) in fields {
                let Some(SectionValue::Fields(section)) =
                    doc.sections.get_mut(section_name)
                else {
                    continue;
                };
                let Some(values) = section.get_mut(field_name) else {
                    continue;
                };

                self.coerce_values(
                    section_name,
                    field_name,
                    field_schema.field_type,
                    values,
                    &mut findings,
                );
                if is_phone_field(field_name) {
                    self.check_phones(section_name, field_name, values, &mut findings);
                }
                if field_schema.field_type == FieldType::Email {
                    self.check_emails(section_name, field_name, values, &mut findings);
                }
                if let Some(pattern) = &field_schema.pattern {
                    // Phone fields were already checked in normalized form;
                    // a second pattern pass would double-report them.
                    if !is_phone_field(field_name) {
                        self.check_pattern(
                            section_name,
                            field_name,
                            pattern,
                            values,
                            &mut findings,
                        );
                    }
                }
                if let Some(candidates) = self
                    .config
                    .known_values
                    .get(field_name)
                    .or(field_schema.allowed.as_ref())
                {
                    self.reconcile_known_values(
                        section_name,
                        field_name,
                        candidates,
                        values,
                        &mut findings,
                    );
                }
                if field_schema.required && all_sentinel(values) {
                    findings.push(Finding::Missing(format!(
                        "{section_name} -> {field_name}"
                    )));
                }
            }
        }

        self.check_dependencies(doc, &mut findings);

        for finding in findings {
            match finding {
                Finding::Issue(msg) => doc.push_issue(VALIDATION_ISSUES, msg),
                Finding::Missing(msg) => doc.push_issue(MISSING_FIELDS, msg),
                Finding::Inconsistent(msg) => {
                    doc.push_issue(INCONSISTENT_FIELDS, msg)
                }
                Finding::Notification(msg) => {
                    doc.push_issue(USER_NOTIFICATIONS, msg)
                }
            }
        }

        let issues = doc.collected_issues();
        ValidationOutcome { is_valid: issues.is_empty(), issues }
    }

    /// Forces every value into the field's declared type. Values that
    /// cannot be coerced become the placeholder and are flagged.
    fn coerce_values(
        &self,
        section: &str,
        field: &str,
        field_type: FieldType,
        values: &mut [Value],
        findings: &mut Vec<Finding>,
    ) {
        for value in values.iter_mut() {
            if value.as_str() == Some(SENTINEL) {
                continue;
            }
            let coerced = match field_type {
                FieldType::Boolean => match value {
                    Value::Bool(_) => Some(value.clone()),
                    Value::String(s) => match s.trim().to_ascii_lowercase().as_str()
                    {
                        "true" | "yes" => Some(Value::Bool(true)),
                        "false" | "no" => Some(Value::Bool(false)),
                        _ => None,
                    },
                    _ => None,
                },
                FieldType::Date => value
                    .as_str()
                    .filter(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok())
                    .map(|s| Value::String(s.to_string())),
                FieldType::String | FieldType::Email => match value {
                    Value::String(_) => Some(value.clone()),
                    Value::Number(n) => Some(Value::String(n.to_string())),
                    _ => None,
                },
                FieldType::Object => value.is_object().then(|| value.clone()),
                FieldType::Array => value.is_array().then(|| value.clone()),
            };
            match coerced {
                Some(new_value) => *value = new_value,
                None => {
                    findings.push(Finding::Inconsistent(format!(
                        "{section} -> {field}: value {value} does not fit type \
                         {field_type:?}"
                    )));
                    *value = Value::String(SENTINEL.into());
                }
            }
        }
    }

    /// Normalizes bare 10 and 11 digit numbers to +1 form, then checks the
    /// result.
    fn check_phones(
        &self,
        section: &str,
        field: &str,
        values: &mut [Value],
        findings: &mut Vec<Finding>,
    ) {
        for value in values.iter_mut() {
            let Some(raw) = value.as_str() else { continue };
            if raw == SENTINEL {
                continue;
            }
            let digits: String =
                raw.chars().filter(|c| c.is_ascii_digit()).collect();
            let normalized = if digits.len() == 10 {
                format!("+1{digits}")
            } else if digits.len() == 11 && digits.starts_with('1') {
                format!("+{digits}")
            } else if raw.trim().starts_with('+') {
                format!("+{digits}")
            } else {
                digits.clone()
            };
            if self.phone_re.is_match(&normalized) {
                if normalized != raw {
                    debug!(section, field, from = raw, to = %normalized, "phone normalized");
                }
                *value = Value::String(normalized);
            } else {
                findings.push(Finding::Issue(format!(
                    "{section} -> {field}: '{raw}' is not a valid phone number"
                )));
            }
        }
    }

    fn check_emails(
        &self,
        section: &str,
        field: &str,
        values: &[Value],
        findings: &mut Vec<Finding>,
    ) {
        for value in values {
            let Some(raw) = value.as_str() else { continue };
            if raw == SENTINEL {
                continue;
            }
            if !self.email_re.is_match(raw) {
                findings.push(Finding::Issue(format!(
                    "{section} -> {field}: '{raw}' is not a valid email address"
                )));
            }
        }
    }

    fn check_pattern(
        &self,
        section: &str,
        field: &str,
        pattern: &str,
        values: &[Value],
        findings: &mut Vec<Finding>,
    ) {
        let regex = match Regex::new(pattern) {
            Ok(regex) => regex,
            Err(e) => {
                warn!(section, field, error = %e, "unusable field pattern");
                return;
            }
        };
        for value in values {
            let Some(raw) = value.as_str() else { continue };
            if raw == SENTINEL {
                continue;
            }
            if !regex.is_match(raw) {
                findings.push(Finding::Issue(format!(
                    "{section} -> {field}: '{raw}' does not match the expected \
                     format"
                )));
            }
        }
    }

    /// Snaps near-miss values onto the closed candidate list. A tie keeps
    /// the earlier candidate.
    fn reconcile_known_values(
        &self,
        section: &str,
        field: &str,
        candidates: &[String],
        values: &mut [Value],
        findings: &mut Vec<Finding>,
    ) {
        for value in values.iter_mut() {
            let Some(raw) = value.as_str() else { continue };
            if raw == SENTINEL || candidates.iter().any(|c| c == raw) {
                continue;
            }
            let mut best: Option<(&String, f64)> = None;
            for candidate in candidates {
                let score = jaro_winkler(
                    &raw.to_ascii_lowercase(),
                    &candidate.to_ascii_lowercase(),
                );
                if best.map(|(_, s)| score > s).unwrap_or(true) {
                    best = Some((candidate, score));
                }
            }
            match best {
                Some((candidate, score)) if score >= self.config.fuzzy_threshold => {
                    findings.push(Finding::Notification(format!(
                        "{section} -> {field}: corrected '{raw}' to '{candidate}'"
                    )));
                    *value = Value::String(candidate.clone());
                }
                _ => {
                    findings.push(Finding::Inconsistent(format!(
                        "{section} -> {field}: '{raw}' is not a recognized value"
                    )));
                }
            }
        }
    }

    fn check_dependencies(&self, doc: &Document, findings: &mut Vec<Finding>) {
        for rule in &self.schema.dependencies {
            let premise = doc
                .field_values(&rule.premise.section, &rule.premise.field)
                .and_then(|values| values.first())
                .filter(|v| v.as_str() != Some(SENTINEL))
                .map(value_to_bool);
            let forbidden = doc
                .field_values(&rule.forbidden.section, &rule.forbidden.field)
                .and_then(|values| values.first())
                .filter(|v| v.as_str() != Some(SENTINEL))
                .map(value_to_bool);
            if premise == Some(rule.premise_value)
                && forbidden == Some(rule.forbidden_value)
            {
                findings.push(Finding::Issue(rule.message.clone()));
            }
        }
    }
}

fn is_phone_field(field: &str) -> bool {
    field.contains("Phone") || field == "Contact #"
}

fn all_sentinel(values: &[Value]) -> bool {
    values.iter().all(|v| v.as_str() == Some(SENTINEL))
}
