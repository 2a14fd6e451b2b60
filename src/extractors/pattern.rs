//! Regex-driven extraction over the email body.
//!
//! Cheapest backend in the pipeline and the only one with no external
//! process behind it. The patterns target the boilerplate carrier emails
//! share ("Policy #:", "Your adjuster, ..."), and each hit lands in its
//! schema section with a provenance tag.

use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::document::{Fragment, Observation};

use super::{ExtractionInput, Extractor, ExtractorError, ExtractorKind};

const SOURCE: &str = "pattern";

struct FieldPattern {
    section: &'static str,
    field: &'static str,
    regex: Regex,
}

pub struct PatternExtractor {
    fields: Vec<FieldPattern>,
    attachments: Regex,
}

/// Section, field, pattern. First capture group is the value.
const FIELD_PATTERNS: &[(&str, &str, &str)] = &[
    ("Adjuster Information", "Policy #", r"Policy (?:Number|#):\s*(\S+)"),
    ("Requesting Party", "Carrier Claim Number", r"Claim (?:Number|#):\s*(\S+)"),
    (
        "Assignment Information",
        "Date of Loss/Occurrence",
        r"Date of Loss:\s*([^\n]+)",
    ),
    ("Adjuster Information", "Adjuster Name", r"Your adjuster, (.+?) \("),
    (
        "Adjuster Information",
        "Adjuster Email",
        r"Your adjuster, .+? \(([^)]+)\)",
    ),
    ("Adjuster Information", "Adjuster Phone Number", r"Phone:\s*([\d-]+)"),
    ("Insured Information", "Public Adjuster", r"Best regards,\s*(.+?)\n"),
    ("Insured Information", "Name", r"Policyholder:\s*([^\n]+)"),
    ("Insured Information", "Loss Address", r"Property Address:\s*([^\n]+)"),
    ("Assignment Information", "Cause of loss", r"Peril:\s*([^\n]+)"),
    (
        "Assignment Information",
        "Loss Description",
        r"Claim Details:\s*\n(.*?)\n\n",
    ),
];

// Greedy so dotted filenames survive; the final period ends the sentence.
const ATTACHMENT_PATTERN: &str = r"Please find attached (.+)\.";

impl PatternExtractor {
    pub fn new() -> Result<Self, ExtractorError> {
        let mut fields = Vec::with_capacity(FIELD_PATTERNS.len());
        for &(section, field, pattern) in FIELD_PATTERNS {
            let regex = RegexBuilder::new(pattern)
                .dot_matches_new_line(true)
                .build()
                .map_err(|e| {
                    ExtractorError::Initialization(format!(
                        "bad pattern for '{field}': {e}"
                    ))
                })?;
            fields.push(FieldPattern { section, field, regex });
        }
        let attachments = Regex::new(ATTACHMENT_PATTERN)
            .map_err(|e| ExtractorError::Initialization(e.to_string()))?;
        Ok(Self { fields, attachments })
    }
}

impl Extractor for PatternExtractor {
    fn kind(&self) -> ExtractorKind {
        ExtractorKind::Pattern
    }

    fn health_check(&self) -> bool {
        true
    }

    fn extract(&self, input: &ExtractionInput) -> Result<Fragment, ExtractorError> {
        let text = input
            .text
            .as_deref()
            .ok_or(ExtractorError::MissingInput("text"))?;

        let mut fragment = Fragment::default();
        for fp in &self.fields {
            if let Some(caps) = fp.regex.captures(text) {
                if let Some(value) = caps.get(1) {
                    let value = value.as_str().trim();
                    if value.is_empty() {
                        continue;
                    }
                    debug!(field = fp.field, value, "pattern hit");
                    fragment.observe(
                        fp.section,
                        fp.field,
                        Observation::new(value).with_source(SOURCE),
                    );
                }
            }
        }
        if let Some(caps) = self.attachments.captures(text) {
            if let Some(names) = caps.get(1) {
                for name in names.as_str().split(" and ") {
                    let name = name.trim().trim_end_matches(',');
                    if !name.is_empty() {
                        fragment.push_item("Attachment(s)", name);
                    }
                }
            }
        }
        Ok(fragment)
    }

    fn reinitialize(&mut self) -> Result<(), ExtractorError> {
        // Compiled patterns cannot go stale.
        Ok(())
    }
}
