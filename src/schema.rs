//! Claim record schema: sections, field types, and cross-field rules.
//!
//! The schema drives three things downstream: merge policy selection (by
//! field type), structural completion (every schema field exists in the
//! final record), and validation (required fields, formats, enumerations,
//! dependency rules).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Boolean,
    Date,
    Email,
    Object,
    Array,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    /// Closed set of accepted values, reconciled fuzzily during validation.
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
    /// Regex the coerced string value must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Sub-fields for `Object` typed fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, FieldSchema>>,
    /// Element schema for `Array` typed fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<FieldSchema>>,
}

impl FieldSchema {
    fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
            allowed: None,
            pattern: None,
            properties: None,
            items: None,
        }
    }

    fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn allowed(mut self, values: &[&str]) -> Self {
        self.allowed = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }

    fn pattern(mut self, pattern: &str) -> Self {
        self.pattern = Some(pattern.to_string());
        self
    }
}

/// Names one field within one section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRef {
    pub section: String,
    pub field: String,
}

impl FieldRef {
    pub fn new(section: &str, field: &str) -> Self {
        Self { section: section.to_string(), field: field.to_string() }
    }
}

/// Declarative cross-field rule: when the premise field holds
/// `premise_value`, the forbidden field must not hold `forbidden_value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyRule {
    pub premise: FieldRef,
    pub premise_value: bool,
    pub forbidden: FieldRef,
    pub forbidden_value: bool,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentSchema {
    pub sections: BTreeMap<String, BTreeMap<String, FieldSchema>>,
    #[serde(default)]
    pub dependencies: Vec<DependencyRule>,
}

const PHONE_PATTERN: &str = r"^\+?1?\d{9,15}$";

impl DocumentSchema {
    pub fn field(&self, section: &str, field: &str) -> Option<&FieldSchema> {
        self.sections.get(section)?.get(field)
    }

    pub fn is_schema_section(&self, section: &str) -> bool {
        self.sections.contains_key(section)
    }

    /// The insurance assignment intake schema.
    pub fn claim_assignment() -> Self {
        let mut sections = BTreeMap::new();

        sections.insert(
            "Requesting Party".to_string(),
            BTreeMap::from([
                (
                    "Insurance Company".to_string(),
                    FieldSchema::new(FieldType::String)
                        .required()
                        .allowed(&["Allianz", "State Farm", "GEICO"]),
                ),
                ("Handler".to_string(), FieldSchema::new(FieldType::String)),
                (
                    "Carrier Claim Number".to_string(),
                    FieldSchema::new(FieldType::String)
                        .required()
                        .pattern("^[A-Z0-9]{6,}$"),
                ),
            ]),
        );

        sections.insert(
            "Insured Information".to_string(),
            BTreeMap::from([
                ("Name".to_string(), FieldSchema::new(FieldType::String).required()),
                (
                    "Contact #".to_string(),
                    FieldSchema::new(FieldType::String).pattern(PHONE_PATTERN),
                ),
                (
                    "Loss Address".to_string(),
                    FieldSchema::new(FieldType::String).required(),
                ),
                ("Public Adjuster".to_string(), FieldSchema::new(FieldType::String)),
                (
                    "Is the insured an Owner or a Tenant of the loss location?"
                        .to_string(),
                    FieldSchema::new(FieldType::Boolean),
                ),
            ]),
        );

        sections.insert(
            "Adjuster Information".to_string(),
            BTreeMap::from([
                ("Adjuster Name".to_string(), FieldSchema::new(FieldType::String)),
                (
                    "Adjuster Phone Number".to_string(),
                    FieldSchema::new(FieldType::String).pattern(PHONE_PATTERN),
                ),
                (
                    "Adjuster Email".to_string(),
                    FieldSchema::new(FieldType::Email),
                ),
                ("Job Title".to_string(), FieldSchema::new(FieldType::String)),
                ("Address".to_string(), FieldSchema::new(FieldType::String)),
                (
                    "Policy #".to_string(),
                    FieldSchema::new(FieldType::String)
                        .required()
                        .pattern(r"^POL\d{6}$"),
                ),
            ]),
        );

        sections.insert(
            "Assignment Information".to_string(),
            BTreeMap::from([
                (
                    "Date of Loss/Occurrence".to_string(),
                    FieldSchema::new(FieldType::Date).required(),
                ),
                ("Cause of loss".to_string(), FieldSchema::new(FieldType::String)),
                ("Facts of Loss".to_string(), FieldSchema::new(FieldType::String)),
                (
                    "Loss Description".to_string(),
                    FieldSchema::new(FieldType::String).required(),
                ),
                (
                    "Residence Occupied During Loss".to_string(),
                    FieldSchema::new(FieldType::Boolean),
                ),
                (
                    "Was Someone home at time of damage".to_string(),
                    FieldSchema::new(FieldType::Boolean),
                ),
                (
                    "Repair or Mitigation Progress".to_string(),
                    FieldSchema::new(FieldType::String),
                ),
                (
                    "Type".to_string(),
                    FieldSchema::new(FieldType::String)
                        .allowed(&["Residential", "Commercial"]),
                ),
                ("Inspection type".to_string(), FieldSchema::new(FieldType::String)),
            ]),
        );

        let mut other = FieldSchema::new(FieldType::Object);
        other.properties = Some(BTreeMap::from([
            ("Checked".to_string(), FieldSchema::new(FieldType::Boolean)),
            ("Details".to_string(), FieldSchema::new(FieldType::String)),
        ]));
        sections.insert(
            "Assignment Type".to_string(),
            BTreeMap::from([
                ("Wind".to_string(), FieldSchema::new(FieldType::Boolean)),
                ("Structural".to_string(), FieldSchema::new(FieldType::Boolean)),
                ("Hail".to_string(), FieldSchema::new(FieldType::Boolean)),
                ("Foundation".to_string(), FieldSchema::new(FieldType::Boolean)),
                ("Other".to_string(), other),
            ]),
        );

        let dependencies = vec![DependencyRule {
            premise: FieldRef::new(
                "Assignment Information",
                "Residence Occupied During Loss",
            ),
            premise_value: false,
            forbidden: FieldRef::new(
                "Assignment Information",
                "Was Someone home at time of damage",
            ),
            forbidden_value: true,
            message: "Was Someone home at time of damage cannot be true when \
                      Residence Occupied During Loss is false"
                .to_string(),
        }];

        Self { sections, dependencies }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_assignment_has_expected_sections() {
        let schema = DocumentSchema::claim_assignment();
        for section in [
            "Requesting Party",
            "Insured Information",
            "Adjuster Information",
            "Assignment Information",
            "Assignment Type",
        ] {
            assert!(schema.is_schema_section(section), "missing {section}");
        }
        assert!(!schema.is_schema_section("Attachment(s)"));
    }

    #[test]
    fn required_and_typed_fields_resolve() {
        let schema = DocumentSchema::claim_assignment();
        let name = schema.field("Insured Information", "Name").unwrap();
        assert!(name.required);
        let date = schema
            .field("Assignment Information", "Date of Loss/Occurrence")
            .unwrap();
        assert_eq!(date.field_type, FieldType::Date);
        let other = schema.field("Assignment Type", "Other").unwrap();
        assert_eq!(other.field_type, FieldType::Object);
        assert!(other.properties.as_ref().unwrap().contains_key("Checked"));
    }

    #[test]
    fn dependency_rule_targets_occupancy_fields() {
        let schema = DocumentSchema::claim_assignment();
        assert_eq!(schema.dependencies.len(), 1);
        let rule = &schema.dependencies[0];
        assert_eq!(rule.premise.field, "Residence Occupied During Loss");
        assert!(!rule.premise_value);
        assert!(rule.forbidden_value);
    }

    #[test]
    fn schema_serializes_with_renamed_keys() {
        let schema = DocumentSchema::claim_assignment();
        let raw = serde_json::to_value(&schema).unwrap();
        let company = &raw["sections"]["Requesting Party"]["Insurance Company"];
        assert_eq!(company["type"], "string");
        assert!(company["enum"].as_array().unwrap().contains(&"GEICO".into()));
    }
}
