//! Runtime tuning knobs for the parse pipeline.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Wall-clock budget applied to a stage with no dedicated override.
    pub default_stage_timeout_secs: u64,
    /// Per-stage overrides keyed by stage name.
    pub stage_timeouts: BTreeMap<String, u64>,
    /// Reinitialization attempts after a stage failure before giving up.
    pub recovery_attempts: u32,
    /// Jaro-Winkler similarity floor for snapping a value onto a known one.
    pub fuzzy_threshold: f64,
    /// Per-field closed candidate lists, keyed by field name.
    pub known_values: BTreeMap<String, Vec<String>>,
    /// Accepted input date formats, tried in order during merge.
    pub date_formats: Vec<String>,
    /// Base URL of the local model server.
    pub model_endpoint: String,
    /// HTTP timeout for model calls.
    pub model_timeout_secs: u64,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            default_stage_timeout_secs: 30,
            stage_timeouts: BTreeMap::new(),
            recovery_attempts: 3,
            fuzzy_threshold: 0.9,
            known_values: BTreeMap::from([(
                "Insurance Company".to_string(),
                vec![
                    "Allianz".to_string(),
                    "State Farm".to_string(),
                    "GEICO".to_string(),
                ],
            )]),
            date_formats: vec![
                "%Y-%m-%d".to_string(),
                "%Y/%m/%d".to_string(),
                "%m/%d/%Y".to_string(),
                "%m-%d-%Y".to_string(),
                "%B %d, %Y".to_string(),
                "%d %B %Y".to_string(),
            ],
            model_endpoint: "http://localhost:11434".to_string(),
            model_timeout_secs: 120,
        }
    }
}

impl ParserConfig {
    pub fn stage_timeout(&self, stage: &str) -> Duration {
        let secs = self
            .stage_timeouts
            .get(stage)
            .copied()
            .unwrap_or(self.default_stage_timeout_secs);
        Duration::from_secs(secs)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}
