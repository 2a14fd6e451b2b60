//! Extraction backends and the contract they share.
//!
//! Each extractor turns raw input (email text, a scanned attachment) into a
//! [`Fragment`]. The pipeline treats them uniformly through the
//! [`Extractor`] trait so the orchestrator never knows which backend is a
//! regex table and which is a model call.

pub mod model;
pub mod pattern;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::document::Fragment;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ExtractorKind {
    Pattern,
    Entity,
    Vision,
    Summary,
    Structured,
}

impl ExtractorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractorKind::Pattern => "pattern",
            ExtractorKind::Entity => "entity",
            ExtractorKind::Vision => "vision",
            ExtractorKind::Summary => "summary",
            ExtractorKind::Structured => "structured",
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("extractor backend unavailable: {0}")]
    Unavailable(String),
    #[error("backend returned status {status}: {body}")]
    Backend { status: u16, body: String },
    #[error("malformed backend response: {0}")]
    MalformedResponse(String),
    #[error("extractor initialization failed: {0}")]
    Initialization(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("required input missing: {0}")]
    MissingInput(&'static str),
}

/// Raw material one extraction call works from.
#[derive(Debug, Clone, Default)]
pub struct ExtractionInput {
    pub text: Option<String>,
    pub image: Option<Vec<u8>>,
}

impl ExtractionInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), image: None }
    }

    pub fn image(bytes: Vec<u8>) -> Self {
        Self { text: None, image: Some(bytes) }
    }
}

/// Contract every extraction backend implements.
///
/// `extract` is synchronous and may block (model calls run on blocking
/// threads upstream). `reinitialize` must leave the extractor in a usable
/// state or report why it could not; the recovery loop gates the result
/// behind `health_check` either way.
pub trait Extractor: Send + Sync {
    fn kind(&self) -> ExtractorKind;
    fn health_check(&self) -> bool;
    fn extract(&self, input: &ExtractionInput) -> Result<Fragment, ExtractorError>;
    fn reinitialize(&mut self) -> Result<(), ExtractorError>;
}
