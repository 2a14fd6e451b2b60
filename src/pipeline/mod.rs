//! Staged parse pipeline: stage plan, merge, validation, recovery, and the
//! orchestrator that ties them together.

pub mod merge;
pub mod orchestrator;
pub mod recovery;
pub mod stage;
pub mod validation;

pub use merge::{ChangeType, DataMerger, MergeChange};
pub use orchestrator::{ParseInput, ParseOutcome, ParsePipeline};
pub use recovery::{ExtractorPool, RecoveryPolicy};
pub use stage::{default_stages, StageInput, StageSpec};
pub use validation::{ValidationEngine, ValidationOutcome};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no usable input: neither text nor image was provided")]
    NoInput,
    #[error("pipeline initialization failed: {0}")]
    Initialization(String),
}
