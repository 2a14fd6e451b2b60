//! claimsift: staged extraction core for insurance assignment intake.
//!
//! Feeds one email (body text, optionally a scanned attachment) through an
//! ordered set of extraction stages, fuses their partial outputs into a
//! single schema-shaped claim record, and validates the result. Stage
//! failures degrade the record instead of aborting the run.

pub mod config;
pub mod document;
pub mod extractors;
pub mod pipeline;
pub mod progress;
pub mod schema;

pub use config::ParserConfig;
pub use document::{Document, Fragment, Observation, SENTINEL};
pub use pipeline::{
    DataMerger, ExtractorPool, ParseError, ParseInput, ParseOutcome,
    ParsePipeline, RecoveryPolicy, ValidationEngine,
};
pub use progress::{ChannelSink, NoopSink, ProgressEvent, ProgressSink};
pub use schema::DocumentSchema;

use tracing_subscriber::EnvFilter;

/// Initialize tracing for binaries and integration harnesses. Honors
/// `RUST_LOG`, defaulting to info-level output for this crate.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("claimsift=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
