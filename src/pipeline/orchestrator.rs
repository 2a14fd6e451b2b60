//! The parse run: walks the stage plan, fuses fragments, and validates.
//!
//! A stage failure never aborts the run. Timed-out or crashed stages are
//! logged, noted on the record, and followed by a recovery attempt while
//! the remaining stages carry on with whatever has been merged so far.

use std::sync::Arc;

use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::ParserConfig;
use crate::document::{Document, Fragment, VALIDATION_ISSUES};
use crate::extractors::{ExtractionInput, ExtractorKind};
use crate::progress::{NoopSink, ProgressEvent, ProgressSink};
use crate::schema::DocumentSchema;

use super::merge::DataMerger;
use super::recovery::{ExtractorPool, RecoveryPolicy};
use super::stage::{default_stages, StageSpec};
use super::validation::ValidationEngine;
use super::ParseError;

/// Raw material for one parse run.
#[derive(Debug, Clone, Default)]
pub struct ParseInput {
    pub text: Option<String>,
    pub image: Option<Vec<u8>>,
}

impl ParseInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), image: None }
    }

    pub fn with_image(mut self, bytes: Vec<u8>) -> Self {
        self.image = Some(bytes);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutcome {
    pub document: Document,
    pub issues: Vec<String>,
    pub is_valid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageFailureKind {
    Timeout,
    Extraction,
}

enum StageOutcome {
    Succeeded(Fragment),
    Skipped,
    Failed { kind: StageFailureKind, message: String },
}

pub struct ParsePipeline {
    stages: Vec<StageSpec>,
    pool: Arc<ExtractorPool>,
    merger: DataMerger,
    validator: ValidationEngine,
    recovery: RecoveryPolicy,
    config: Arc<ParserConfig>,
    sink: Arc<dyn ProgressSink>,
}

impl ParsePipeline {
    pub fn new(
        pool: ExtractorPool,
        schema: Arc<DocumentSchema>,
        config: Arc<ParserConfig>,
    ) -> Self {
        Self {
            stages: default_stages(),
            pool: Arc::new(pool),
            merger: DataMerger::new(schema.clone(), config.date_formats.clone()),
            validator: ValidationEngine::new(schema, config.clone()),
            recovery: RecoveryPolicy::new(config.recovery_attempts),
            config,
            sink: Arc::new(NoopSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_stages(mut self, stages: Vec<StageSpec>) -> Self {
        self.stages = stages;
        self
    }

    /// Runs the full pipeline over one email. Returns an error only when
    /// there is nothing to work on; everything that goes wrong later is
    /// reported on the record instead.
    pub async fn run(
        &self,
        correlation_id: &str,
        input: ParseInput,
    ) -> Result<ParseOutcome, ParseError> {
        if input.text.is_none() && input.image.is_none() {
            self.sink.emit(ProgressEvent::Error {
                message: "no usable input".to_string(),
            });
            return Err(ParseError::NoInput);
        }

        let run_id = Uuid::new_v4();
        let span = info_span!("parse_run", %run_id, correlation_id);
        self.run_stages(run_id, correlation_id, input)
            .instrument(span)
            .await
    }

    async fn run_stages(
        &self,
        run_id: Uuid,
        correlation_id: &str,
        input: ParseInput,
    ) -> Result<ParseOutcome, ParseError> {
        self.sink.emit(ProgressEvent::Started {
            run_id,
            correlation_id: correlation_id.to_string(),
        });

        let extraction_input =
            ExtractionInput { text: input.text, image: input.image };
        let mut doc = Document::default();
        let total = self.stages.len();

        for (idx, stage) in self.stages.iter().enumerate() {
            let outcome = self.run_stage(stage, &extraction_input).await;
            match outcome {
                StageOutcome::Succeeded(fragment) => {
                    let (merged, changes) = self.merger.merge(&doc, &fragment);
                    info!(
                        stage = stage.name,
                        changes = changes.len(),
                        "stage merged"
                    );
                    for change in &changes {
                        debug!(stage = stage.name, %change, "record changed");
                    }
                    doc = merged;
                    self.sink.emit(ProgressEvent::StageCompleted {
                        stage: stage.name.to_string(),
                    });
                }
                StageOutcome::Skipped => {
                    debug!(stage = stage.name, "stage skipped");
                }
                StageOutcome::Failed { kind, message } => {
                    warn!(stage = stage.name, ?kind, reason = %message, "stage failed");
                    doc.push_issue(
                        VALIDATION_ISSUES,
                        format!("Stage '{}' failed: {message}", stage.name),
                    );
                    self.sink.emit(ProgressEvent::Error { message });
                    self.try_recover(stage.kind).await;
                }
            }
            let percent = (((idx + 1) * 100) / (total + 1)).min(95) as u8;
            self.sink.emit(ProgressEvent::StageProgress {
                stage: stage.name.to_string(),
                percent,
            });
        }

        self.merger.ensure_complete(&mut doc);
        let validation = self.validator.validate(&mut doc);
        info!(
            is_valid = validation.is_valid,
            issues = validation.issues.len(),
            "parse run finished"
        );
        self.sink
            .emit(ProgressEvent::Completed { document: doc.clone() });
        Ok(ParseOutcome {
            document: doc,
            issues: validation.issues,
            is_valid: validation.is_valid,
        })
    }

    async fn run_stage(
        &self,
        stage: &StageSpec,
        input: &ExtractionInput,
    ) -> StageOutcome {
        if !stage.is_runnable(input) {
            return StageOutcome::Skipped;
        }
        if !self.pool.contains(stage.kind) {
            warn!(stage = stage.name, "no extractor registered");
            return StageOutcome::Skipped;
        }

        let budget = self.config.stage_timeout(stage.name);
        let pool = Arc::clone(&self.pool);
        let kind = stage.kind;
        let input = input.clone();
        let handle =
            tokio::task::spawn_blocking(move || pool.extract(kind, &input));

        match tokio::time::timeout(budget, handle).await {
            Err(_) => StageOutcome::Failed {
                kind: StageFailureKind::Timeout,
                message: format!(
                    "stage '{}' timed out after {}s",
                    stage.name,
                    budget.as_secs()
                ),
            },
            Ok(Err(join_err)) => StageOutcome::Failed {
                kind: StageFailureKind::Extraction,
                message: format!("stage worker panicked: {join_err}"),
            },
            Ok(Ok(None)) => StageOutcome::Skipped,
            Ok(Ok(Some(Err(e)))) => StageOutcome::Failed {
                kind: StageFailureKind::Extraction,
                message: e.to_string(),
            },
            Ok(Ok(Some(Ok(fragment)))) => StageOutcome::Succeeded(fragment),
        }
    }

    /// Best-effort reinitialization off the async thread. A slot still
    /// held by a hung extraction reports busy and stays as it is.
    async fn try_recover(&self, kind: ExtractorKind) {
        let pool = Arc::clone(&self.pool);
        let policy = self.recovery;
        let recovered =
            tokio::task::spawn_blocking(move || policy.recover(&pool, kind))
                .await
                .unwrap_or(false);
        if recovered {
            info!(kind = kind.as_str(), "extractor back in service");
        } else {
            warn!(kind = kind.as_str(), "extractor not recovered");
        }
    }
}
