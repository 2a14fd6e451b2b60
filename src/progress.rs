//! Progress reporting seam for parse runs.
//!
//! The pipeline emits events through a [`ProgressSink`] trait object so
//! callers can fan updates out to whatever transport they have (a channel,
//! a websocket bridge, nothing at all).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::Document;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started {
        run_id: Uuid,
        correlation_id: String,
    },
    StageProgress {
        stage: String,
        percent: u8,
    },
    StageCompleted {
        stage: String,
    },
    Completed {
        document: Document,
    },
    Error {
        message: String,
    },
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Discards every event. Default sink for library callers that do not
/// care about progress.
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Forwards events into a tokio channel. Send failures mean the receiver
/// is gone, which is not the pipeline's problem.
pub struct ChannelSink {
    tx: tokio::sync::mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(tx: tokio::sync::mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_snake_case_tags() {
        let event = ProgressEvent::StageProgress {
            stage: "pattern_extraction".to_string(),
            percent: 40,
        };
        let raw = serde_json::to_value(&event).unwrap();
        assert_eq!(raw["event"], "stage_progress");
        assert_eq!(raw["percent"], 40);
    }

    #[test]
    fn channel_sink_delivers_in_order() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = ChannelSink::new(tx);
        sink.emit(ProgressEvent::Error { message: "a".into() });
        sink.emit(ProgressEvent::Error { message: "b".into() });
        assert!(matches!(
            rx.try_recv().unwrap(),
            ProgressEvent::Error { message } if message == "a"
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            ProgressEvent::Error { message } if message == "b"
        ));
    }

    #[test]
    fn channel_sink_tolerates_dropped_receiver() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        let sink = ChannelSink::new(tx);
        sink.emit(ProgressEvent::Error { message: "lost".into() });
    }

    #[test]
    fn sink_is_object_safe() {
        let _sink: Box<dyn ProgressSink> = Box::new(NoopSink);
    }
}
