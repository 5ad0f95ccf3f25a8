//! Typed outcome channel shared by all stages.
//!
//! Stages never swallow a failure: each per-request outcome is emitted as a
//! [`StageEvent`] and a supervisor decides what to do with it (log, count,
//! alert). Emitting never blocks and never fails the stage.

use strum::IntoStaticStr;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::PipelineError;
use crate::models::request::RequestStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Ingestion,
    Captioning,
    Generation,
}

#[derive(Debug)]
pub enum Outcome {
    /// The request reached `status`.
    Advanced(RequestStatus),
    /// Another worker moved the request first; this attempt was rolled back.
    Superseded,
    /// The request completed but the requester could not be told.
    NotificationFailed(PipelineError),
    Failed(PipelineError),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Advanced(status) => status.as_str(),
            Self::Superseded => "superseded",
            Self::NotificationFailed(_) => "notification_failed",
            Self::Failed(_) => "error",
        }
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match self {
            Self::NotificationFailed(e) | Self::Failed(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct StageEvent {
    pub stage: Stage,
    pub request_id: Option<i64>,
    pub outcome: Outcome,
}

/// Sending half of the event channel, cloned into every stage.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<StageEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StageEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, stage: Stage, request_id: Option<i64>, outcome: Outcome) {
        // A closed receiver means the process is shutting down.
        let _ = self.tx.send(StageEvent {
            stage,
            request_id,
            outcome,
        });
    }
}

/// Consume stage events until every sink is dropped, logging each one and
/// counting it in `pipeline_stage_events_total`.
pub fn spawn_supervisor(mut rx: mpsc::UnboundedReceiver<StageEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            record(&event);
        }
        tracing::debug!("stage event channel closed");
    })
}

fn record(event: &StageEvent) {
    let stage: &'static str = event.stage.into();
    let outcome = event.outcome.label();
    let kind = event.outcome.error().map_or("none", PipelineError::kind);

    metrics::counter!(
        "pipeline_stage_events_total",
        "stage" => stage,
        "outcome" => outcome,
        "kind" => kind
    )
    .increment(1);

    match &event.outcome {
        Outcome::Advanced(status) => {
            tracing::info!(stage, request_id = ?event.request_id, status = %status, "request advanced");
        }
        Outcome::Superseded => {
            tracing::info!(stage, request_id = ?event.request_id, "request handled by another worker");
        }
        Outcome::NotificationFailed(e) => {
            tracing::warn!(stage, request_id = ?event.request_id, kind, error = %e, "notification failed");
        }
        Outcome::Failed(e) => {
            tracing::error!(stage, request_id = ?event.request_id, kind, error = %e, "stage failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_emission_order() {
        let (sink, mut rx) = EventSink::channel();
        sink.emit(Stage::Ingestion, Some(1), Outcome::Advanced(RequestStatus::Pending));
        sink.emit(
            Stage::Captioning,
            None,
            Outcome::Failed(PipelineError::MalformedMessage("bad".into())),
        );

        let first = rx.recv().await.unwrap();
        assert_eq!(first.stage, Stage::Ingestion);
        assert_eq!(first.outcome.label(), "pending");

        let second = rx.recv().await.unwrap();
        assert_eq!(second.request_id, None);
        assert_eq!(second.outcome.error().map(PipelineError::kind), Some("malformed_message"));
    }

    #[tokio::test]
    async fn supervisor_stops_when_every_sink_is_dropped() {
        let (sink, rx) = EventSink::channel();
        let supervisor = spawn_supervisor(rx);
        sink.emit(Stage::Generation, Some(3), Outcome::Superseded);
        drop(sink);

        supervisor.await.unwrap();
    }

    #[test]
    fn emitting_after_the_supervisor_is_gone_is_harmless() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.emit(Stage::Generation, Some(3), Outcome::Superseded);
    }
}
