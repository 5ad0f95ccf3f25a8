use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::events::{EventSink, Outcome, Stage};
use crate::error::PipelineError;

/// Counters returned when a [`PeriodicRunner`] stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunnerStats {
    pub cycles: u64,
    pub failed_cycles: u64,
}

/// Runs a cycle on a fixed period until cancelled.
///
/// Each cycle is awaited before the next tick is taken, so cycles never
/// overlap. A cycle that overruns the period delays the following tick
/// instead of triggering a burst. Cancellation is observed between cycles;
/// a cycle in progress is allowed to finish.
pub struct PeriodicRunner {
    name: &'static str,
    period: Duration,
    events: Option<(Stage, EventSink)>,
}

impl PeriodicRunner {
    pub fn new(name: &'static str, period: Duration) -> Self {
        Self {
            name,
            period,
            events: None,
        }
    }

    /// Report failed cycles on the event channel as well as in the log.
    pub fn with_events(mut self, stage: Stage, sink: EventSink) -> Self {
        self.events = Some((stage, sink));
        self
    }

    pub async fn run<F, Fut>(&self, cancel: CancellationToken, mut cycle: F) -> RunnerStats
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), PipelineError>>,
    {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stats = RunnerStats::default();

        tracing::info!(runner = self.name, period_ms = self.period.as_millis() as u64, "periodic runner started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let started = Instant::now();
            stats.cycles += 1;
            match cycle().await {
                Ok(()) => {
                    tracing::debug!(
                        runner = self.name,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "cycle finished"
                    );
                }
                Err(e) => {
                    stats.failed_cycles += 1;
                    tracing::warn!(runner = self.name, error = %e, "cycle failed, waiting for next tick");
                    if let Some((stage, sink)) = &self.events {
                        sink.emit(*stage, None, Outcome::Failed(e));
                    }
                }
            }
        }

        tracing::info!(
            runner = self.name,
            cycles = stats.cycles,
            failed_cycles = stats.failed_cycles,
            "periodic runner stopped"
        );
        stats
    }
}
