//! Replays a materialized event sequence against wall-clock time.

use chrono::{DateTime, Utc};
use churn_core::{EventId, EventKind, ExecutableEvent};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::presence::ContainerPresence;
use crate::runtime::RuntimeAction;
use crate::sink::ResultSink;

/// Row of the status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStatus {
    pub id: EventId,
    pub mark: String,
    pub processed: bool,
}

/// Materialized events plus the per-event processed flags that dispatch tasks
/// flip concurrently.
#[derive(Debug)]
pub struct Timeline {
    events: Vec<ExecutableEvent>,
    processed: Vec<AtomicBool>,
}

impl Timeline {
    pub fn new(events: Vec<ExecutableEvent>) -> Self {
        let processed = events
            .iter()
            .map(|event| AtomicBool::new(event.processed))
            .collect();
        Self { events, processed }
    }

    pub fn events(&self) -> &[ExecutableEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn is_processed(&self, index: usize) -> bool {
        self.processed
            .get(index)
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    fn mark_processed(&self, index: usize) {
        if let Some(flag) = self.processed.get(index) {
            flag.store(true, Ordering::Release);
        }
    }

    pub fn reset(&self) {
        for flag in &self.processed {
            flag.store(false, Ordering::Release);
        }
    }

    pub fn statuses(&self) -> Vec<EventStatus> {
        self.events
            .iter()
            .enumerate()
            .map(|(index, event)| EventStatus {
                id: event.id,
                mark: event.mark_message(),
                processed: self.is_processed(index),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The pending start was cancelled; nothing was dispatched.
    Cancelled,
    Completed { dispatched: usize },
}

#[derive(Clone)]
pub struct RunScheduler {
    timeline: Arc<Timeline>,
    presence: ContainerPresence,
    runtime: Arc<dyn RuntimeAction>,
    sink: ResultSink,
    drain: Duration,
}

impl RunScheduler {
    pub fn new(
        timeline: Arc<Timeline>,
        presence: ContainerPresence,
        runtime: Arc<dyn RuntimeAction>,
        sink: ResultSink,
        drain: Duration,
    ) -> Self {
        Self {
            timeline,
            presence,
            runtime,
            sink,
            drain,
        }
    }

    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }

    /// Waits for `start_at`, then walks the timeline dispatching every event
    /// on its own task. Only the wait before the start can be cancelled.
    pub async fn play_run(
        &self,
        start_at: DateTime<Utc>,
        cancel: oneshot::Receiver<()>,
    ) -> RunOutcome {
        let wait = (start_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        info!(start_at = %start_at, wait_ms = wait.as_millis() as u64, "run scheduled");

        let start = tokio::time::sleep(wait);
        tokio::pin!(start);
        tokio::select! {
            _ = &mut start => {}
            signal = cancel => match signal {
                Ok(()) => {
                    info!("pending run cancelled");
                    return RunOutcome::Cancelled;
                }
                // Dropped sender: nobody can cancel any more.
                Err(_) => (&mut start).await,
            },
        }

        info!(events = self.timeline.len(), "run started");
        let mut current = 0u64;
        let mut dispatched = 0usize;
        for (index, event) in self.timeline.events().iter().enumerate() {
            if event.time > current {
                let gap = event.time - current;
                debug!(seconds = gap, "sleeping until next event");
                tokio::time::sleep(Duration::from_secs(gap)).await;
            }
            current = event.time;

            let worker = self.clone();
            tokio::spawn(async move { worker.process(index).await });
            dispatched += 1;
        }

        info!(
            dispatched,
            drain_secs = self.drain.as_secs(),
            "all events dispatched, draining"
        );
        tokio::time::sleep(self.drain).await;
        RunOutcome::Completed { dispatched }
    }

    /// Renders the walk without touching any container. Lines are returned
    /// and also sent to the sink.
    pub fn dry_run(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.timeline.len());
        let mut current = 0u64;
        for event in self.timeline.events() {
            if event.time > current {
                lines.push(format!("sleep {} seconds", event.time - current));
            }
            current = event.time;
            lines.push(event.dry_run_line());
        }
        for line in &lines {
            self.sink.event(line.clone());
        }
        debug!(lines = lines.len(), "dry run rendered");
        lines
    }

    pub fn reset_round(&self) {
        self.timeline.reset();
    }

    pub fn processed_events(&self) -> Vec<EventStatus> {
        self.timeline.statuses()
    }

    async fn process(&self, index: usize) {
        let Some(event) = self.timeline.events().get(index) else {
            return;
        };
        match &event.kind {
            EventKind::ContainerAction {
                service,
                slot,
                action,
            } => {
                let Some(container) = self.presence.container_present(service, *slot).await
                else {
                    debug!(event = %event, "container not present, skipping");
                    return;
                };
                debug!(event = %event, container = %container, "applying action");
                if let Err(err) = self.runtime.apply(&container, action).await {
                    warn!(event = %event, container = %container, error = %err, "action failed");
                    self.sink.error(format!("applying {event}: {err}"));
                    return;
                }
                self.timeline.mark_processed(index);
                self.sink.mark(event.mark_message());
            }
            // Replicas are created by the control plane; the flag stays unset.
            EventKind::StartCount { .. } => self.sink.mark(event.mark_message()),
            EventKind::Beginning | EventKind::End | EventKind::Mark { .. } => {
                self.timeline.mark_processed(index);
                self.sink.mark(event.mark_message());
                debug!(event = %event, "event processed");
            }
        }
    }
}
