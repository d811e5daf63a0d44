//! Control surface of the agent: load, start, cancel, report.

use chrono::{DateTime, Utc};
use churn_core::{load_plan, AgentConfig, LoadError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::adapter::{adapter_for, AdapterError, OrchestratorAdapter};
use crate::presence::ContainerPresence;
use crate::runtime::RuntimeAction;
use crate::scheduler::{EventStatus, RunOutcome, RunScheduler, Timeline};
use crate::sink::ResultSink;

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error("no experiment loaded")]
    NotLoaded,
    #[error("Start Experiment Moment expired: {at}")]
    StartExpired { at: DateTime<Utc> },
    #[error("no pending start to cancel")]
    NothingToCancel,
    #[error("an experiment start is already pending")]
    AlreadyPending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartAt {
    Now,
    At(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub seed: i64,
    pub events: usize,
    /// Alive replicas per service once every moment has been applied.
    pub final_replicas: BTreeMap<String, usize>,
}

/// One node's chaos agent. Holds the last successfully loaded plan.
pub struct ChaosAgent {
    adapter: Arc<dyn OrchestratorAdapter>,
    presence: ContainerPresence,
    runtime: Arc<dyn RuntimeAction>,
    sink: ResultSink,
    drain: Duration,
    scheduler: Option<RunScheduler>,
    pending_start: Option<oneshot::Sender<()>>,
}

impl ChaosAgent {
    pub fn new(
        config: &AgentConfig,
        runtime: Arc<dyn RuntimeAction>,
        sink: ResultSink,
    ) -> Result<Self, ControlError> {
        let adapter = adapter_for(&config.agent.orchestrator)?;
        Ok(Self::with_adapter(
            adapter,
            runtime,
            sink,
            Duration::from_secs(config.agent.drain_secs),
        ))
    }

    pub fn with_adapter(
        adapter: Arc<dyn OrchestratorAdapter>,
        runtime: Arc<dyn RuntimeAction>,
        sink: ResultSink,
        drain: Duration,
    ) -> Self {
        Self {
            adapter,
            presence: ContainerPresence::new(),
            runtime,
            sink,
            drain,
            scheduler: None,
            pending_start: None,
        }
    }

    pub fn adapter(&self) -> Arc<dyn OrchestratorAdapter> {
        Arc::clone(&self.adapter)
    }

    pub fn presence(&self) -> ContainerPresence {
        self.presence.clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Parses and materializes `script`. On failure the previously loaded
    /// plan stays in place.
    pub async fn load(&mut self, script: &str) -> Result<LoadSummary, LoadError> {
        let plan = load_plan(script, self.adapter.as_ref())?;

        for service in plan.replicas.keys() {
            self.presence.initialize_service(service).await;
        }
        for event in &plan.events {
            debug!(event = %event, "loaded event");
        }
        let summary = LoadSummary {
            seed: plan.seed,
            events: plan.events.len(),
            final_replicas: plan
                .replicas
                .iter()
                .map(|(service, state)| (service.clone(), state.alive_count()))
                .collect(),
        };
        info!(seed = summary.seed, events = summary.events, "experiment loaded");

        self.scheduler = Some(RunScheduler::new(
            Arc::new(Timeline::new(plan.events)),
            self.presence.clone(),
            Arc::clone(&self.runtime),
            self.sink.clone(),
            self.drain,
        ));
        Ok(summary)
    }

    /// Schedules the loaded plan. The returned handle resolves when the run
    /// has drained or the pending start was cancelled. Only one start may be
    /// pending at a time.
    pub fn start(&mut self, at: StartAt) -> Result<JoinHandle<RunOutcome>, ControlError> {
        let scheduler = self.scheduler.clone().ok_or(ControlError::NotLoaded)?;
        if self
            .pending_start
            .as_ref()
            .is_some_and(|sender| !sender.is_closed())
        {
            return Err(ControlError::AlreadyPending);
        }
        let now = Utc::now();
        let start_at = match at {
            StartAt::Now => now,
            StartAt::At(at) if at < now => return Err(ControlError::StartExpired { at }),
            StartAt::At(at) => at,
        };

        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.pending_start = Some(cancel_tx);
        self.sink
            .round(format!("start experiment @ {}", start_at.to_rfc3339()));
        info!(start_at = %start_at, "experiment start requested");

        Ok(tokio::spawn(async move {
            scheduler.play_run(start_at, cancel_rx).await
        }))
    }

    pub fn cancel_pending_start(&mut self) -> Result<(), ControlError> {
        let sender = self
            .pending_start
            .take()
            .ok_or(ControlError::NothingToCancel)?;
        sender.send(()).map_err(|_| ControlError::NothingToCancel)?;
        info!("pending start cancelled");
        Ok(())
    }

    pub fn dry_run(&self) -> Result<Vec<String>, ControlError> {
        let scheduler = self.scheduler.as_ref().ok_or(ControlError::NotLoaded)?;
        Ok(scheduler.dry_run())
    }

    pub fn reset_round(&self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.reset_round();
        }
        self.sink.round("reset round");
        info!("round reset");
    }

    pub fn processed_events(&self) -> Vec<EventStatus> {
        self.scheduler
            .as_ref()
            .map(RunScheduler::processed_events)
            .unwrap_or_default()
    }
}
