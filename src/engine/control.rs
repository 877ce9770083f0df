//! Control plane: polls the coordinator on an interval, hands newly ready
//! workflows to an executor channel, and persists state after each tick.
//!
//! The coordinator itself never sleeps or blocks; this loop owns the timing
//! and the shutdown signal.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tracing::{debug, error, info, warn};

use crate::coordinator::{PollReport, WorkflowCoordinator};
use crate::error::{Error, Result};
use crate::model::{WorkflowId, WorkflowTask};

/// Configuration for the control plane.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Time between polls.
    pub poll_interval: Duration,
    /// Save state after every poll (when the coordinator has a state path).
    pub persist_each_tick: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            persist_each_tick: true,
        }
    }
}

/// The poll loop around one coordinator.
pub struct ControlPlane {
    coordinator: Arc<WorkflowCoordinator>,
    config: ControlConfig,
    shutdown: Arc<Notify>,
    dispatch: Option<mpsc::UnboundedSender<WorkflowTask>>,
}

impl Clone for ControlPlane {
    fn clone(&self) -> Self {
        Self {
            coordinator: Arc::clone(&self.coordinator),
            config: self.config.clone(),
            shutdown: Arc::clone(&self.shutdown),
            dispatch: self.dispatch.clone(),
        }
    }
}

impl ControlPlane {
    pub fn new(coordinator: Arc<WorkflowCoordinator>, config: ControlConfig) -> Self {
        Self {
            coordinator,
            config,
            shutdown: Arc::new(Notify::new()),
            dispatch: None,
        }
    }

    /// Send each workflow this peer owns to `tx` once, when it becomes ready.
    pub fn with_dispatch(mut self, tx: mpsc::UnboundedSender<WorkflowTask>) -> Self {
        self.dispatch = Some(tx);
        self
    }

    /// Signal the control plane to shut down.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run the poll loop until shutdown, then save one last time.
    ///
    /// A zero poll interval is refused before the loop starts.
    pub async fn run(&self) -> Result<()> {
        if self.config.poll_interval.is_zero() {
            return Err(Error::Config("poll interval must be non-zero".to_string()));
        }
        info!(
            peer = %self.coordinator.peer_id(),
            interval_ms = self.config.poll_interval.as_millis() as u64,
            "control plane started"
        );

        let mut dispatched: HashSet<WorkflowId> = HashSet::new();
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("control plane shutting down");
                    self.persist();
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            let report = self.coordinator.poll();
            self.dispatch_ready(&report, &mut dispatched);
            if self.config.persist_each_tick {
                self.persist();
            }
        }
    }

    fn dispatch_ready(&self, report: &PollReport, dispatched: &mut HashSet<WorkflowId>) {
        if !report.assignments.assigned.is_empty() || !report.ready.is_empty() {
            debug!(
                assigned = report.assignments.assigned.len(),
                ready = report.ready.len(),
                "poll"
            );
        }

        // Forget ids that are no longer waiting, so the set stays bounded.
        dispatched.retain(|id| report.ready.iter().any(|t| &t.workflow_id == id));

        let Some(tx) = &self.dispatch else {
            return;
        };
        for task in &report.ready {
            if !dispatched.insert(task.workflow_id.clone()) {
                continue;
            }
            info!(workflow_id = %task.workflow_id, name = %task.name, "workflow ready");
            if tx.send(task.clone()).is_err() {
                warn!(workflow_id = %task.workflow_id, "dispatch channel closed");
                dispatched.remove(&task.workflow_id);
            }
        }
    }

    fn persist(&self) {
        if self.coordinator.state_path().is_none() {
            return;
        }
        if let Err(e) = self.coordinator.save() {
            error!("state save failed: {e}");
        }
    }
}
