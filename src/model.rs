//! Core data model.
//!
//! A workflow record is what callers submit (already parsed). A workflow task
//! is what the coordinator tracks: identity, task hash, priority, lifecycle
//! status, and which peer owns it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hash::Hash;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Newtype for workflow IDs. Ordered lexicographically; that order breaks
/// priority ties in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(pub String);

impl WorkflowId {
    pub fn new() -> Self {
        Self(format!("wf-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for WorkflowId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for WorkflowId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A peer's identity within the mesh.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ---------------------------------------------------------------------------
// Workflow Record
// ---------------------------------------------------------------------------

/// An already-parsed workflow definition as handed to the coordinator.
///
/// Its JSON encoding is the input to the task hash, so two records with the
/// same content always produce the same task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Lower = more urgent.
    #[serde(default = "default_priority")]
    pub priority: f64,
    /// Arbitrary inputs. Object keys serialize sorted, which keeps the hash stable.
    #[serde(default)]
    pub inputs: serde_json::Value,
}

fn default_priority() -> f64 {
    WorkflowRecord::DEFAULT_PRIORITY
}

impl WorkflowRecord {
    pub const DEFAULT_PRIORITY: f64 = 5.0;

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: Vec::new(),
            priority: Self::DEFAULT_PRIORITY,
            inputs: serde_json::Value::Null,
        }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    pub fn inputs(mut self, inputs: serde_json::Value) -> Self {
        self.inputs = inputs;
        self
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a workflow task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Submitted, waiting in the local priority queue.
    Pending,
    /// Owner computed; waiting for that peer to start it.
    Assigned,
    /// Owner is executing it.
    InProgress,
    /// Done successfully. Terminal.
    Completed,
    /// Execution failed. Terminal.
    Failed,
    /// Withdrawn before execution. Terminal.
    Cancelled,
}

impl WorkflowStatus {
    pub const ALL: [WorkflowStatus; 6] = [
        WorkflowStatus::Pending,
        WorkflowStatus::Assigned,
        WorkflowStatus::InProgress,
        WorkflowStatus::Completed,
        WorkflowStatus::Failed,
        WorkflowStatus::Cancelled,
    ];

    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        matches!(
            (self, to),
            (Pending, Assigned)
                | (Assigned, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (Pending, Cancelled)
                | (Assigned, Cancelled)
        )
    }

    /// Is this a terminal status?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Assigned => "assigned",
            WorkflowStatus::InProgress => "in_progress",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        };
        f.pad(s)
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkflowStatus::ALL
            .into_iter()
            .find(|status| status.to_string() == s)
            .ok_or_else(|| crate::error::Error::Other(format!("unknown workflow status: {s}")))
    }
}

// ---------------------------------------------------------------------------
// Workflow Task
// ---------------------------------------------------------------------------

/// A unit of schedulable work tracked by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTask {
    pub workflow_id: WorkflowId,

    /// Name copied from the submitted record, for display.
    #[serde(default)]
    pub name: String,

    /// Digest of the submitted record. Drives idempotent submission and
    /// peer assignment.
    pub task_hash: Hash,

    /// Lower = more urgent.
    pub priority: f64,

    pub status: WorkflowStatus,

    /// Set once assignment has picked an owner. Never rewritten afterwards.
    pub assigned_peer: Option<PeerId>,

    pub submitted_at: DateTime<Utc>,

    /// Result data on completion. Opaque to the coordinator.
    pub result: Option<serde_json::Value>,

    /// Error message on failure or cancellation.
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Filter for listing workflows. Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct WorkflowFilter {
    pub status: Option<WorkflowStatus>,
    pub peer_id: Option<PeerId>,
}

impl WorkflowFilter {
    pub fn status(mut self, status: WorkflowStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn peer(mut self, peer_id: impl Into<PeerId>) -> Self {
        self.peer_id = Some(peer_id.into());
        self
    }

    pub fn matches(&self, task: &WorkflowTask) -> bool {
        self.status.is_none_or(|s| task.status == s)
            && self
                .peer_id
                .as_ref()
                .is_none_or(|p| task.assigned_peer.as_ref() == Some(p))
    }
}

/// Counts reported by `get_stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub peer_id: PeerId,
    pub total: usize,
    pub by_status: BTreeMap<WorkflowStatus, usize>,
    /// Number of tasks recorded against each assigned peer.
    pub per_peer: BTreeMap<PeerId, usize>,
    pub known_peers: usize,
    pub logical_clock: u64,
    pub clock_head: Hash,
}
