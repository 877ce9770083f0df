//! Workflow coordinator. The public API for submitting, assigning, and
//! tracking workflows on one peer.
//!
//! The coordinator owns the Merkle clock, the pending queue, the peer set,
//! and the workflow table behind a single lock. Assignment reads the clock
//! head and the peer set while it drains the queue; nothing may change either
//! in the middle of a pass, or two peers with identical inputs could reach
//! different owners.
//!
//! Invariant: a task is in the queue iff its status is `Pending`.

pub mod persist;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use opentelemetry::KeyValue;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::assignment;
use crate::clock::{ClockHead, MerkleClock};
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::model::*;
use crate::queue::WorkflowPriorityQueue;
use crate::telemetry::metrics;
use crate::telemetry::workflow::{record_state_transition, start_workflow_span};

use self::persist::{PersistedState, STATE_VERSION};

/// How to construct a coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// This peer's identity.
    pub peer_id: PeerId,
    /// State file. `None` keeps everything in memory.
    pub state_path: Option<PathBuf>,
    /// Peers known at startup, in addition to any persisted ones.
    pub peers: Vec<PeerId>,
}

impl CoordinatorConfig {
    pub fn new(peer_id: impl Into<PeerId>) -> Self {
        Self {
            peer_id: peer_id.into(),
            state_path: None,
            peers: Vec::new(),
        }
    }

    pub fn state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = Some(path.into());
        self
    }

    pub fn peer(mut self, peer_id: impl Into<PeerId>) -> Self {
        self.peers.push(peer_id.into());
        self
    }
}

/// Result of [`WorkflowCoordinator::open`].
#[derive(Debug)]
pub struct Opened {
    pub coordinator: WorkflowCoordinator,
    /// Set when the state file failed verification and was set aside.
    pub corruption: Option<Error>,
    /// Where the untrusted file was moved.
    pub quarantined: Option<PathBuf>,
}

/// One task's owner, as decided by an assignment pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub workflow_id: WorkflowId,
    pub peer_id: PeerId,
    /// Whether this peer is the owner.
    pub local: bool,
}

/// A task that stayed pending, and why.
#[derive(Debug)]
pub struct Deferred {
    pub workflow_id: WorkflowId,
    pub reason: Error,
}

/// What an assignment pass did.
#[derive(Debug)]
pub struct AssignmentReport {
    /// The clock head every decision in this pass used.
    pub clock_head: Hash,
    /// In priority order.
    pub assigned: Vec<Assignment>,
    pub deferred: Vec<Deferred>,
}

/// What a poll did.
#[derive(Debug)]
pub struct PollReport {
    pub assignments: AssignmentReport,
    /// This peer's assigned tasks, waiting to be started.
    pub ready: Vec<WorkflowTask>,
}

struct State {
    clock: MerkleClock,
    queue: WorkflowPriorityQueue,
    peers: BTreeSet<PeerId>,
    workflows: BTreeMap<WorkflowId, WorkflowTask>,
    /// Non-terminal tasks by task hash, for idempotent submission.
    active: HashMap<Hash, WorkflowId>,
}

/// Decides who runs what for one peer. Construct one per peer identity.
pub struct WorkflowCoordinator {
    peer_id: PeerId,
    state_path: Option<PathBuf>,
    state: Mutex<State>,
}

impl std::fmt::Debug for WorkflowCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowCoordinator")
            .field("peer_id", &self.peer_id)
            .field("state_path", &self.state_path)
            .finish_non_exhaustive()
    }
}

impl WorkflowCoordinator {
    /// A fresh coordinator with a genesis clock. Knows itself as a peer.
    pub fn new(config: &CoordinatorConfig) -> Self {
        let mut peers: BTreeSet<PeerId> = config.peers.iter().cloned().collect();
        peers.insert(config.peer_id.clone());

        Self {
            peer_id: config.peer_id.clone(),
            state_path: config.state_path.clone(),
            state: Mutex::new(State {
                clock: MerkleClock::new(config.peer_id.clone()),
                queue: WorkflowPriorityQueue::new(),
                peers,
                workflows: BTreeMap::new(),
                active: HashMap::new(),
            }),
        }
    }

    /// Load from the configured state file. Fails on any verification error.
    pub fn load(config: &CoordinatorConfig) -> Result<Self> {
        let path = config
            .state_path
            .as_deref()
            .ok_or_else(|| Error::Config("no state path configured".to_string()))?;
        let persisted = persist::read_state(path)?;
        if persisted.peer_id != config.peer_id {
            return Err(Error::CorruptState(format!(
                "state file belongs to peer {}, not {}",
                persisted.peer_id, config.peer_id
            )));
        }
        let coordinator = Self::from_persisted(persisted, config)?;
        info!(
            peer = %coordinator.peer_id,
            path = %path.display(),
            "state loaded"
        );
        Ok(coordinator)
    }

    /// Startup entry point. A missing file yields a fresh coordinator; a file
    /// that fails verification is moved aside, a fresh coordinator is
    /// returned, and the error is reported in [`Opened::corruption`].
    pub fn open(config: &CoordinatorConfig) -> Result<Opened> {
        let fresh = |corruption, quarantined| Opened {
            coordinator: Self::new(config),
            corruption,
            quarantined,
        };

        let Some(path) = config.state_path.as_deref() else {
            return Ok(fresh(None, None));
        };
        if !path.exists() {
            metrics::state_loads().add(1, &[KeyValue::new("result", "fresh")]);
            debug!(path = %path.display(), "no state file, starting from genesis");
            return Ok(fresh(None, None));
        }

        match Self::load(config) {
            Ok(coordinator) => {
                metrics::state_loads().add(1, &[KeyValue::new("result", "ok")]);
                Ok(Opened {
                    coordinator,
                    corruption: None,
                    quarantined: None,
                })
            }
            Err(e @ Error::CorruptState(_)) => {
                metrics::state_loads().add(1, &[KeyValue::new("result", "corrupt")]);
                let moved = persist::quarantine(path)?;
                error!(
                    path = %path.display(),
                    quarantined = %moved.display(),
                    error = %e,
                    "state file failed verification, starting from genesis"
                );
                Ok(fresh(Some(e), Some(moved)))
            }
            Err(e) => Err(e),
        }
    }

    fn from_persisted(persisted: PersistedState, config: &CoordinatorConfig) -> Result<Self> {
        let clock = MerkleClock::from_snapshot(persisted.peer_id.clone(), persisted.merkle_clock)?;

        let mut peers: BTreeSet<PeerId> = persisted.peers.into_iter().collect();
        peers.extend(config.peers.iter().cloned());

        let mut queue = WorkflowPriorityQueue::new();
        let mut workflows = BTreeMap::new();
        let mut active = HashMap::new();

        for task in persisted.workflows {
            let id = &task.workflow_id;
            if workflows.contains_key(id) {
                return Err(Error::CorruptState(format!("duplicate workflow {id}")));
            }
            check_owner(&task)?;
            if task.status == WorkflowStatus::Pending {
                queue
                    .push(id.clone(), task.priority)
                    .map_err(|e| Error::CorruptState(format!("{id}: {e}")))?;
            }
            if !task.status.is_terminal() {
                if let Some(other) = active.insert(task.task_hash, id.clone()) {
                    return Err(Error::CorruptState(format!(
                        "workflows {other} and {id} are both active for task {}",
                        task.task_hash
                    )));
                }
            }
            workflows.insert(id.clone(), task);
        }

        Ok(Self {
            peer_id: persisted.peer_id,
            state_path: config.state_path.clone(),
            state: Mutex::new(State {
                clock,
                queue,
                peers,
                workflows,
                active,
            }),
        })
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn state_path(&self) -> Option<&Path> {
        self.state_path.as_deref()
    }

    // -- persistence --------------------------------------------------------

    /// Everything needed to rebuild this coordinator.
    pub fn to_persisted(&self) -> PersistedState {
        let state = self.state.lock();
        PersistedState {
            version: STATE_VERSION,
            peer_id: self.peer_id.clone(),
            merkle_clock: state.clock.snapshot(),
            peers: state.peers.iter().cloned().collect(),
            workflows: state.workflows.values().cloned().collect(),
        }
    }

    /// Write state to the configured path.
    pub fn save(&self) -> Result<()> {
        let path = self
            .state_path
            .as_deref()
            .ok_or_else(|| Error::Config("no state path configured".to_string()))?;
        self.save_to(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let start = Instant::now();
        persist::write_state(path, &self.to_persisted())?;
        metrics::operation_duration_ms().record(
            start.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "save")],
        );
        Ok(())
    }

    /// Final persist at shutdown. In-memory coordinators just drop.
    pub fn close(self) -> Result<()> {
        if self.state_path.is_some() {
            self.save()?;
        }
        info!(peer = %self.peer_id, "coordinator closed");
        Ok(())
    }

    // -- workflow lifecycle -------------------------------------------------

    /// Submit a parsed workflow. Resubmitting a record whose earlier task is
    /// not yet terminal returns that task's id instead of creating another.
    pub fn submit_workflow(&self, record: &WorkflowRecord, priority: f64) -> Result<WorkflowId> {
        if !priority.is_finite() {
            return Err(Error::InvalidPriority {
                requested: priority,
                current: None,
            });
        }
        let task_hash = Hash::of_json(record)?;

        let mut guard = self.state.lock();
        let state = &mut *guard;

        if let Some(existing) = state.active.get(&task_hash) {
            debug!(workflow_id = %existing, name = %record.name, "duplicate submission");
            metrics::workflow_submitted().add(1, &[KeyValue::new("result", "duplicate")]);
            return Ok(existing.clone());
        }

        let logical_clock = state.clock.append(task_hash.as_bytes().to_vec())?.logical_clock;
        let id = WorkflowId::new();
        state.queue.push(id.clone(), priority)?;

        state.workflows.insert(
            id.clone(),
            WorkflowTask {
                workflow_id: id.clone(),
                name: record.name.clone(),
                task_hash,
                priority,
                status: WorkflowStatus::Pending,
                assigned_peer: None,
                submitted_at: Utc::now(),
                result: None,
                error: None,
            },
        );
        state.active.insert(task_hash, id.clone());

        info!(
            workflow_id = %id,
            name = %record.name,
            priority,
            logical_clock,
            "workflow submitted"
        );
        metrics::workflow_submitted().add(1, &[KeyValue::new("result", "created")]);
        Ok(id)
    }

    /// Assign every pending task, most urgent first, using the current clock
    /// head and peer set. Tasks that cannot be assigned stay pending and are
    /// reported; they never stop the rest of the batch.
    pub fn assign_workflows(&self) -> AssignmentReport {
        let mut state = self.state.lock();
        self.assign_locked(&mut state)
    }

    fn assign_locked(&self, state: &mut State) -> AssignmentReport {
        let start = Instant::now();
        let clock_head = state.clock.head();
        let mut assigned = Vec::new();
        let mut deferred = Vec::new();
        let mut requeue = Vec::new();

        while let Some(id) = state.queue.pop_min() {
            let Some(task) = state.workflows.get_mut(&id) else {
                warn!(workflow_id = %id, "queued workflow missing from table");
                continue;
            };
            match assignment::assign(&clock_head, &task.task_hash, &state.peers) {
                Ok(owner) => {
                    let local = owner == self.peer_id;
                    task.assigned_peer = Some(owner.clone());
                    transition(&self.peer_id, task, WorkflowStatus::Assigned);
                    debug!(workflow_id = %id, owner = %owner, local, "workflow assigned");
                    metrics::workflow_assigned().add(1, &[KeyValue::new("local", local)]);
                    assigned.push(Assignment {
                        workflow_id: id,
                        peer_id: owner,
                        local,
                    });
                }
                Err(reason) => {
                    requeue.push((id.clone(), task.priority));
                    deferred.push(Deferred {
                        workflow_id: id,
                        reason,
                    });
                }
            }
        }

        for (id, priority) in requeue {
            if let Err(e) = state.queue.push(id.clone(), priority) {
                error!(workflow_id = %id, error = %e, "failed to requeue deferred workflow");
            }
        }

        if !deferred.is_empty() {
            warn!(
                count = deferred.len(),
                peers = state.peers.len(),
                "workflows left pending"
            );
            metrics::workflow_deferred().add(deferred.len() as u64, &[]);
        }
        info!(
            assigned = assigned.len(),
            deferred = deferred.len(),
            clock_head = %clock_head,
            "assignment pass"
        );
        metrics::operation_duration_ms().record(
            start.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "assign")],
        );

        AssignmentReport {
            clock_head,
            assigned,
            deferred,
        }
    }

    /// Move a task through its lifecycle. `result` is kept on completion;
    /// `error` is kept on failure or cancellation.
    pub fn update_workflow_status(
        &self,
        id: &WorkflowId,
        status: WorkflowStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<WorkflowTask> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let task = state
            .workflows
            .get_mut(id)
            .ok_or_else(|| Error::UnknownWorkflow(id.to_string()))?;
        let from = task.status;

        // Only an assignment pass may pick an owner.
        if status == WorkflowStatus::Assigned || !from.can_transition_to(status) {
            return Err(Error::InvalidTransition { from, to: status });
        }

        if from == WorkflowStatus::Pending {
            state.queue.remove(id)?;
        }
        match status {
            WorkflowStatus::Completed => task.result = result,
            WorkflowStatus::Failed | WorkflowStatus::Cancelled => task.error = error,
            _ => {}
        }
        transition(&self.peer_id, task, status);

        if status.is_terminal() && state.active.get(&task.task_hash) == Some(id) {
            state.active.remove(&task.task_hash);
        }

        info!(workflow_id = %id, %from, to = %status, "workflow status updated");
        Ok(task.clone())
    }

    /// Make a pending task more urgent.
    pub fn reprioritize_workflow(&self, id: &WorkflowId, new_priority: f64) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let task = state
            .workflows
            .get_mut(id)
            .ok_or_else(|| Error::UnknownWorkflow(id.to_string()))?;
        if task.status != WorkflowStatus::Pending {
            return Err(Error::NotPending {
                id: id.clone(),
                status: task.status,
            });
        }
        state.queue.reprioritize(id, new_priority)?;
        debug!(workflow_id = %id, from = task.priority, to = new_priority, "workflow reprioritized");
        task.priority = new_priority;
        Ok(())
    }

    /// Assign pending work, then hand back this peer's tasks that are waiting
    /// to start. Driven by an external scheduler.
    ///
    /// Both halves run under one lock, so `ready` reflects exactly the state
    /// the assignment pass left behind.
    pub fn poll(&self) -> PollReport {
        let mut state = self.state.lock();
        let assignments = self.assign_locked(&mut state);
        let ready = filtered(
            &state,
            &WorkflowFilter::default()
                .status(WorkflowStatus::Assigned)
                .peer(self.peer_id.clone()),
        );
        PollReport { assignments, ready }
    }

    // -- queries ------------------------------------------------------------

    pub fn get_workflow_status(&self, id: &WorkflowId) -> Result<WorkflowTask> {
        self.state
            .lock()
            .workflows
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownWorkflow(id.to_string()))
    }

    /// Matching tasks, oldest submission first.
    pub fn list_workflows(&self, filter: &WorkflowFilter) -> Vec<WorkflowTask> {
        filtered(&self.state.lock(), filter)
    }

    /// Every task this peer owns, whatever its status.
    pub fn get_my_workflows(&self) -> Vec<WorkflowTask> {
        self.list_workflows(&WorkflowFilter::default().peer(self.peer_id.clone()))
    }

    /// Pending ids with priorities, most urgent first.
    pub fn pending_queue(&self) -> Vec<(WorkflowId, f64)> {
        self.state.lock().queue.snapshot()
    }

    pub fn get_stats(&self) -> CoordinatorStats {
        let state = self.state.lock();

        let mut by_status: BTreeMap<WorkflowStatus, usize> =
            WorkflowStatus::ALL.into_iter().map(|s| (s, 0)).collect();
        let mut per_peer: BTreeMap<PeerId, usize> = BTreeMap::new();
        for task in state.workflows.values() {
            *by_status.entry(task.status).or_default() += 1;
            if let Some(peer) = &task.assigned_peer {
                *per_peer.entry(peer.clone()).or_default() += 1;
            }
        }

        CoordinatorStats {
            peer_id: self.peer_id.clone(),
            total: state.workflows.len(),
            by_status,
            per_peer,
            known_peers: state.peers.len(),
            logical_clock: state.clock.logical_clock(),
            clock_head: state.clock.head(),
        }
    }

    /// Peers ranked for a task against the current clock head, closest first.
    pub fn explain_assignment(&self, id: &WorkflowId) -> Result<Vec<(PeerId, u32)>> {
        let state = self.state.lock();
        let task = state
            .workflows
            .get(id)
            .ok_or_else(|| Error::UnknownWorkflow(id.to_string()))?;
        Ok(assignment::rank_peers(
            &state.clock.head(),
            &task.task_hash,
            &state.peers,
        ))
    }

    // -- peers --------------------------------------------------------------

    /// Returns whether the peer was new. Affects only future assignment passes.
    pub fn add_peer(&self, peer_id: impl Into<PeerId>) -> bool {
        let peer_id = peer_id.into();
        let added = self.state.lock().peers.insert(peer_id.clone());
        if added {
            info!(peer = %peer_id, "peer added");
        }
        added
    }

    /// Returns whether the peer was known. Existing assignments are kept.
    pub fn remove_peer(&self, peer_id: &PeerId) -> bool {
        let removed = self.state.lock().peers.remove(peer_id);
        if removed {
            info!(peer = %peer_id, "peer removed");
        }
        removed
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.state.lock().peers.iter().cloned().collect()
    }

    // -- clock --------------------------------------------------------------

    pub fn clock_head(&self) -> ClockHead {
        self.state.lock().clock.clock_head()
    }

    /// Fold in a remote peer's clock head; returns the new local head.
    ///
    /// A remote counter that cannot be advanced past is rejected with
    /// [`Error::ClockOverflow`] and leaves the local clock untouched.
    pub fn merge_clock(&self, remote: ClockHead) -> Result<ClockHead> {
        let mut state = self.state.lock();
        if let Err(e) = state.clock.merge(remote.logical_clock, remote.head) {
            warn!(
                remote = remote.logical_clock,
                remote_head = %remote.head,
                error = %e,
                "clock merge rejected"
            );
            metrics::clock_merges().add(1, &[KeyValue::new("result", "rejected")]);
            return Err(e);
        }
        metrics::clock_merges().add(1, &[KeyValue::new("result", "ok")]);
        Ok(state.clock.clock_head())
    }

    /// Re-verify the in-memory chain.
    pub fn verify_clock(&self) -> Result<()> {
        self.state.lock().clock.verify_chain()
    }
}

/// A persisted row's owner must agree with its status: pending tasks have
/// none yet, assigned and running tasks must have one.
fn check_owner(task: &WorkflowTask) -> Result<()> {
    let problem = match (task.status, &task.assigned_peer) {
        (WorkflowStatus::Pending, Some(peer)) => format!("is pending but assigned to {peer}"),
        (WorkflowStatus::Assigned | WorkflowStatus::InProgress, None) => {
            format!("is {} with no assigned peer", task.status)
        }
        _ => return Ok(()),
    };
    Err(Error::CorruptState(format!(
        "workflow {} {problem}",
        task.workflow_id
    )))
}

/// Matching tasks, oldest submission first.
fn filtered(state: &State, filter: &WorkflowFilter) -> Vec<WorkflowTask> {
    let mut tasks: Vec<WorkflowTask> = state
        .workflows
        .values()
        .filter(|task| filter.matches(task))
        .cloned()
        .collect();
    tasks.sort_by(|a, b| {
        a.submitted_at
            .cmp(&b.submitted_at)
            .then_with(|| a.workflow_id.cmp(&b.workflow_id))
    });
    tasks
}

/// Apply a status change and record it on the task's span.
fn transition(peer: &PeerId, task: &mut WorkflowTask, to: WorkflowStatus) {
    let from = task.status;
    let span = start_workflow_span(&task.workflow_id, peer);
    record_state_transition(&span, &from.to_string(), &to.to_string());
    metrics::workflow_state_transitions().add(
        1,
        &[
            KeyValue::new("from", from.to_string()),
            KeyValue::new("to", to.to_string()),
        ],
    );
    task.status = to;
}
