//! Error types for workmesh.

use thiserror::Error;

use crate::model::{WorkflowId, WorkflowStatus};

#[derive(Debug, Error)]
pub enum Error {
    #[error("workflow already queued: {0}")]
    DuplicateWorkflow(WorkflowId),

    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("invalid priority {requested} (current: {current:?})")]
    InvalidPriority {
        requested: f64,
        current: Option<f64>,
    },

    #[error("cannot raise priority of {id} from {current} to {requested}; remove and resubmit instead")]
    PriorityIncreaseUnsupported {
        id: WorkflowId,
        current: f64,
        requested: f64,
    },

    #[error("no peers available for assignment")]
    NoPeersAvailable,

    #[error("workflow {id} is {status}, not pending")]
    NotPending {
        id: WorkflowId,
        status: WorkflowStatus,
    },

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition {
        from: WorkflowStatus,
        to: WorkflowStatus,
    },

    #[error("logical clock cannot advance past {local} (remote: {remote:?})")]
    ClockOverflow { local: u64, remote: Option<u64> },

    #[error("corrupt state: {0}")]
    CorruptState(String),

    #[error("unsupported state file version {0}")]
    UnsupportedStateVersion(u32),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error needs operator attention rather than being scoped
    /// to a single workflow.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::CorruptState(_) | Error::UnsupportedStateVersion(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
