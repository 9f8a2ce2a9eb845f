//! Error types. Only programmer-error-class and collaborator failures surface as `Err`;
//! recoverable conditions (name collisions, unresolved tokens, failed blocks, lost streams,
//! empty undo stacks) are represented in state instead.

use thiserror::Error;

use crate::graph::{BlockId, ConnectionId};

/// Graph edit that references something that does not exist.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("unknown block: {0}")]
    UnknownBlock(BlockId),
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),
}

/// Persistence collaborator failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Runner collaborator failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunnerError {
    #[error("failed to start execution: {0}")]
    Start(String),
    #[error("failed to subscribe to execution {execution_id}: {message}")]
    Subscribe {
        execution_id: String,
        message: String,
    },
    #[error("failed to cancel execution {execution_id}: {message}")]
    Cancel {
        execution_id: String,
        message: String,
    },
    #[error("unknown execution: {0}")]
    UnknownExecution(String),
}

/// Errors returned by [`EditorSession`](crate::session::EditorSession).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("workflow is read-only while a historical execution is shown")]
    ReadOnly,
    #[error("an execution is already in progress: {0}")]
    ExecutionInProgress(String),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Runner(#[from] RunnerError),
}
