//! # Execution state
//!
//! Per-block and per-workflow status as reported by the external runner. The runner streams
//! [`RunnerEvent`]s; [`ExecutionTracker`] folds them into [`BlockExecutionState`]s and
//! [`ForEachIterationState`]s, and [`EventInbox`] is the serial loop that feeds it.
//!
//! ## Block lifecycle
//!
//! `pending -> running -> completed | failed`, and any block not reached when the workflow
//! concludes becomes `skipped`. Terminal states never move again within one execution; a new
//! execution resets every block to `pending`.
//!
//! ## Aggregate status
//!
//! Derived from the block map on every event, see [`aggregate_status`].

mod inbox;
mod state_machine;
mod tracker;

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::graph::BlockId;

pub use inbox::{AbortHandle, AbortSignal, EventInbox, InboxOutcome, abort_pair};
pub use state_machine::{Transition, transition};
pub use tracker::{EventOutcome, ExecutionTracker, TrackerPhase};

/// Identifier assigned by the runner to one execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExecutionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl BlockStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BlockStatus::Completed | BlockStatus::Failed | BlockStatus::Skipped
        )
    }

    /// Reached = the runner got to the block (it is not pending and was not skipped).
    pub fn is_reached(self) -> bool {
        matches!(
            self,
            BlockStatus::Running | BlockStatus::Completed | BlockStatus::Failed
        )
    }
}

/// Workflow-level status, derived from block statuses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    PartialFailure,
}

/// Derive the workflow status from the block map:
///
/// - any block `running` ⇒ `running`;
/// - else any `failed` ⇒ `partial_failure` if some block `completed`, otherwise `failed`;
/// - else nothing completed (only pending/skipped blocks) ⇒ `pending`;
/// - else blocks still `pending` ⇒ `running` (the runner has not concluded);
/// - else ⇒ `completed`.
pub fn aggregate_status<'a>(statuses: impl IntoIterator<Item = &'a BlockStatus>) -> WorkflowStatus {
    let mut running = false;
    let mut failed = false;
    let mut completed = false;
    let mut pending = false;
    for status in statuses {
        match status {
            BlockStatus::Running => running = true,
            BlockStatus::Failed => failed = true,
            BlockStatus::Completed => completed = true,
            BlockStatus::Pending => pending = true,
            BlockStatus::Skipped => {}
        }
    }
    if running {
        WorkflowStatus::Running
    } else if failed {
        if completed {
            WorkflowStatus::PartialFailure
        } else {
            WorkflowStatus::Failed
        }
    } else if !completed {
        WorkflowStatus::Pending
    } else if pending {
        WorkflowStatus::Running
    } else {
        WorkflowStatus::Completed
    }
}

/// State of one block within one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockExecutionState {
    pub status: BlockStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Value>,
    /// Verbatim runner error; present only when `status` is `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl BlockExecutionState {
    pub fn pending() -> Self {
        Self::default()
    }
}

/// One pass of a for-each block over one item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationState {
    pub status: BlockStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Nested progress of a for-each block. `iterations.len() == total_items`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForEachIterationState {
    pub total_items: usize,
    /// Highest iteration index reported so far; never decreases within one execution.
    pub current_iteration: usize,
    pub iterations: Vec<IterationState>,
}

impl ForEachIterationState {
    pub fn completed_count(&self) -> usize {
        self.iterations
            .iter()
            .filter(|it| it.status == BlockStatus::Completed)
            .count()
    }
}

pub type BlockStates = HashMap<BlockId, BlockExecutionState>;
pub type IterationStates = HashMap<BlockId, ForEachIterationState>;

/// Status report for one block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockUpdate {
    pub block_id: BlockId,
    pub status: BlockStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl BlockUpdate {
    pub fn new(block_id: BlockId, status: BlockStatus) -> Self {
        Self {
            block_id,
            status,
            inputs: None,
            output: None,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_inputs(mut self, inputs: Value) -> Self {
        self.inputs = Some(inputs);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationReport {
    pub index: usize,
    pub status: BlockStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Progress of one item of a for-each block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationUpdate {
    pub block_id: BlockId,
    pub iteration: IterationReport,
    pub total_items: usize,
}

/// One message on the runner's event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerEvent {
    BlockUpdate(BlockUpdate),
    IterationUpdate(IterationUpdate),
    /// The runner has concluded; blocks still pending were never reached.
    ExecutionComplete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<WorkflowStatus>,
    },
}

impl RunnerEvent {
    pub fn block(block_id: BlockId, status: BlockStatus) -> Self {
        RunnerEvent::BlockUpdate(BlockUpdate::new(block_id, status))
    }

    pub fn iteration(
        block_id: BlockId,
        index: usize,
        status: BlockStatus,
        total_items: usize,
    ) -> Self {
        RunnerEvent::IterationUpdate(IterationUpdate {
            block_id,
            iteration: IterationReport {
                index,
                status,
                output: None,
                error: None,
            },
            total_items,
        })
    }

    pub fn complete() -> Self {
        RunnerEvent::ExecutionComplete { status: None }
    }

    pub fn block_id(&self) -> Option<BlockId> {
        match self {
            RunnerEvent::BlockUpdate(u) => Some(u.block_id),
            RunnerEvent::IterationUpdate(u) => Some(u.block_id),
            RunnerEvent::ExecutionComplete { .. } => None,
        }
    }
}

/// Stored per-block outcome of one execution, fetchable later by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub execution_id: ExecutionId,
    pub workflow_version: u32,
    pub status: WorkflowStatus,
    pub phase: TrackerPhase,
    #[serde(default)]
    pub block_states: BlockStates,
    #[serde(default)]
    pub iteration_states: IterationStates,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}
