//! Picks which execution state the rendering layer reads: the live tracker or a stored
//! historical record. Switching never touches the graph, the tracker or history.

use std::collections::HashMap;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::execution::{
    BlockExecutionState, BlockStates, ExecutionId, ExecutionRecord, ExecutionTracker,
    ForEachIterationState, IterationStates, WorkflowStatus,
};
use crate::graph::BlockId;

#[derive(Debug, Clone, Default, PartialEq)]
pub enum ViewMode {
    #[default]
    Live,
    Historical(Box<ExecutionRecord>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewSource {
    Live,
    Historical,
}

/// Borrowed, source-agnostic view of execution state.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionView<'a> {
    pub source: ViewSource,
    pub execution_id: Option<&'a ExecutionId>,
    pub status: WorkflowStatus,
    pub block_states: &'a BlockStates,
    pub iteration_states: &'a IterationStates,
}

impl<'a> ExecutionView<'a> {
    pub fn block(&self, id: BlockId) -> Option<&'a BlockExecutionState> {
        self.block_states.get(&id)
    }

    pub fn iterations(&self, id: BlockId) -> Option<&'a ForEachIterationState> {
        self.iteration_states.get(&id)
    }
}

#[derive(Debug, Default)]
pub struct ExecutionViewer {
    mode: ViewMode,
}

impl ExecutionViewer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> &ViewMode {
        &self.mode
    }

    pub fn show_live(&mut self) {
        if matches!(self.mode, ViewMode::Historical(_)) {
            debug!("viewer switched to live");
        }
        self.mode = ViewMode::Live;
    }

    pub fn show_historical(&mut self, record: ExecutionRecord) {
        debug!(execution_id = %record.execution_id, "viewer switched to historical");
        self.mode = ViewMode::Historical(Box::new(record));
    }

    /// Historical state is a frozen picture; callers disable editing while it is shown.
    pub fn is_read_only(&self) -> bool {
        matches!(self.mode, ViewMode::Historical(_))
    }

    pub fn view<'a>(&'a self, live: &'a ExecutionTracker) -> ExecutionView<'a> {
        match &self.mode {
            ViewMode::Live => ExecutionView {
                source: ViewSource::Live,
                execution_id: live.execution_id(),
                status: live.aggregate_status(),
                block_states: live.block_states(),
                iteration_states: live.iteration_states(),
            },
            ViewMode::Historical(record) => ExecutionView {
                source: ViewSource::Historical,
                execution_id: Some(&record.execution_id),
                status: record.status,
                block_states: &record.block_states,
                iteration_states: &record.iteration_states,
            },
        }
    }
}

/// Identifies one in-flight poll request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTicket<K> {
    pub key: K,
    pub issued_at: DateTime<Utc>,
    seq: u64,
}

/// Discards poll responses that were overtaken by a newer request for the same key.
#[derive(Debug)]
pub struct StaleResponseFilter<K> {
    next_seq: u64,
    latest: HashMap<K, u64>,
}

impl<K> Default for StaleResponseFilter<K> {
    fn default() -> Self {
        Self {
            next_seq: 0,
            latest: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> StaleResponseFilter<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, key: K) -> RequestTicket<K> {
        self.next_seq += 1;
        RequestTicket {
            key,
            issued_at: Utc::now(),
            seq: self.next_seq,
        }
    }

    /// True when the response for `ticket` should be applied. Accepting a response makes
    /// every older ticket for the same key stale.
    pub fn accept(&mut self, ticket: &RequestTicket<K>) -> bool {
        match self.latest.get(&ticket.key) {
            Some(&seen) if seen > ticket.seq => {
                debug!(seq = ticket.seq, newest = seen, "stale poll response dropped");
                false
            }
            _ => {
                self.latest.insert(ticket.key.clone(), ticket.seq);
                true
            }
        }
    }
}
