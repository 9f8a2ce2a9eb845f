use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
    BlockExecutionState, BlockStates, BlockStatus, BlockUpdate, ExecutionId, ExecutionRecord,
    ForEachIterationState, IterationState, IterationStates, IterationUpdate, RunnerEvent,
    Transition, WorkflowStatus, aggregate_status, transition,
};
use crate::graph::{BlockId, Workflow};
use crate::template::OutputCache;

/// Where the tracker is in the life of the current execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerPhase {
    /// No execution started yet.
    #[default]
    Idle,
    Running,
    /// The runner reported completion.
    Finished,
    /// Stopped locally by the user.
    Cancelled,
    /// The event stream was lost; remaining running blocks are in an unknown state.
    Disconnected,
}

impl TrackerPhase {
    pub fn is_concluded(self) -> bool {
        matches!(
            self,
            TrackerPhase::Finished | TrackerPhase::Cancelled | TrackerPhase::Disconnected
        )
    }
}

/// What [`ExecutionTracker::apply`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Applied,
    /// Re-delivery of a status already held; state is unchanged apart from merged payloads.
    Duplicate,
    /// Transition not allowed by the block state machine.
    Rejected,
    /// No execution is accepting events.
    Ignored,
}

/// Folds runner events into per-block state. Single owner, events applied serially.
#[derive(Debug, Default)]
pub struct ExecutionTracker {
    execution_id: Option<ExecutionId>,
    workflow_version: u32,
    phase: TrackerPhase,
    block_states: BlockStates,
    iteration_states: IterationStates,
    /// Last known output per block; survives new executions so previews stay populated.
    output_cache: OutputCache,
    aggregate: WorkflowStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn execution_id(&self) -> Option<&ExecutionId> {
        self.execution_id.as_ref()
    }

    pub fn phase(&self) -> TrackerPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == TrackerPhase::Running
    }

    pub fn block_states(&self) -> &BlockStates {
        &self.block_states
    }

    pub fn block_state(&self, id: BlockId) -> Option<&BlockExecutionState> {
        self.block_states.get(&id)
    }

    pub fn iteration_states(&self) -> &IterationStates {
        &self.iteration_states
    }

    pub fn iteration_state(&self, id: BlockId) -> Option<&ForEachIterationState> {
        self.iteration_states.get(&id)
    }

    pub fn output_cache(&self) -> &OutputCache {
        &self.output_cache
    }

    /// Aggregate status as of the last accepted event.
    pub fn aggregate_status(&self) -> WorkflowStatus {
        self.aggregate
    }

    /// Begin a new execution: every block of `workflow` starts `pending`; previous block and
    /// iteration states are discarded (the output cache is kept).
    pub fn start(&mut self, execution_id: ExecutionId, workflow: &Workflow) {
        info!(execution_id = %execution_id, blocks = workflow.blocks().len(), "execution started");
        self.block_states = workflow
            .blocks()
            .iter()
            .map(|b| (b.id, BlockExecutionState::pending()))
            .collect();
        self.iteration_states.clear();
        self.execution_id = Some(execution_id);
        self.workflow_version = workflow.version();
        self.phase = TrackerPhase::Running;
        self.started_at = Some(Utc::now());
        self.completed_at = None;
        self.recompute();
    }

    /// Apply one runner event. Safe to call again with an event already applied.
    pub fn apply(&mut self, event: RunnerEvent) -> EventOutcome {
        if self.phase != TrackerPhase::Running {
            debug!(phase = ?self.phase, block_id = ?event.block_id(), "event ignored, no running execution");
            return EventOutcome::Ignored;
        }
        let outcome = match event {
            RunnerEvent::BlockUpdate(update) => self.apply_block_update(update),
            RunnerEvent::IterationUpdate(update) => self.apply_iteration_update(update),
            RunnerEvent::ExecutionComplete { status } => {
                self.finish(status);
                EventOutcome::Applied
            }
        };
        self.recompute();
        outcome
    }

    fn apply_block_update(&mut self, update: BlockUpdate) -> EventOutcome {
        let block_id = update.block_id;
        let state = self.block_states.entry(block_id).or_insert_with(|| {
            debug!(block_id = %block_id, "event for block not in starting graph");
            BlockExecutionState::pending()
        });
        let outcome = match transition(state.status, update.status) {
            Transition::Rejected => {
                warn!(block_id = %block_id, from = ?state.status, to = ?update.status, "invalid block transition rejected");
                return EventOutcome::Rejected;
            }
            Transition::Duplicate => EventOutcome::Duplicate,
            Transition::Applied => EventOutcome::Applied,
        };

        let status = update.status;
        state.status = status;
        if let Some(inputs) = update.inputs {
            state.inputs = Some(inputs);
        }
        if let Some(output) = update.output {
            state.outputs = Some(output);
        }
        match status {
            BlockStatus::Pending => {}
            BlockStatus::Running => {
                state.started_at = update.started_at.or(state.started_at).or_else(|| Some(Utc::now()));
                state.completed_at = None;
            }
            BlockStatus::Completed | BlockStatus::Failed | BlockStatus::Skipped => {
                state.started_at = update.started_at.or(state.started_at);
                state.completed_at = update
                    .completed_at
                    .or(state.completed_at)
                    .or_else(|| Some(Utc::now()));
            }
        }
        state.error = match status {
            BlockStatus::Failed => Some(
                update
                    .error
                    .or_else(|| state.error.take())
                    .unwrap_or_else(|| "block failed".to_string()),
            ),
            _ => None,
        };

        if status == BlockStatus::Completed
            && let Some(output) = &state.outputs
        {
            self.output_cache.insert(block_id, output.clone());
        }
        if outcome == EventOutcome::Applied {
            match status {
                BlockStatus::Failed => {
                    warn!(block_id = %block_id, error = ?state.error, "block failed")
                }
                _ => debug!(block_id = %block_id, status = ?status, "block status updated"),
            }
        }
        outcome
    }

    fn apply_iteration_update(&mut self, update: IterationUpdate) -> EventOutcome {
        let block_id = update.block_id;
        let loop_state = self.iteration_states.entry(block_id).or_default();
        // Totals only grow so iterations already reported are never dropped.
        if update.total_items > loop_state.total_items {
            loop_state.total_items = update.total_items;
            loop_state
                .iterations
                .resize_with(update.total_items, IterationState::default);
        }
        let report = update.iteration;
        let Some(item) = loop_state.iterations.get_mut(report.index) else {
            warn!(block_id = %block_id, index = report.index, total = loop_state.total_items, "iteration index out of range");
            return EventOutcome::Rejected;
        };
        let outcome = match transition(item.status, report.status) {
            Transition::Rejected => {
                warn!(block_id = %block_id, index = report.index, from = ?item.status, to = ?report.status, "invalid iteration transition rejected");
                return EventOutcome::Rejected;
            }
            Transition::Duplicate => EventOutcome::Duplicate,
            Transition::Applied => EventOutcome::Applied,
        };
        item.status = report.status;
        if let Some(output) = report.output {
            item.output = Some(output);
        }
        item.error = match report.status {
            BlockStatus::Failed => Some(
                report
                    .error
                    .or_else(|| item.error.take())
                    .unwrap_or_else(|| "iteration failed".to_string()),
            ),
            _ => None,
        };
        loop_state.current_iteration = loop_state.current_iteration.max(report.index);
        debug!(block_id = %block_id, index = report.index, status = ?report.status, "iteration updated");
        outcome
    }

    /// The runner concluded: blocks never reached become `skipped`.
    fn finish(&mut self, reported: Option<WorkflowStatus>) {
        let skipped = self.force_status(|s| s == BlockStatus::Pending, BlockStatus::Skipped);
        self.phase = TrackerPhase::Finished;
        self.completed_at = Some(Utc::now());
        self.recompute();
        info!(
            execution_id = ?self.execution_id,
            status = ?self.aggregate,
            reported = ?reported,
            skipped,
            "execution finished"
        );
        if let Some(reported) = reported
            && reported != self.aggregate
        {
            warn!(reported = ?reported, derived = ?self.aggregate, "runner status differs from derived status");
        }
    }

    /// Stop consuming events; running and pending blocks become `skipped` immediately.
    /// Returns the number of blocks forced.
    pub fn cancel(&mut self) -> usize {
        if self.phase != TrackerPhase::Running {
            return 0;
        }
        let forced = self.force_status(
            |s| matches!(s, BlockStatus::Running | BlockStatus::Pending),
            BlockStatus::Skipped,
        );
        self.phase = TrackerPhase::Cancelled;
        self.completed_at = Some(Utc::now());
        self.recompute();
        info!(execution_id = ?self.execution_id, forced, "execution cancelled");
        forced
    }

    /// The event stream could not be recovered: still-running and pending blocks become
    /// `skipped` and the phase records that their real outcome is unknown.
    pub fn mark_disconnected(&mut self) -> usize {
        if self.phase != TrackerPhase::Running {
            return 0;
        }
        let forced = self.force_status(
            |s| matches!(s, BlockStatus::Running | BlockStatus::Pending),
            BlockStatus::Skipped,
        );
        self.phase = TrackerPhase::Disconnected;
        self.completed_at = Some(Utc::now());
        self.recompute();
        warn!(execution_id = ?self.execution_id, forced, "execution stream lost");
        forced
    }

    fn force_status(&mut self, pred: impl Fn(BlockStatus) -> bool, to: BlockStatus) -> usize {
        let now = Utc::now();
        let mut n = 0;
        for state in self.block_states.values_mut() {
            if pred(state.status) {
                state.status = to;
                state.error = None;
                state.completed_at = Some(now);
                n += 1;
            }
        }
        n
    }

    fn recompute(&mut self) {
        self.aggregate = aggregate_status(self.block_states.values().map(|s| &s.status));
    }

    /// Frozen copy of the current execution for persistence.
    pub fn record(&self) -> Option<ExecutionRecord> {
        let execution_id = self.execution_id.clone()?;
        Some(ExecutionRecord {
            execution_id,
            workflow_version: self.workflow_version,
            status: self.aggregate,
            phase: self.phase,
            block_states: self.block_states.clone(),
            iteration_states: self.iteration_states.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}
