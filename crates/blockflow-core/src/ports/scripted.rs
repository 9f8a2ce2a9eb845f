use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info};

use super::Runner;
use crate::error::RunnerError;
use crate::execution::{ExecutionId, RunnerEvent};
use crate::graph::Workflow;

/// Replays a fixed event script for every execution. Used by the CLI demo and tests.
///
/// Every subscription redelivers the script from the start, like a transport that replays
/// after a reconnect.
#[derive(Debug)]
pub struct ScriptedRunner {
    script: Vec<RunnerEvent>,
    /// First subscription closes after this many events.
    disconnect_after: Option<usize>,
    /// Subscriptions beyond this count fail.
    max_subscriptions: Option<usize>,
    /// Keep streams open after the script is delivered.
    hold_open: bool,
    state: Mutex<ScriptState>,
}

#[derive(Debug, Default)]
struct ScriptState {
    started: Vec<ExecutionId>,
    cancelled: Vec<ExecutionId>,
    subscriptions: usize,
    open: Vec<mpsc::Sender<RunnerEvent>>,
}

impl ScriptedRunner {
    pub fn new(script: Vec<RunnerEvent>) -> Self {
        Self {
            script,
            disconnect_after: None,
            max_subscriptions: None,
            hold_open: false,
            state: Mutex::new(ScriptState::default()),
        }
    }

    pub fn disconnect_after(mut self, events: usize) -> Self {
        self.disconnect_after = Some(events);
        self
    }

    pub fn max_subscriptions(mut self, count: usize) -> Self {
        self.max_subscriptions = Some(count);
        self
    }

    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    pub async fn cancelled(&self) -> Vec<ExecutionId> {
        self.state.lock().await.cancelled.clone()
    }

    pub async fn subscriptions(&self) -> usize {
        self.state.lock().await.subscriptions
    }
}

#[async_trait]
impl Runner for ScriptedRunner {
    async fn start(&self, workflow: &Workflow, _input: Value) -> Result<ExecutionId, RunnerError> {
        let mut state = self.state.lock().await;
        let execution_id = ExecutionId::new(format!("scripted-{}", state.started.len() + 1));
        info!(execution_id = %execution_id, blocks = workflow.blocks().len(), "scripted execution started");
        state.started.push(execution_id.clone());
        Ok(execution_id)
    }

    async fn subscribe(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<mpsc::Receiver<RunnerEvent>, RunnerError> {
        let mut state = self.state.lock().await;
        if !state.started.contains(execution_id) {
            return Err(RunnerError::UnknownExecution(execution_id.to_string()));
        }
        if self
            .max_subscriptions
            .is_some_and(|max| state.subscriptions >= max)
        {
            return Err(RunnerError::Subscribe {
                execution_id: execution_id.to_string(),
                message: "stream unavailable".into(),
            });
        }
        state.subscriptions += 1;
        let first = state.subscriptions == 1;

        let take = match self.disconnect_after {
            Some(n) if first => n.min(self.script.len()),
            _ => self.script.len(),
        };
        let (tx, rx) = mpsc::channel(take.max(1));
        for event in self.script.iter().take(take) {
            if tx.try_send(event.clone()).is_err() {
                break;
            }
        }
        let truncated = take < self.script.len();
        if self.hold_open && !truncated {
            state.open.push(tx);
        }
        debug!(execution_id = %execution_id, delivered = take, truncated, "scripted stream opened");
        Ok(rx)
    }

    async fn cancel(&self, execution_id: &ExecutionId) -> Result<(), RunnerError> {
        let mut state = self.state.lock().await;
        if !state.started.contains(execution_id) {
            return Err(RunnerError::Cancel {
                execution_id: execution_id.to_string(),
                message: "not started".into(),
            });
        }
        state.open.clear();
        state.cancelled.push(execution_id.clone());
        Ok(())
    }
}
