use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{ExecutionId, ExecutionTracker, RunnerEvent, TrackerPhase, WorkflowStatus};
use crate::config::SessionConfig;
use crate::ports::Runner;

/// Handle used to request cancellation of a running execution.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Requests cancellation. The inbox stops consuming events on its next poll.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

/// Receiving side of an [`AbortHandle`].
#[derive(Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once abort is requested. Never resolves if every handle is dropped first.
    async fn aborted(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

pub fn abort_pair() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (AbortHandle { tx }, AbortSignal { rx })
}

/// How an inbox run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxOutcome {
    Finished(WorkflowStatus),
    Cancelled,
    /// The stream could not be re-established; running blocks were marked skipped.
    Disconnected,
}

/// Serial consumer of one execution's event stream.
pub struct EventInbox<'r, R: Runner + ?Sized> {
    runner: &'r R,
    execution_id: ExecutionId,
    grace: Duration,
    max_reconnects: u32,
}

impl<'r, R: Runner + ?Sized> EventInbox<'r, R> {
    pub fn new(runner: &'r R, execution_id: ExecutionId) -> Self {
        let defaults = SessionConfig::default();
        Self {
            runner,
            execution_id,
            grace: defaults.disconnect_grace(),
            max_reconnects: defaults.max_reconnect_attempts,
        }
    }

    pub fn with_config(mut self, config: &SessionConfig) -> Self {
        self.grace = config.disconnect_grace();
        self.max_reconnects = config.max_reconnect_attempts;
        self
    }

    /// Apply events to `tracker` until the runner concludes, the user aborts or the stream
    /// is lost for good.
    pub async fn run(
        self,
        mut events: mpsc::Receiver<RunnerEvent>,
        tracker: &mut ExecutionTracker,
        mut abort: AbortSignal,
    ) -> InboxOutcome {
        // Reconnects since the last event that actually arrived.
        let mut failed_reconnects = 0_u32;
        loop {
            if abort.is_aborted() {
                return self.cancel(tracker).await;
            }
            tokio::select! {
                biased;
                _ = abort.aborted() => return self.cancel(tracker).await,
                next = events.recv() => match next {
                    Some(event) => {
                        failed_reconnects = 0;
                        tracker.apply(event);
                        if tracker.phase() == TrackerPhase::Finished {
                            return InboxOutcome::Finished(tracker.aggregate_status());
                        }
                    }
                    None => {
                        debug!(execution_id = %self.execution_id, "event stream closed");
                        match self.resubscribe(&mut failed_reconnects, &mut abort).await {
                            Resubscribe::Stream(rx) => events = rx,
                            Resubscribe::Aborted => return self.cancel(tracker).await,
                            Resubscribe::Lost => {
                                tracker.mark_disconnected();
                                return InboxOutcome::Disconnected;
                            }
                        }
                    }
                },
            }
        }
    }

    async fn resubscribe(&self, failed: &mut u32, abort: &mut AbortSignal) -> Resubscribe {
        while *failed < self.max_reconnects {
            *failed += 1;
            let attempt = *failed;
            tokio::select! {
                biased;
                _ = abort.aborted() => return Resubscribe::Aborted,
                result = timeout(self.grace, self.runner.subscribe(&self.execution_id)) => match result {
                    Ok(Ok(rx)) => {
                        info!(execution_id = %self.execution_id, attempt, "event stream re-established");
                        return Resubscribe::Stream(rx);
                    }
                    Ok(Err(e)) => warn!(execution_id = %self.execution_id, attempt, error = %e, "resubscribe failed"),
                    Err(_) => warn!(execution_id = %self.execution_id, attempt, "resubscribe timed out"),
                },
            }
        }
        Resubscribe::Lost
    }

    async fn cancel(&self, tracker: &mut ExecutionTracker) -> InboxOutcome {
        tracker.cancel();
        // Local state is already terminal; the runner ack is best-effort.
        match timeout(self.grace, self.runner.cancel(&self.execution_id)).await {
            Ok(Ok(())) => debug!(execution_id = %self.execution_id, "runner acknowledged cancel"),
            Ok(Err(e)) => warn!(execution_id = %self.execution_id, error = %e, "runner cancel failed"),
            Err(_) => warn!(execution_id = %self.execution_id, "runner cancel timed out"),
        }
        InboxOutcome::Cancelled
    }
}

enum Resubscribe {
    Stream(mpsc::Receiver<RunnerEvent>),
    Aborted,
    Lost,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::BlockStatus;
    use crate::graph::{BlockConfig, BlockId, MergeConfig, Position, Workflow};
    use crate::ports::ScriptedRunner;
    use serde_json::Value;

    fn fixture() -> (Workflow, BlockId, BlockId) {
        let mut wf = Workflow::new();
        let a = wf.add_block("a", BlockConfig::Merge(MergeConfig::default()), Position::default());
        let b = wf.add_block("b", BlockConfig::Merge(MergeConfig::default()), Position::default());
        (wf, a, b)
    }

    fn fast_config(attempts: u32) -> SessionConfig {
        SessionConfig::default()
            .with_disconnect_grace_ms(50)
            .with_max_reconnect_attempts(attempts)
    }

    async fn drive(runner: &ScriptedRunner, wf: &Workflow, attempts: u32) -> (InboxOutcome, ExecutionTracker) {
        let exec = runner.start(wf, Value::Null).await.unwrap();
        let mut tracker = ExecutionTracker::new();
        tracker.start(exec.clone(), wf);
        let events = runner.subscribe(&exec).await.unwrap();
        let (_handle, signal) = abort_pair();
        let outcome = EventInbox::new(runner, exec)
            .with_config(&fast_config(attempts))
            .run(events, &mut tracker, signal)
            .await;
        (outcome, tracker)
    }

    #[tokio::test]
    async fn runs_script_to_completion() {
        let (wf, a, b) = fixture();
        let runner = ScriptedRunner::new(vec![
            RunnerEvent::block(a, BlockStatus::Running),
            RunnerEvent::block(a, BlockStatus::Completed),
            RunnerEvent::block(b, BlockStatus::Running),
            RunnerEvent::block(b, BlockStatus::Completed),
            RunnerEvent::complete(),
        ]);
        let (outcome, tracker) = drive(&runner, &wf, 3).await;
        assert_eq!(outcome, InboxOutcome::Finished(WorkflowStatus::Completed));
        assert_eq!(tracker.phase(), TrackerPhase::Finished);
    }

    #[tokio::test]
    async fn reconnect_redelivery_is_idempotent() {
        let (wf, a, b) = fixture();
        let runner = ScriptedRunner::new(vec![
            RunnerEvent::block(a, BlockStatus::Running),
            RunnerEvent::block(a, BlockStatus::Completed),
            RunnerEvent::block(b, BlockStatus::Running),
            RunnerEvent::block(b, BlockStatus::Failed),
            RunnerEvent::complete(),
        ])
        .disconnect_after(2);
        let (outcome, tracker) = drive(&runner, &wf, 3).await;
        assert_eq!(outcome, InboxOutcome::Finished(WorkflowStatus::PartialFailure));
        assert_eq!(runner.subscriptions().await, 2);
        assert_eq!(tracker.block_state(a).unwrap().status, BlockStatus::Completed);
        assert_eq!(tracker.block_state(b).unwrap().status, BlockStatus::Failed);
    }

    #[tokio::test]
    async fn lost_stream_marks_running_blocks_skipped() {
        let (wf, a, _b) = fixture();
        let runner = ScriptedRunner::new(vec![
            RunnerEvent::block(a, BlockStatus::Running),
            RunnerEvent::block(a, BlockStatus::Completed),
        ])
        .disconnect_after(1)
        .max_subscriptions(1);
        let (outcome, tracker) = drive(&runner, &wf, 2).await;
        assert_eq!(outcome, InboxOutcome::Disconnected);
        assert_eq!(tracker.phase(), TrackerPhase::Disconnected);
        assert_eq!(tracker.block_state(a).unwrap().status, BlockStatus::Skipped);
    }

    #[tokio::test]
    async fn abort_stops_consumption_without_runner_ack() {
        let (wf, a, _b) = fixture();
        let runner = ScriptedRunner::new(vec![RunnerEvent::block(a, BlockStatus::Running)]).hold_open();
        let exec = runner.start(&wf, Value::Null).await.unwrap();
        let mut tracker = ExecutionTracker::new();
        tracker.start(exec.clone(), &wf);
        let events = runner.subscribe(&exec).await.unwrap();
        let (handle, signal) = abort_pair();

        let inbox = EventInbox::new(&runner, exec.clone()).with_config(&fast_config(3));
        let (outcome, ()) = tokio::join!(inbox.run(events, &mut tracker, signal), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.abort();
        });

        assert_eq!(outcome, InboxOutcome::Cancelled);
        assert_eq!(tracker.phase(), TrackerPhase::Cancelled);
        assert_eq!(tracker.block_state(a).unwrap().status, BlockStatus::Skipped);
        assert_eq!(runner.cancelled().await, vec![exec]);
    }

    #[tokio::test]
    async fn abort_before_start_cancels_immediately() {
        let (wf, _a, _b) = fixture();
        let runner = ScriptedRunner::new(Vec::new()).hold_open();
        let exec = runner.start(&wf, Value::Null).await.unwrap();
        let mut tracker = ExecutionTracker::new();
        tracker.start(exec.clone(), &wf);
        let events = runner.subscribe(&exec).await.unwrap();
        let (handle, signal) = abort_pair();
        handle.abort();
        let outcome = EventInbox::new(&runner, exec)
            .run(events, &mut tracker, signal)
            .await;
        assert_eq!(outcome, InboxOutcome::Cancelled);
    }
}
