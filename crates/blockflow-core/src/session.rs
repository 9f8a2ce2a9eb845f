//! One editing session over one agent's workflow: owns the graph, its history, the live
//! execution tracker and the viewer switch, and routes every mutation through one place.

use serde_json::Value;
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::error::{GraphError, SessionError};
use crate::execution::{AbortSignal, EventInbox, ExecutionId, ExecutionTracker, InboxOutcome};
use crate::graph::{
    Block, BlockConfig, BlockId, Connection, ConnectionId, Position, Variable, Workflow,
};
use crate::history::{HistoryManager, WorkflowVersion};
use crate::ports::{MissingTool, Runner, ToolRegistry, WorkflowStore, unsatisfied_tools};
use crate::template::{OutputCache, ResolvedToken, TemplateResolver, TemplateWarning, validate_references};
use crate::viewer::{ExecutionView, ExecutionViewer, ViewSource};

pub struct EditorSession {
    agent_id: String,
    workflow: Workflow,
    history: HistoryManager,
    tracker: ExecutionTracker,
    viewer: ExecutionViewer,
    config: SessionConfig,
    /// Graph as it was before the current drag started.
    drag_origin: Option<Workflow>,
}

impl EditorSession {
    pub fn new(agent_id: impl Into<String>, workflow: Workflow, config: SessionConfig) -> Self {
        Self {
            agent_id: agent_id.into(),
            history: HistoryManager::new(config.history_limit),
            workflow,
            tracker: ExecutionTracker::new(),
            viewer: ExecutionViewer::new(),
            config,
            drag_origin: None,
        }
    }

    /// Load the agent's saved workflow and version list.
    pub fn open(
        store: &dyn WorkflowStore,
        agent_id: &str,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let workflow = store.load_workflow(agent_id)?;
        let mut session = Self::new(agent_id, workflow, config);
        session.history.load_versions(store.list_versions(agent_id)?);
        info!(agent_id, version = session.workflow.version(), "session opened");
        Ok(session)
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn tracker(&self) -> &ExecutionTracker {
        &self.tracker
    }

    pub fn viewer(&self) -> &ExecutionViewer {
        &self.viewer
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn ensure_editable(&self) -> Result<(), SessionError> {
        if self.viewer.is_read_only() {
            return Err(SessionError::ReadOnly);
        }
        Ok(())
    }

    /// Apply a structural edit; the pre-edit graph is committed only if the edit changed it.
    fn edit<T>(
        &mut self,
        op: impl FnOnce(&mut Workflow) -> Result<T, GraphError>,
    ) -> Result<T, SessionError> {
        self.ensure_editable()?;
        self.end_drag();
        let before = self.workflow.clone();
        let out = op(&mut self.workflow)?;
        if self.workflow != before {
            self.history.commit(&before);
        }
        Ok(out)
    }

    pub fn add_block(
        &mut self,
        name: &str,
        config: BlockConfig,
        position: Position,
    ) -> Result<BlockId, SessionError> {
        self.edit(|wf| Ok(wf.add_block(name, config, position)))
    }

    pub fn remove_block(&mut self, id: BlockId) -> Result<Option<Block>, SessionError> {
        self.edit(|wf| Ok(wf.remove_block(id)))
    }

    pub fn rename_block(&mut self, id: BlockId, name: &str) -> Result<String, SessionError> {
        self.edit(|wf| wf.rename_block(id, name))
    }

    pub fn set_description(&mut self, id: BlockId, description: &str) -> Result<(), SessionError> {
        self.edit(|wf| wf.set_description(id, description))
    }

    pub fn update_config(&mut self, id: BlockId, config: BlockConfig) -> Result<(), SessionError> {
        self.edit(|wf| wf.update_config(id, config))
    }

    pub fn set_timeout(&mut self, id: BlockId, seconds: Option<u32>) -> Result<(), SessionError> {
        self.edit(|wf| wf.set_timeout(id, seconds))
    }

    pub fn connect(&mut self, source: BlockId, target: BlockId) -> Result<ConnectionId, SessionError> {
        self.edit(|wf| wf.connect(source, target))
    }

    pub fn connect_ports(
        &mut self,
        source: BlockId,
        source_output: &str,
        target: BlockId,
        target_input: &str,
    ) -> Result<ConnectionId, SessionError> {
        self.edit(|wf| wf.connect_ports(source, source_output, target, target_input))
    }

    pub fn remove_connection(&mut self, id: ConnectionId) -> Result<Option<Connection>, SessionError> {
        self.edit(|wf| Ok(wf.remove_connection(id)))
    }

    pub fn set_variable(&mut self, variable: Variable) -> Result<(), SessionError> {
        self.edit(|wf| {
            wf.set_variable(variable);
            Ok(())
        })
    }

    pub fn remove_variable(&mut self, name: &str) -> Result<Option<Variable>, SessionError> {
        self.edit(|wf| Ok(wf.remove_variable(name)))
    }

    /// Position updates during a drag. The whole drag becomes one undo step, committed by
    /// [`end_drag`](Self::end_drag) or by the next structural edit.
    pub fn move_block(&mut self, id: BlockId, position: Position) -> Result<(), SessionError> {
        self.ensure_editable()?;
        if self.drag_origin.is_none() {
            self.drag_origin = Some(self.workflow.clone());
        }
        self.workflow.move_block(id, position)?;
        Ok(())
    }

    pub fn end_drag(&mut self) {
        if let Some(origin) = self.drag_origin.take()
            && origin != self.workflow
        {
            self.history.commit(&origin);
        }
    }

    pub fn undo(&mut self) -> Result<bool, SessionError> {
        self.ensure_editable()?;
        self.end_drag();
        Ok(self.history.undo(&mut self.workflow))
    }

    pub fn redo(&mut self) -> Result<bool, SessionError> {
        self.ensure_editable()?;
        self.end_drag();
        Ok(self.history.redo(&mut self.workflow))
    }

    /// Persist the graph. A description marks an explicit save: the version is bumped and a
    /// named snapshot recorded. Returns the stored version.
    pub fn save(
        &mut self,
        store: &dyn WorkflowStore,
        description: Option<&str>,
    ) -> Result<u32, SessionError> {
        self.end_drag();
        if let Some(description) = description {
            self.history.snapshot_version(&mut self.workflow, description);
        }
        let version = store.save_workflow(&self.agent_id, &self.workflow, description)?;
        info!(agent_id = %self.agent_id, version, "workflow saved");
        Ok(version)
    }

    pub fn versions(&self) -> &[WorkflowVersion] {
        self.history.versions()
    }

    pub fn restore_version(&mut self, version: u32) -> Result<bool, SessionError> {
        self.ensure_editable()?;
        self.end_drag();
        Ok(self.history.restore(version, &mut self.workflow))
    }

    /// Show a stored execution instead of live state. Editing is refused until
    /// [`show_live`](Self::show_live).
    pub fn open_historical(
        &mut self,
        store: &dyn WorkflowStore,
        execution_id: &ExecutionId,
    ) -> Result<(), SessionError> {
        let record = store.get_execution(execution_id)?;
        self.end_drag();
        self.viewer.show_historical(record);
        Ok(())
    }

    pub fn show_live(&mut self) {
        self.viewer.show_live();
    }

    pub fn view(&self) -> ExecutionView<'_> {
        self.viewer.view(&self.tracker)
    }

    /// Resolve template tokens against whichever execution state is being viewed.
    pub fn resolve(&self, text: &str) -> Vec<ResolvedToken> {
        let empty = OutputCache::new();
        self.resolver(&empty).resolve(text)
    }

    pub fn preview(&self, text: &str) -> String {
        let empty = OutputCache::new();
        self.resolver(&empty).render_preview(text)
    }

    fn resolver<'a>(&'a self, empty: &'a OutputCache) -> TemplateResolver<'a> {
        let view = self.view();
        let outputs = match view.source {
            ViewSource::Live => self.tracker.output_cache(),
            ViewSource::Historical => empty,
        };
        TemplateResolver::new(&self.workflow, outputs)
            .with_block_states(view.block_states)
            .with_preview_max_chars(self.config.preview_max_chars)
    }

    pub fn validate(&self) -> Vec<TemplateWarning> {
        validate_references(&self.workflow)
    }

    pub fn missing_tools(&self, registry: &dyn ToolRegistry) -> Vec<MissingTool> {
        unsatisfied_tools(&self.workflow, registry)
    }

    /// Start an execution and consume its events until it concludes. The finished
    /// execution is recorded in `store` when one is given.
    pub async fn run<R: Runner + ?Sized>(
        &mut self,
        runner: &R,
        input: Value,
        store: Option<&dyn WorkflowStore>,
        abort: AbortSignal,
    ) -> Result<InboxOutcome, SessionError> {
        if self.tracker.is_running()
            && let Some(id) = self.tracker.execution_id()
        {
            return Err(SessionError::ExecutionInProgress(id.to_string()));
        }
        self.end_drag();
        self.viewer.show_live();

        let execution_id = runner.start(&self.workflow, input).await?;
        self.tracker.start(execution_id.clone(), &self.workflow);
        let events = match runner.subscribe(&execution_id).await {
            Ok(events) => events,
            Err(e) => {
                self.tracker.mark_disconnected();
                return Err(e.into());
            }
        };
        let outcome = EventInbox::new(runner, execution_id)
            .with_config(&self.config)
            .run(events, &mut self.tracker, abort)
            .await;

        if let Some(store) = store {
            match self.tracker.record() {
                Some(record) => store.record_execution(&self.agent_id, &record)?,
                None => warn!("no execution record to store"),
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{MergeConfig, VariableType};

    fn merge() -> BlockConfig {
        BlockConfig::Merge(MergeConfig::default())
    }

    fn session() -> EditorSession {
        EditorSession::new("agent", Workflow::new(), SessionConfig::default())
    }

    #[test]
    fn failed_or_noop_edits_leave_no_history() {
        let mut s = session();
        let a = s.add_block("a", merge(), Position::default()).unwrap();
        let b = s.add_block("b", merge(), Position::default()).unwrap();
        s.connect(a, b).unwrap();
        assert_eq!(s.history().undo_depth(), 3);

        s.connect(a, b).unwrap();
        assert!(s.rename_block(BlockId::new(), "x").is_err());
        assert_eq!(s.history().undo_depth(), 3);
    }

    #[test]
    fn drag_is_one_undo_step() {
        let mut s = session();
        let a = s.add_block("a", merge(), Position::default()).unwrap();
        for x in 1..=5 {
            s.move_block(a, Position::new(f64::from(x), 0.0)).unwrap();
        }
        s.end_drag();
        assert_eq!(s.history().undo_depth(), 2);
        s.undo().unwrap();
        assert_eq!(s.workflow().block(a).unwrap().position, Position::default());
    }

    #[test]
    fn variables_are_undoable() {
        let mut s = session();
        s.set_variable(Variable {
            name: "topic".into(),
            var_type: VariableType::String,
            default_value: None,
        })
        .unwrap();
        assert_eq!(s.workflow().variables().len(), 1);
        assert!(s.undo().unwrap());
        assert!(s.workflow().variables().is_empty());
    }
}
