use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::WorkflowStore;
use crate::error::StoreError;
use crate::execution::{ExecutionId, ExecutionRecord};
use crate::graph::Workflow;
use crate::history::WorkflowVersion;

#[derive(Debug, Default)]
struct Agent {
    workflow: Option<Workflow>,
    versions: Vec<WorkflowVersion>,
}

/// Process-local store; contents are lost on drop.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    agents: Mutex<HashMap<String, Agent>>,
    executions: Mutex<HashMap<ExecutionId, ExecutionRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn agents(&self) -> MutexGuard<'_, HashMap<String, Agent>> {
        self.agents.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn executions(&self) -> MutexGuard<'_, HashMap<ExecutionId, ExecutionRecord>> {
        self.executions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl WorkflowStore for InMemoryStore {
    fn save_workflow(
        &self,
        agent_id: &str,
        workflow: &Workflow,
        description: Option<&str>,
    ) -> Result<u32, StoreError> {
        let mut agents = self.agents();
        let agent = agents.entry(agent_id.to_string()).or_default();
        agent.workflow = Some(workflow.clone());
        if let Some(description) = description {
            upsert_version(&mut agent.versions, WorkflowVersion::capture(workflow, description));
        }
        Ok(workflow.version())
    }

    fn load_workflow(&self, agent_id: &str) -> Result<Workflow, StoreError> {
        self.agents()
            .get(agent_id)
            .and_then(|a| a.workflow.clone())
            .ok_or_else(|| StoreError::NotFound(format!("workflow for agent {agent_id}")))
    }

    fn list_versions(&self, agent_id: &str) -> Result<Vec<WorkflowVersion>, StoreError> {
        Ok(self
            .agents()
            .get(agent_id)
            .map(|a| a.versions.clone())
            .unwrap_or_default())
    }

    fn get_execution(&self, execution_id: &ExecutionId) -> Result<ExecutionRecord, StoreError> {
        self.executions()
            .get(execution_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("execution {execution_id}")))
    }

    fn record_execution(&self, _agent_id: &str, record: &ExecutionRecord) -> Result<(), StoreError> {
        self.executions()
            .insert(record.execution_id.clone(), record.clone());
        Ok(())
    }
}

/// Insert keeping version order; an existing entry for the same version is replaced.
pub(super) fn upsert_version(versions: &mut Vec<WorkflowVersion>, entry: WorkflowVersion) {
    match versions.binary_search_by_key(&entry.version, |v| v.version) {
        Ok(idx) => versions[idx] = entry,
        Err(idx) => versions.insert(idx, entry),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{TrackerPhase, WorkflowStatus};

    #[test]
    fn save_and_load_roundtrip() {
        let store = InMemoryStore::new();
        let wf = Workflow::new();
        assert!(matches!(store.load_workflow("agent"), Err(StoreError::NotFound(_))));
        store.save_workflow("agent", &wf, None).unwrap();
        assert_eq!(store.load_workflow("agent").unwrap(), wf);
        assert!(store.list_versions("agent").unwrap().is_empty());
    }

    #[test]
    fn versions_are_ordered_and_replaced_by_number() {
        let store = InMemoryStore::new();
        let mut wf = Workflow::new();
        wf.set_version(2);
        store.save_workflow("agent", &wf, Some("two")).unwrap();
        wf.set_version(1);
        store.save_workflow("agent", &wf, Some("one")).unwrap();
        store.save_workflow("agent", &wf, Some("one again")).unwrap();
        let versions = store.list_versions("agent").unwrap();
        let listed: Vec<(u32, &str)> = versions
            .iter()
            .map(|v| (v.version, v.description.as_str()))
            .collect();
        assert_eq!(listed, vec![(1, "one again"), (2, "two")]);
    }

    #[test]
    fn executions_are_fetchable_by_id() {
        let store = InMemoryStore::new();
        let record = ExecutionRecord {
            execution_id: ExecutionId::new("exec-9"),
            workflow_version: 1,
            status: WorkflowStatus::Completed,
            phase: TrackerPhase::Finished,
            block_states: Default::default(),
            iteration_states: Default::default(),
            started_at: None,
            completed_at: None,
        };
        store.record_execution("agent", &record).unwrap();
        assert_eq!(store.get_execution(&ExecutionId::new("exec-9")).unwrap(), record);
        assert!(store.get_execution(&ExecutionId::new("nope")).is_err());
    }
}
