use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::WorkflowStore;
use super::memory::upsert_version;
use crate::error::StoreError;
use crate::execution::{ExecutionId, ExecutionRecord};
use crate::graph::Workflow;
use crate::history::WorkflowVersion;

const WORKFLOW_FILE: &str = "workflow.json";
const VERSIONS_FILE: &str = "versions.json";
const EXECUTIONS_DIR: &str = "executions";

/// Directory-backed store:
///
/// ```text
/// <root>/agents/<agent>/workflow.json
/// <root>/agents/<agent>/versions.json
/// <root>/agents/<agent>/executions/<execution>.json
/// ```
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn agents_dir(&self) -> PathBuf {
        self.root.join("agents")
    }

    fn agent_dir(&self, agent_id: &str) -> PathBuf {
        self.agents_dir().join(sanitize(agent_id))
    }
}

/// Map an identifier onto a single safe path component.
fn sanitize(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(StoreError::NotFound(path.display().to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_str(&raw)?)
}

/// Write through a sibling temp file so readers never see a partial document.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    fs::rename(&tmp, path)?;
    debug!(path = %path.display(), "wrote json");
    Ok(())
}

impl WorkflowStore for JsonFileStore {
    fn save_workflow(
        &self,
        agent_id: &str,
        workflow: &Workflow,
        description: Option<&str>,
    ) -> Result<u32, StoreError> {
        let dir = self.agent_dir(agent_id);
        write_json(&dir.join(WORKFLOW_FILE), workflow)?;
        if let Some(description) = description {
            let mut versions = self.list_versions(agent_id)?;
            upsert_version(&mut versions, WorkflowVersion::capture(workflow, description));
            write_json(&dir.join(VERSIONS_FILE), &versions)?;
        }
        Ok(workflow.version())
    }

    fn load_workflow(&self, agent_id: &str) -> Result<Workflow, StoreError> {
        let mut workflow: Workflow = read_json(&self.agent_dir(agent_id).join(WORKFLOW_FILE))?;
        workflow.repair();
        Ok(workflow)
    }

    fn list_versions(&self, agent_id: &str) -> Result<Vec<WorkflowVersion>, StoreError> {
        match read_json::<Vec<WorkflowVersion>>(&self.agent_dir(agent_id).join(VERSIONS_FILE)) {
            Ok(mut versions) => {
                versions.sort_by_key(|v| v.version);
                Ok(versions)
            }
            Err(StoreError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn get_execution(&self, execution_id: &ExecutionId) -> Result<ExecutionRecord, StoreError> {
        let file_name = format!("{}.json", sanitize(execution_id.as_str()));
        let agents = match fs::read_dir(self.agents_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(format!("execution {execution_id}")));
            }
            Err(e) => return Err(e.into()),
        };
        for entry in agents {
            let candidate = entry?.path().join(EXECUTIONS_DIR).join(&file_name);
            if candidate.is_file() {
                return read_json(&candidate);
            }
        }
        Err(StoreError::NotFound(format!("execution {execution_id}")))
    }

    fn record_execution(&self, agent_id: &str, record: &ExecutionRecord) -> Result<(), StoreError> {
        let path = self
            .agent_dir(agent_id)
            .join(EXECUTIONS_DIR)
            .join(format!("{}.json", sanitize(record.execution_id.as_str())));
        write_json(&path, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{
        BlockExecutionState, BlockStates, BlockStatus, TrackerPhase, WorkflowStatus,
    };
    use crate::graph::{BlockConfig, MergeConfig, Position};

    #[test]
    fn workflow_and_versions_persist_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let mut wf = Workflow::new();
        wf.add_block("Fetch", BlockConfig::Merge(MergeConfig::default()), Position::new(1.0, 2.0));
        wf.set_version(1);

        let store = JsonFileStore::new(dir.path());
        assert_eq!(store.save_workflow("agent/one", &wf, Some("initial")).unwrap(), 1);

        let reopened = JsonFileStore::new(dir.path());
        assert_eq!(reopened.load_workflow("agent/one").unwrap(), wf);
        let versions = reopened.list_versions("agent/one").unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].description, "initial");
        assert_eq!(versions[0].workflow, wf);
        assert!(dir.path().join("agents").join("agent_one").join(WORKFLOW_FILE).is_file());
    }

    #[test]
    fn missing_agent_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        assert!(matches!(store.load_workflow("ghost"), Err(StoreError::NotFound(_))));
        assert!(store.list_versions("ghost").unwrap().is_empty());
        assert!(matches!(
            store.get_execution(&ExecutionId::new("x")),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn executions_are_found_under_any_agent() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let mut wf = Workflow::new();
        let block = wf.add_block("a", BlockConfig::Merge(MergeConfig::default()), Position::default());
        let mut states = BlockStates::new();
        states.insert(
            block,
            BlockExecutionState {
                status: BlockStatus::Failed,
                error: Some("boom".into()),
                ..Default::default()
            },
        );
        let record = ExecutionRecord {
            execution_id: ExecutionId::new("exec-1"),
            workflow_version: 0,
            status: WorkflowStatus::Failed,
            phase: TrackerPhase::Finished,
            block_states: states,
            iteration_states: Default::default(),
            started_at: None,
            completed_at: None,
        };
        store.record_execution("agent-b", &record).unwrap();
        store.save_workflow("agent-a", &wf, None).unwrap();

        let loaded = store.get_execution(&ExecutionId::new("exec-1")).unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn corrupt_file_is_a_serde_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let path = dir.path().join("agents").join("bad").join(WORKFLOW_FILE);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(store.load_workflow("bad"), Err(StoreError::Serde(_))));
    }
}
