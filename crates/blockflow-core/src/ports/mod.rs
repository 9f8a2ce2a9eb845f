//! Collaborator contracts: the workflow runner, persistence and tool lookups.
//! Implementations live in submodules; production ones are supplied by the host.

mod file;
mod memory;
mod scripted;

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{RunnerError, StoreError};
use crate::execution::{ExecutionId, ExecutionRecord, RunnerEvent};
use crate::graph::{BlockConfig, BlockId, Workflow};
use crate::history::WorkflowVersion;

pub use file::JsonFileStore;
pub use memory::InMemoryStore;
pub use scripted::ScriptedRunner;

/// Executes workflows out of process and streams per-block progress.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn start(&self, workflow: &Workflow, input: Value) -> Result<ExecutionId, RunnerError>;

    /// Open (or re-open after a drop) the event stream of an execution. The stream closes
    /// when the runner has nothing more to send.
    async fn subscribe(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<mpsc::Receiver<RunnerEvent>, RunnerError>;

    async fn cancel(&self, execution_id: &ExecutionId) -> Result<(), RunnerError>;
}

/// Durable storage for workflows, their named versions and finished executions.
pub trait WorkflowStore: Send + Sync {
    /// Persist the current graph. With a description, also append a version entry for
    /// `workflow.version()`. Returns the stored version.
    fn save_workflow(
        &self,
        agent_id: &str,
        workflow: &Workflow,
        description: Option<&str>,
    ) -> Result<u32, StoreError>;

    fn load_workflow(&self, agent_id: &str) -> Result<Workflow, StoreError>;

    /// Ordered by version, oldest first.
    fn list_versions(&self, agent_id: &str) -> Result<Vec<WorkflowVersion>, StoreError>;

    fn get_execution(&self, execution_id: &ExecutionId) -> Result<ExecutionRecord, StoreError>;

    fn record_execution(&self, agent_id: &str, record: &ExecutionRecord) -> Result<(), StoreError>;
}

/// Read-only lookup of configured integrations.
pub trait ToolRegistry {
    fn is_available(&self, integration: &str) -> bool;
}

impl ToolRegistry for HashSet<String> {
    fn is_available(&self, integration: &str) -> bool {
        self.contains(integration)
    }
}

/// A block declaring a tool the registry cannot provide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingTool {
    pub block_id: BlockId,
    pub block_name: String,
    pub tool: String,
}

/// Blocks whose declared tool usage cannot be satisfied.
pub fn unsatisfied_tools(workflow: &Workflow, registry: &dyn ToolRegistry) -> Vec<MissingTool> {
    let mut missing = Vec::new();
    for block in workflow.blocks() {
        let declared: Vec<&str> = match &block.config {
            BlockConfig::CodeBlock(cfg) => vec![cfg.tool_name.as_str()],
            BlockConfig::LlmInference(cfg) => cfg.enabled_tools.iter().map(String::as_str).collect(),
            _ => continue,
        };
        for tool in declared {
            if tool.is_empty() || registry.is_available(tool) {
                continue;
            }
            missing.push(MissingTool {
                block_id: block.id,
                block_name: block.name.clone(),
                tool: tool.to_string(),
            });
        }
    }
    missing
}
