//! # Graph model
//!
//! A [`Workflow`] owns blocks, connections and variables. Every mutator keeps two invariants:
//!
//! - `normalized_id` is unique across blocks. Collisions are repaired by suffixing `-2`, `-3`, ...
//!   instead of failing, since the editor always allows the action.
//! - Every connection references blocks that exist. Removing a block removes its connections.
//!
//! Block ids are random v4 UUIDs and are never recycled, so stored execution records keep
//! pointing at the block they were captured for.
//!
//! Cycles are allowed (loop blocks create back-edges); iteration bounds belong to the runner.

mod config;
mod naming;
mod query;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::GraphError;

pub use config::{
    BlockConfig, BlockKind, CodeBlockConfig, ConditionOperator, DEFAULT_INPUT_PORT,
    DEFAULT_OUTPUT_PORT, FilterConfig, ForEachConfig, HttpRequestConfig, IfConditionConfig,
    LlmInferenceConfig, MergeConfig, MergeMode, OutputFormat, SWITCH_DEFAULT_PORT,
    ScheduleTriggerConfig, SwitchCase, SwitchConfig, TransformConfig, VariableConfig, WaitConfig,
    WaitUnit, WebhookConfig, WebhookTriggerConfig,
};
pub use naming::{disambiguate, slugify};
pub use query::{connections_of, predecessors, successors, terminal_blocks};

/// Opaque block identifier. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(Uuid);

impl BlockId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for BlockId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for BlockId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for BlockId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Canvas coordinate. Presentation only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// One node in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: BlockId,
    /// Addressable name used by `{{normalized_id.path}}` templates.
    pub normalized_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub config: BlockConfig,
    #[serde(default)]
    pub position: Position,
    /// Execution ceiling in seconds, enforced by the runner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
}

impl Block {
    pub fn kind(&self) -> BlockKind {
        self.config.kind()
    }
}

/// Directed edge between two named ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: ConnectionId,
    pub source_block_id: BlockId,
    #[serde(default = "default_output_port")]
    pub source_output: String,
    pub target_block_id: BlockId,
    #[serde(default = "default_input_port")]
    pub target_input: String,
}

fn default_output_port() -> String {
    DEFAULT_OUTPUT_PORT.to_string()
}
fn default_input_port() -> String {
    DEFAULT_INPUT_PORT.to_string()
}

impl Connection {
    pub fn touches(&self, block_id: BlockId) -> bool {
        self.source_block_id == block_id || self.target_block_id == block_id
    }

    fn same_endpoints(&self, other: &Connection) -> bool {
        self.source_block_id == other.source_block_id
            && self.source_output == other.source_output
            && self.target_block_id == other.target_block_id
            && self.target_input == other.target_input
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

/// Workflow-level variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    #[serde(rename = "type")]
    pub var_type: VariableType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,
}

/// The aggregate: blocks, connections, variables and the persisted version counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    id: Uuid,
    #[serde(default)]
    blocks: Vec<Block>,
    #[serde(default)]
    connections: Vec<Connection>,
    #[serde(default)]
    variables: Vec<Variable>,
    #[serde(default)]
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    workflow_model_id: Option<String>,
    /// Max execution time in seconds, passed through to the runner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    workflow_timeout: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_parallel_blocks: Option<u32>,
}

impl Default for Workflow {
    fn default() -> Self {
        Self::new()
    }
}

impl Workflow {
    /// Empty workflow at version 0.
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    pub fn with_id(id: Uuid) -> Self {
        Self {
            id,
            blocks: Vec::new(),
            connections: Vec::new(),
            variables: Vec::new(),
            version: 0,
            workflow_model_id: None,
            workflow_timeout: None,
            max_parallel_blocks: None,
        }
    }

    /// Build from externally supplied parts (e.g. generation output), repairing structure.
    pub fn from_parts(
        id: Uuid,
        blocks: Vec<Block>,
        connections: Vec<Connection>,
        variables: Vec<Variable>,
    ) -> Self {
        let mut wf = Self::with_id(id);
        wf.blocks = blocks;
        wf.connections = connections;
        wf.variables = variables;
        wf.repair();
        wf
    }

    pub fn id(&self) -> &Uuid {
        &self.id
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u32) {
        self.version = version;
    }

    pub fn workflow_model_id(&self) -> Option<&str> {
        self.workflow_model_id.as_deref()
    }

    pub fn set_workflow_model_id(&mut self, model_id: Option<String>) {
        self.workflow_model_id = model_id;
    }

    pub fn workflow_timeout(&self) -> Option<u32> {
        self.workflow_timeout
    }

    pub fn set_workflow_timeout(&mut self, seconds: Option<u32>) {
        self.workflow_timeout = seconds;
    }

    pub fn max_parallel_blocks(&self) -> Option<u32> {
        self.max_parallel_blocks
    }

    pub fn set_max_parallel_blocks(&mut self, limit: Option<u32>) {
        self.max_parallel_blocks = limit;
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn contains_block(&self, id: BlockId) -> bool {
        self.block(id).is_some()
    }

    pub fn block_by_normalized_id(&self, normalized_id: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.normalized_id == normalized_id)
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.iter().find(|c| c.id == id)
    }

    fn block_mut(&mut self, id: BlockId) -> Result<&mut Block, GraphError> {
        self.blocks
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or(GraphError::UnknownBlock(id))
    }

    /// Unique normalized id for `name`, ignoring the block `except` (used on rename).
    fn unique_normalized_id(&self, name: &str, except: Option<BlockId>) -> String {
        let base = slugify(name);
        disambiguate(&base, |candidate| {
            self.blocks
                .iter()
                .any(|b| Some(b.id) != except && b.normalized_id == candidate)
        })
    }

    /// Add a block named `name`. Its normalized id is derived from the name and disambiguated.
    pub fn add_block(&mut self, name: &str, config: BlockConfig, position: Position) -> BlockId {
        let id = BlockId::new();
        let normalized_id = self.unique_normalized_id(name, None);
        debug!(block_id = %id, normalized_id = %normalized_id, block_type = config.block_type(), "block added");
        self.blocks.push(Block {
            id,
            normalized_id,
            name: name.to_string(),
            description: String::new(),
            config,
            position,
            timeout: None,
        });
        id
    }

    /// Rename a block and re-derive its normalized id. Returns the new normalized id.
    pub fn rename_block(&mut self, id: BlockId, name: &str) -> Result<String, GraphError> {
        let normalized_id = self.unique_normalized_id(name, Some(id));
        let block = self.block_mut(id)?;
        block.name = name.to_string();
        block.normalized_id = normalized_id.clone();
        debug!(block_id = %id, normalized_id = %normalized_id, "block renamed");
        Ok(normalized_id)
    }

    pub fn set_description(&mut self, id: BlockId, description: &str) -> Result<(), GraphError> {
        self.block_mut(id)?.description = description.to_string();
        Ok(())
    }

    pub fn update_config(&mut self, id: BlockId, config: BlockConfig) -> Result<(), GraphError> {
        let block = self.block_mut(id)?;
        debug!(block_id = %id, from = block.config.block_type(), to = config.block_type(), "block config updated");
        block.config = config;
        Ok(())
    }

    pub fn move_block(&mut self, id: BlockId, position: Position) -> Result<(), GraphError> {
        self.block_mut(id)?.position = position;
        Ok(())
    }

    pub fn set_timeout(&mut self, id: BlockId, seconds: Option<u32>) -> Result<(), GraphError> {
        self.block_mut(id)?.timeout = seconds;
        Ok(())
    }

    /// Remove a block and every connection referencing it. Absent ids are a no-op.
    pub fn remove_block(&mut self, id: BlockId) -> Option<Block> {
        let idx = self.blocks.iter().position(|b| b.id == id)?;
        let block = self.blocks.remove(idx);
        let before = self.connections.len();
        self.connections.retain(|c| !c.touches(id));
        debug!(
            block_id = %id,
            removed_connections = before - self.connections.len(),
            "block removed"
        );
        Some(block)
    }

    /// Connect the default `output` port of `source` to the default `input` port of `target`.
    pub fn connect(&mut self, source: BlockId, target: BlockId) -> Result<ConnectionId, GraphError> {
        self.connect_ports(source, DEFAULT_OUTPUT_PORT, target, DEFAULT_INPUT_PORT)
    }

    /// Connect named ports. An identical existing edge is reused instead of duplicated.
    pub fn connect_ports(
        &mut self,
        source: BlockId,
        source_output: &str,
        target: BlockId,
        target_input: &str,
    ) -> Result<ConnectionId, GraphError> {
        if !self.contains_block(source) {
            return Err(GraphError::UnknownBlock(source));
        }
        if !self.contains_block(target) {
            return Err(GraphError::UnknownBlock(target));
        }
        let connection = Connection {
            id: ConnectionId::new(),
            source_block_id: source,
            source_output: source_output.to_string(),
            target_block_id: target,
            target_input: target_input.to_string(),
        };
        if let Some(existing) = self.connections.iter().find(|c| c.same_endpoints(&connection)) {
            debug!(connection_id = %existing.id, "connection already present");
            return Ok(existing.id);
        }
        let id = connection.id;
        debug!(connection_id = %id, source = %source, target = %target, port = source_output, "connection added");
        self.connections.push(connection);
        Ok(id)
    }

    pub fn remove_connection(&mut self, id: ConnectionId) -> Option<Connection> {
        let idx = self.connections.iter().position(|c| c.id == id)?;
        debug!(connection_id = %id, "connection removed");
        Some(self.connections.remove(idx))
    }

    /// Insert or replace (by name) a workflow variable.
    pub fn set_variable(&mut self, variable: Variable) {
        match self.variables.iter_mut().find(|v| v.name == variable.name) {
            Some(existing) => *existing = variable,
            None => self.variables.push(variable),
        }
    }

    pub fn remove_variable(&mut self, name: &str) -> Option<Variable> {
        let idx = self.variables.iter().position(|v| v.name == name)?;
        Some(self.variables.remove(idx))
    }

    /// Re-establish invariants on externally supplied data: drop duplicate block ids,
    /// disambiguate normalized ids, drop dangling or duplicate connections.
    pub fn repair(&mut self) {
        let mut seen_ids = std::collections::HashSet::new();
        self.blocks.retain(|b| {
            let fresh = seen_ids.insert(b.id);
            if !fresh {
                warn!(block_id = %b.id, "dropping block with duplicate id");
            }
            fresh
        });

        let mut taken: std::collections::HashSet<String> = std::collections::HashSet::new();
        for block in &mut self.blocks {
            let base = if block.normalized_id.is_empty() {
                slugify(&block.name)
            } else {
                block.normalized_id.clone()
            };
            let unique = disambiguate(&base, |c| taken.contains(c));
            if unique != block.normalized_id {
                debug!(block_id = %block.id, from = %block.normalized_id, to = %unique, "normalized id repaired");
                block.normalized_id = unique.clone();
            }
            taken.insert(unique);
        }

        let mut kept: Vec<Connection> = Vec::with_capacity(self.connections.len());
        for connection in std::mem::take(&mut self.connections) {
            let dangling = !seen_ids.contains(&connection.source_block_id)
                || !seen_ids.contains(&connection.target_block_id);
            if dangling {
                warn!(connection_id = %connection.id, "dropping dangling connection");
                continue;
            }
            if kept.iter().any(|k| k.id == connection.id || k.same_endpoints(&connection)) {
                continue;
            }
            kept.push(connection);
        }
        self.connections = kept;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn merge() -> BlockConfig {
        BlockConfig::Merge(MergeConfig::default())
    }

    #[test]
    fn add_block_disambiguates_normalized_ids() {
        let mut wf = Workflow::new();
        let a = wf.add_block("Fetch Data", merge(), Position::default());
        let b = wf.add_block("fetch data", merge(), Position::default());
        let c = wf.add_block("Fetch-Data", merge(), Position::default());
        assert_eq!(wf.block(a).unwrap().normalized_id, "fetch-data");
        assert_eq!(wf.block(b).unwrap().normalized_id, "fetch-data-2");
        assert_eq!(wf.block(c).unwrap().normalized_id, "fetch-data-3");
    }

    #[test]
    fn rename_keeps_own_name_and_avoids_others() {
        let mut wf = Workflow::new();
        let a = wf.add_block("fetch", merge(), Position::default());
        let b = wf.add_block("summarize", merge(), Position::default());
        assert_eq!(wf.rename_block(a, "Fetch").unwrap(), "fetch");
        assert_eq!(wf.rename_block(b, "fetch").unwrap(), "fetch-2");
        assert_eq!(wf.block(b).unwrap().name, "fetch");
    }

    #[test]
    fn rename_unknown_block_is_error() {
        let mut wf = Workflow::new();
        let missing = BlockId::new();
        assert!(matches!(
            wf.rename_block(missing, "x"),
            Err(GraphError::UnknownBlock(id)) if id == missing
        ));
    }

    #[test]
    fn remove_block_cascades_connections() {
        let mut wf = Workflow::new();
        let a = wf.add_block("a", merge(), Position::default());
        let b = wf.add_block("b", merge(), Position::default());
        let c = wf.add_block("c", merge(), Position::default());
        wf.connect(a, b).unwrap();
        wf.connect(b, c).unwrap();
        wf.connect(a, c).unwrap();
        let removed = wf.remove_block(b).unwrap();
        assert_eq!(removed.id, b);
        assert_eq!(wf.connections().len(), 1);
        assert!(wf.connections().iter().all(|c| !c.touches(b)));
        assert!(wf.remove_block(b).is_none());
    }

    #[test]
    fn connect_rejects_unknown_blocks_and_dedupes() {
        let mut wf = Workflow::new();
        let a = wf.add_block("a", merge(), Position::default());
        let b = wf.add_block("b", merge(), Position::default());
        assert!(wf.connect(a, BlockId::new()).is_err());
        let first = wf.connect(a, b).unwrap();
        let second = wf.connect(a, b).unwrap();
        assert_eq!(first, second);
        assert_eq!(wf.connections().len(), 1);
        let branch = wf.connect_ports(a, "true", b, DEFAULT_INPUT_PORT).unwrap();
        assert_ne!(branch, first);
        assert!(wf.remove_connection(first).is_some());
        assert!(wf.remove_connection(first).is_none());
    }

    #[test]
    fn self_loop_is_allowed() {
        let mut wf = Workflow::new();
        let a = wf.add_block("loop", BlockConfig::ForEach(ForEachConfig::default()), Position::default());
        assert!(wf.connect(a, a).is_ok());
    }

    #[test]
    fn block_ids_are_not_recycled() {
        let mut wf = Workflow::new();
        let a = wf.add_block("a", merge(), Position::default());
        wf.remove_block(a);
        let b = wf.add_block("a", merge(), Position::default());
        assert_ne!(a, b);
        assert_eq!(wf.block(b).unwrap().normalized_id, "a");
    }

    #[test]
    fn repair_fixes_loaded_workflow() {
        let a = BlockId::new();
        let b = BlockId::new();
        let block = |id: BlockId, normalized: &str| Block {
            id,
            normalized_id: normalized.to_string(),
            name: "Fetch".into(),
            description: String::new(),
            config: merge(),
            position: Position::default(),
            timeout: None,
        };
        let dangling = Connection {
            id: ConnectionId::new(),
            source_block_id: a,
            source_output: DEFAULT_OUTPUT_PORT.into(),
            target_block_id: BlockId::new(),
            target_input: DEFAULT_INPUT_PORT.into(),
        };
        let ok = Connection {
            id: ConnectionId::new(),
            source_block_id: a,
            source_output: DEFAULT_OUTPUT_PORT.into(),
            target_block_id: b,
            target_input: DEFAULT_INPUT_PORT.into(),
        };
        let wf = Workflow::from_parts(
            Uuid::new_v4(),
            vec![block(a, "fetch"), block(b, "fetch")],
            vec![dangling, ok.clone()],
            vec![],
        );
        assert_eq!(wf.block(a).unwrap().normalized_id, "fetch");
        assert_eq!(wf.block(b).unwrap().normalized_id, "fetch-2");
        assert_eq!(wf.connections(), &[ok]);
    }

    #[test]
    fn workflow_serde_roundtrip_uses_camel_case() {
        let mut wf = Workflow::new();
        wf.set_workflow_model_id(Some("gpt-4o".into()));
        let a = wf.add_block("fetch", merge(), Position::new(10.0, 20.0));
        wf.set_variable(Variable {
            name: "topic".into(),
            var_type: VariableType::String,
            default_value: Some(json!("rust")),
        });
        let value = serde_json::to_value(&wf).unwrap();
        assert_eq!(value["workflowModelId"], json!("gpt-4o"));
        assert_eq!(value["blocks"][0]["normalizedId"], json!("fetch"));
        assert_eq!(value["blocks"][0]["config"]["type"], json!("merge"));
        let restored: Workflow = serde_json::from_value(value).unwrap();
        assert_eq!(restored, wf);
        assert!(restored.contains_block(a));
    }
}
