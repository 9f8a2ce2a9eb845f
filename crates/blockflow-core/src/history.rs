//! Undo/redo stacks and named version snapshots over a [`Workflow`].
//!
//! Stack entries are full graph copies. The version counter never moves backwards: undo,
//! redo and restore swap graph content but keep the highest version seen.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::graph::Workflow;

/// A named, persisted snapshot of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowVersion {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
    pub block_count: usize,
    pub workflow: Workflow,
}

impl WorkflowVersion {
    pub fn capture(workflow: &Workflow, description: impl Into<String>) -> Self {
        Self {
            version: workflow.version(),
            created_at: Utc::now(),
            description: description.into(),
            block_count: workflow.blocks().len(),
            workflow: workflow.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct HistoryManager {
    past: VecDeque<Workflow>,
    future: Vec<Workflow>,
    versions: Vec<WorkflowVersion>,
    /// Max `past` entries; 0 = unbounded.
    limit: usize,
}

impl HistoryManager {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Record `current` as the state to return to, before a structural edit is applied.
    pub fn commit(&mut self, current: &Workflow) {
        self.past.push_back(current.clone());
        if self.limit > 0 && self.past.len() > self.limit {
            self.past.pop_front();
        }
        if !self.future.is_empty() {
            debug!(dropped = self.future.len(), "redo path cleared");
            self.future.clear();
        }
    }

    pub fn undo(&mut self, current: &mut Workflow) -> bool {
        let Some(previous) = self.past.pop_back() else {
            return false;
        };
        let replaced = swap_keep_version(current, previous);
        self.future.push(replaced);
        debug!(past = self.past.len(), future = self.future.len(), "undo");
        true
    }

    pub fn redo(&mut self, current: &mut Workflow) -> bool {
        let Some(next) = self.future.pop() else {
            return false;
        };
        let replaced = swap_keep_version(current, next);
        self.past.push_back(replaced);
        debug!(past = self.past.len(), future = self.future.len(), "redo");
        true
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.past.len()
    }

    /// Bump `workflow`'s version and append a named snapshot of it. Leaves the undo stacks alone.
    pub fn snapshot_version(
        &mut self,
        workflow: &mut Workflow,
        description: impl Into<String>,
    ) -> &WorkflowVersion {
        let next = self.latest_version().max(workflow.version()) + 1;
        workflow.set_version(next);
        let snapshot = WorkflowVersion::capture(workflow, description);
        info!(version = snapshot.version, blocks = snapshot.block_count, "version snapshot");
        self.versions.push(snapshot);
        &self.versions[self.versions.len() - 1]
    }

    /// Replace `current` with the content stored for `version`. Undoable; clears redo.
    pub fn restore(&mut self, version: u32, current: &mut Workflow) -> bool {
        let Some(snapshot) = self.versions.iter().find(|v| v.version == version) else {
            warn!(version, "restore requested for unknown version");
            return false;
        };
        let restored = snapshot.workflow.clone();
        self.commit(current);
        swap_keep_version(current, restored);
        info!(version, "version restored");
        true
    }

    pub fn versions(&self) -> &[WorkflowVersion] {
        &self.versions
    }

    pub fn version(&self, version: u32) -> Option<&WorkflowVersion> {
        self.versions.iter().find(|v| v.version == version)
    }

    /// Replace the version list with one loaded from storage, ordered by version.
    pub fn load_versions(&mut self, mut versions: Vec<WorkflowVersion>) {
        versions.sort_by_key(|v| v.version);
        self.versions = versions;
    }

    fn latest_version(&self) -> u32 {
        self.versions.iter().map(|v| v.version).max().unwrap_or(0)
    }
}

/// Install `incoming` as the current graph and return the outgoing one. The version counter
/// of the result is the higher of the two.
fn swap_keep_version(current: &mut Workflow, mut incoming: Workflow) -> Workflow {
    let version = current.version().max(incoming.version());
    incoming.set_version(version);
    std::mem::replace(current, incoming)
}
