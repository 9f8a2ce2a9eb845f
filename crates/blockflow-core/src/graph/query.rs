//! Read-only graph queries: successors, predecessors, terminal blocks.

use std::collections::HashSet;

use super::{Block, BlockId, Connection, Workflow};

/// Blocks that have an edge from `from_id`, in connection order.
pub fn successors(workflow: &Workflow, from_id: BlockId) -> Vec<BlockId> {
    workflow
        .connections()
        .iter()
        .filter(|c| c.source_block_id == from_id)
        .map(|c| c.target_block_id)
        .collect()
}

/// Blocks that have an edge to `to_id`, in connection order.
pub fn predecessors(workflow: &Workflow, to_id: BlockId) -> Vec<BlockId> {
    workflow
        .connections()
        .iter()
        .filter(|c| c.target_block_id == to_id)
        .map(|c| c.source_block_id)
        .collect()
}

/// Connections touching `block_id` on either end.
pub fn connections_of(workflow: &Workflow, block_id: BlockId) -> Vec<&Connection> {
    workflow
        .connections()
        .iter()
        .filter(|c| c.touches(block_id))
        .collect()
}

/// Blocks that are never a connection source (default output-preview targets), in block order.
pub fn terminal_blocks(workflow: &Workflow) -> Vec<&Block> {
    let has_outgoing: HashSet<BlockId> = workflow
        .connections()
        .iter()
        .map(|c| c.source_block_id)
        .collect();
    workflow
        .blocks()
        .iter()
        .filter(|b| !has_outgoing.contains(&b.id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{BlockConfig, MergeConfig, Position};

    fn merge() -> BlockConfig {
        BlockConfig::Merge(MergeConfig::default())
    }

    fn chain() -> (Workflow, BlockId, BlockId, BlockId) {
        let mut wf = Workflow::new();
        let a = wf.add_block("a", merge(), Position::default());
        let b = wf.add_block("b", merge(), Position::default());
        let c = wf.add_block("c", merge(), Position::default());
        wf.connect(a, b).unwrap();
        wf.connect(b, c).unwrap();
        (wf, a, b, c)
    }

    #[test]
    fn successors_and_predecessors_chain() {
        let (wf, a, b, c) = chain();
        assert_eq!(successors(&wf, a), vec![b]);
        assert_eq!(successors(&wf, c), Vec::<BlockId>::new());
        assert_eq!(predecessors(&wf, b), vec![a]);
        assert_eq!(predecessors(&wf, a), Vec::<BlockId>::new());
    }

    #[test]
    fn terminal_blocks_chain_and_fan_out() {
        let (mut wf, a, _b, c) = chain();
        let terminals: Vec<BlockId> = terminal_blocks(&wf).iter().map(|b| b.id).collect();
        assert_eq!(terminals, vec![c]);

        let d = wf.add_block("d", merge(), Position::default());
        wf.connect(a, d).unwrap();
        let terminals: Vec<BlockId> = terminal_blocks(&wf).iter().map(|b| b.id).collect();
        assert_eq!(terminals, vec![c, d]);
    }

    #[test]
    fn loop_back_edge_leaves_no_terminal() {
        let (mut wf, a, _b, c) = chain();
        wf.connect(c, a).unwrap();
        assert!(terminal_blocks(&wf).is_empty());
        assert_eq!(connections_of(&wf, a).len(), 2);
    }
}
