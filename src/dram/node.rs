use std::collections::HashMap;

use smallvec::SmallVec;

use crate::dram::level::{Level, Topology};
use crate::dram::org::Organization;
use crate::dram::types::{NodeId, NodeState};

/// One instance of one level of a channel's hierarchy.
#[derive(Debug, Clone)]
pub struct Node {
    pub level: Level,
    pub depth: usize,
    /// Position among siblings.
    pub id: usize,
    /// Lookup only; the arena owns every node.
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub state: NodeState,
    /// Row id → state, populated at bank nodes only. Absence means closed.
    pub row_state: HashMap<i64, NodeState>,
}

/// Arena holding one channel's node tree; index 0 is the channel node.
#[derive(Debug, Clone)]
pub struct NodeTree {
    nodes: Vec<Node>,
}

impl NodeTree {
    pub const ROOT: NodeId = 0;

    /// Build every node from the channel down to the bank.
    pub fn build(topology: &Topology, org: &Organization, init_states: &[NodeState], channel_id: usize) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.push(topology, init_states, None, 0, channel_id);

        // Breadth-first so siblings sit next to each other in the arena.
        let leaf_depth = topology.bank_depth();
        let mut frontier = vec![Self::ROOT];
        for depth in 0..leaf_depth {
            let mut next = Vec::new();
            for parent in frontier {
                for id in 0..org.count_at(depth + 1) as usize {
                    let child = tree.push(topology, init_states, Some(parent), depth + 1, id);
                    tree.nodes[parent].children.push(child);
                    next.push(child);
                }
            }
            frontier = next;
        }
        tree
    }

    fn push(
        &mut self,
        topology: &Topology,
        init_states: &[NodeState],
        parent: Option<NodeId>,
        depth: usize,
        id: usize,
    ) -> NodeId {
        let node_id = self.nodes.len();
        self.nodes.push(Node {
            level: topology.level_at(depth),
            depth,
            id,
            parent,
            children: Vec::new(),
            state: init_states.get(depth).copied().unwrap_or(NodeState::NotApplicable),
            row_state: HashMap::new(),
        });
        node_id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Child of `node` at coordinate `coord`, if the coordinate is concrete.
    pub fn child(&self, node: NodeId, coord: i64) -> Option<NodeId> {
        usize::try_from(coord)
            .ok()
            .and_then(|idx| self.nodes[node].children.get(idx).copied())
    }

    /// Walk parent links from `node` up to `depth`.
    pub fn ancestor_at(&self, mut node: NodeId, depth: usize) -> NodeId {
        while self.nodes[node].depth > depth {
            match self.nodes[node].parent {
                Some(parent) => node = parent,
                None => break,
            }
        }
        node
    }

    /// Follow `addr` down from the channel to `depth`; `None` when a
    /// coordinate on the way is a wildcard or out of range.
    pub fn resolve(&self, addr: &[i64], depth: usize) -> Option<NodeId> {
        let mut node = Self::ROOT;
        for d in 1..=depth {
            node = self.child(node, *addr.get(d)?)?;
        }
        Some(node)
    }

    /// Banks below `anchor` whose coordinates at `match_depths` equal `addr`.
    /// Wildcard coordinates match everything.
    pub fn banks_under(
        &self,
        anchor: NodeId,
        bank_depth: usize,
        match_depths: &[usize],
        addr: &[i64],
        out: &mut SmallVec<[NodeId; 16]>,
    ) {
        let node = &self.nodes[anchor];
        if node.depth == bank_depth {
            out.push(anchor);
            return;
        }
        let child_depth = node.depth + 1;
        let coord = addr.get(child_depth).copied().unwrap_or(-1);
        if coord >= 0 && match_depths.contains(&child_depth) {
            if let Some(child) = self.child(anchor, coord) {
                self.banks_under(child, bank_depth, match_depths, addr, out);
            }
        } else {
            for &child in &node.children {
                self.banks_under(child, bank_depth, match_depths, addr, out);
            }
        }
    }

    pub fn open_bank(&mut self, bank: NodeId, row: i64) {
        let node = &mut self.nodes[bank];
        node.state = NodeState::Opened;
        if row >= 0 {
            node.row_state.insert(row, NodeState::Opened);
        }
    }

    pub fn close_bank(&mut self, bank: NodeId) {
        let node = &mut self.nodes[bank];
        node.state = NodeState::Closed;
        node.row_state.clear();
    }

    /// Row ids currently open at `bank`.
    pub fn open_rows(&self, bank: NodeId) -> impl Iterator<Item = i64> + '_ {
        self.nodes[bank]
            .row_state
            .iter()
            .filter(|(_, state)| **state == NodeState::Opened)
            .map(|(row, _)| *row)
    }
}
