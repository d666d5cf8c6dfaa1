//! Per-node timing scoreboard.
//!
//! Every node keeps, for every command, the earliest clock at which that
//! command may be issued through it. Issuing a command pushes those clocks
//! forward along the addressed path (and across siblings for sibling rules);
//! readiness is a comparison against the clocks on that path, down to the
//! deepest level that constrains the command.

use smallvec::SmallVec;

use crate::dram::command::{Command, NUM_COMMANDS};
use crate::dram::node::NodeTree;
use crate::dram::timing::TimingTable;
use crate::dram::types::{Cycle, NodeId};

/// Most recent issue clocks of one command at one node, newest first.
#[derive(Debug, Clone, Default)]
pub struct CommandHistory {
    buf: SmallVec<[Cycle; 4]>,
    head: usize,
    len: usize,
}

impl CommandHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: smallvec::smallvec![0; capacity],
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn push(&mut self, clk: Cycle) {
        if self.buf.is_empty() {
            return;
        }
        self.head = (self.head + 1) % self.buf.len();
        self.buf[self.head] = clk;
        self.len = (self.len + 1).min(self.buf.len());
    }

    /// The `n`-th most recent clock (0 = newest), once that many are recorded.
    pub fn nth_latest(&self, n: usize) -> Option<Cycle> {
        if n >= self.len {
            return None;
        }
        let cap = self.buf.len();
        Some(self.buf[(self.head + cap - n) % cap])
    }
}

#[derive(Debug, Clone)]
pub struct Scoreboard {
    ready_at: Vec<Cycle>,
    history: Vec<CommandHistory>,
    reach: [usize; NUM_COMMANDS],
}

/// Coordinate of `addr` at `depth` as seen by a command scoped at `scope`:
/// levels below the scope are covered entirely.
fn coord_at(addr: &[i64], depth: usize, scope: usize) -> i64 {
    if depth > scope {
        return -1;
    }
    addr.get(depth).copied().unwrap_or(-1)
}

impl Scoreboard {
    /// One slot per command per node; histories sized by the windowed rules
    /// registered at each node's depth.
    pub fn new(tree: &NodeTree, table: &TimingTable) -> Self {
        let mut history = Vec::with_capacity(tree.len() * NUM_COMMANDS);
        for node in tree.nodes() {
            for command in Command::ALL {
                history.push(CommandHistory::with_capacity(table.history_len(node.depth, command)));
            }
        }
        let mut reach = [0; NUM_COMMANDS];
        for command in Command::ALL {
            reach[command.index()] = table.reach(command);
        }
        Self {
            ready_at: vec![0; tree.len() * NUM_COMMANDS],
            history,
            reach,
        }
    }

    /// Earliest clock at which `command` may pass through `node`.
    pub fn ready_at(&self, node: NodeId, command: Command) -> Cycle {
        self.ready_at[node * NUM_COMMANDS + command.index()]
    }

    fn bump(&mut self, node: NodeId, command: Command, future: Cycle) {
        let slot = &mut self.ready_at[node * NUM_COMMANDS + command.index()];
        *slot = (*slot).max(future);
    }

    /// Propagate the effect of issuing `command` at `clk` to every node it constrains.
    pub fn update(
        &mut self,
        tree: &NodeTree,
        table: &TimingTable,
        command: Command,
        scope_depth: usize,
        addr: &[i64],
        clk: Cycle,
    ) {
        self.update_node(tree, table, NodeTree::ROOT, command, scope_depth, addr, clk);
    }

    fn update_node(
        &mut self,
        tree: &NodeTree,
        table: &TimingTable,
        node_id: NodeId,
        command: Command,
        scope_depth: usize,
        addr: &[i64],
        clk: Cycle,
    ) {
        let node = tree.node(node_id);
        let coord = coord_at(addr, node.depth, scope_depth);

        if coord >= 0 && coord != node.id as i64 {
            for cons in table.constraints(node.depth, command).iter().filter(|c| c.sibling) {
                self.bump(node_id, cons.following, clk + cons.latency);
            }
            return;
        }

        let slot = node_id * NUM_COMMANDS + command.index();
        self.history[slot].push(clk);
        for cons in table.constraints(node.depth, command).iter().filter(|c| !c.sibling) {
            let past = if cons.window <= 1 {
                Some(clk)
            } else {
                self.history[slot].nth_latest(cons.window - 1)
            };
            if let Some(past) = past {
                self.bump(node_id, cons.following, past + cons.latency);
            }
        }

        let child_depth = node.depth + 1;
        let child_coord = coord_at(addr, child_depth, scope_depth);
        let visit_siblings = child_depth < table.depths() && table.has_sibling(child_depth, command);
        for &child in &node.children {
            if child_coord >= 0 && child_coord != tree.node(child).id as i64 && !visit_siblings {
                continue;
            }
            self.update_node(tree, table, child, command, scope_depth, addr, clk);
        }
    }

    /// Whether every node `command` passes through allows it at `clk`.
    /// Wildcard coordinates, and levels below the command's scope, require
    /// every child to agree.
    pub fn check(&self, tree: &NodeTree, command: Command, scope_depth: usize, addr: &[i64], clk: Cycle) -> bool {
        self.check_node(tree, NodeTree::ROOT, command, scope_depth, addr, clk)
    }

    fn check_node(
        &self,
        tree: &NodeTree,
        node_id: NodeId,
        command: Command,
        scope_depth: usize,
        addr: &[i64],
        clk: Cycle,
    ) -> bool {
        if clk < self.ready_at(node_id, command) {
            return false;
        }
        let node = tree.node(node_id);
        if node.depth >= self.reach[command.index()] || node.children.is_empty() {
            return true;
        }
        let coord = coord_at(addr, node.depth + 1, scope_depth);
        if coord < 0 {
            node.children
                .iter()
                .all(|&child| self.check_node(tree, child, command, scope_depth, addr, clk))
        } else {
            self.check_node(tree, node.children[coord as usize], command, scope_depth, addr, clk)
        }
    }

    /// Earliest clock at which `check` would succeed, ignoring later issues.
    pub fn earliest(&self, tree: &NodeTree, command: Command, scope_depth: usize, addr: &[i64]) -> Cycle {
        self.earliest_node(tree, NodeTree::ROOT, command, scope_depth, addr)
    }

    fn earliest_node(&self, tree: &NodeTree, node_id: NodeId, command: Command, scope_depth: usize, addr: &[i64]) -> Cycle {
        let here = self.ready_at(node_id, command);
        let node = tree.node(node_id);
        if node.depth >= self.reach[command.index()] || node.children.is_empty() {
            return here;
        }
        let coord = coord_at(addr, node.depth + 1, scope_depth);
        let below = if coord < 0 {
            node.children
                .iter()
                .map(|&child| self.earliest_node(tree, child, command, scope_depth, addr))
                .max()
                .unwrap_or(0)
        } else {
            self.earliest_node(tree, node.children[coord as usize], command, scope_depth, addr)
        };
        here.max(below)
    }
}
