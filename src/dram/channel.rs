use std::sync::Arc;

use crate::dram::command::Command;
use crate::dram::dispatch::Action;
use crate::dram::node::NodeTree;
use crate::dram::scoreboard::Scoreboard;
use crate::dram::spec::DeviceSpec;
use crate::dram::types::{AddrVec, Cycle, NodeId};

/// One channel's node tree and scoreboard. Channels share no mutable state,
/// so a host may drive different channels from different threads.
#[derive(Debug, Clone)]
pub struct Channel {
    id: usize,
    spec: Arc<DeviceSpec>,
    tree: NodeTree,
    scoreboard: Scoreboard,
}

impl Channel {
    pub fn new(spec: Arc<DeviceSpec>, id: usize) -> Self {
        let tree = NodeTree::build(&spec.topology, &spec.organization, &spec.init_states, id);
        let scoreboard = Scoreboard::new(&tree, &spec.table);
        Self { id, spec, tree, scoreboard }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    fn row(&self, addr: &[i64]) -> i64 {
        addr.get(self.spec.topology.row_depth()).copied().unwrap_or(-1)
    }

    /// Nodes on the addressed path from the channel down to the command's
    /// scope, stopping at the bank or at the first wildcard.
    fn path<'a>(&'a self, command: Command, addr: &'a [i64]) -> impl Iterator<Item = NodeId> + 'a {
        let scope = self.spec.scope_depth(command).unwrap_or(0);
        let mut next = Some(NodeTree::ROOT);
        std::iter::from_fn(move || {
            let node = next?;
            let depth = self.tree.node(node).depth;
            next = if depth >= scope {
                None
            } else {
                addr.get(depth + 1).and_then(|&coord| self.tree.child(node, coord))
            };
            Some(node)
        })
    }

    /// The address as `command` affects it. A broadcast widens it to the
    /// banks its action reaches, so timing lands where state changes. `None`
    /// when a wildcard hides the node the command's action is registered at.
    pub fn target(&self, command: Command, addr: &[i64]) -> Option<AddrVec> {
        let Some((depth, action)) = self.spec.dispatch.actions.find(command) else {
            return Some(AddrVec::from_slice(addr));
        };
        self.tree.resolve(addr, depth)?;
        Some(match action {
            Action::Broadcast(_, traversal) => traversal.footprint(addr),
            Action::Bank(_) => AddrVec::from_slice(addr),
        })
    }

    /// Apply `command` issued at `clk`: scoreboard first, then state.
    pub fn issue(&mut self, command: Command, addr: &[i64], clk: Cycle) {
        let (Some(scope), Some(target)) = (self.spec.scope_depth(command), self.target(command, addr)) else {
            debug_assert!(false, "{} cannot issue {} to {:?}", self.spec.name, command, addr);
            return;
        };
        self.scoreboard.update(&self.tree, &self.spec.table, command, scope, &target, clk);

        let row = self.row(addr);
        if let Some((depth, action)) = self.spec.dispatch.actions.find(command) {
            if let Some(node) = self.tree.resolve(addr, depth) {
                action.apply(&mut self.tree, node, addr, row);
            }
        }
    }

    /// The command that must be issued before `command`; `command` itself
    /// when nothing blocks it.
    pub fn preq(&self, command: Command, addr: &[i64]) -> Command {
        let row = self.row(addr);
        for node in self.path(command, addr) {
            let depth = self.tree.node(node).depth;
            if let Some(preq) = self.spec.dispatch.preqs.get(depth, command) {
                return preq.resolve(&self.tree, node, command, addr, row);
            }
        }
        command
    }

    /// Scoreboard-only readiness.
    pub fn check_timing(&self, command: Command, addr: &[i64], clk: Cycle) -> bool {
        match (self.spec.scope_depth(command), self.target(command, addr)) {
            (Some(scope), Some(target)) => self.scoreboard.check(&self.tree, command, scope, &target, clk),
            _ => false,
        }
    }

    /// Legal to issue now: timing allows it and no prerequisite blocks it.
    pub fn check_ready(&self, command: Command, addr: &[i64], clk: Cycle) -> bool {
        self.check_timing(command, addr, clk) && self.preq(command, addr) == command
    }

    pub fn ready_at(&self, command: Command, addr: &[i64]) -> Option<Cycle> {
        let scope = self.spec.scope_depth(command)?;
        let target = self.target(command, addr)?;
        Some(self.scoreboard.earliest(&self.tree, command, scope, &target))
    }

    pub fn rowbuffer_hit(&self, command: Command, addr: &[i64]) -> bool {
        let row = self.row(addr);
        for node in self.path(command, addr) {
            let depth = self.tree.node(node).depth;
            if let Some(hit) = self.spec.dispatch.rowhits.get(depth, command) {
                return hit.check(&self.tree, node, row);
            }
        }
        false
    }

    pub fn node_open(&self, command: Command, addr: &[i64]) -> bool {
        for node in self.path(command, addr) {
            let depth = self.tree.node(node).depth;
            if let Some(open) = self.spec.dispatch.rowopens.get(depth, command) {
                return open.check(&self.tree, node);
            }
        }
        false
    }
}
