//! Per-(level, command) behavior tables.
//!
//! Device descriptions register behaviors by level; [`Dispatch::bind`]
//! resolves them against the topology once, so the hot path only indexes a
//! table and matches on a small enum.

use anyhow::{bail, Result};
use smallvec::SmallVec;

use crate::dram::command::{Command, NUM_COMMANDS};
use crate::dram::level::{Level, Topology};
use crate::dram::node::NodeTree;
use crate::dram::types::{AddrVec, NodeId, NodeState, ANY};

/// Which banks a broadcast reaches, relative to the acting node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankSet {
    /// Every bank below the enclosing `level` node.
    AllUnder(Level),
    /// Banks below the enclosing `level` node with the addressed bank id.
    SameIdUnder(Level),
    /// Banks below the enclosing `level` node matching every addressed
    /// coordinate except the one directly below `level`.
    SamePathUnder(Level),
}

/// A [`BankSet`] resolved to depths for one topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Traversal {
    pub anchor_depth: usize,
    pub bank_depth: usize,
    pub match_depths: SmallVec<[usize; 4]>,
}

impl Traversal {
    /// Bind `set` for a behavior registered at `registered`.
    pub fn bind(set: BankSet, registered: Level, topology: &Topology) -> Result<Self> {
        let (BankSet::AllUnder(anchor) | BankSet::SameIdUnder(anchor) | BankSet::SamePathUnder(anchor)) = set;
        let anchor_depth = topology.require(anchor)?;
        let bank_depth = topology.require(Level::Bank)?;
        let registered_depth = topology.require(registered)?;
        if anchor_depth >= bank_depth {
            bail!("unsupported organization: {:?} needs {} above the bank level", set, anchor);
        }
        if registered_depth < anchor_depth {
            bail!("unsupported organization: {:?} registered at {} cannot reach up to {}", set, registered, anchor);
        }
        if registered_depth > bank_depth {
            bail!("unsupported organization: {:?} registered below the bank level", set);
        }
        let match_depths = match set {
            BankSet::AllUnder(_) => SmallVec::new(),
            BankSet::SameIdUnder(_) => smallvec::smallvec![bank_depth],
            BankSet::SamePathUnder(_) => {
                if bank_depth - anchor_depth < 2 {
                    bail!("unsupported organization: {:?} leaves no level between {} and bank", set, anchor);
                }
                (anchor_depth + 2..=bank_depth).collect()
            }
        };
        Ok(Self { anchor_depth, bank_depth, match_depths })
    }

    /// `addr` widened to every bank the traversal reaches: coordinates
    /// between the anchor and the bank that the set does not match on become
    /// wildcards.
    pub fn footprint(&self, addr: &[i64]) -> AddrVec {
        let mut target = AddrVec::from_slice(addr);
        for depth in self.anchor_depth + 1..=self.bank_depth {
            if !self.match_depths.contains(&depth) {
                if let Some(coord) = target.get_mut(depth) {
                    *coord = ANY;
                }
            }
        }
        target
    }

    pub fn banks(&self, tree: &NodeTree, from: NodeId, addr: &[i64]) -> SmallVec<[NodeId; 16]> {
        let anchor = tree.ancestor_at(from, self.anchor_depth);
        let mut banks = SmallVec::new();
        tree.banks_under(anchor, self.bank_depth, &self.match_depths, addr, &mut banks);
        banks
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankEffect {
    /// Mark the bank opened with the addressed row.
    Open,
    /// Mark the bank closed and forget its rows.
    Close,
}

/// State mutation as registered by a device description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionDef {
    Bank(BankEffect),
    Broadcast(BankEffect, BankSet),
}

/// Prerequisite as registered by a device description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreqDef {
    /// `close` while any bank of the set is open.
    BanksClosed { targets: BankSet, close: Command },
    /// `close` while the addressed bank is open.
    BankClosed { close: Command },
    /// `open` while the bank is closed, `close` while a different row is open.
    RowOpen { open: Command, close: Command },
}

/// Does the access hit the row open at its bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowHit {
    OpenRow,
}

/// Does the addressed bank currently hold an open row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOpen {
    BankOpened,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Bank(BankEffect),
    Broadcast(BankEffect, Traversal),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prerequisite {
    BanksClosed { traversal: Traversal, close: Command },
    BankClosed { close: Command },
    RowOpen { open: Command, close: Command },
}

/// Behaviors indexed by (depth, command); an empty slot means no-op.
#[derive(Debug, Clone)]
pub struct DispatchTable<T> {
    slots: Vec<Option<T>>,
}

impl<T> DispatchTable<T> {
    pub fn new(depths: usize) -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(depths * NUM_COMMANDS).collect(),
        }
    }

    pub fn get(&self, depth: usize, command: Command) -> Option<&T> {
        self.slots
            .get(depth * NUM_COMMANDS + command.index())
            .and_then(Option::as_ref)
    }

    /// The shallowest registration for `command`, with its depth.
    pub fn find(&self, command: Command) -> Option<(usize, &T)> {
        (0..self.slots.len() / NUM_COMMANDS).find_map(|depth| self.get(depth, command).map(|value| (depth, value)))
    }

    fn register(&mut self, table: &str, topology: &Topology, level: Level, command: Command, value: T) -> Result<()> {
        let depth = topology.require(level)?;
        let slot = &mut self.slots[depth * NUM_COMMANDS + command.index()];
        if slot.is_some() {
            bail!("duplicate {} registration for {} at {}", table, command, level);
        }
        *slot = Some(value);
        Ok(())
    }

    pub fn registered(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

/// The four bound tables of one device.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub actions: DispatchTable<Action>,
    pub preqs: DispatchTable<Prerequisite>,
    pub rowhits: DispatchTable<RowHit>,
    pub rowopens: DispatchTable<RowOpen>,
}

fn require_bank(what: &str, level: Level, command: Command) -> Result<()> {
    if level != Level::Bank {
        bail!("{} for {} must be registered at the bank level, not {}", what, command, level);
    }
    Ok(())
}

impl Dispatch {
    pub fn bind(
        topology: &Topology,
        actions: &[(Level, Command, ActionDef)],
        preqs: &[(Level, Command, PreqDef)],
        rowhits: &[(Level, Command, RowHit)],
        rowopens: &[(Level, Command, RowOpen)],
    ) -> Result<Self> {
        let depths = topology.len();
        let mut dispatch = Self {
            actions: DispatchTable::new(depths),
            preqs: DispatchTable::new(depths),
            rowhits: DispatchTable::new(depths),
            rowopens: DispatchTable::new(depths),
        };

        for &(level, command, def) in actions {
            let action = match def {
                ActionDef::Bank(effect) => {
                    require_bank("bank action", level, command)?;
                    Action::Bank(effect)
                }
                ActionDef::Broadcast(effect, set) => Action::Broadcast(effect, Traversal::bind(set, level, topology)?),
            };
            dispatch.actions.register("action", topology, level, command, action)?;
        }
        for &(level, command, def) in preqs {
            let preq = match def {
                PreqDef::BanksClosed { targets, close } => Prerequisite::BanksClosed {
                    traversal: Traversal::bind(targets, level, topology)?,
                    close,
                },
                PreqDef::BankClosed { close } => {
                    require_bank("prerequisite", level, command)?;
                    Prerequisite::BankClosed { close }
                }
                PreqDef::RowOpen { open, close } => {
                    require_bank("prerequisite", level, command)?;
                    Prerequisite::RowOpen { open, close }
                }
            };
            dispatch.preqs.register("prerequisite", topology, level, command, preq)?;
        }
        for &(level, command, hit) in rowhits {
            require_bank("row hit", level, command)?;
            dispatch.rowhits.register("row hit", topology, level, command, hit)?;
        }
        for &(level, command, open) in rowopens {
            require_bank("row open", level, command)?;
            dispatch.rowopens.register("row open", topology, level, command, open)?;
        }
        Ok(dispatch)
    }
}

impl Action {
    pub fn apply(&self, tree: &mut NodeTree, node: NodeId, addr: &[i64], row: i64) {
        match self {
            Action::Bank(effect) => apply_effect(tree, node, *effect, row),
            Action::Broadcast(effect, traversal) => {
                for bank in traversal.banks(tree, node, addr) {
                    apply_effect(tree, bank, *effect, row);
                }
            }
        }
    }
}

fn apply_effect(tree: &mut NodeTree, bank: NodeId, effect: BankEffect, row: i64) {
    match effect {
        BankEffect::Open => tree.open_bank(bank, row),
        BankEffect::Close => tree.close_bank(bank),
    }
}

impl Prerequisite {
    pub fn resolve(&self, tree: &NodeTree, node: NodeId, command: Command, addr: &[i64], row: i64) -> Command {
        match self {
            Prerequisite::BanksClosed { traversal, close } => {
                let any_open = traversal
                    .banks(tree, node, addr)
                    .iter()
                    .any(|&bank| tree.node(bank).state == NodeState::Opened);
                if any_open { *close } else { command }
            }
            Prerequisite::BankClosed { close } => match tree.node(node).state {
                NodeState::Opened => *close,
                _ => command,
            },
            Prerequisite::RowOpen { open, close } => {
                let bank = tree.node(node);
                match bank.state {
                    NodeState::Closed => *open,
                    NodeState::Opened if bank.row_state.contains_key(&row) => command,
                    NodeState::Opened => *close,
                    NodeState::NotApplicable => command,
                }
            }
        }
    }
}

impl RowHit {
    pub fn check(&self, tree: &NodeTree, node: NodeId, row: i64) -> bool {
        match self {
            RowHit::OpenRow => {
                let bank = tree.node(node);
                bank.state == NodeState::Opened && bank.row_state.get(&row) == Some(&NodeState::Opened)
            }
        }
    }
}

impl RowOpen {
    pub fn check(&self, tree: &NodeTree, node: NodeId) -> bool {
        match self {
            RowOpen::BankOpened => tree.node(node).state == NodeState::Opened,
        }
    }
}
