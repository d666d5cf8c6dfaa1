use std::fmt::{Display, Formatter};
use std::str::FromStr;

use anyhow::{bail, Result};
use smallvec::SmallVec;

use crate::dram::types::{AddrVec, ANY};

pub const NUM_LEVELS: usize = 7;

/// One rung of the device hierarchy, outermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Channel = 0,
    PseudoChannel,
    Rank,
    BankGroup,
    Bank,
    Row,
    Column,
}

impl Level {
    pub const ALL: [Level; NUM_LEVELS] = [
        Level::Channel,
        Level::PseudoChannel,
        Level::Rank,
        Level::BankGroup,
        Level::Bank,
        Level::Row,
        Level::Column,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Level::Channel => "channel",
            Level::PseudoChannel => "pseudochannel",
            Level::Rank => "rank",
            Level::BankGroup => "bankgroup",
            Level::Bank => "bank",
            Level::Row => "row",
            Level::Column => "column",
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl Display for Level {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Level::ALL
            .iter()
            .copied()
            .find(|level| level.name() == value)
            .ok_or_else(|| format!("unknown level '{}'", value))
    }
}

/// The levels one device instance actually has, and the depth of each.
///
/// Depth is the position in the address vector. Node tree depths run from the
/// channel (depth 0) down to the bank; the row and anything below it are
/// coordinates only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    levels: SmallVec<[Level; NUM_LEVELS]>,
    depths: [Option<usize>; NUM_LEVELS],
}

impl Topology {
    pub fn new(levels: &[Level]) -> Result<Self> {
        if levels.first() != Some(&Level::Channel) {
            bail!("topology must start at the channel level, got {:?}", levels);
        }
        if levels.windows(2).any(|pair| pair[0] >= pair[1]) {
            bail!("topology levels must be strictly ordered, got {:?}", levels);
        }

        let mut depths = [None; NUM_LEVELS];
        for (depth, level) in levels.iter().enumerate() {
            depths[level.index()] = Some(depth);
        }

        let topo = Self {
            levels: levels.iter().copied().collect(),
            depths,
        };
        let bank = topo.require(Level::Bank)?;
        let row = topo.require(Level::Row)?;
        if row != bank + 1 {
            bail!("the row level must directly follow the bank level");
        }
        Ok(topo)
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn depth(&self, level: Level) -> Option<usize> {
        self.depths[level.index()]
    }

    /// Depth of `level`, or a configuration error naming the missing level.
    pub fn require(&self, level: Level) -> Result<usize> {
        match self.depth(level) {
            Some(depth) => Ok(depth),
            None => bail!("topology {:?} has no {} level", self.levels.as_slice(), level),
        }
    }

    pub fn level_at(&self, depth: usize) -> Level {
        self.levels[depth]
    }

    pub fn bank_depth(&self) -> usize {
        self.depths[Level::Bank.index()].unwrap_or_default()
    }

    pub fn row_depth(&self) -> usize {
        self.depths[Level::Row.index()].unwrap_or_default()
    }

    /// An address with every coordinate set to the wildcard.
    pub fn addr(&self) -> AddrVec {
        smallvec::smallvec![ANY; self.len()]
    }

    /// Build an address from `(level, coordinate)` pairs; other levels stay wildcards.
    ///
    /// # Panics
    /// If a level is not part of this topology.
    pub fn addr_of(&self, coords: &[(Level, i64)]) -> AddrVec {
        let mut addr = self.addr();
        for &(level, coord) in coords {
            let depth = self
                .depth(level)
                .unwrap_or_else(|| panic!("level {} is not part of this topology", level));
            addr[depth] = coord;
        }
        addr
    }
}
