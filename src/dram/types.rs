use smallvec::SmallVec;

pub type Cycle = u64;

/// Index of a node inside one channel's arena.
pub type NodeId = usize;

/// One coordinate per topology depth. Negative coordinates are wildcards.
pub type AddrVec = SmallVec<[i64; 8]>;

/// Coordinate used for levels a command does not address.
pub const ANY: i64 = -1;

/// Open/closed state held by a device node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    Opened,
    Closed,
    NotApplicable,
}
