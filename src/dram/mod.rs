pub mod channel;
pub mod command;
pub mod device;
pub mod dispatch;
pub mod hbm3;
pub mod level;
pub mod node;
pub mod org;
pub mod scoreboard;
pub mod spec;
pub mod timing;
pub mod types;

pub use command::{Command, Request};
pub use device::Dram;
pub use level::{Level, Topology};
pub use types::{AddrVec, Cycle, NodeState, ANY};

#[cfg(test)]
mod unit_tests;
