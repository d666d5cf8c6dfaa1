pub mod base;
pub mod dram;
pub mod sim;
pub mod ui;
