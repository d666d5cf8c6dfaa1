use std::collections::BTreeMap;

use serde::Serialize;

use crate::dram::command::Command;
use crate::dram::types::Cycle;

/// How an access found its bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    /// The addressed row was already open.
    Hit,
    /// The bank was closed.
    Miss,
    /// A different row was open.
    Conflict,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RowBufferSummary {
    pub hits: u64,
    pub misses: u64,
    pub conflicts: u64,
}

impl RowBufferSummary {
    pub fn record(&mut self, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Hit => self.hits += 1,
            RowOutcome::Miss => self.misses += 1,
            RowOutcome::Conflict => self.conflicts += 1,
        }
    }

    pub fn accesses(&self) -> u64 {
        self.hits + self.misses + self.conflicts
    }

    pub fn hit_rate(&self) -> f64 {
        match self.accesses() {
            0 => 0.0,
            n => self.hits as f64 / n as f64,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplayStats {
    /// Issue count per command name.
    pub issued: BTreeMap<String, u64>,
    pub row_buffer: RowBufferSummary,
    pub prerequisite_violations: u64,
    pub timing_violations: u64,
    pub final_clk: Cycle,
}

impl ReplayStats {
    pub fn record_issue(&mut self, command: Command) {
        *self.issued.entry(command.name().to_string()).or_default() += 1;
    }

    pub fn issued_count(&self, command: Command) -> u64 {
        self.issued.get(command.name()).copied().unwrap_or_default()
    }

    pub fn total_issued(&self) -> u64 {
        self.issued.values().sum()
    }
}
