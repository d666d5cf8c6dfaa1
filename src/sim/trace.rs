use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info, warn};
use serde::Serialize;

use crate::dram::command::{Command, Request};
use crate::dram::device::Dram;
use crate::dram::types::{AddrVec, Cycle};
use crate::sim::stats::{ReplayStats, RowOutcome};

/// What a trace line asks for: a device command, or a request the device
/// translates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOp {
    Command(Command),
    Request(Request),
}

/// One parsed trace line: `<clk> <COMMAND|request> <coord>...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    /// 1-based source line.
    pub line: usize,
    pub clk: Cycle,
    pub op: TraceOp,
    pub addr: AddrVec,
}

pub fn parse_line(line: usize, text: &str) -> Result<Option<TraceEntry>> {
    let text = text.split('#').next().unwrap_or_default().trim();
    if text.is_empty() {
        return Ok(None);
    }
    let mut fields = text.split_whitespace();
    let clk = fields
        .next()
        .ok_or_else(|| anyhow!("line {}: missing clock", line))?;
    let clk: Cycle = clk
        .parse()
        .with_context(|| format!("line {}: bad clock '{}'", line, clk))?;
    let name = fields
        .next()
        .ok_or_else(|| anyhow!("line {}: missing command", line))?;
    let op = match (name.parse::<Command>(), name.parse::<Request>()) {
        (Ok(command), _) => TraceOp::Command(command),
        (_, Ok(request)) => TraceOp::Request(request),
        _ => bail!("line {}: unknown command or request '{}'", line, name),
    };
    let addr = fields
        .map(|coord| {
            coord
                .parse::<i64>()
                .with_context(|| format!("line {}: bad coordinate '{}'", line, coord))
        })
        .collect::<Result<AddrVec>>()?;
    Ok(Some(TraceEntry { line, clk, op, addr }))
}

pub fn parse_trace(text: &str) -> Result<Vec<TraceEntry>> {
    let mut entries = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if let Some(entry) = parse_line(idx + 1, line)? {
            entries.push(entry);
        }
    }
    Ok(entries)
}

pub fn load_trace(path: &Path) -> Result<Vec<TraceEntry>> {
    let text = fs::read_to_string(path).with_context(|| format!("failed to read trace {}", path.display()))?;
    parse_trace(&text).with_context(|| format!("in trace {}", path.display()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationKind {
    /// Another command had to be issued first.
    Prerequisite { required: String },
    /// Issued before the scoreboard allowed it.
    Timing { ready_at: Cycle },
}

#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    pub line: usize,
    pub clk: Cycle,
    pub command: String,
    pub addr: Vec<i64>,
    #[serde(flatten)]
    pub kind: ViolationKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub device: String,
    pub read_latency: Cycle,
    pub stats: ReplayStats,
    pub violations: Vec<Violation>,
}

/// Play `entries` against `dram` in order, advancing its clock to each
/// entry's clock. Every command is issued even when it violates the device's
/// rules; violations are recorded, or returned as an error if `strict`.
pub fn replay(dram: &mut Dram, entries: &[TraceEntry], strict: bool) -> Result<ReplayReport> {
    let mut stats = ReplayStats::default();
    let mut violations = Vec::new();

    for entry in entries {
        if entry.clk < dram.clk() {
            bail!(
                "line {}: clock {} goes backwards (device is at {})",
                entry.line,
                entry.clk,
                dram.clk()
            );
        }
        while dram.clk() < entry.clk {
            dram.tick();
        }

        let command = resolve_op(dram, entry)?;
        check_addr(dram, entry)?;
        if dram.target(command, &entry.addr).is_none() {
            bail!("line {}: {} needs concrete coordinates down to the node it acts on", entry.line, command);
        }

        let preq = dram.get_preq_command(command, &entry.addr);
        let kind = if preq != command {
            stats.prerequisite_violations += 1;
            Some(ViolationKind::Prerequisite { required: preq.name().to_string() })
        } else if !dram.check_timing(command, &entry.addr) {
            stats.timing_violations += 1;
            let ready_at = dram.ready_at(command, &entry.addr).unwrap_or(entry.clk);
            Some(ViolationKind::Timing { ready_at })
        } else {
            None
        };
        if let Some(kind) = kind {
            let violation = Violation {
                line: entry.line,
                clk: entry.clk,
                command: command.name().to_string(),
                addr: entry.addr.to_vec(),
                kind,
            };
            if strict {
                bail!("line {}: {} at clock {} violates {:?}", entry.line, command, entry.clk, violation.kind);
            }
            debug!("line {}: {} at {} violates {:?}", entry.line, command, entry.clk, violation.kind);
            violations.push(violation);
        }

        if dram.spec().meta(command).is_some_and(|meta| meta.is_access) {
            let outcome = if dram.check_rowbuffer_hit(command, &entry.addr) {
                RowOutcome::Hit
            } else if dram.check_node_open(command, &entry.addr) {
                RowOutcome::Conflict
            } else {
                RowOutcome::Miss
            };
            stats.row_buffer.record(outcome);
        }

        dram.issue_command(command, &entry.addr);
        stats.record_issue(command);
    }
    stats.final_clk = dram.clk();

    if !violations.is_empty() {
        warn!("replay finished with {} violation(s)", violations.len());
    }
    info!(
        "replayed {} command(s) through clock {}",
        stats.total_issued(),
        stats.final_clk
    );
    Ok(ReplayReport {
        device: dram.spec().name.to_string(),
        read_latency: dram.read_latency(),
        stats,
        violations,
    })
}

fn resolve_op(dram: &Dram, entry: &TraceEntry) -> Result<Command> {
    let command = match entry.op {
        TraceOp::Command(command) => command,
        TraceOp::Request(request) => dram.translate(request).ok_or_else(|| {
            anyhow!("line {}: {} does not handle request {}", entry.line, dram.spec().name, request)
        })?,
    };
    if !dram.spec().supports(command) {
        bail!("line {}: {} does not support {}", entry.line, dram.spec().name, command);
    }
    Ok(command)
}

/// Reject addresses the device would otherwise panic on.
fn check_addr(dram: &Dram, entry: &TraceEntry) -> Result<()> {
    let spec = dram.spec();
    if entry.addr.len() != spec.topology.len() {
        bail!(
            "line {}: expected {} coordinates, got {}",
            entry.line,
            spec.topology.len(),
            entry.addr.len()
        );
    }
    if entry.addr[0] < 0 {
        bail!("line {}: channel coordinate must be concrete", entry.line);
    }
    for (depth, &coord) in entry.addr.iter().enumerate() {
        let count = spec.organization.count_at(depth);
        if coord >= 0 && coord as u64 >= count {
            bail!(
                "line {}: {} {} out of range (device has {})",
                entry.line,
                spec.topology.level_at(depth),
                coord,
                count
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::sim::config::{DramConfig, OrgConfig, TimingConfig};

    fn hbm3() -> Dram {
        let config = DramConfig {
            impl_name: "HBM3".to_string(),
            org: OrgConfig {
                preset: Some("HBM3_8Gb_2R".to_string()),
                ..OrgConfig::default()
            },
            timing: TimingConfig::with_preset("HBM3_4.8Gbps"),
        };
        Dram::new(Arc::new(config)).expect("HBM3 should build")
    }

    #[test]
    fn parse_skips_comments_and_blanks() {
        let entries = parse_trace("# header\n\n10 ACT 0 0 0 0 0 5 -1  # open row 5\n20 read 0 0 0 0 0 5 3\n")
            .expect("trace should parse");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].line, 3);
        assert_eq!(entries[0].clk, 10);
        assert_eq!(entries[0].op, TraceOp::Command(Command::Act));
        assert_eq!(entries[0].addr.as_slice(), &[0, 0, 0, 0, 0, 5, -1]);
        assert_eq!(entries[1].op, TraceOp::Request(Request::Read));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_line(1, "x ACT 0").is_err());
        assert!(parse_line(1, "5 NOP 0").is_err());
        assert!(parse_line(1, "5 ACT 0 zero").is_err());
        assert!(parse_line(1, "5").is_err());
    }

    #[test]
    fn clean_trace_has_no_violations() {
        let mut dram = hbm3();
        let entries = parse_trace(
            "0 ACT 0 0 0 0 0 7 -1\n\
             17 RD 0 0 0 0 0 7 0\n\
             21 RD 0 0 0 0 0 7 1\n\
             60 PRE 0 0 0 0 0 -1 -1\n",
        )
        .unwrap();
        let report = replay(&mut dram, &entries, true).expect("trace is legal");
        assert!(report.violations.is_empty());
        assert_eq!(report.stats.issued_count(Command::Rd), 2);
        assert_eq!(report.stats.row_buffer.hits, 2);
        assert_eq!(report.stats.final_clk, 60);
        assert_eq!(report.read_latency, 19);
    }

    #[test]
    fn early_read_is_a_timing_violation() {
        let mut dram = hbm3();
        let entries = parse_trace("100 ACT 0 0 0 0 0 7 -1\n110 RD 0 0 0 0 0 7 0\n").unwrap();
        let report = replay(&mut dram, &entries, false).unwrap();
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].kind, ViolationKind::Timing { ready_at: 117 });
        assert_eq!(report.stats.timing_violations, 1);

        let mut dram = hbm3();
        assert!(replay(&mut dram, &entries, true).is_err());
    }

    #[test]
    fn read_to_closed_bank_needs_activate() {
        let mut dram = hbm3();
        let entries = parse_trace("5 read 0 1 1 2 3 9 0\n").unwrap();
        let report = replay(&mut dram, &entries, false).unwrap();
        assert_eq!(
            report.violations[0].kind,
            ViolationKind::Prerequisite { required: "ACT".to_string() }
        );
        assert_eq!(report.stats.row_buffer.misses, 1);
    }

    #[test]
    fn replay_rejects_bad_input() {
        let mut dram = hbm3();
        let backwards = parse_trace("10 ACT 0 0 0 0 0 1 -1\n5 ACT 0 0 0 0 1 1 -1\n").unwrap();
        assert!(replay(&mut dram, &backwards, false).is_err());

        let mut dram = hbm3();
        let short = parse_trace("1 ACT 0 0 0\n").unwrap();
        assert!(replay(&mut dram, &short, false).is_err());

        let mut dram = hbm3();
        let out_of_range = parse_trace("1 ACT 0 0 0 0 9 1 -1\n").unwrap();
        assert!(replay(&mut dram, &out_of_range, false).is_err());

        let mut dram = hbm3();
        let unsupported = parse_trace("1 ACTab 0 -1 -1 -1 -1 1 -1\n").unwrap();
        assert!(replay(&mut dram, &unsupported, false).is_err());

        let mut dram = hbm3();
        let wildcard_bank = parse_trace("1 ACT 0 0 0 0 -1 1 -1\n").unwrap();
        let err = replay(&mut dram, &wildcard_bank, false).unwrap_err();
        assert!(err.to_string().contains("concrete coordinates"), "{}", err);
    }

    #[test]
    fn report_serializes() {
        let mut dram = hbm3();
        let entries = parse_trace("0 RD 0 0 0 0 0 1 0\n").unwrap();
        let report = replay(&mut dram, &entries, false).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["device"], "HBM3");
        assert_eq!(json["violations"][0]["kind"], "prerequisite");
        assert_eq!(json["violations"][0]["required"], "ACT");
        assert_eq!(json["stats"]["issued"]["RD"], 1);
    }
}
