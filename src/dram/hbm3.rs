//! HBM3, and an HBM3 variant with processing-in-memory broadcast commands.
//!
//! DQ pins are quad data rate: a 4800 MT/s part runs a 1200 MHz command
//! clock, so `tCK_ps = 1e6 / (rate / 4)`.

use anyhow::{bail, Result};
use phf::phf_map;

use crate::dram::command::{Command, CommandDef, CommandMeta, Request};
use crate::dram::dispatch::{ActionDef, BankEffect, BankSet, PreqDef, RowHit, RowOpen};
use crate::dram::level::{Level, Topology};
use crate::dram::org::{OrgPreset, Organization};
use crate::dram::spec::DeviceDescription;
use crate::dram::timing::{jedec_rounding, TimingRule, TimingValues};
use crate::dram::types::NodeState;

use Command::*;

const LEVELS: &[Level] = &[
    Level::Channel,
    Level::PseudoChannel,
    Level::Rank,
    Level::BankGroup,
    Level::Bank,
    Level::Row,
    Level::Column,
];

// 1/2/3/4 ranks correspond to 4/8/12/16-high stacks.
static ORG_PRESETS: phf::Map<&'static str, OrgPreset> = phf_map! {
    //                         density    dq        Ch Pch Ra Bg Ba  Ro       Co
    "HBM3_2Gb_1R" =>  OrgPreset { density: 2 << 10,  dq: 32, count: &[1, 2, 1, 4, 4, 1 << 13, 1 << 5] },
    "HBM3_4Gb_1R" =>  OrgPreset { density: 4 << 10,  dq: 32, count: &[1, 2, 1, 4, 4, 1 << 14, 1 << 5] },
    "HBM3_8Gb_1R" =>  OrgPreset { density: 8 << 10,  dq: 32, count: &[1, 2, 1, 4, 4, 1 << 15, 1 << 5] },
    "HBM3_4Gb_2R" =>  OrgPreset { density: 4 << 10,  dq: 32, count: &[1, 2, 2, 4, 4, 1 << 13, 1 << 5] },
    "HBM3_8Gb_2R" =>  OrgPreset { density: 8 << 10,  dq: 32, count: &[1, 2, 2, 4, 4, 1 << 14, 1 << 5] },
    "HBM3_16Gb_2R" => OrgPreset { density: 16 << 10, dq: 32, count: &[1, 2, 2, 4, 4, 1 << 15, 1 << 5] },
    "HBM3_6Gb_3R" =>  OrgPreset { density: 6 << 10,  dq: 32, count: &[1, 2, 3, 4, 4, 1 << 13, 1 << 5] },
    "HBM3_12Gb_3R" => OrgPreset { density: 12 << 10, dq: 32, count: &[1, 2, 3, 4, 4, 1 << 14, 1 << 5] },
    "HBM3_24Gb_3R" => OrgPreset { density: 24 << 10, dq: 32, count: &[1, 2, 3, 4, 4, 1 << 15, 1 << 5] },
    "HBM3_8Gb_4R" =>  OrgPreset { density: 8 << 10,  dq: 32, count: &[1, 2, 4, 4, 4, 1 << 13, 1 << 5] },
    "HBM3_16Gb_4R" => OrgPreset { density: 16 << 10, dq: 32, count: &[1, 2, 4, 4, 4, 1 << 14, 1 << 5] },
    "HBM3_32Gb_4R" => OrgPreset { density: 32 << 10, dq: 32, count: &[1, 2, 4, 4, 4, 1 << 15, 1 << 5] },
};

const TIMING_NAMES: &[&str] = &[
    "rate", "nBL", "nCL", "nRCDRD", "nRCDWR", "nRP", "nRAS", "nRC", "nWR", "nRTPS", "nRTPL", "nCWL", "nCCDS",
    "nCCDL", "nRRDS", "nRRDL", "nWTRS", "nWTRL", "nRTW", "nFAW", "nRFC", "nRFCSB", "nREFI", "nREFISB", "nRREFD",
    "tCK_ps",
];

// -1 marks values derived from the organization (nRFC, nREFISB).
static TIMING_PRESETS: phf::Map<&'static str, &'static [i64]> = phf_map! {
    //                 rate  nBL nCL nRCDRD nRCDWR nRP nRAS nRC nWR nRTPS nRTPL nCWL nCCDS nCCDL nRRDS nRRDL nWTRS nWTRL nRTW nFAW nRFC nRFCSB nREFI nREFISB nRREFD tCK_ps
    "HBM3_4.8Gbps" => &[4800, 2, 17, 17, 17, 17, 41, 58, 20, 5, 8, 5, 2, 4, 2, 4, 8, 10, 3, 36, -1, 240, 4680, -1, 10, 833],
    "HBM3_5.2Gbps" => &[5200, 2, 19, 19, 19, 19, 45, 63, 21, 6, 8, 6, 2, 4, 2, 4, 8, 11, 3, 39, -1, 260, 5070, -1, 11, 769],
    "HBM3_5.6Gbps" => &[5600, 2, 20, 20, 20, 20, 48, 68, 23, 6, 9, 6, 2, 4, 2, 4, 9, 12, 3, 42, -1, 280, 5460, -1, 12, 714],
    "HBM3_6.0Gbps" => &[6000, 2, 21, 21, 21, 21, 51, 72, 24, 6, 9, 6, 2, 4, 2, 4, 9, 12, 3, 45, -1, 300, 5850, -1, 12, 666],
    "HBM3_6.4Gbps" => &[6400, 2, 23, 23, 23, 23, 55, 77, 26, 7, 10, 7, 2, 4, 2, 4, 10, 13, 3, 48, -1, 320, 6240, -1, 13, 625],
};

/// tRFC in ns, by channel density.
const TRFC_NS: &[(u64, u64)] = &[
    (2 << 10, 160),
    (4 << 10, 260),
    (6 << 10, 310),
    (8 << 10, 350),
    (12 << 10, 410),
    (16 << 10, 450),
    (24 << 10, 610),
    (32 << 10, 650),
];

/// tREFISB in ns for 4/8/12/16-high stacks.
const TREFISB_NS: &[u64] = &[244, 122, 82, 61];

const OPEN: CommandMeta = CommandMeta::new(true, false, false, false);
const CLOSE: CommandMeta = CommandMeta::new(false, true, false, false);
const ACCESS: CommandMeta = CommandMeta::new(false, false, true, false);
const ACCESS_CLOSE: CommandMeta = CommandMeta::new(false, true, true, false);
const REFRESH: CommandMeta = CommandMeta::new(false, false, false, true);

const COMMANDS: &[CommandDef] = &[
    CommandDef::new(Act, Level::Row, OPEN),
    CommandDef::new(Pre, Level::Bank, CLOSE),
    CommandDef::new(PreA, Level::Channel, CLOSE),
    CommandDef::new(Rd, Level::Column, ACCESS),
    CommandDef::new(Wr, Level::Column, ACCESS),
    CommandDef::new(RdA, Level::Column, ACCESS_CLOSE),
    CommandDef::new(WrA, Level::Column, ACCESS_CLOSE),
    CommandDef::new(RefAb, Level::Channel, REFRESH),
    CommandDef::new(RefSb, Level::Bank, REFRESH),
    CommandDef::new(RfmAb, Level::Channel, REFRESH),
    CommandDef::new(RfmSb, Level::Bank, REFRESH),
];

// Broadcasts are scoped at the bank so readiness covers every bank a
// wildcard address reaches.
const PIM_COMMANDS: &[CommandDef] = &[
    CommandDef::new(Act, Level::Row, OPEN),
    CommandDef::new(Pre, Level::Bank, CLOSE),
    CommandDef::new(PreA, Level::Channel, CLOSE),
    CommandDef::new(Rd, Level::Column, ACCESS),
    CommandDef::new(Wr, Level::Column, ACCESS),
    CommandDef::new(RdA, Level::Column, ACCESS_CLOSE),
    CommandDef::new(WrA, Level::Column, ACCESS_CLOSE),
    CommandDef::new(RefAb, Level::Channel, REFRESH),
    CommandDef::new(RefSb, Level::Bank, REFRESH),
    CommandDef::new(RfmAb, Level::Channel, REFRESH),
    CommandDef::new(RfmSb, Level::Bank, REFRESH),
    CommandDef::new(ActAb, Level::Bank, OPEN),
    CommandDef::new(ActSb, Level::Bank, OPEN),
    CommandDef::new(ActPb, Level::Bank, OPEN),
    CommandDef::new(PreSb, Level::Bank, CLOSE),
    CommandDef::new(PrePb, Level::Bank, CLOSE),
];

const REQUESTS: &[(Request, Command)] = &[
    (Request::Read, Rd),
    (Request::Write, Wr),
    (Request::AllBankRefresh, RefAb),
    (Request::PerBankRefresh, RefSb),
    (Request::AllBankRfm, RfmAb),
    (Request::PerBankRfm, RfmSb),
];

const INIT_STATES: &[(Level, NodeState)] = &[(Level::Bank, NodeState::Closed), (Level::Row, NodeState::Closed)];

const ACTIONS: &[(Level, Command, ActionDef)] = &[
    (Level::Channel, PreA, ActionDef::Broadcast(BankEffect::Close, BankSet::AllUnder(Level::Channel))),
    (Level::Bank, Act, ActionDef::Bank(BankEffect::Open)),
    (Level::Bank, Pre, ActionDef::Bank(BankEffect::Close)),
    (Level::Bank, RdA, ActionDef::Bank(BankEffect::Close)),
    (Level::Bank, WrA, ActionDef::Bank(BankEffect::Close)),
];

const PIM_ACTIONS: &[(Level, Command, ActionDef)] = &[
    (Level::Channel, PreA, ActionDef::Broadcast(BankEffect::Close, BankSet::AllUnder(Level::Channel))),
    (Level::Bank, Act, ActionDef::Bank(BankEffect::Open)),
    (Level::Bank, Pre, ActionDef::Bank(BankEffect::Close)),
    (Level::Bank, RdA, ActionDef::Bank(BankEffect::Close)),
    (Level::Bank, WrA, ActionDef::Bank(BankEffect::Close)),
    (Level::Channel, ActAb, ActionDef::Broadcast(BankEffect::Open, BankSet::AllUnder(Level::Channel))),
    (Level::Channel, ActSb, ActionDef::Broadcast(BankEffect::Open, BankSet::SameIdUnder(Level::Channel))),
    (Level::Channel, ActPb, ActionDef::Broadcast(BankEffect::Open, BankSet::SamePathUnder(Level::Channel))),
    (Level::Rank, PreSb, ActionDef::Broadcast(BankEffect::Close, BankSet::SameIdUnder(Level::Rank))),
    (Level::Channel, PrePb, ActionDef::Broadcast(BankEffect::Close, BankSet::SamePathUnder(Level::Channel))),
];

const PREQS: &[(Level, Command, PreqDef)] = &[
    (Level::Channel, RefAb, PreqDef::BanksClosed { targets: BankSet::AllUnder(Level::Channel), close: PreA }),
    (Level::Channel, RfmAb, PreqDef::BanksClosed { targets: BankSet::AllUnder(Level::Channel), close: PreA }),
    (Level::Bank, RefSb, PreqDef::BankClosed { close: Pre }),
    (Level::Bank, RfmSb, PreqDef::BankClosed { close: Pre }),
    (Level::Bank, Act, PreqDef::BankClosed { close: Pre }),
    (Level::Bank, Rd, PreqDef::RowOpen { open: Act, close: Pre }),
    (Level::Bank, Wr, PreqDef::RowOpen { open: Act, close: Pre }),
];

const PIM_PREQS: &[(Level, Command, PreqDef)] = &[
    (Level::Channel, RefAb, PreqDef::BanksClosed { targets: BankSet::AllUnder(Level::Channel), close: PreA }),
    (Level::Channel, RfmAb, PreqDef::BanksClosed { targets: BankSet::AllUnder(Level::Channel), close: PreA }),
    (Level::Bank, RefSb, PreqDef::BankClosed { close: Pre }),
    (Level::Bank, RfmSb, PreqDef::BankClosed { close: Pre }),
    (Level::Bank, Act, PreqDef::BankClosed { close: Pre }),
    (Level::Bank, Rd, PreqDef::RowOpen { open: Act, close: Pre }),
    (Level::Bank, Wr, PreqDef::RowOpen { open: Act, close: Pre }),
    (Level::Channel, ActAb, PreqDef::BanksClosed { targets: BankSet::AllUnder(Level::Channel), close: PreA }),
    (Level::Channel, ActSb, PreqDef::BanksClosed { targets: BankSet::SameIdUnder(Level::Channel), close: PreA }),
    (Level::Channel, ActPb, PreqDef::BanksClosed { targets: BankSet::SamePathUnder(Level::Channel), close: PrePb }),
];

const ROWHITS: &[(Level, Command, RowHit)] = &[(Level::Bank, Rd, RowHit::OpenRow), (Level::Bank, Wr, RowHit::OpenRow)];

const ROWOPENS: &[(Level, Command, RowOpen)] =
    &[(Level::Bank, Rd, RowOpen::BankOpened), (Level::Bank, Wr, RowOpen::BankOpened)];

fn clock_period_ps(rate: u64) -> u64 {
    match rate / 4 {
        0 => 0,
        mhz => 1_000_000 / mhz,
    }
}

fn derive_timings(org: &Organization, topology: &Topology, timings: &mut TimingValues) -> Result<()> {
    let tck_ps = timings.tck_ps();
    if !timings.is_set("nRFC") {
        let Some(&(_, ns)) = TRFC_NS.iter().find(|(density, _)| *density == org.density) else {
            bail!("HBM3 has no tRFC for a {} Mb channel; set nRFC or tRFC explicitly", org.density);
        };
        timings.set("nRFC", jedec_rounding(ns as f64, tck_ps) as i64)?;
    }
    if !timings.is_set("nREFISB") {
        let ranks = org.count_of(topology, Level::Rank).unwrap_or(1);
        let Some(&ns) = TREFISB_NS.get(ranks.saturating_sub(1) as usize) else {
            bail!("HBM3 has no tREFISB for {} ranks; set nREFISB or tREFISB explicitly", ranks);
        };
        timings.set("nREFISB", jedec_rounding(ns as f64, tck_ps) as i64)?;
    }
    Ok(())
}

fn read_latency(timings: &TimingValues) -> i64 {
    timings.get("nCL") + timings.get("nBL")
}

fn hbm3_rules(t: &TimingValues) -> Vec<TimingRule> {
    rules(t, &[Act], &[Pre])
}

fn pim_rules(t: &TimingValues) -> Vec<TimingRule> {
    rules(t, &[Act, ActAb, ActSb, ActPb], &[Pre, PreSb, PrePb])
}

fn cat(parts: &[&[Command]]) -> Vec<Command> {
    parts.concat()
}

/// The HBM3 constraint set. Every rule naming ACT (or PRE) applies to all of
/// `act` (or `pre`).
fn rules(t: &TimingValues, act: &[Command], pre: &[Command]) -> Vec<TimingRule> {
    let v = |name: &str| t.get(name);
    let write_recovery = v("nCWL") + v("nBL") + v("nWR");

    let row_cmds = cat(&[act, pre, &[PreA, RefAb, RefSb, RfmAb, RfmSb]]);
    let pre_all = cat(&[pre, &[PreA]]);
    let act_refsb = cat(&[act, &[RefSb, RfmSb]]);

    vec![
        // Channel: ACT occupies the row bus for two cycles.
        TimingRule::new(Level::Channel, act, &row_cmds, 2),
        // Pseudo channel
        TimingRule::new(Level::PseudoChannel, &[Rd, RdA], &[Rd, RdA], v("nBL")),
        TimingRule::new(Level::PseudoChannel, &[Wr, WrA], &[Wr, WrA], v("nBL")),
        TimingRule::new(Level::PseudoChannel, &[Rd], &[PreA], v("nRTPS")),
        TimingRule::new(Level::PseudoChannel, &[Wr], &[PreA], write_recovery),
        TimingRule::new(Level::PseudoChannel, act, &[PreA], v("nRAS")),
        TimingRule::new(Level::PseudoChannel, &[PreA], act, v("nRP")),
        TimingRule::new(Level::PseudoChannel, act, &[RefAb, RfmAb], v("nRC")),
        TimingRule::new(Level::PseudoChannel, &pre_all, &[RefAb, RfmAb], v("nRP")),
        TimingRule::new(Level::PseudoChannel, &[RdA], &[RefAb, RfmAb], v("nRP") + v("nRTPS")),
        TimingRule::new(Level::PseudoChannel, &[WrA], &[RefAb, RfmAb], write_recovery + v("nRP")),
        TimingRule::new(Level::PseudoChannel, &[RefAb, RfmAb], &act_refsb, v("nRFC")),
        // Rank: different bank groups
        TimingRule::new(Level::Rank, act, act, v("nRRDS")),
        TimingRule::new(Level::Rank, act, act, v("nFAW")).window(4),
        // ACT lands on its second cycle.
        TimingRule::new(Level::Rank, act, &[RefSb, RfmSb], v("nRRDS") + 1),
        TimingRule::new(Level::Rank, &[RefSb, RfmSb], &[RefSb, RfmSb], v("nRREFD")),
        TimingRule::new(Level::Rank, &[RefSb, RfmSb], act, v("nRREFD") - 1),
        TimingRule::new(Level::Rank, &[Rd, RdA], &[Rd, RdA], v("nCCDS")),
        TimingRule::new(Level::Rank, &[Wr, WrA], &[Wr, WrA], v("nCCDS")),
        // Read to write assumes a one-cycle write preamble.
        TimingRule::new(Level::Rank, &[Rd, RdA], &[Wr, WrA], v("nCL") + v("nBL") + 2 - v("nCWL")),
        TimingRule::new(Level::Rank, &[Wr, WrA], &[Rd, RdA], v("nCWL") + v("nBL") + v("nWTRS")),
        TimingRule::new(Level::Rank, act, &[PreA], v("nRAS")),
        TimingRule::new(Level::Rank, &[PreA], act, v("nRP")),
        // Same bank group
        TimingRule::new(Level::BankGroup, &[Rd, RdA], &[Rd, RdA], v("nCCDL")),
        TimingRule::new(Level::BankGroup, &[Wr, WrA], &[Wr, WrA], v("nCCDL")),
        TimingRule::new(Level::BankGroup, &[Wr, WrA], &[Rd, RdA], v("nCWL") + v("nBL") + v("nWTRL")),
        TimingRule::new(Level::BankGroup, act, act, v("nRRDL")),
        TimingRule::new(Level::BankGroup, act, &[RefSb, RfmSb], v("nRRDL") + 1),
        TimingRule::new(Level::BankGroup, &[RefSb, RfmSb], act, v("nRRDL") - 1),
        // Bank
        TimingRule::new(Level::Bank, act, act, v("nRC")),
        TimingRule::new(Level::Bank, act, &[Rd, RdA], v("nRCDRD")),
        TimingRule::new(Level::Bank, act, &[Wr, WrA], v("nRCDWR")),
        TimingRule::new(Level::Bank, act, pre, v("nRAS")),
        TimingRule::new(Level::Bank, pre, act, v("nRP")),
        TimingRule::new(Level::Bank, &[Rd], pre, v("nRTPS")),
        TimingRule::new(Level::Bank, &[Rd], pre, v("nRTPL")),
        TimingRule::new(Level::Bank, &[Wr], pre, write_recovery),
        TimingRule::new(Level::Bank, &[RdA], &act_refsb, v("nRTPL") + v("nRP")),
        TimingRule::new(Level::Bank, &[WrA], &act_refsb, write_recovery + v("nRP")),
    ]
}

pub static HBM3: DeviceDescription = DeviceDescription {
    name: "HBM3",
    levels: LEVELS,
    commands: COMMANDS,
    requests: REQUESTS,
    init_states: INIT_STATES,
    internal_prefetch: 8,
    org_presets: &ORG_PRESETS,
    timing_names: TIMING_NAMES,
    timing_presets: &TIMING_PRESETS,
    clock_period_ps,
    derive_timings,
    read_latency,
    timing_rules: hbm3_rules,
    actions: ACTIONS,
    preqs: PREQS,
    rowhits: ROWHITS,
    rowopens: ROWOPENS,
};

/// HBM3 plus all-bank, same-bank and per-bank broadcast ACT/PRE. Broadcast
/// targets are chosen by wildcards in the address: ACTab takes a wildcard
/// below the channel, ACTsb a concrete bank id only, ACTpb a wildcard pseudo
/// channel with the rest of the path concrete.
pub static HBM3_PIM: DeviceDescription = DeviceDescription {
    name: "HBM3-PIM",
    levels: LEVELS,
    commands: PIM_COMMANDS,
    requests: REQUESTS,
    init_states: INIT_STATES,
    internal_prefetch: 8,
    org_presets: &ORG_PRESETS,
    timing_names: TIMING_NAMES,
    timing_presets: &TIMING_PRESETS,
    clock_period_ps,
    derive_timings,
    read_latency,
    timing_rules: pim_rules,
    actions: PIM_ACTIONS,
    preqs: PIM_PREQS,
    rowhits: ROWHITS,
    rowopens: ROWOPENS,
};
