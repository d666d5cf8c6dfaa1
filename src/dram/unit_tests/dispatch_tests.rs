use crate::dram::command::Command;
use crate::dram::device::Dram;
use crate::dram::dispatch::{ActionDef, BankEffect, BankSet, Dispatch, PreqDef, Traversal};
use crate::dram::level::{Level, Topology};
use crate::dram::types::{AddrVec, NodeState};

use super::{hbm3, pim};

fn toy() -> Topology {
    Topology::new(&[Level::Channel, Level::Rank, Level::Bank, Level::Row, Level::Column]).unwrap()
}

fn open_banks(dram: &Dram) -> usize {
    dram.channels()[0]
        .tree()
        .nodes()
        .iter()
        .filter(|node| node.level == Level::Bank && node.state == NodeState::Opened)
        .count()
}

fn advance(dram: &mut Dram, to: u64) {
    while dram.clk() < to {
        dram.tick();
    }
}

fn addr(dram: &Dram, coords: &[(Level, i64)]) -> AddrVec {
    dram.spec().topology.addr_of(coords)
}

#[test]
fn traversal_binds_to_depths() {
    let hbm3 = Topology::new(&Level::ALL).unwrap();
    let path = Traversal::bind(BankSet::SamePathUnder(Level::Channel), Level::Channel, &hbm3).unwrap();
    assert_eq!(path.anchor_depth, 0);
    assert_eq!(path.bank_depth, 4);
    assert_eq!(path.match_depths.as_slice(), &[2, 3, 4]);

    let same_id = Traversal::bind(BankSet::SameIdUnder(Level::Rank), Level::Rank, &hbm3).unwrap();
    assert_eq!(same_id.anchor_depth, 2);
    assert_eq!(same_id.match_depths.as_slice(), &[4]);

    let toy = toy();
    let all = Traversal::bind(BankSet::AllUnder(Level::Channel), Level::Channel, &toy).unwrap();
    assert_eq!(all.bank_depth, 2);
    assert!(all.match_depths.is_empty());
    let path = Traversal::bind(BankSet::SamePathUnder(Level::Channel), Level::Bank, &toy).unwrap();
    assert_eq!(path.match_depths.as_slice(), &[2]);
}

#[test]
fn unsupported_shapes_fail_to_bind() {
    let toy = toy();
    // No level between rank and bank.
    assert!(Traversal::bind(BankSet::SamePathUnder(Level::Rank), Level::Rank, &toy).is_err());
    // Anchor must sit above the bank.
    assert!(Traversal::bind(BankSet::AllUnder(Level::Bank), Level::Bank, &toy).is_err());
    // Missing level.
    assert!(Traversal::bind(BankSet::SameIdUnder(Level::BankGroup), Level::Bank, &toy).is_err());
    // Registered above its anchor.
    assert!(Traversal::bind(BankSet::AllUnder(Level::Rank), Level::Channel, &toy).is_err());
}

#[test]
fn dispatch_rejects_bad_registrations() {
    let topo = Topology::new(&Level::ALL).unwrap();
    let dup = [
        (Level::Bank, Command::Act, ActionDef::Bank(BankEffect::Open)),
        (Level::Bank, Command::Act, ActionDef::Bank(BankEffect::Close)),
    ];
    assert!(Dispatch::bind(&topo, &dup, &[], &[], &[]).is_err());

    let off_bank = [(Level::Rank, Command::Pre, ActionDef::Bank(BankEffect::Close))];
    assert!(Dispatch::bind(&topo, &off_bank, &[], &[], &[]).is_err());

    let preq = [(Level::Channel, Command::Rd, PreqDef::RowOpen { open: Command::Act, close: Command::Pre })];
    assert!(Dispatch::bind(&topo, &[], &preq, &[], &[]).is_err());

    let broadcast = [(
        Level::Channel,
        Command::PreA,
        ActionDef::Broadcast(BankEffect::Close, BankSet::AllUnder(Level::Channel)),
    )];
    let dispatch = Dispatch::bind(&topo, &broadcast, &[], &[], &[]).unwrap();
    assert_eq!(dispatch.actions.registered(), 1);
    assert!(dispatch.actions.get(0, Command::PreA).is_some());
    assert!(dispatch.actions.get(4, Command::PreA).is_none());
}

#[test]
fn refresh_all_banks_needs_precharge_all() {
    let mut dram = hbm3();
    let bank = addr(&dram, &[(Level::Channel, 0), (Level::PseudoChannel, 0), (Level::Rank, 0), (Level::BankGroup, 0), (Level::Bank, 0), (Level::Row, 5)]);
    let channel = addr(&dram, &[(Level::Channel, 0)]);
    assert_eq!(dram.get_preq_command(Command::RefAb, &channel), Command::RefAb);

    dram.issue_command(Command::Act, &bank);
    assert_eq!(dram.get_preq_command(Command::RefAb, &channel), Command::PreA);
    assert!(!dram.check_ready(Command::RefAb, &channel));

    let nras = dram.spec().timings.get("nRAS") as u64;
    advance(&mut dram, nras - 1);
    assert!(!dram.check_ready(Command::PreA, &channel));
    advance(&mut dram, nras);
    assert!(dram.check_ready(Command::PreA, &channel));
    dram.issue_command(Command::PreA, &channel);
    assert_eq!(open_banks(&dram), 0);
    assert_eq!(dram.get_preq_command(Command::RefAb, &channel), Command::RefAb);

    // nRC after the ACT, nRP after the PREA.
    let ready = (dram.spec().timings.get("nRC") as u64).max(nras + dram.spec().timings.get("nRP") as u64);
    advance(&mut dram, ready - 1);
    assert!(!dram.check_ready(Command::RefAb, &channel));
    dram.tick();
    assert!(dram.check_ready(Command::RefAb, &channel));
}

#[test]
fn per_bank_refresh_needs_that_bank_closed() {
    let mut dram = hbm3();
    let coords = [(Level::Channel, 0), (Level::PseudoChannel, 1), (Level::Rank, 1), (Level::BankGroup, 3), (Level::Bank, 2)];
    let bank = addr(&dram, &coords);
    assert_eq!(dram.get_preq_command(Command::RefSb, &bank), Command::RefSb);
    let mut row = bank.clone();
    row[5] = 11;
    dram.issue_command(Command::Act, &row);
    assert_eq!(dram.get_preq_command(Command::RefSb, &bank), Command::Pre);
}

#[test]
fn all_bank_activate_opens_every_bank() {
    let mut dram = pim();
    let all = addr(&dram, &[(Level::Channel, 0), (Level::Row, 3)]);
    assert_eq!(dram.get_preq_command(Command::ActAb, &all), Command::ActAb);
    assert!(dram.check_ready(Command::ActAb, &all));
    dram.issue_command(Command::ActAb, &all);
    assert_eq!(open_banks(&dram), 2 * 2 * 4 * 4);
    assert_eq!(dram.get_preq_command(Command::ActAb, &all), Command::PreA);

    let one = addr(&dram, &[(Level::Channel, 0), (Level::PseudoChannel, 1), (Level::Rank, 0), (Level::BankGroup, 3), (Level::Bank, 2), (Level::Row, 3), (Level::Column, 0)]);
    assert!(dram.check_rowbuffer_hit(Command::Rd, &one));
    let nrcdrd = dram.spec().timings.get("nRCDRD") as u64;
    advance(&mut dram, nrcdrd);
    assert!(dram.check_ready(Command::Rd, &one));
}

#[test]
fn same_bank_activate_and_precharge() {
    let mut dram = pim();
    let same_id = addr(&dram, &[(Level::Channel, 0), (Level::Bank, 2), (Level::Row, 6)]);
    assert!(dram.check_ready(Command::ActSb, &same_id));
    dram.issue_command(Command::ActSb, &same_id);
    assert_eq!(open_banks(&dram), 2 * 2 * 4);
    assert_eq!(dram.get_preq_command(Command::ActSb, &same_id), Command::PreA);

    let rank_bank = addr(&dram, &[(Level::Channel, 0), (Level::PseudoChannel, 0), (Level::Rank, 1), (Level::Bank, 2)]);
    let nras = dram.spec().timings.get("nRAS") as u64;
    advance(&mut dram, nras - 1);
    assert!(!dram.check_ready(Command::PreSb, &rank_bank));
    dram.tick();
    assert!(dram.check_ready(Command::PreSb, &rank_bank));
    dram.issue_command(Command::PreSb, &rank_bank);
    assert_eq!(open_banks(&dram), 2 * 2 * 4 - 4);

    let closed = addr(&dram, &[(Level::Channel, 0), (Level::PseudoChannel, 0), (Level::Rank, 1), (Level::BankGroup, 1), (Level::Bank, 2), (Level::Row, 6)]);
    assert!(!dram.check_node_open(Command::Rd, &closed));
    let still_open = addr(&dram, &[(Level::Channel, 0), (Level::PseudoChannel, 1), (Level::Rank, 1), (Level::BankGroup, 1), (Level::Bank, 2), (Level::Row, 6)]);
    assert!(dram.check_node_open(Command::Rd, &still_open));
}

#[test]
fn per_bank_broadcast_spans_pseudo_channels() {
    let mut dram = pim();
    let path = addr(&dram, &[(Level::Channel, 0), (Level::Rank, 1), (Level::BankGroup, 2), (Level::Bank, 3), (Level::Row, 1)]);
    assert_eq!(dram.get_preq_command(Command::ActPb, &path), Command::ActPb);
    dram.issue_command(Command::ActPb, &path);
    assert_eq!(open_banks(&dram), 2);
    assert_eq!(dram.get_preq_command(Command::ActPb, &path), Command::PrePb);

    for pch in 0..2 {
        let mut bank = path.clone();
        bank[1] = pch;
        assert!(dram.check_node_open(Command::Rd, &bank));
    }

    let nras = dram.spec().timings.get("nRAS") as u64;
    advance(&mut dram, nras);
    assert!(dram.check_ready(Command::PrePb, &path));
    dram.issue_command(Command::PrePb, &path);
    assert_eq!(open_banks(&dram), 0);
}

#[test]
fn broadcast_activate_waits_for_every_bank() {
    let mut dram = pim();
    let one = addr(&dram, &[(Level::Channel, 0), (Level::PseudoChannel, 1), (Level::Rank, 1), (Level::BankGroup, 0), (Level::Bank, 0), (Level::Row, 2)]);
    dram.issue_command(Command::Act, &one);
    let nras = dram.spec().timings.get("nRAS") as u64;
    advance(&mut dram, nras);
    dram.issue_command(Command::Pre, &one);

    let all = addr(&dram, &[(Level::Channel, 0), (Level::Row, 4)]);
    assert_eq!(dram.get_preq_command(Command::ActAb, &all), Command::ActAb);
    // nRC from the ACT and nRP from the PRE, both at the one bank.
    let ready = (dram.spec().timings.get("nRC") as u64).max(nras + dram.spec().timings.get("nRP") as u64);
    assert_eq!(dram.ready_at(Command::ActAb, &all), Some(ready));
    advance(&mut dram, ready - 1);
    assert!(!dram.check_ready(Command::ActAb, &all));
    dram.tick();
    assert!(dram.check_ready(Command::ActAb, &all));
}

#[test]
fn broadcast_timing_covers_every_bank_it_opens() {
    let mut dram = pim();
    let issued = addr(&dram, &[(Level::Channel, 0), (Level::PseudoChannel, 0), (Level::Rank, 0), (Level::BankGroup, 0), (Level::Bank, 2), (Level::Row, 6)]);
    dram.issue_command(Command::ActSb, &issued);

    let other = addr(&dram, &[(Level::Channel, 0), (Level::PseudoChannel, 1), (Level::Rank, 1), (Level::BankGroup, 3), (Level::Bank, 2), (Level::Row, 6), (Level::Column, 0)]);
    assert!(dram.check_node_open(Command::Rd, &other));
    assert!(!dram.check_ready(Command::Rd, &other));
    let nrcdrd = dram.spec().timings.get("nRCDRD") as u64;
    assert_eq!(dram.ready_at(Command::Rd, &other), Some(nrcdrd));
    advance(&mut dram, nrcdrd - 1);
    assert!(!dram.check_ready(Command::Rd, &other));
    dram.tick();
    assert!(dram.check_ready(Command::Rd, &other));
}

#[test]
fn per_bank_precharge_waits_on_every_pseudo_channel() {
    let mut dram = pim();
    let pch0 = addr(&dram, &[(Level::Channel, 0), (Level::PseudoChannel, 0), (Level::Rank, 1), (Level::BankGroup, 2), (Level::Bank, 3), (Level::Row, 5)]);
    dram.issue_command(Command::ActPb, &pch0);
    assert_eq!(open_banks(&dram), 2);

    let mut pch1 = pch0.clone();
    pch1[1] = 1;
    let nras = dram.spec().timings.get("nRAS") as u64;
    assert_eq!(dram.ready_at(Command::Pre, &pch1), Some(nras));
    advance(&mut dram, nras - 1);
    assert!(!dram.check_ready(Command::Pre, &pch1));
    assert!(!dram.check_ready(Command::PrePb, &pch1));
    dram.tick();
    assert!(dram.check_ready(Command::PrePb, &pch1));
    dram.issue_command(Command::PrePb, &pch1);
    assert_eq!(open_banks(&dram), 0);
}

#[test]
fn wildcard_above_the_acting_node_is_never_ready() {
    let mut dram = pim();
    let bank = addr(&dram, &[(Level::Channel, 0), (Level::PseudoChannel, 1), (Level::Rank, 0), (Level::BankGroup, 1), (Level::Bank, 2), (Level::Row, 3)]);
    dram.issue_command(Command::Act, &bank);
    let nras = dram.spec().timings.get("nRAS") as u64;
    advance(&mut dram, nras);

    // PREsb acts at the rank, so the pseudo channel must be concrete.
    let any_pch = addr(&dram, &[(Level::Channel, 0), (Level::Rank, 0), (Level::Bank, 2)]);
    assert_eq!(dram.target(Command::PreSb, &any_pch), None);
    assert!(!dram.check_timing(Command::PreSb, &any_pch));
    assert!(!dram.check_ready(Command::PreSb, &any_pch));
    assert_eq!(dram.ready_at(Command::PreSb, &any_pch), None);

    let mut one_pch = any_pch.clone();
    one_pch[1] = 1;
    assert!(dram.check_ready(Command::PreSb, &one_pch));
    dram.issue_command(Command::PreSb, &one_pch);
    assert_eq!(open_banks(&dram), 0);

    // Same for bank-level actions.
    let any_bank = addr(&dram, &[(Level::Channel, 0), (Level::PseudoChannel, 0), (Level::Rank, 0), (Level::BankGroup, 0), (Level::Row, 3)]);
    assert!(!dram.check_ready(Command::Act, &any_bank));
}

#[test]
fn footprint_widens_unmatched_levels() {
    let topo = Topology::new(&Level::ALL).unwrap();
    let addr: AddrVec = smallvec::smallvec![0, 1, 1, 2, 3, 9, 4];
    let same_id = Traversal::bind(BankSet::SameIdUnder(Level::Channel), Level::Channel, &topo).unwrap();
    assert_eq!(same_id.footprint(&addr).as_slice(), &[0, -1, -1, -1, 3, 9, 4]);
    let same_path = Traversal::bind(BankSet::SamePathUnder(Level::Channel), Level::Channel, &topo).unwrap();
    assert_eq!(same_path.footprint(&addr).as_slice(), &[0, -1, 1, 2, 3, 9, 4]);
    let rank_id = Traversal::bind(BankSet::SameIdUnder(Level::Rank), Level::Rank, &topo).unwrap();
    assert_eq!(rank_id.footprint(&addr).as_slice(), &[0, 1, 1, -1, 3, 9, 4]);
}
