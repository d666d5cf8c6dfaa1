use crate::dram::command::Command;
use crate::dram::hbm3::HBM3;
use crate::dram::level::{Level, Topology};
use crate::dram::org::Organization;
use crate::dram::timing::{jedec_rounding, TimingRecipe, TimingRule, TimingTable, TimingValues};
use crate::sim::config::{OrgConfig, TimingConfig};

use super::{hbm3_config, spec};

fn org(preset: &str) -> (Topology, Organization) {
    let topo = Topology::new(HBM3.levels).unwrap();
    let config = OrgConfig {
        preset: Some(preset.to_string()),
        ..OrgConfig::default()
    };
    let org = Organization::resolve(HBM3.name, &topo, HBM3.org_presets, HBM3.internal_prefetch, &config).unwrap();
    (topo, org)
}

fn resolve_with(org_preset: &str, config: &TimingConfig) -> anyhow::Result<TimingValues> {
    let (topo, org) = org(org_preset);
    let recipe = TimingRecipe {
        device: HBM3.name,
        names: HBM3.timing_names,
        presets: HBM3.timing_presets,
        clock_period_ps: HBM3.clock_period_ps,
        derive: HBM3.derive_timings,
    };
    TimingValues::resolve(&recipe, &org, &topo, config)
}

fn resolve(config: &TimingConfig) -> anyhow::Result<TimingValues> {
    resolve_with("HBM3_8Gb_2R", config)
}

/// Every cycle count of a 4.8 Gbps part, with the derived slots filled in.
fn full_manual_config() -> TimingConfig {
    let preset = HBM3.timing_presets.get("HBM3_4.8Gbps").unwrap();
    let mut config = TimingConfig {
        rate: Some(4800),
        ..TimingConfig::default()
    };
    for (name, &value) in HBM3.timing_names.iter().zip(preset.iter()) {
        if *name != "rate" && *name != "tCK_ps" && value >= 0 {
            config.set_cycles(name, value);
        }
    }
    config.set_cycles("nRFC", 421).set_cycles("nREFISB", 147);
    config
}

#[test]
fn jedec_rounding_is_ceiling() {
    assert_eq!(jedec_rounding(14.0, 833), 17);
    assert_eq!(jedec_rounding(16.66, 833), 20);
    assert_eq!(jedec_rounding(8.33, 833), 10);
    assert_eq!(jedec_rounding(0.833, 833), 1);
    assert_eq!(jedec_rounding(0.0, 833), 0);
}

#[test]
fn every_preset_round_trips() {
    for (name, row) in HBM3.timing_presets.entries() {
        let timings = resolve(&TimingConfig::with_preset(name)).unwrap_or_else(|err| panic!("{}: {:#}", name, err));
        for (slot, &declared) in HBM3.timing_names.iter().zip(row.iter()) {
            if declared >= 0 {
                assert_eq!(timings.get(slot), declared, "{} {}", name, slot);
            }
        }
        let rate = timings.get("rate") as u64;
        assert_eq!(timings.tck_ps(), (HBM3.clock_period_ps)(rate), "{}", name);
    }
}

#[test]
fn derived_refresh_timings() {
    let timings = resolve(&TimingConfig::with_preset("HBM3_4.8Gbps")).unwrap();
    // 350 ns and 122 ns at 833 ps.
    assert_eq!(timings.get("nRFC"), 421);
    assert_eq!(timings.get("nREFISB"), 147);

    let timings = resolve_with("HBM3_32Gb_4R", &TimingConfig::with_preset("HBM3_4.8Gbps")).unwrap();
    // 650 ns and 61 ns.
    assert_eq!(timings.get("nRFC"), 781);
    assert_eq!(timings.get("nREFISB"), 74);

    let mut config = TimingConfig::with_preset("HBM3_4.8Gbps");
    config.set_cycles("nRFC", 300);
    assert_eq!(resolve(&config).unwrap().get("nRFC"), 300);
}

#[test]
fn cycle_and_ns_overrides() {
    let mut config = TimingConfig::with_preset("HBM3_4.8Gbps");
    config.set_cycles("nRCDRD", 20).set_ns("tRP", 14.0).set_ns("tRAS", 40.0);
    let timings = resolve(&config).unwrap();
    assert_eq!(timings.get("nRCDRD"), 20);
    assert_eq!(timings.get("nRP"), 17);
    assert_eq!(timings.get("nRAS"), 49);
    assert_eq!(timings.get("nRC"), 58);
}

#[test]
fn cycle_override_beats_ns_override() {
    let mut config = TimingConfig::with_preset("HBM3_4.8Gbps");
    config.set_ns("tRP", 100.0).set_cycles("nRP", 12);
    assert_eq!(resolve(&config).unwrap().get("nRP"), 12);
}

#[test]
fn rate_without_preset_derives_clock() {
    let timings = resolve(&full_manual_config()).unwrap();
    assert_eq!(timings.get("tCK_ps"), 833);
    assert_eq!(timings.get("nFAW"), 36);
}

#[test]
fn rate_with_preset_is_rejected() {
    let mut config = TimingConfig::with_preset("HBM3_4.8Gbps");
    config.rate = Some(5200);
    let err = resolve(&config).unwrap_err();
    assert!(err.to_string().contains("transfer rate"), "{}", err);
}

#[test]
fn unresolved_timing_is_rejected() {
    let mut config = full_manual_config();
    config.params.remove("nRREFD");
    let err = resolve(&config).unwrap_err();
    assert!(err.to_string().contains("timing nRREFD is not specified"), "{}", err);

    assert!(resolve(&TimingConfig::default()).is_err());
}

#[test]
fn bad_timing_values_are_rejected() {
    let mut config = TimingConfig::with_preset("HBM3_4.8Gbps");
    config.set_cycles("nRP", -3);
    assert!(resolve(&config).is_err());

    let mut config = TimingConfig::with_preset("HBM3_4.8Gbps");
    config.set_ns("tBOGUS", 3.0);
    assert!(resolve(&config).is_err());

    let mut config = TimingConfig::with_preset("HBM3_4.8Gbps");
    config.set_cycles("tCK_ps", 1000);
    assert!(resolve(&config).is_err());

    let mut config = TimingConfig::with_preset("HBM3_4.8Gbps");
    config.params.insert("nRP".to_string(), toml::Value::Float(12.5));
    assert!(resolve(&config).is_err());

    assert!(resolve(&TimingConfig::with_preset("HBM3_9.9Gbps")).is_err());
}

#[test]
fn timing_table_indexes_by_depth_and_command() {
    let topo = Topology::new(HBM3.levels).unwrap();
    let rules = vec![
        TimingRule::new(Level::Bank, &[Command::Act], &[Command::Rd, Command::RdA], 17),
        TimingRule::new(Level::Rank, &[Command::Act], &[Command::Act], 36).window(4),
    ];
    let table = TimingTable::compile(&topo, &rules).unwrap();
    assert_eq!(table.len(), 3);
    assert_eq!(table.constraints(4, Command::Act).len(), 2);
    assert_eq!(table.constraints(2, Command::Act)[0].window, 4);
    assert_eq!(table.history_len(2, Command::Act), 4);
    assert_eq!(table.history_len(4, Command::Act), 0);
    assert!(table.constraints(4, Command::Pre).is_empty());
}

#[test]
fn timing_table_rejects_bad_rules() {
    let topo = Topology::new(&[Level::Channel, Level::Bank, Level::Row, Level::Column]).unwrap();
    let missing = [TimingRule::new(Level::Rank, &[Command::Act], &[Command::Act], 2)];
    assert!(TimingTable::compile(&topo, &missing).is_err());
    let negative = [TimingRule::new(Level::Bank, &[Command::Act], &[Command::Act], -1)];
    assert!(TimingTable::compile(&topo, &negative).is_err());
    let row = [TimingRule::new(Level::Row, &[Command::Act], &[Command::Act], 1)];
    assert!(TimingTable::compile(&topo, &row).is_err());
    let window = [TimingRule::new(Level::Bank, &[Command::Act], &[Command::Act], 1).window(0)];
    assert!(TimingTable::compile(&topo, &window).is_err());
}

#[test]
fn resolved_spec_exposes_read_latency() {
    let spec = spec(&HBM3, &hbm3_config());
    assert_eq!(spec.read_latency, 19);
    assert!(!spec.table.is_empty());
}
