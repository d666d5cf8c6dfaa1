use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dramcycle::dram::device::Dram;
use dramcycle::sim::trace::{load_trace, replay, ReplayReport};
use dramcycle::ui::{load_config, log_filter, DramcycleArgs};

pub fn main() -> Result<()> {
    let argv = DramcycleArgs::parse();
    let config = fs::read_to_string(&argv.config_path)
        .with_context(|| format!("failed to read config file {}", argv.config_path.display()))?;

    let (sim_config, dram_config) = load_config(&config, Some(&argv))?;
    env_logger::Builder::from_default_env()
        .filter_level(log_filter(sim_config.log_level))
        .init();

    let mut dram = Dram::new(Arc::new(dram_config))?;
    let spec = dram.spec();
    println!(
        "{}: {} channel(s), {} Mb/channel, tCK {} ps, read latency {} cycles",
        spec.name,
        spec.organization.channels(),
        spec.organization.density,
        spec.timings.tck_ps(),
        spec.read_latency
    );

    let Some(trace_path) = sim_config.trace.as_deref() else {
        return Ok(());
    };
    let entries = load_trace(trace_path)?;
    let report = replay(&mut dram, &entries, sim_config.strict)?;
    if argv.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(())
}

fn print_summary(report: &ReplayReport) {
    let stats = &report.stats;
    println!("replayed {} command(s), final clock {}", stats.total_issued(), stats.final_clk);
    for (command, count) in &stats.issued {
        println!("  {:<6} {}", command, count);
    }
    let rb = &stats.row_buffer;
    println!(
        "row buffer: {} hit(s), {} miss(es), {} conflict(s), hit rate {:.3}",
        rb.hits,
        rb.misses,
        rb.conflicts,
        rb.hit_rate()
    );
    println!(
        "violations: {} prerequisite, {} timing",
        stats.prerequisite_violations, stats.timing_violations
    );
    for violation in &report.violations {
        println!(
            "  line {}: {} at {} {:?}: {:?}",
            violation.line, violation.command, violation.clk, violation.addr, violation.kind
        );
    }
}
