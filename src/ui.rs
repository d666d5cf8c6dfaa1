use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;
use toml::Table;

use crate::sim::config::{Config, DramConfig, SimConfig};

#[derive(Parser, Debug, Default)]
#[command(version, about)]
pub struct DramcycleArgs {
    #[arg(help = "Path to config.toml")]
    pub config_path: PathBuf,
    #[arg(long, help = "Override command trace to replay")]
    pub trace: Option<PathBuf>,
    #[arg(long, help = "Enable log at level (0:none, 1:info, 2:debug)")]
    pub log: Option<u64>,
    #[arg(long, help = "Stop at the first violation")]
    pub strict: bool,
    #[arg(long, help = "Print the replay report as JSON")]
    pub json: bool,
}

/// Parse the TOML configuration into its sections.
/// If `cli_args` is given, override TOML options with CLI arguments.
pub fn load_config(toml_string: &str, cli_args: Option<&DramcycleArgs>) -> Result<(SimConfig, DramConfig)> {
    let config_table: Table = toml::from_str(toml_string).context("cannot parse config toml")?;
    let mut sim_config = SimConfig::from_section(config_table.get("sim"))?;
    let dram_config = DramConfig::from_section(config_table.get("dram"))?;

    // override toml configs with CLI args
    if let Some(args) = cli_args {
        sim_config.log_level = args.log.unwrap_or(sim_config.log_level);
        sim_config.trace = args.trace.clone().or(sim_config.trace);
        sim_config.strict |= args.strict;
    }

    Ok((sim_config, dram_config))
}

/// Log filter for `log_level`: 0 is off, 1 info, anything higher debug.
pub fn log_filter(log_level: u64) -> LevelFilter {
    match log_level {
        0 => LevelFilter::Off,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    }
}
