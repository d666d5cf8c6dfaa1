use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use toml::*;

use crate::dram::level::Level;

pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> Result<Self> {
        match section {
            Some(value) => value
                .clone()
                .try_into()
                .with_context(|| format!("cannot deserialize {}", std::any::type_name::<Self>())),
            None => {
                warn!("config section for {} not found", std::any::type_name::<Self>());
                Ok(Self::default())
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    /// Command trace to replay against the device.
    pub trace: Option<PathBuf>,
    pub log_level: u64,
    /// Stop replay at the first violation.
    pub strict: bool,
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            trace: None,
            log_level: 0,
            strict: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DramConfig {
    /// Name of the device description, e.g. "HBM3".
    #[serde(rename = "impl")]
    pub impl_name: String,
    pub org: OrgConfig,
    pub timing: TimingConfig,
}

impl Config for DramConfig {}

impl Default for DramConfig {
    fn default() -> Self {
        Self {
            impl_name: "HBM3".to_string(),
            org: OrgConfig::default(),
            timing: TimingConfig::default(),
        }
    }
}

/// Organization overrides. Every field left out keeps the preset's value.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct OrgConfig {
    pub preset: Option<String>,
    pub dq: Option<u64>,
    /// Megabits per channel.
    pub density: Option<u64>,
    pub channel: Option<u64>,
    pub pseudochannel: Option<u64>,
    pub rank: Option<u64>,
    pub bankgroup: Option<u64>,
    pub bank: Option<u64>,
    pub row: Option<u64>,
    pub column: Option<u64>,
}

impl OrgConfig {
    pub fn count(&self, level: Level) -> Option<u64> {
        match level {
            Level::Channel => self.channel,
            Level::PseudoChannel => self.pseudochannel,
            Level::Rank => self.rank,
            Level::BankGroup => self.bankgroup,
            Level::Bank => self.bank,
            Level::Row => self.row,
            Level::Column => self.column,
        }
    }
}

/// Timing overrides: `nX = <cycles>` or `tX = <nanoseconds>` for any timing
/// parameter `nX` of the device.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct TimingConfig {
    pub preset: Option<String>,
    /// Transfer rate in MT/s; only valid without a preset.
    pub rate: Option<u64>,
    #[serde(flatten)]
    pub params: BTreeMap<String, Value>,
}

impl TimingConfig {
    pub fn with_preset(preset: &str) -> Self {
        Self {
            preset: Some(preset.to_string()),
            ..Self::default()
        }
    }

    pub fn set_cycles(&mut self, name: &str, cycles: i64) -> &mut Self {
        self.params.insert(name.to_string(), Value::Integer(cycles));
        self
    }

    pub fn set_ns(&mut self, name: &str, ns: f64) -> &mut Self {
        self.params.insert(name.to_string(), Value::Float(ns));
        self
    }
}
