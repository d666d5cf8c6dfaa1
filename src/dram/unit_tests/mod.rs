#[cfg(test)]
mod dispatch_tests;
#[cfg(test)]
mod timing_tests;

use std::sync::Arc;

use crate::dram::device::Dram;
use crate::dram::spec::{DeviceDescription, DeviceSpec};
use crate::sim::config::{DramConfig, OrgConfig, TimingConfig};

pub(crate) fn config(impl_name: &str, org_preset: &str, timing_preset: &str) -> DramConfig {
    DramConfig {
        impl_name: impl_name.to_string(),
        org: OrgConfig {
            preset: Some(org_preset.to_string()),
            ..OrgConfig::default()
        },
        timing: TimingConfig::with_preset(timing_preset),
    }
}

pub(crate) fn hbm3_config() -> DramConfig {
    config("HBM3", "HBM3_8Gb_2R", "HBM3_4.8Gbps")
}

pub(crate) fn dram(config: DramConfig) -> Dram {
    Dram::new(Arc::new(config)).expect("device should build")
}

pub(crate) fn hbm3() -> Dram {
    dram(hbm3_config())
}

pub(crate) fn pim() -> Dram {
    dram(config("HBM3-PIM", "HBM3_8Gb_2R", "HBM3_4.8Gbps"))
}

pub(crate) fn spec(desc: &DeviceDescription, config: &DramConfig) -> Arc<DeviceSpec> {
    Arc::new(DeviceSpec::resolve(desc, config).expect("spec should resolve"))
}
