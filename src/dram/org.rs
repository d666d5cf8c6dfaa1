use anyhow::{bail, Result};
use smallvec::SmallVec;

use crate::dram::level::{Level, Topology, NUM_LEVELS};
use crate::sim::config::OrgConfig;

/// Organization preset: density in Mb, data width, and one count per topology
/// level in topology order.
#[derive(Debug, Clone, Copy)]
pub struct OrgPreset {
    pub density: u64,
    pub dq: u64,
    pub count: &'static [u64],
}

/// Resolved device geometry. Immutable after initialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Organization {
    /// Megabits per channel.
    pub density: u64,
    pub dq: u64,
    /// Children per parent, one entry per topology depth.
    pub count: SmallVec<[u64; NUM_LEVELS]>,
}

impl Organization {
    /// Resolve preset and overrides, then verify the declared density.
    pub fn resolve(
        device: &str,
        topology: &Topology,
        presets: &phf::Map<&'static str, OrgPreset>,
        internal_prefetch: u64,
        config: &OrgConfig,
    ) -> Result<Self> {
        let mut density = None;
        let mut dq = None;
        let mut count: SmallVec<[Option<u64>; NUM_LEVELS]> = smallvec::smallvec![None; topology.len()];

        if let Some(name) = &config.preset {
            let Some(preset) = presets.get(name.as_str()) else {
                bail!("Unrecognized organization preset \"{}\" in {}!", name, device);
            };
            if preset.count.len() != topology.len() {
                bail!(
                    "organization preset \"{}\" has {} levels, {} has {}",
                    name,
                    preset.count.len(),
                    device,
                    topology.len()
                );
            }
            density = Some(preset.density);
            dq = Some(preset.dq);
            for (slot, &value) in count.iter_mut().zip(preset.count) {
                *slot = Some(value);
            }
        }

        if let Some(value) = config.dq {
            dq = Some(value);
        }
        for level in Level::ALL {
            let Some(value) = config.count(level) else {
                continue;
            };
            match topology.depth(level) {
                Some(depth) => count[depth] = Some(value),
                None => bail!("{} has no {} level, cannot set its count", device, level),
            }
        }
        if let Some(value) = config.density {
            density = Some(value);
        }

        let Some(density) = density else {
            bail!("In \"{}\", organization density is not specified!", device);
        };
        let Some(dq) = dq else {
            bail!("In \"{}\", organization dq is not specified!", device);
        };
        let mut resolved = SmallVec::with_capacity(count.len());
        for (depth, value) in count.into_iter().enumerate() {
            match value {
                Some(0) => bail!("In \"{}\", {} count must be positive!", device, topology.level_at(depth)),
                Some(value) => resolved.push(value),
                None => bail!(
                    "In \"{}\", organization {} count is not specified!",
                    device,
                    topology.level_at(depth)
                ),
            }
        }

        let org = Organization { density, dq, count: resolved };
        let computed = org.computed_density(internal_prefetch);
        if computed != Some(density) {
            bail!(
                "Calculated {} channel density {} Mb does not equal the provided density {} Mb!",
                device,
                computed.map_or_else(|| "overflowing".to_string(), |mb| mb.to_string()),
                density
            );
        }
        Ok(org)
    }

    /// Megabits per channel implied by the per-level counts, or `None` on overflow.
    pub fn computed_density(&self, internal_prefetch: u64) -> Option<u64> {
        let bits = self
            .count
            .iter()
            .skip(1)
            .chain([self.dq, internal_prefetch].iter())
            .try_fold(1u64, |acc, &factor| acc.checked_mul(factor))?;
        Some(bits >> 20)
    }

    pub fn count_at(&self, depth: usize) -> u64 {
        self.count[depth]
    }

    pub fn count_of(&self, topology: &Topology, level: Level) -> Option<u64> {
        topology.depth(level).map(|depth| self.count[depth])
    }

    pub fn channels(&self) -> u64 {
        self.count[0]
    }
}
