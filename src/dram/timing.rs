use anyhow::{anyhow, bail, Result};
use smallvec::SmallVec;
use toml::Value;

use crate::dram::command::{Command, NUM_COMMANDS};
use crate::dram::level::{Level, Topology};
use crate::dram::org::Organization;
use crate::dram::types::Cycle;
use crate::sim::config::TimingConfig;

/// Convert a physical time to cycles: the smallest cycle count whose duration
/// is at least `t_ns`.
pub fn jedec_rounding(t_ns: f64, tck_ps: u64) -> u64 {
    assert!(tck_ps > 0, "clock period must be positive");
    let t_ps = (t_ns * 1000.0).round().max(0.0) as u64;
    t_ps.div_ceil(tck_ps)
}

/// Named vector of timing parameters in cycles, plus `rate` (MT/s) and
/// `tCK_ps` (ps).
#[derive(Debug, Clone)]
pub struct TimingValues {
    names: &'static [&'static str],
    vals: Vec<Option<i64>>,
}

impl TimingValues {
    pub fn unset(names: &'static [&'static str]) -> Self {
        Self {
            names,
            vals: vec![None; names.len()],
        }
    }

    pub fn names(&self) -> &'static [&'static str] {
        self.names
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|candidate| *candidate == name)
    }

    pub fn try_get(&self, name: &str) -> Option<i64> {
        self.index_of(name).and_then(|idx| self.vals[idx])
    }

    /// Value of a resolved parameter.
    ///
    /// # Panics
    /// If `name` is not a parameter of this device or is still unset; device
    /// descriptions only call this after resolution.
    pub fn get(&self, name: &str) -> i64 {
        let idx = self
            .index_of(name)
            .unwrap_or_else(|| panic!("unknown timing parameter {}", name));
        self.vals[idx].unwrap_or_else(|| panic!("timing {} is not resolved", name))
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.try_get(name).is_some()
    }

    pub fn set(&mut self, name: &str, value: i64) -> Result<()> {
        let idx = self
            .index_of(name)
            .ok_or_else(|| anyhow!("unknown timing parameter {}", name))?;
        self.vals[idx] = Some(value);
        Ok(())
    }

    /// Set `name` only if nothing has resolved it yet.
    pub fn set_default(&mut self, name: &str, value: i64) -> Result<()> {
        if !self.is_set(name) {
            self.set(name, value)?;
        }
        Ok(())
    }

    pub fn tck_ps(&self) -> u64 {
        self.try_get("tCK_ps").unwrap_or_default().max(0) as u64
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, Option<i64>)> + '_ {
        self.names.iter().copied().zip(self.vals.iter().copied())
    }
}

/// Rules a device needs to resolve its timing values.
pub struct TimingRecipe<'a> {
    pub device: &'a str,
    pub names: &'static [&'static str],
    pub presets: &'static phf::Map<&'static str, &'static [i64]>,
    pub clock_period_ps: fn(u64) -> u64,
    pub derive: fn(&Organization, &Topology, &mut TimingValues) -> Result<()>,
}

impl TimingValues {
    /// Resolve preset → cycle overrides → physical-time overrides → derived
    /// defaults, then insist every slot holds a non-negative value.
    pub fn resolve(
        recipe: &TimingRecipe<'_>,
        org: &Organization,
        topology: &Topology,
        config: &TimingConfig,
    ) -> Result<Self> {
        let device = recipe.device;
        let mut timings = TimingValues::unset(recipe.names);

        let mut preset_provided = false;
        if let Some(name) = &config.preset {
            let Some(row) = recipe.presets.get(name.as_str()) else {
                bail!("Unrecognized timing preset \"{}\" in {}!", name, device);
            };
            if row.len() != recipe.names.len() {
                bail!("timing preset \"{}\" has {} values, expected {}", name, row.len(), recipe.names.len());
            }
            for (slot, &value) in timings.vals.iter_mut().zip(row.iter()) {
                *slot = (value >= 0).then_some(value);
            }
            preset_provided = true;
        }

        if let Some(rate) = config.rate {
            if preset_provided {
                bail!("Cannot change the transfer rate of {} when using a speed preset!", device);
            }
            timings.set("rate", rate as i64)?;
        }
        let Some(rate) = timings.try_get("rate").filter(|rate| *rate > 0) else {
            bail!("In \"{}\", timing rate is not specified!", device);
        };
        if !timings.is_set("tCK_ps") {
            let tck = (recipe.clock_period_ps)(rate as u64);
            if tck == 0 {
                bail!("In \"{}\", rate {} gives a zero clock period!", device, rate);
            }
            timings.set("tCK_ps", tck as i64)?;
        }
        let tck_ps = timings.tck_ps();

        for (key, value) in &config.params {
            if timings.index_of(key).is_none() {
                continue;
            }
            if key == "rate" || key == "tCK_ps" {
                bail!("In \"{}\", {} cannot be overridden!", device, key);
            }
            let cycles = match value {
                Value::Integer(cycles) => *cycles,
                Value::Float(cycles) if cycles.fract() == 0.0 => *cycles as i64,
                other => bail!("In \"{}\", timing {} must be an integer cycle count, got {}", device, key, other),
            };
            timings.set(key, cycles)?;
        }

        for (key, value) in &config.params {
            if timings.index_of(key).is_some() {
                continue;
            }
            let Some(cycle_name) = key.strip_prefix('t').map(|rest| format!("n{}", rest)) else {
                bail!("In \"{}\", unknown timing parameter {}!", device, key);
            };
            if timings.index_of(&cycle_name).is_none() {
                bail!("In \"{}\", unknown timing parameter {}!", device, key);
            }
            // Cycle counts given explicitly take precedence.
            if config.params.contains_key(&cycle_name) {
                continue;
            }
            let ns = match value {
                Value::Float(ns) => *ns,
                Value::Integer(ns) => *ns as f64,
                other => bail!("In \"{}\", timing {} must be a time in ns, got {}", device, key, other),
            };
            if ns < 0.0 {
                bail!("In \"{}\", timing {} must not be negative!", device, key);
            }
            timings.set(&cycle_name, jedec_rounding(ns, tck_ps) as i64)?;
        }

        (recipe.derive)(org, topology, &mut timings)?;

        for (name, value) in timings.iter() {
            match value {
                None => bail!("In \"{}\", timing {} is not specified!", device, name),
                Some(value) if value < 0 => bail!("In \"{}\", timing {} is negative ({})!", device, name, value),
                Some(_) => {}
            }
        }
        Ok(timings)
    }
}

/// Declarative constraint: after any command in `preceding` is issued at a
/// node of `level`, commands in `following` must wait `latency` cycles.
///
/// With `window = n > 1` the latency is counted from the n-th most recent
/// preceding issue, so no more than `n` preceding commands fit in `latency`.
/// `sibling` rules apply to the other nodes of `level` instead of the
/// addressed one.
#[derive(Debug, Clone)]
pub struct TimingRule {
    pub level: Level,
    pub preceding: SmallVec<[Command; 4]>,
    pub following: SmallVec<[Command; 8]>,
    pub latency: i64,
    pub window: usize,
    pub sibling: bool,
}

impl TimingRule {
    pub fn new(level: Level, preceding: &[Command], following: &[Command], latency: i64) -> Self {
        Self {
            level,
            preceding: preceding.iter().copied().collect(),
            following: following.iter().copied().collect(),
            latency,
            window: 1,
            sibling: false,
        }
    }

    pub fn window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    pub fn sibling(mut self) -> Self {
        self.sibling = true;
        self
    }
}

/// A compiled rule, stored under its preceding command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constraint {
    pub following: Command,
    pub latency: Cycle,
    pub window: usize,
    pub sibling: bool,
}

/// Constraints indexed by (depth, preceding command).
#[derive(Debug, Clone)]
pub struct TimingTable {
    depths: usize,
    cons: Vec<Vec<Constraint>>,
    history_len: Vec<usize>,
    has_sibling: Vec<bool>,
    reach: [usize; NUM_COMMANDS],
}

impl TimingTable {
    pub fn compile(topology: &Topology, rules: &[TimingRule]) -> Result<Self> {
        let depths = topology.len();
        let mut table = Self {
            depths,
            cons: vec![Vec::new(); depths * NUM_COMMANDS],
            history_len: vec![0; depths * NUM_COMMANDS],
            has_sibling: vec![false; depths * NUM_COMMANDS],
            reach: [0; NUM_COMMANDS],
        };

        for rule in rules {
            let depth = topology.depth(rule.level).ok_or_else(|| {
                anyhow!(
                    "timing rule {:?} -> {:?} targets the {} level, which the topology lacks",
                    rule.preceding.as_slice(),
                    rule.following.as_slice(),
                    rule.level
                )
            })?;
            if depth >= topology.row_depth() {
                bail!("timing rules must target a level above the row, got {}", rule.level);
            }
            let Ok(latency) = Cycle::try_from(rule.latency) else {
                bail!(
                    "timing rule {:?} -> {:?} at {} has negative latency {}",
                    rule.preceding.as_slice(),
                    rule.following.as_slice(),
                    rule.level,
                    rule.latency
                );
            };
            if rule.window == 0 {
                bail!("timing rule window at {} must be at least 1", rule.level);
            }
            for &preceding in &rule.preceding {
                let slot = depth * NUM_COMMANDS + preceding.index();
                for &following in &rule.following {
                    table.reach[following.index()] = table.reach[following.index()].max(depth);
                    table.cons[slot].push(Constraint {
                        following,
                        latency,
                        window: rule.window,
                        sibling: rule.sibling,
                    });
                }
                if rule.window > 1 && !rule.sibling {
                    table.history_len[slot] = table.history_len[slot].max(rule.window);
                }
                table.has_sibling[slot] |= rule.sibling;
            }
        }
        Ok(table)
    }

    pub fn depths(&self) -> usize {
        self.depths
    }

    pub fn constraints(&self, depth: usize, preceding: Command) -> &[Constraint] {
        &self.cons[depth * NUM_COMMANDS + preceding.index()]
    }

    /// Issue clocks a node at `depth` must remember for windowed rules.
    pub fn history_len(&self, depth: usize, preceding: Command) -> usize {
        self.history_len[depth * NUM_COMMANDS + preceding.index()]
    }

    /// Deepest level holding a constraint on `following`; readiness checks
    /// need not descend further.
    pub fn reach(&self, following: Command) -> usize {
        self.reach[following.index()]
    }

    pub fn has_sibling(&self, depth: usize, preceding: Command) -> bool {
        self.has_sibling[depth * NUM_COMMANDS + preceding.index()]
    }

    pub fn len(&self) -> usize {
        self.cons.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
