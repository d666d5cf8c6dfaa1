use anyhow::{anyhow, bail, Context, Result};
use log::info;
use num_traits::FromPrimitive;
use smallvec::SmallVec;

use crate::dram::command::{Command, CommandDef, CommandMeta, Request, NUM_COMMANDS};
use crate::dram::dispatch::{ActionDef, Dispatch, PreqDef, RowHit, RowOpen};
use crate::dram::hbm3;
use crate::dram::level::{Level, Topology, NUM_LEVELS};
use crate::dram::org::{OrgPreset, Organization};
use crate::dram::timing::{TimingRecipe, TimingRule, TimingTable, TimingValues};
use crate::dram::types::{Cycle, NodeState};
use crate::sim::config::DramConfig;

/// Everything that distinguishes one device family: pure data plus a few
/// plain functions over resolved values.
pub struct DeviceDescription {
    pub name: &'static str,
    pub levels: &'static [Level],
    pub commands: &'static [CommandDef],
    pub requests: &'static [(Request, Command)],
    /// Initial state of nodes at each level; unlisted levels are N/A.
    pub init_states: &'static [(Level, NodeState)],
    pub internal_prefetch: u64,
    pub org_presets: &'static phf::Map<&'static str, OrgPreset>,
    pub timing_names: &'static [&'static str],
    pub timing_presets: &'static phf::Map<&'static str, &'static [i64]>,
    /// Transfer rate (MT/s) to clock period (ps).
    pub clock_period_ps: fn(u64) -> u64,
    /// Fill timing slots still unset after presets and overrides.
    pub derive_timings: fn(&Organization, &Topology, &mut TimingValues) -> Result<()>,
    pub read_latency: fn(&TimingValues) -> i64,
    pub timing_rules: fn(&TimingValues) -> Vec<TimingRule>,
    pub actions: &'static [(Level, Command, ActionDef)],
    pub preqs: &'static [(Level, Command, PreqDef)],
    pub rowhits: &'static [(Level, Command, RowHit)],
    pub rowopens: &'static [(Level, Command, RowOpen)],
}

/// Look up a built-in device description by name.
pub fn lookup(name: &str) -> Option<&'static DeviceDescription> {
    match name {
        "HBM3" => Some(&hbm3::HBM3),
        "HBM3-PIM" => Some(&hbm3::HBM3_PIM),
        _ => None,
    }
}

/// A device description resolved against a configuration. Immutable for the
/// lifetime of the device.
#[derive(Debug)]
pub struct DeviceSpec {
    pub name: &'static str,
    pub topology: Topology,
    pub organization: Organization,
    pub timings: TimingValues,
    pub read_latency: Cycle,
    pub table: TimingTable,
    pub dispatch: Dispatch,
    pub init_states: SmallVec<[NodeState; NUM_LEVELS]>,
    scope_depths: [Option<usize>; NUM_COMMANDS],
    metas: [Option<CommandMeta>; NUM_COMMANDS],
    requests: SmallVec<[(Request, Command); 8]>,
}

impl DeviceSpec {
    pub fn resolve(desc: &DeviceDescription, config: &DramConfig) -> Result<Self> {
        let topology = Topology::new(desc.levels).with_context(|| format!("in {}", desc.name))?;

        let organization = Organization::resolve(
            desc.name,
            &topology,
            desc.org_presets,
            desc.internal_prefetch,
            &config.org,
        )?;

        let recipe = TimingRecipe {
            device: desc.name,
            names: desc.timing_names,
            presets: desc.timing_presets,
            clock_period_ps: desc.clock_period_ps,
            derive: desc.derive_timings,
        };
        let timings = TimingValues::resolve(&recipe, &organization, &topology, &config.timing)?;
        let read_latency = Cycle::try_from((desc.read_latency)(&timings))
            .map_err(|_| anyhow!("In \"{}\", read latency is negative!", desc.name))?;

        let rules = (desc.timing_rules)(&timings);
        let table = TimingTable::compile(&topology, &rules).with_context(|| format!("in {}", desc.name))?;

        let dispatch = Dispatch::bind(&topology, desc.actions, desc.preqs, desc.rowhits, desc.rowopens)
            .with_context(|| format!("in {}", desc.name))?;

        let mut scope_depths = [None; NUM_COMMANDS];
        let mut metas = [None; NUM_COMMANDS];
        for def in desc.commands {
            let depth = topology
                .require(def.scope)
                .with_context(|| format!("scope of {} in {}", def.command, desc.name))?;
            if scope_depths[def.command.index()].is_some() {
                bail!("command {} is defined twice in {}", def.command, desc.name);
            }
            scope_depths[def.command.index()] = Some(depth);
            metas[def.command.index()] = Some(def.meta);
        }
        for &(request, command) in desc.requests {
            if scope_depths[command.index()].is_none() {
                bail!("request {} translates to {}, which {} does not support", request, command, desc.name);
            }
        }

        let mut init_states: SmallVec<[NodeState; NUM_LEVELS]> =
            smallvec::smallvec![NodeState::NotApplicable; topology.len()];
        for &(level, state) in desc.init_states {
            if let Some(depth) = topology.depth(level) {
                init_states[depth] = state;
            }
        }

        info!(
            "{}: {} channel(s), density {} Mb, tCK {} ps, {} timing constraints, {} dispatch entries",
            desc.name,
            organization.channels(),
            organization.density,
            timings.tck_ps(),
            table.len(),
            dispatch.actions.registered()
                + dispatch.preqs.registered()
                + dispatch.rowhits.registered()
                + dispatch.rowopens.registered(),
        );

        Ok(Self {
            name: desc.name,
            topology,
            organization,
            timings,
            read_latency,
            table,
            dispatch,
            init_states,
            scope_depths,
            metas,
            requests: desc.requests.iter().copied().collect(),
        })
    }

    pub fn supports(&self, command: Command) -> bool {
        self.scope_depths[command.index()].is_some()
    }

    pub fn scope_depth(&self, command: Command) -> Option<usize> {
        self.scope_depths[command.index()]
    }

    pub fn meta(&self, command: Command) -> Option<CommandMeta> {
        self.metas[command.index()]
    }

    pub fn commands(&self) -> impl Iterator<Item = Command> + '_ {
        self.scope_depths
            .iter()
            .enumerate()
            .filter(|(_, depth)| depth.is_some())
            .filter_map(|(index, _)| Command::from_usize(index))
    }

    pub fn translate(&self, request: Request) -> Option<Command> {
        self.requests
            .iter()
            .find(|(candidate, _)| *candidate == request)
            .map(|(_, command)| *command)
    }
}
