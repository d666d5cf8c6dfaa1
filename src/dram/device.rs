use std::sync::Arc;

use anyhow::{anyhow, Result};
use log::{debug, info};

use crate::base::behavior::*;
use crate::base::module::{module, IsModule, ModuleBase};
use crate::dram::channel::Channel;
use crate::dram::command::{Command, Request};
use crate::dram::spec::{self, DeviceDescription, DeviceSpec};
use crate::dram::types::{AddrVec, Cycle};
use crate::sim::config::DramConfig;

#[derive(Debug, Default)]
pub struct DramState {
    channels: Vec<Channel>,
}

/// The device as the memory controller sees it.
///
/// Every query takes a command and a fully decomposed address (one coordinate
/// per topology level, `-1` for levels the command does not address) and is
/// evaluated at the device's current clock. Callers must consult
/// [`Dram::check_ready`] before [`Dram::issue_command`]; issuing an illegal
/// command is not detected.
pub struct Dram {
    base: ModuleBase<DramState, DramConfig>,
    spec: Arc<DeviceSpec>,
}

module!(Dram, DramState, DramConfig,);

impl ModuleBehaviors for Dram {
    fn tick_one(&mut self) {
        self.base.cycle += 1;
    }

    fn reset(&mut self) {
        self.base.cycle = 0;
        self.base.state.channels = Self::make_channels(&self.spec);
    }
}

impl Dram {
    /// Build the device named by `config.impl_name`.
    pub fn new(config: Arc<DramConfig>) -> Result<Self> {
        let desc = spec::lookup(&config.impl_name)
            .ok_or_else(|| anyhow!("Unrecognized DRAM implementation \"{}\"!", config.impl_name))?;
        Self::with_description(desc, config)
    }

    pub fn with_description(desc: &DeviceDescription, config: Arc<DramConfig>) -> Result<Self> {
        let spec = Arc::new(DeviceSpec::resolve(desc, &config)?);
        let channels = Self::make_channels(&spec);
        info!(
            "{}: built {} channel(s) of {} nodes",
            spec.name,
            channels.len(),
            channels.first().map_or(0, |ch| ch.tree().len())
        );
        let mut me = Dram {
            base: ModuleBase::with_state(DramState { channels }),
            spec,
        };
        me.init_conf(config);
        Ok(me)
    }

    fn make_channels(spec: &Arc<DeviceSpec>) -> Vec<Channel> {
        (0..spec.organization.channels() as usize)
            .map(|id| Channel::new(Arc::clone(spec), id))
            .collect()
    }

    pub fn spec(&self) -> &DeviceSpec {
        &self.spec
    }

    pub fn clk(&self) -> Cycle {
        self.now()
    }

    pub fn tick(&mut self) {
        self.tick_one();
    }

    /// Data returns this many cycles after a read is issued.
    pub fn read_latency(&self) -> Cycle {
        self.spec.read_latency
    }

    pub fn translate(&self, request: Request) -> Option<Command> {
        self.spec.translate(request)
    }

    pub fn channels(&self) -> &[Channel] {
        &self.state().channels
    }

    /// Channels are independent; a host may hand them to separate workers,
    /// passing its own clock to each.
    pub fn channels_mut(&mut self) -> &mut [Channel] {
        &mut self.state_mut().channels
    }

    /// # Panics
    /// If the channel coordinate is negative or out of range.
    fn channel(&self, addr: &[i64]) -> &Channel {
        &self.state().channels[addr[0] as usize]
    }

    pub fn issue_command(&mut self, command: Command, addr: &[i64]) {
        let clk = self.now();
        debug!("[{}] issue {} @ {:?}", clk, command, addr);
        self.state_mut().channels[addr[0] as usize].issue(command, addr, clk);
    }

    /// The address `command` affects; `None` when the address leaves the
    /// command's effect unreachable, in which case it is never ready.
    pub fn target(&self, command: Command, addr: &[i64]) -> Option<AddrVec> {
        self.channel(addr).target(command, addr)
    }

    pub fn get_preq_command(&self, command: Command, addr: &[i64]) -> Command {
        self.channel(addr).preq(command, addr)
    }

    /// Timing allows `command` now and no prerequisite is pending.
    pub fn check_ready(&self, command: Command, addr: &[i64]) -> bool {
        self.channel(addr).check_ready(command, addr, self.now())
    }

    /// Timing allows `command` now, regardless of bank state.
    pub fn check_timing(&self, command: Command, addr: &[i64]) -> bool {
        self.channel(addr).check_timing(command, addr, self.now())
    }

    /// Earliest clock the scoreboard allows `command`, or `None` if the
    /// device does not support it.
    pub fn ready_at(&self, command: Command, addr: &[i64]) -> Option<Cycle> {
        self.channel(addr).ready_at(command, addr)
    }

    pub fn check_rowbuffer_hit(&self, command: Command, addr: &[i64]) -> bool {
        self.channel(addr).rowbuffer_hit(command, addr)
    }

    /// Whether the addressed bank holds an open row.
    pub fn check_node_open(&self, command: Command, addr: &[i64]) -> bool {
        self.channel(addr).node_open(command, addr)
    }
}
