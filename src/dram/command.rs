use std::fmt::{Display, Formatter};
use std::str::FromStr;

use num_derive::FromPrimitive;
use phf::phf_map;

use crate::dram::level::Level;

pub const NUM_COMMANDS: usize = 16;

/// Every command a device may execute. A device description decides which of
/// them it supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, FromPrimitive)]
pub enum Command {
    Act = 0,
    Pre,
    PreA,
    Rd,
    Wr,
    RdA,
    WrA,
    RefAb,
    RefSb,
    RfmAb,
    RfmSb,
    ActAb,
    ActSb,
    ActPb,
    PreSb,
    PrePb,
}

static COMMAND_NAMES: phf::Map<&'static str, Command> = phf_map! {
    "ACT" => Command::Act,
    "PRE" => Command::Pre,
    "PREA" => Command::PreA,
    "RD" => Command::Rd,
    "WR" => Command::Wr,
    "RDA" => Command::RdA,
    "WRA" => Command::WrA,
    "REFab" => Command::RefAb,
    "REFsb" => Command::RefSb,
    "RFMab" => Command::RfmAb,
    "RFMsb" => Command::RfmSb,
    "ACTab" => Command::ActAb,
    "ACTsb" => Command::ActSb,
    "ACTpb" => Command::ActPb,
    "PREsb" => Command::PreSb,
    "PREpb" => Command::PrePb,
};

impl Command {
    pub const ALL: [Command; NUM_COMMANDS] = [
        Command::Act,
        Command::Pre,
        Command::PreA,
        Command::Rd,
        Command::Wr,
        Command::RdA,
        Command::WrA,
        Command::RefAb,
        Command::RefSb,
        Command::RfmAb,
        Command::RfmSb,
        Command::ActAb,
        Command::ActSb,
        Command::ActPb,
        Command::PreSb,
        Command::PrePb,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Command::Act => "ACT",
            Command::Pre => "PRE",
            Command::PreA => "PREA",
            Command::Rd => "RD",
            Command::Wr => "WR",
            Command::RdA => "RDA",
            Command::WrA => "WRA",
            Command::RefAb => "REFab",
            Command::RefSb => "REFsb",
            Command::RfmAb => "RFMab",
            Command::RfmSb => "RFMsb",
            Command::ActAb => "ACTab",
            Command::ActSb => "ACTsb",
            Command::ActPb => "ACTpb",
            Command::PreSb => "PREsb",
            Command::PrePb => "PREpb",
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        COMMAND_NAMES
            .get(value)
            .copied()
            .ok_or_else(|| format!("unknown command '{}'", value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandMeta {
    pub opens_row: bool,
    pub closes_row: bool,
    pub is_access: bool,
    pub is_refresh: bool,
}

impl CommandMeta {
    pub const fn new(opens_row: bool, closes_row: bool, is_access: bool, is_refresh: bool) -> Self {
        Self { opens_row, closes_row, is_access, is_refresh }
    }
}

/// A command as a particular device defines it.
#[derive(Debug, Clone, Copy)]
pub struct CommandDef {
    pub command: Command,
    /// Level at which the command's timing and state effects are evaluated.
    pub scope: Level,
    pub meta: CommandMeta,
}

impl CommandDef {
    pub const fn new(command: Command, scope: Level, meta: CommandMeta) -> Self {
        Self { command, scope, meta }
    }
}

/// Controller-facing operation; each device translates it to exactly one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Request {
    Read,
    Write,
    AllBankRefresh,
    PerBankRefresh,
    AllBankRfm,
    PerBankRfm,
}

impl Request {
    pub const ALL: [Request; 6] = [
        Request::Read,
        Request::Write,
        Request::AllBankRefresh,
        Request::PerBankRefresh,
        Request::AllBankRfm,
        Request::PerBankRfm,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Request::Read => "read",
            Request::Write => "write",
            Request::AllBankRefresh => "all-bank-refresh",
            Request::PerBankRefresh => "per-bank-refresh",
            Request::AllBankRfm => "all-bank-rfm",
            Request::PerBankRfm => "per-bank-rfm",
        }
    }
}

impl Display for Request {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Request {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Request::ALL
            .iter()
            .copied()
            .find(|request| request.name() == value)
            .ok_or_else(|| format!("unknown request '{}'", value))
    }
}
