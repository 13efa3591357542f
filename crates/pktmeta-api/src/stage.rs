// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Lifecycle stages.

use core::fmt;
use core::fmt::Display;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

/// One step of runtime bring-up, in dependency order.
///
/// A stage may only be initialized once every stage before it is up,
/// and teardown always runs in the reverse of this order.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[repr(u8)]
pub enum Stage {
    CpuMask = 0,
    Time,
    SysInfo,
    Ishm,
    FdServer,
    Thread,
    Pool,
    Queue,
    Sched,
    PktIo,
    Timer,
    Crypto,
    Classification,
    TrafficMngr,
    NameTable,
}

impl Stage {
    pub const COUNT: usize = 15;

    pub const ALL: [Stage; Self::COUNT] = [
        Stage::CpuMask,
        Stage::Time,
        Stage::SysInfo,
        Stage::Ishm,
        Stage::FdServer,
        Stage::Thread,
        Stage::Pool,
        Stage::Queue,
        Stage::Sched,
        Stage::PktIo,
        Stage::Timer,
        Stage::Crypto,
        Stage::Classification,
        Stage::TrafficMngr,
        Stage::NameTable,
    ];

    /// Position of this stage in bring-up order.
    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }

    /// Does this stage also run once on every participating thread?
    pub const fn has_local(self) -> bool {
        matches!(self, Stage::Ishm | Stage::Thread | Stage::Pool | Stage::PktIo)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Stage::CpuMask => "cpumask",
            Stage::Time => "time",
            Stage::SysInfo => "sysinfo",
            Stage::Ishm => "ishm",
            Stage::FdServer => "fdserver",
            Stage::Thread => "thread",
            Stage::Pool => "pool",
            Stage::Queue => "queue",
            Stage::Sched => "sched",
            Stage::PktIo => "pktio",
            Stage::Timer => "timer",
            Stage::Crypto => "crypto",
            Stage::Classification => "classification",
            Stage::TrafficMngr => "traffic_mngr",
            Stage::NameTable => "name_table",
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|st| st.name().eq_ignore_ascii_case(s))
            .copied()
            .ok_or(UnknownStage)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UnknownStage;

impl Display for UnknownStage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unknown stage")
    }
}

/// The role of a thread taking part in per-thread initialization.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub enum ThreadType {
    /// Runs the data path.
    #[default]
    Worker,
    /// Management and control plane work.
    Control,
}

impl Display for ThreadType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ThreadType::Worker => "worker",
            ThreadType::Control => "control",
        };
        write!(f, "{s}")
    }
}
