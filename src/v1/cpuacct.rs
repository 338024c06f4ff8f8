// Copyright (c) 2021-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! This module contains the implementation of the `cpuacct` cgroup subsystem.
//!
//! See the Kernel's documentation for more information about this subsystem, found at:
//!  [Documentation/cgroup-v1/cpuacct.txt](https://www.kernel.org/doc/Documentation/cgroup-v1/cpuacct.txt)

use std::path::Path;

use nix::unistd::{sysconf, SysconfVar};

use crate::error::*;
use crate::stats::Metrics;
use crate::v1::{ControllerInternal, Name};
use crate::{MountPoint, Resources};

const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// `cpuacct.stat` reports scheduler ticks, everything else nanoseconds.
fn clock_ticks() -> u64 {
    match sysconf(SysconfVar::CLK_TCK) {
        Ok(Some(ticks)) if ticks > 0 => ticks as u64,
        _ => 100,
    }
}

/// A controller that allows controlling the `cpuacct` subsystem of a Cgroup.
///
/// In essence, this control group provides accounting (hence the name `cpuacct`) for CPU usage of
/// the tasks in the control group. It carries no settings of its own.
#[derive(Debug, Clone)]
pub struct CpuAcctController {
    mount: MountPoint,
}

impl CpuAcctController {
    pub fn new(mount: &MountPoint) -> Self {
        Self {
            mount: mount.clone(),
        }
    }
}

impl ControllerInternal for CpuAcctController {
    fn mount(&self) -> &MountPoint {
        &self.mount
    }

    fn subsystem(&self) -> Name {
        Name::CpuAcct
    }

    fn apply(&self, _dir: &Path, _res: &Resources) -> Result<()> {
        Ok(())
    }

    fn collect(&self, dir: &Path, m: &mut Metrics) -> Result<()> {
        let ticks = clock_ticks();
        let stat = crate::flat_keyed_to_hashmap(&dir.join("cpuacct.stat"))?;
        if let Some(user) = stat.get("user") {
            m.cpu.usage.user = (*user).max(0) as u64 * NANOS_PER_SECOND / ticks;
        }
        if let Some(system) = stat.get("system") {
            m.cpu.usage.kernel = (*system).max(0) as u64 * NANOS_PER_SECOND / ticks;
        }

        m.cpu.usage.total = crate::read_u64_from(&dir.join("cpuacct.usage"))?;

        let percpu = crate::read_string_from(&dir.join("cpuacct.usage_percpu"))?;
        m.cpu.usage.per_cpu = percpu
            .split_whitespace()
            .filter_map(|v| v.parse::<u64>().ok())
            .collect();

        Ok(())
    }
}
