// Copyright (c) 2021-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! This module contains the implementation of the `memory` cgroup subsystem.
//!
//! See the Kernel's documentation for more information about this subsystem, found at:
//!  [Documentation/cgroup-v1/memory.txt](https://www.kernel.org/doc/Documentation/cgroup-v1/memory.txt)

use std::path::Path;

use crate::error::*;
use crate::stats::{MemoryEntry, Metrics};
use crate::v1::{write_settings, ControllerInternal, Name, Setting};
use crate::{MountPoint, Resources, SettingValue};

/// A controller that allows controlling the `memory` subsystem of a Cgroup.
///
/// In essence, this controller is responsible for limiting the memory usage of the tasks in the
/// control group.
#[derive(Debug, Clone)]
pub struct MemController {
    mount: MountPoint,
}

impl MemController {
    pub fn new(mount: &MountPoint) -> Self {
        Self {
            mount: mount.clone(),
        }
    }

    fn settings(res: &Resources) -> Vec<Setting> {
        let mem = &res.memory;
        let mut settings = Vec::new();
        if let Some(limit) = mem.limit {
            settings.push(Setting::new(
                "memory.limit_in_bytes",
                SettingValue::Int(limit),
            ));
        }
        if let Some(soft_limit) = mem.soft_limit {
            settings.push(Setting::new(
                "memory.soft_limit_in_bytes",
                SettingValue::Int(soft_limit),
            ));
        }
        if let Some(swap_limit) = mem.swap_limit {
            settings.push(Setting::new(
                "memory.memsw.limit_in_bytes",
                SettingValue::Int(swap_limit),
            ));
        }
        if let Some(kernel_limit) = mem.kernel_limit {
            settings.push(Setting::new(
                "memory.kmem.limit_in_bytes",
                SettingValue::Int(kernel_limit),
            ));
        }
        if let Some(kernel_tcp_limit) = mem.kernel_tcp_limit {
            settings.push(Setting::new(
                "memory.kmem.tcp.limit_in_bytes",
                SettingValue::Int(kernel_tcp_limit),
            ));
        }
        if mem.disable_oom_killer == Some(true) {
            settings.push(Setting::new("memory.oom_control", SettingValue::Uint(1)));
        }
        if let Some(swappiness) = mem.swappiness {
            settings.push(Setting::new(
                "memory.swappiness",
                SettingValue::Uint(swappiness),
            ));
        }
        settings
    }
}

fn read_entry(dir: &Path, module: Option<&str>) -> Result<MemoryEntry> {
    let file = |suffix: &str| match module {
        Some(module) => dir.join(format!("memory.{}.{}", module, suffix)),
        None => dir.join(format!("memory.{}", suffix)),
    };
    Ok(MemoryEntry {
        usage: crate::read_u64_from(&file("usage_in_bytes"))?,
        limit: crate::read_u64_from(&file("limit_in_bytes"))?,
        max: crate::read_u64_from(&file("max_usage_in_bytes"))?,
        failcnt: crate::read_u64_from(&file("failcnt"))?,
    })
}

impl ControllerInternal for MemController {
    fn mount(&self) -> &MountPoint {
        &self.mount
    }

    fn subsystem(&self) -> Name {
        Name::Mem
    }

    fn apply(&self, dir: &Path, res: &Resources) -> Result<()> {
        let mut settings = Self::settings(res);

        // The kernel refuses a swap limit below the current memory limit
        // and a memory limit above the current swap limit. When both are
        // requested and the swap limit clears the currently set memory
        // limit, write the swap side first.
        if let (Some(limit), Some(swap_limit)) = (res.memory.limit, res.memory.swap_limit) {
            if limit > 0 && swap_limit > 0 {
                let current =
                    crate::read_u64_from(&dir.join("memory.limit_in_bytes")).unwrap_or(0);
                if current < swap_limit as u64 {
                    let limit_at = settings
                        .iter()
                        .position(|s| s.name == "memory.limit_in_bytes");
                    let swap_at = settings
                        .iter()
                        .position(|s| s.name == "memory.memsw.limit_in_bytes");
                    if let (Some(limit_at), Some(swap_at)) = (limit_at, swap_at) {
                        settings.swap(limit_at, swap_at);
                    }
                }
            }
        }

        write_settings(dir, &settings)
    }

    fn collect(&self, dir: &Path, m: &mut Metrics) -> Result<()> {
        let stat = crate::flat_keyed_to_hashmap(&dir.join("memory.stat"))?;
        let get = |key: &str| stat.get(key).copied().unwrap_or(0).max(0) as u64;
        m.memory.cache = get("cache");
        m.memory.rss = get("rss");
        m.memory.rss_huge = get("rss_huge");
        m.memory.mapped_file = get("mapped_file");
        m.memory.dirty = get("dirty");
        m.memory.writeback = get("writeback");
        m.memory.pgfault = get("pgfault");
        m.memory.pgmajfault = get("pgmajfault");

        m.memory.usage = read_entry(dir, None)?;
        // Swap and kernel accounting are build-time kernel options, so
        // their quartets only count when present.
        if dir.join("memory.memsw.limit_in_bytes").exists() {
            m.memory.swap = read_entry(dir, Some("memsw"))?;
        }
        if dir.join("memory.kmem.limit_in_bytes").exists() {
            m.memory.kernel = read_entry(dir, Some("kmem"))?;
        }
        if dir.join("memory.kmem.tcp.limit_in_bytes").exists() {
            m.memory.kernel_tcp = read_entry(dir, Some("kmem.tcp"))?;
        }
        Ok(())
    }
}
