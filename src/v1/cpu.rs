// Copyright (c) 2021-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! This module contains the implementation of the `cpu` cgroup subsystem.
//!
//! See the Kernel's documentation for more information about this subsystem, found at:
//!  [Documentation/scheduler/sched-design-CFS.rst](https://www.kernel.org/doc/Documentation/scheduler/sched-design-CFS.rst)

use std::path::Path;

use crate::error::*;
use crate::stats::Metrics;
use crate::v1::{write_settings, ControllerInternal, Name, Setting};
use crate::{MountPoint, Resources, SettingValue};

/// A controller that allows controlling the `cpu` subsystem of a Cgroup.
///
/// In essence, it allows gathering information about how much the tasks inside the control group
/// are using the CPU and creating rules that limit their usage.
#[derive(Debug, Clone)]
pub struct CpuController {
    mount: MountPoint,
}

impl CpuController {
    pub fn new(mount: &MountPoint) -> Self {
        Self {
            mount: mount.clone(),
        }
    }
}

impl ControllerInternal for CpuController {
    fn mount(&self) -> &MountPoint {
        &self.mount
    }

    fn subsystem(&self) -> Name {
        Name::Cpu
    }

    fn apply(&self, dir: &Path, res: &Resources) -> Result<()> {
        let cpu = &res.cpu;
        let mut settings = Vec::new();
        if let Some(shares) = cpu.shares {
            settings.push(Setting::new("cpu.shares", SettingValue::Uint(shares)));
        }
        if let Some(period) = cpu.period {
            settings.push(Setting::new("cpu.cfs_period_us", SettingValue::Uint(period)));
        }
        if let Some(quota) = cpu.quota {
            settings.push(Setting::new("cpu.cfs_quota_us", SettingValue::Int(quota)));
        }
        if let Some(period) = cpu.realtime_period {
            settings.push(Setting::new("cpu.rt_period_us", SettingValue::Uint(period)));
        }
        if let Some(runtime) = cpu.realtime_runtime {
            settings.push(Setting::new("cpu.rt_runtime_us", SettingValue::Int(runtime)));
        }
        write_settings(dir, &settings)
    }

    fn collect(&self, dir: &Path, m: &mut Metrics) -> Result<()> {
        let stat = crate::flat_keyed_to_hashmap(&dir.join("cpu.stat"))?;
        for (key, value) in stat {
            let value = value.max(0) as u64;
            match key.as_str() {
                "nr_periods" => m.cpu.throttling.periods = value,
                "nr_throttled" => m.cpu.throttling.throttled_periods = value,
                "throttled_time" => m.cpu.throttling.throttled_time = value,
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::v1::Controller;
    use std::fs;

    #[test]
    fn settings_cover_cfs_and_realtime() {
        let root = tempfile::tempdir().unwrap();
        let mount = MountPoint::new(root.path());
        let cpu = CpuController::new(&mount);

        let mut res = Resources::default();
        res.cpu.shares = Some(512);
        res.cpu.quota = Some(200_000);
        res.cpu.period = Some(100_000);
        cpu.create("pod", &res).unwrap();

        let dir = cpu.path("pod");
        assert_eq!(fs::read_to_string(dir.join("cpu.shares")).unwrap(), "512");
        assert_eq!(
            fs::read_to_string(dir.join("cpu.cfs_quota_us")).unwrap(),
            "200000"
        );
        assert_eq!(
            fs::read_to_string(dir.join("cpu.cfs_period_us")).unwrap(),
            "100000"
        );
        assert!(!dir.join("cpu.rt_period_us").exists());
    }

    #[test]
    fn collect_reads_throttling_counters() {
        let root = tempfile::tempdir().unwrap();
        let mount = MountPoint::new(root.path());
        let cpu = CpuController::new(&mount);
        cpu.create("pod", &Resources::default()).unwrap();

        fs::write(
            cpu.path("pod").join("cpu.stat"),
            "nr_periods 100\nnr_throttled 20\nthrottled_time 1500000\n",
        )
        .unwrap();

        let mut m = Metrics::default();
        cpu.stat("pod", &mut m).unwrap();
        assert_eq!(m.cpu.throttling.periods, 100);
        assert_eq!(m.cpu.throttling.throttled_periods, 20);
        assert_eq!(m.cpu.throttling.throttled_time, 1_500_000);
    }
}
