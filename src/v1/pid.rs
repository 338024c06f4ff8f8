// Copyright (c) 2021-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! This module contains the implementation of the `pids` cgroup subsystem.
//!
//! See the Kernel's documentation for more information about this subsystem, found at:
//!  [Documentation/cgroup-v1/pids.txt](https://www.kernel.org/doc/Documentation/cgroup-v1/pids.txt)

use std::path::Path;

use crate::error::*;
use crate::stats::Metrics;
use crate::v1::{write_settings, ControllerInternal, Name, Setting};
use crate::{parse_max_value, MaxValue, MountPoint, Resources, SettingValue};

/// A controller that allows controlling the `pids` subsystem of a Cgroup.
#[derive(Debug, Clone)]
pub struct PidController {
    mount: MountPoint,
}

impl PidController {
    pub fn new(mount: &MountPoint) -> Self {
        Self {
            mount: mount.clone(),
        }
    }
}

impl ControllerInternal for PidController {
    fn mount(&self) -> &MountPoint {
        &self.mount
    }

    fn subsystem(&self) -> Name {
        Name::Pids
    }

    fn apply(&self, dir: &Path, res: &Resources) -> Result<()> {
        let mut settings = Vec::new();
        if let Some(limit) = res.pid.limit {
            settings.push(Setting::new("pids.max", SettingValue::Max(limit)));
        }
        write_settings(dir, &settings)
    }

    fn collect(&self, dir: &Path, m: &mut Metrics) -> Result<()> {
        m.pids.current = crate::read_u64_from(&dir.join("pids.current"))?;
        let max = crate::read_string_from(&dir.join("pids.max"))?;
        m.pids.limit = match parse_max_value(&max)? {
            // An unlimited group reports zero, like the kernel's own
            // accounting tools do.
            MaxValue::Max => 0,
            MaxValue::Value(v) => v.max(0) as u64,
        };
        Ok(())
    }
}
