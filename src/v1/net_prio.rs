// Copyright (c) 2021-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! This module contains the implementation of the `net_prio` cgroup subsystem.
//!
//! See the Kernel's documentation for more information about this subsystem, found at:
//!  [Documentation/cgroup-v1/net_prio.txt](https://www.kernel.org/doc/Documentation/cgroup-v1/net_prio.txt)

use std::path::Path;

use crate::error::*;
use crate::v1::{write_settings, ControllerInternal, Name, Setting};
use crate::{MountPoint, Resources, SettingValue};

/// A controller that allows controlling the `net_prio` subsystem of a Cgroup.
///
/// In essence, using `net_prio` one can set the priority of the packets emitted from the control
/// group's tasks. This can then be used to have QoS restrictions on certain control groups and
/// thus, prioritizing certain tasks.
#[derive(Debug, Clone)]
pub struct NetPrioController {
    mount: MountPoint,
}

impl NetPrioController {
    pub fn new(mount: &MountPoint) -> Self {
        Self {
            mount: mount.clone(),
        }
    }
}

impl ControllerInternal for NetPrioController {
    fn mount(&self) -> &MountPoint {
        &self.mount
    }

    fn subsystem(&self) -> Name {
        Name::NetPrio
    }

    fn apply(&self, dir: &Path, res: &Resources) -> Result<()> {
        // Each write remaps one interface, the kernel folds them into the
        // group's priority map.
        let settings: Vec<Setting> = res
            .network
            .priorities
            .iter()
            .map(|prio| {
                Setting::new(
                    "net_prio.ifpriomap",
                    SettingValue::Text(format!("{} {}", prio.name, prio.priority)),
                )
            })
            .collect();
        write_settings(dir, &settings)
    }
}
