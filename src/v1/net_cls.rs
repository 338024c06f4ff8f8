// Copyright (c) 2021-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! This module contains the implementation of the `net_cls` cgroup subsystem.
//!
//! See the Kernel's documentation for more information about this subsystem, found at:
//!  [Documentation/cgroup-v1/net_cls.txt](https://www.kernel.org/doc/Documentation/cgroup-v1/net_cls.txt)

use std::path::Path;

use crate::error::*;
use crate::v1::{write_settings, Controller, ControllerInternal, Name, Setting};
use crate::{MountPoint, Resources, SettingValue};

/// A controller that allows controlling the `net_cls` subsystem of a Cgroup.
///
/// The class identifier it tags outgoing packets with can be matched on
/// by the traffic controller and iptables.
#[derive(Debug, Clone)]
pub struct NetClsController {
    mount: MountPoint,
}

impl NetClsController {
    pub fn new(mount: &MountPoint) -> Self {
        Self {
            mount: mount.clone(),
        }
    }

    /// The class identifier currently assigned to the group.
    pub fn classid(&self, group: &str) -> Result<u32> {
        let raw = crate::read_u64_from(&self.path(group).join("net_cls.classid"))?;
        Ok(raw as u32)
    }
}

impl ControllerInternal for NetClsController {
    fn mount(&self) -> &MountPoint {
        &self.mount
    }

    fn subsystem(&self) -> Name {
        Name::NetCls
    }

    fn apply(&self, dir: &Path, res: &Resources) -> Result<()> {
        let mut settings = Vec::new();
        // Zero is the kernel default, treat it like an absent field.
        if let Some(class_id) = res.network.class_id {
            if class_id > 0 {
                settings.push(Setting::new(
                    "net_cls.classid",
                    SettingValue::Uint(class_id.into()),
                ));
            }
        }
        write_settings(dir, &settings)
    }
}
