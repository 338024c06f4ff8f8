// Copyright (c) 2021-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! This module contains the implementation of the `devices` cgroup subsystem.
//!
//! See the Kernel's documentation for more information about this subsystem, found at:
//!  [Documentation/cgroup-v1/devices.txt](https://www.kernel.org/doc/Documentation/cgroup-v1/devices.txt)

use std::path::Path;

use crate::error::*;
use crate::v1::{write_settings, ControllerInternal, Name, Setting};
use crate::{DeviceResource, MountPoint, Resources, SettingValue};

/// The types of device a rule can apply to.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceType {
    /// The rule applies to all devices.
    All,
    /// The rule only applies to character devices.
    Char,
    /// The rule only applies to block devices.
    Block,
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::All
    }
}

impl DeviceType {
    /// Convert the type into the character the kernel recognizes.
    pub fn to_char(&self) -> char {
        match self {
            DeviceType::All => 'a',
            DeviceType::Char => 'c',
            DeviceType::Block => 'b',
        }
    }

    pub fn from_char(c: char) -> Option<DeviceType> {
        match c {
            'a' => Some(DeviceType::All),
            'c' => Some(DeviceType::Char),
            'b' => Some(DeviceType::Block),
            _ => None,
        }
    }
}

/// The access a rule grants or takes away.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DevicePermissions {
    /// Permission to read from the device.
    Read,
    /// Permission to write to the device.
    Write,
    /// Permission to create device nodes with mknod.
    MkNod,
}

impl DevicePermissions {
    pub fn to_char(&self) -> char {
        match self {
            DevicePermissions::Read => 'r',
            DevicePermissions::Write => 'w',
            DevicePermissions::MkNod => 'm',
        }
    }

    /// The full `rwm` set.
    pub fn all() -> Vec<DevicePermissions> {
        vec![
            DevicePermissions::Read,
            DevicePermissions::Write,
            DevicePermissions::MkNod,
        ]
    }
}

/// Format one rule the way `devices.allow` and `devices.deny` expect it:
/// `<type> <major>:<minor> <access>`, where negative device numbers stand
/// for the `*` wildcard.
fn format_rule(dev: &DeviceResource) -> String {
    let number = |n: i64| {
        if n < 0 {
            "*".to_string()
        } else {
            n.to_string()
        }
    };
    let access: String = dev.access.iter().map(|p| p.to_char()).collect();
    format!(
        "{} {}:{} {}",
        dev.devtype.to_char(),
        number(dev.major),
        number(dev.minor),
        access
    )
}

/// A controller that allows controlling the `devices` subsystem of a Cgroup.
///
/// The settings of this controller are a list of rules: each write to
/// `devices.allow` or `devices.deny` is a command the kernel folds into
/// the group's current whitelist, not a replacement of it.
#[derive(Debug, Clone)]
pub struct DevicesController {
    mount: MountPoint,
}

impl DevicesController {
    pub fn new(mount: &MountPoint) -> Self {
        Self {
            mount: mount.clone(),
        }
    }
}

impl ControllerInternal for DevicesController {
    fn mount(&self) -> &MountPoint {
        &self.mount
    }

    fn subsystem(&self) -> Name {
        Name::Devices
    }

    fn apply(&self, dir: &Path, res: &Resources) -> Result<()> {
        let mut settings = Vec::new();
        for dev in &res.devices.devices {
            let file = if dev.allow {
                "devices.allow"
            } else {
                "devices.deny"
            };
            settings.push(Setting::new(file, SettingValue::Text(format_rule(dev))));
        }
        write_settings(dir, &settings)
    }
}
