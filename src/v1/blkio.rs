// Copyright (c) 2021-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! This module contains the implementation of the `blkio` cgroup subsystem.
//!
//! See the Kernel's documentation for more information about this subsystem, found at:
//!  [Documentation/cgroup-v1/blkio-controller.txt](https://www.kernel.org/doc/Documentation/cgroup-v1/blkio-controller.txt)

use std::path::Path;

use crate::error::ErrorKind::*;
use crate::error::*;
use crate::stats::{BlkioEntry, Metrics};
use crate::v1::{write_settings, ControllerInternal, Name, Setting};
use crate::{BlkIoDeviceThrottleResource, MountPoint, Resources, SettingValue};

/// A controller that allows controlling the `blkio` subsystem of a Cgroup.
///
/// In essence, using the `blkio` controller one can limit and throttle the tasks' usage of block
/// devices in the control group.
#[derive(Debug, Clone)]
pub struct BlkIoController {
    mount: MountPoint,
}

impl BlkIoController {
    pub fn new(mount: &MountPoint) -> Self {
        Self {
            mount: mount.clone(),
        }
    }

    fn settings(res: &Resources) -> Vec<Setting> {
        let blkio = &res.blkio;
        let mut settings = Vec::new();
        if let Some(weight) = blkio.weight {
            settings.push(Setting::new(
                "blkio.weight",
                SettingValue::Uint(weight.into()),
            ));
        }
        if let Some(leaf_weight) = blkio.leaf_weight {
            settings.push(Setting::new(
                "blkio.leaf_weight",
                SettingValue::Uint(leaf_weight.into()),
            ));
        }
        for dev in &blkio.weight_device {
            if let Some(weight) = dev.weight {
                settings.push(Setting::new(
                    "blkio.weight_device",
                    SettingValue::Device {
                        major: dev.major,
                        minor: dev.minor,
                        value: weight.into(),
                    },
                ));
            }
            if let Some(leaf_weight) = dev.leaf_weight {
                settings.push(Setting::new(
                    "blkio.leaf_weight_device",
                    SettingValue::Device {
                        major: dev.major,
                        minor: dev.minor,
                        value: leaf_weight.into(),
                    },
                ));
            }
        }
        let mut throttle = |name: &str, list: &[BlkIoDeviceThrottleResource]| {
            for dev in list {
                settings.push(Setting::new(
                    name,
                    SettingValue::Device {
                        major: dev.major,
                        minor: dev.minor,
                        value: dev.rate,
                    },
                ));
            }
        };
        throttle(
            "blkio.throttle.read_bps_device",
            &blkio.throttle_read_bps_device,
        );
        throttle(
            "blkio.throttle.read_iops_device",
            &blkio.throttle_read_iops_device,
        );
        throttle(
            "blkio.throttle.write_bps_device",
            &blkio.throttle_write_bps_device,
        );
        throttle(
            "blkio.throttle.write_iops_device",
            &blkio.throttle_write_iops_device,
        );
        settings
    }
}

/// Parse one line of a blkio accounting file.
///
/// Lines read `major:minor [op] value` with spaces and colons both acting
/// as separators. The kernel's two-field `Total` trailer carries no device
/// and yields `None`.
fn parse_entry_line(file: &Path, line: &str) -> Result<Option<BlkioEntry>> {
    let invalid = || Error::new(InvalidLine(file.display().to_string(), line.to_string()));
    let fields: Vec<&str> = line
        .split(|c| c == ' ' || c == ':')
        .filter(|s| !s.is_empty())
        .collect();
    if fields.len() < 3 {
        if fields.len() == 2 && fields[0] == "Total" {
            return Ok(None);
        }
        return Err(invalid());
    }
    let major = fields[0].parse::<u64>().map_err(|_| invalid())?;
    let minor = fields[1].parse::<u64>().map_err(|_| invalid())?;
    let (op, value) = if fields.len() == 4 {
        (fields[2], fields[3])
    } else {
        ("", fields[2])
    };
    let value = value.parse::<u64>().map_err(|_| invalid())?;
    Ok(Some(BlkioEntry {
        op: op.to_string(),
        major,
        minor,
        value,
    }))
}

fn read_entries(file: &Path, entries: &mut Vec<BlkioEntry>) -> Result<()> {
    for line in crate::read_string_from(file)?.lines() {
        if let Some(entry) = parse_entry_line(file, line)? {
            entries.push(entry);
        }
    }
    Ok(())
}

impl ControllerInternal for BlkIoController {
    fn mount(&self) -> &MountPoint {
        &self.mount
    }

    fn subsystem(&self) -> Name {
        Name::BlkIo
    }

    fn apply(&self, dir: &Path, res: &Resources) -> Result<()> {
        write_settings(dir, &Self::settings(res))
    }

    fn collect(&self, dir: &Path, m: &mut Metrics) -> Result<()> {
        read_entries(
            &dir.join("blkio.throttle.io_serviced"),
            &mut m.blkio.io_serviced_recursive,
        )?;
        read_entries(
            &dir.join("blkio.throttle.io_service_bytes"),
            &mut m.blkio.io_service_bytes_recursive,
        )?;

        // The recursive accounting files only exist on CFQ-enabled
        // kernels; one probe decides for the whole family.
        if !dir.join("blkio.io_serviced_recursive").exists() {
            return Ok(());
        }
        read_entries(
            &dir.join("blkio.sectors_recursive"),
            &mut m.blkio.sectors_recursive,
        )?;
        read_entries(
            &dir.join("blkio.io_service_bytes_recursive"),
            &mut m.blkio.io_service_bytes_recursive,
        )?;
        read_entries(
            &dir.join("blkio.io_serviced_recursive"),
            &mut m.blkio.io_serviced_recursive,
        )?;
        read_entries(
            &dir.join("blkio.io_queue_recursive"),
            &mut m.blkio.io_queued_recursive,
        )?;
        read_entries(
            &dir.join("blkio.io_service_time_recursive"),
            &mut m.blkio.io_service_time_recursive,
        )?;
        read_entries(
            &dir.join("blkio.io_wait_time_recursive"),
            &mut m.blkio.io_wait_time_recursive,
        )?;
        read_entries(
            &dir.join("blkio.io_merged_recursive"),
            &mut m.blkio.io_merged_recursive,
        )?;
        read_entries(&dir.join("blkio.time_recursive"), &mut m.blkio.io_time_recursive)
    }
}
