// Copyright (c) 2021-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! This module contains the implementation of the `rdma` cgroup subsystem.
//!
//! See the Kernel's documentation for more information about this subsystem, found at:
//!  [Documentation/cgroup-v1/rdma.txt](https://www.kernel.org/doc/Documentation/cgroup-v1/rdma.txt)

use std::path::Path;

use crate::error::*;
use crate::stats::{Metrics, RdmaEntry};
use crate::v1::{write_settings, ControllerInternal, Name, Setting};
use crate::{MountPoint, Resources, SettingValue};

/// A controller that allows controlling the `rdma` subsystem of a Cgroup.
///
/// In essence, using this controller one can limit the RDMA/IB specific resources that the tasks
/// in the control group can use.
#[derive(Debug, Clone)]
pub struct RdmaController {
    mount: MountPoint,
}

impl RdmaController {
    pub fn new(mount: &MountPoint) -> Self {
        Self {
            mount: mount.clone(),
        }
    }

    fn settings(res: &Resources) -> Vec<Setting> {
        max_lines(res)
            .into_iter()
            .map(|line| Setting::new("rdma.max", SettingValue::Text(line)))
            .collect()
    }
}

/// Build the `rdma.max` lines for every limited device. The file format
/// is the same on both hierarchies.
pub(crate) fn max_lines(res: &Resources) -> Vec<String> {
    let mut lines = Vec::new();
    for limit in &res.rdma.limits {
        if limit.hca_handle.is_none() && limit.hca_object.is_none() {
            continue;
        }
        let mut line = limit.device.clone();
        if let Some(handles) = limit.hca_handle {
            line.push_str(&format!(" hca_handle={}", handles));
        }
        if let Some(objects) = limit.hca_object {
            line.push_str(&format!(" hca_object={}", objects));
        }
        lines.push(line);
    }
    lines
}

/// Parse `rdma.current`/`rdma.max` lines of the form
/// `<device> hca_handle=<n|max> hca_object=<n|max>`.
///
/// The kernel writes `max` for unlimited entries, reported as
/// `u32::MAX`. Unknown or malformed key-value pairs are ignored.
pub(crate) fn parse_entries(file: &Path) -> Result<Vec<RdmaEntry>> {
    let mut entries = Vec::new();
    for line in crate::read_string_from(file)?.lines() {
        let mut fields = line.split_whitespace();
        let device = match fields.next() {
            Some(device) => device,
            None => continue,
        };
        let mut entry = RdmaEntry {
            device: device.to_string(),
            ..Default::default()
        };
        for field in fields {
            let (key, raw) = match field.split_once('=') {
                Some(kv) => kv,
                None => continue,
            };
            let value = if raw == "max" {
                u32::MAX
            } else {
                match raw.parse::<u32>() {
                    Ok(v) => v,
                    Err(_) => continue,
                }
            };
            match key {
                "hca_handle" => entry.hca_handles = value,
                "hca_object" => entry.hca_objects = value,
                _ => {}
            }
        }
        entries.push(entry);
    }
    Ok(entries)
}

impl ControllerInternal for RdmaController {
    fn mount(&self) -> &MountPoint {
        &self.mount
    }

    fn subsystem(&self) -> Name {
        Name::Rdma
    }

    fn apply(&self, dir: &Path, res: &Resources) -> Result<()> {
        write_settings(dir, &Self::settings(res))
    }

    fn collect(&self, dir: &Path, m: &mut Metrics) -> Result<()> {
        m.rdma.current = parse_entries(&dir.join("rdma.current"))?;
        m.rdma.limit = parse_entries(&dir.join("rdma.max"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::v1::Controller;
    use crate::RdmaLimit;
    use std::fs;

    #[test]
    fn entries_without_any_limit_are_skipped() {
        let mut res = Resources::default();
        res.rdma.limits.push(RdmaLimit {
            device: "mlx5_0".to_string(),
            hca_handle: None,
            hca_object: None,
        });
        res.rdma.limits.push(RdmaLimit {
            device: "mlx5_1".to_string(),
            hca_handle: Some(3),
            hca_object: None,
        });

        let settings = RdmaController::settings(&res);
        assert_eq!(settings.len(), 1);
        assert_eq!(settings[0].value.to_string(), "mlx5_1 hca_handle=3");
    }

    #[test]
    fn limits_reach_rdma_max() {
        let root = tempfile::tempdir().unwrap();
        let mount = MountPoint::new(root.path());
        let rdma = RdmaController::new(&mount);

        let mut res = Resources::default();
        res.rdma.limits.push(RdmaLimit {
            device: "mlx5_0".to_string(),
            hca_handle: Some(2),
            hca_object: Some(2000),
        });
        rdma.create("pod", &res).unwrap();

        assert_eq!(
            fs::read_to_string(rdma.path("pod").join("rdma.max")).unwrap(),
            "mlx5_0 hca_handle=2 hca_object=2000"
        );
    }

    #[test]
    fn collect_reads_max_as_unlimited() {
        let root = tempfile::tempdir().unwrap();
        let mount = MountPoint::new(root.path());
        let rdma = RdmaController::new(&mount);
        rdma.create("pod", &Resources::default()).unwrap();

        let dir = rdma.path("pod");
        fs::write(dir.join("rdma.current"), "mlx5_0 hca_handle=2 hca_object=19\n").unwrap();
        fs::write(dir.join("rdma.max"), "mlx5_0 hca_handle=max hca_object=max\n").unwrap();

        let mut m = Metrics::default();
        rdma.stat("pod", &mut m).unwrap();
        assert_eq!(m.rdma.current[0].hca_handles, 2);
        assert_eq!(m.rdma.current[0].hca_objects, 19);
        assert_eq!(m.rdma.limit[0].hca_handles, u32::MAX);
        assert_eq!(m.rdma.limit[0].device, "mlx5_0");
    }
}
