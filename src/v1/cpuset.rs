// Copyright (c) 2021-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! This module contains the implementation of the `cpuset` cgroup subsystem.
//!
//! See the Kernel's documentation for more information about this subsystem, found at:
//!  [Documentation/cgroup-v1/cpusets.txt](https://www.kernel.org/doc/Documentation/cgroup-v1/cpusets.txt)

use std::path::Path;

use crate::error::*;
use crate::v1::{write_settings, ControllerInternal, Name, Setting};
use crate::{MountPoint, Resources, SettingValue};

/// A controller that allows controlling the `cpuset` subsystem of a Cgroup.
///
/// In essence, this controller is responsible for restricting the tasks in the control group to a
/// set of CPUs and/or memory nodes.
#[derive(Debug, Clone)]
pub struct CpuSetController {
    mount: MountPoint,
}

impl CpuSetController {
    pub fn new(mount: &MountPoint) -> Self {
        Self {
            mount: mount.clone(),
        }
    }
}

// The kernel leaves both interface files of a new group empty and
// rejects task attachment until they hold something, so the masks of
// the parent are copied down unless the caller already set them.
fn copy_if_needed(child: &Path, parent: &Path) -> Result<()> {
    for file in ["cpuset.cpus", "cpuset.mems"].iter() {
        let current = read_tolerant(&child.join(file))?;
        if !current.is_empty() {
            continue;
        }
        let inherited = read_tolerant(&parent.join(file))?;
        if !inherited.is_empty() {
            crate::write_file(&child.join(file), &inherited)?;
        }
    }
    Ok(())
}

// A mask file that does not exist reads as empty; anything else is a
// real failure.
fn read_tolerant(path: &Path) -> Result<String> {
    if !path.exists() {
        return Ok(String::new());
    }
    crate::read_string_from(path)
}

impl ControllerInternal for CpuSetController {
    fn mount(&self) -> &MountPoint {
        &self.mount
    }

    fn subsystem(&self) -> Name {
        Name::CpuSet
    }

    fn post_create(&self, dir: &Path) -> Result<()> {
        let base = self.mount.root.join(Name::CpuSet.to_string());
        if let Ok(rel) = dir.strip_prefix(&base) {
            // Walk from the hierarchy root down so that intermediate
            // groups created along the way inherit masks as well.
            let mut parent = base;
            for component in rel.components() {
                let child = parent.join(component);
                copy_if_needed(&child, &parent)?;
                parent = child;
            }
        }
        Ok(())
    }

    fn apply(&self, dir: &Path, res: &Resources) -> Result<()> {
        let cpu = &res.cpu;
        let mut settings = Vec::new();
        if let Some(cpus) = &cpu.cpus {
            settings.push(Setting::new(
                "cpuset.cpus",
                SettingValue::Text(cpus.clone()),
            ));
        }
        if let Some(mems) = &cpu.mems {
            settings.push(Setting::new(
                "cpuset.mems",
                SettingValue::Text(mems.clone()),
            ));
        }
        write_settings(dir, &settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::v1::Controller;
    use std::fs;

    #[test]
    fn masks_are_written_when_given() {
        let root = tempfile::tempdir().unwrap();
        let mount = MountPoint::new(root.path());
        let cpuset = CpuSetController::new(&mount);

        let mut res = Resources::default();
        res.cpu.cpus = Some("0-3".to_string());
        res.cpu.mems = Some("0".to_string());
        cpuset.create("pod", &res).unwrap();

        let dir = cpuset.path("pod");
        assert_eq!(fs::read_to_string(dir.join("cpuset.cpus")).unwrap(), "0-3");
        assert_eq!(fs::read_to_string(dir.join("cpuset.mems")).unwrap(), "0");
    }

    #[test]
    fn new_groups_inherit_parent_masks() {
        let root = tempfile::tempdir().unwrap();
        let mount = MountPoint::new(root.path());
        let cpuset = CpuSetController::new(&mount);

        let base = root.path().join("cpuset");
        fs::create_dir_all(&base).unwrap();
        fs::write(base.join("cpuset.cpus"), "0-7").unwrap();
        fs::write(base.join("cpuset.mems"), "0-1").unwrap();

        cpuset.create("pod/ctr", &Resources::default()).unwrap();

        // Both the intermediate group and the leaf get the masks.
        assert_eq!(
            fs::read_to_string(base.join("pod/cpuset.cpus")).unwrap(),
            "0-7"
        );
        assert_eq!(
            fs::read_to_string(base.join("pod/ctr/cpuset.cpus")).unwrap(),
            "0-7"
        );
        assert_eq!(
            fs::read_to_string(base.join("pod/ctr/cpuset.mems")).unwrap(),
            "0-1"
        );
    }

    #[test]
    fn explicit_masks_are_not_overwritten() {
        let root = tempfile::tempdir().unwrap();
        let mount = MountPoint::new(root.path());
        let cpuset = CpuSetController::new(&mount);

        let base = root.path().join("cpuset");
        fs::create_dir_all(base.join("pod")).unwrap();
        fs::write(base.join("cpuset.cpus"), "0-7").unwrap();
        fs::write(base.join("pod/cpuset.cpus"), "1").unwrap();

        cpuset.create("pod", &Resources::default()).unwrap();
        assert_eq!(
            fs::read_to_string(base.join("pod/cpuset.cpus")).unwrap(),
            "1"
        );
    }
}
