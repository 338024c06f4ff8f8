// Copyright (c) 2021-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! This module handles cgroup operations. Start here!

use crate::error::ErrorKind::*;
use crate::error::*;
use crate::stats::Metrics;
use crate::v1::freezer::FreezerController;
use crate::v1::{subsystems, subsystems_by_name, Controller, Name, Subsystem};
use crate::{CancelToken, CgroupPid, FreezerState, MountPoint, Resources};

/// One logical control group spanning a set of v1 subsystems.
///
/// A control group aggregates a set of processes and applies every
/// subsystem's limits to them as one unit. The manager holds no kernel
/// state: every call resolves the backing directories afresh from the
/// mount point and the logical group path, so handles stay valid across
/// outside modifications of the hierarchy.
#[derive(Debug, Clone)]
pub struct Cgroup {
    mount: MountPoint,
    group: String,
    subsystems: Vec<Subsystem>,
}

impl Cgroup {
    /// Create the group in every default subsystem and apply `res`.
    pub fn new(mount: &MountPoint, group: &str, res: &Resources) -> Result<Self> {
        let cg = Self::load(mount, group)?;
        cg.create(res)?;
        Ok(cg)
    }

    /// Create the group in the named subsystems only.
    pub fn new_with(
        mount: &MountPoint,
        group: &str,
        names: &[Name],
        res: &Resources,
    ) -> Result<Self> {
        let cg = Self::load_with(mount, group, names)?;
        cg.create(res)?;
        Ok(cg)
    }

    /// A handle to an existing group, without touching the filesystem.
    pub fn load(mount: &MountPoint, group: &str) -> Result<Self> {
        Self::with_subsystems(mount, group, subsystems(mount))
    }

    /// A handle spanning the named subsystems only.
    pub fn load_with(mount: &MountPoint, group: &str, names: &[Name]) -> Result<Self> {
        Self::with_subsystems(mount, group, subsystems_by_name(mount, names))
    }

    fn with_subsystems(
        mount: &MountPoint,
        group: &str,
        subsystems: Vec<Subsystem>,
    ) -> Result<Self> {
        let group = crate::relative_group(group);
        // The hierarchy roots themselves are off limits.
        if group.is_empty() {
            return Err(Error::new(InvalidPath));
        }
        Ok(Self {
            mount: mount.clone(),
            group: group.to_string(),
            subsystems,
        })
    }

    /// The logical path of the group inside every hierarchy.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// The subsystems this manager fans out over.
    pub fn subsystems(&self) -> &[Subsystem] {
        &self.subsystems
    }

    /// The mount point the group lives under.
    pub fn mount(&self) -> &MountPoint {
        &self.mount
    }

    fn create(&self, res: &Resources) -> Result<()> {
        for sub in &self.subsystems {
            sub.to_controller().create(&self.group, res)?;
        }
        Ok(())
    }

    /// Re-apply `res` across every subsystem.
    ///
    /// Subsystems are written sequentially and the first failure aborts
    /// the fan-out; the controllers already written stay applied, callers
    /// that need atomicity have to delete and recreate the group.
    pub fn update(&self, res: &Resources) -> Result<()> {
        self.create(res)
    }

    /// Move a process (and all its threads) into the group in every
    /// subsystem.
    pub fn add_proc(&self, pid: CgroupPid) -> Result<()> {
        self.attach(pid, "cgroup.procs")
    }

    /// Move one thread into the group in every subsystem.
    pub fn add_task(&self, pid: CgroupPid) -> Result<()> {
        self.attach(pid, "tasks")
    }

    fn attach(&self, pid: CgroupPid, file_name: &str) -> Result<()> {
        for sub in &self.subsystems {
            let dir = sub.to_controller().path(&self.group);
            crate::write_file(&dir.join(file_name), &pid.pid.to_string())?;
        }
        Ok(())
    }

    /// The processes in the group, unioned over all subsystems, sorted
    /// and deduplicated. With `recursive` the nested groups are included.
    pub fn procs(&self, recursive: bool) -> Result<Vec<CgroupPid>> {
        self.members("cgroup.procs", recursive)
    }

    /// The tasks (threads) directly in the group.
    pub fn tasks(&self) -> Result<Vec<CgroupPid>> {
        self.members("tasks", false)
    }

    fn members(&self, file_name: &str, recursive: bool) -> Result<Vec<CgroupPid>> {
        let mut pids: Vec<u64> = Vec::new();
        for sub in &self.subsystems {
            let dir = sub.to_controller().path(&self.group);
            if !dir.exists() {
                continue;
            }
            if recursive {
                pids.extend(crate::read_pids_recursive(&dir, file_name)?);
            } else {
                pids.extend(crate::read_pids_from(&dir.join(file_name))?);
            }
        }
        pids.sort_unstable();
        pids.dedup();
        Ok(pids.into_iter().map(CgroupPid::from).collect())
    }

    /// A point-in-time snapshot of everything the subsystems report
    /// about the group.
    ///
    /// A subsystem whose directory does not exist (not mounted, or the
    /// group was never created there) contributes nothing, as does an
    /// accounting file the kernel reports as unsupported. Everything
    /// else that fails aborts the snapshot.
    pub fn stat(&self) -> Result<Metrics> {
        let mut m = Metrics::default();
        for sub in &self.subsystems {
            let controller = sub.to_controller();
            if !controller.path(&self.group).exists() {
                continue;
            }
            if let Err(e) = controller.stat(&self.group, &mut m) {
                if e.is_not_supported() {
                    continue;
                }
                return Err(e);
            }
        }
        Ok(m)
    }

    /// Freeze every task in the group.
    ///
    /// Fails with `NotSupported` when the freezer subsystem is not part
    /// of this manager.
    pub fn freeze(&self, cancel: Option<&CancelToken>) -> Result<()> {
        self.freezer()?.freeze(&self.group, cancel)
    }

    /// Resume every task in the group.
    pub fn thaw(&self, cancel: Option<&CancelToken>) -> Result<()> {
        self.freezer()?.thaw(&self.group, cancel)
    }

    /// The freezer state the kernel currently reports for the group.
    pub fn freezer_state(&self) -> Result<FreezerState> {
        self.freezer()?.state(&self.group)
    }

    fn freezer(&self) -> Result<&FreezerController> {
        self.subsystems
            .iter()
            .find_map(|sub| match sub {
                Subsystem::Freezer(freezer) => Some(freezer),
                _ => None,
            })
            .ok_or_else(|| Error::new(NotSupported("freezer".to_string())))
    }

    /// Remove the group's directory from every subsystem, nested groups
    /// included.
    ///
    /// Each removal retries a few times while the kernel reports the
    /// directory busy. The first directory that cannot be removed aborts
    /// the call with its path; directories removed before it stay
    /// removed, so the call can be retried.
    pub fn delete(&self) -> Result<()> {
        for sub in &self.subsystems {
            let dir = sub.to_controller().path(&self.group);
            if !dir.exists() {
                continue;
            }
            crate::remove_dir_retried(&dir, &mut crate::remove_dir_recursive)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn the_hierarchy_root_is_rejected() {
        let mount = MountPoint::default();
        let err = Cgroup::load(&mount, "/").unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::InvalidPath);
        assert!(Cgroup::load(&mount, "").is_err());
    }

    #[test]
    fn create_spans_only_the_chosen_subsystems() {
        let root = tempfile::tempdir().unwrap();
        let mount = MountPoint::new(root.path());
        let cg =
            Cgroup::new_with(&mount, "pod", &[Name::Pids, Name::Cpu], &Resources::default())
                .unwrap();

        assert!(root.path().join("pids/pod").is_dir());
        assert!(root.path().join("cpu/pod").is_dir());
        assert!(!root.path().join("memory/pod").exists());
        assert_eq!(cg.subsystems().len(), 2);
    }

    #[test]
    fn attached_pids_union_without_duplicates() {
        let root = tempfile::tempdir().unwrap();
        let mount = MountPoint::new(root.path());
        let cg =
            Cgroup::new_with(&mount, "pod", &[Name::Pids, Name::Cpu], &Resources::default())
                .unwrap();

        cg.add_proc(CgroupPid::from(42u64)).unwrap();
        // A process that lingers in one subsystem only.
        fs::write(root.path().join("cpu/pod/cgroup.procs"), "42\n7\n").unwrap();

        let procs = cg.procs(false).unwrap();
        assert_eq!(procs, vec![CgroupPid::from(7u64), CgroupPid::from(42u64)]);
    }

    #[test]
    fn recursive_procs_descend_into_nested_groups() {
        let root = tempfile::tempdir().unwrap();
        let mount = MountPoint::new(root.path());
        let cg = Cgroup::new_with(&mount, "pod", &[Name::Pids], &Resources::default()).unwrap();

        let dir = root.path().join("pids/pod");
        fs::write(dir.join("cgroup.procs"), "42\n").unwrap();
        fs::create_dir(dir.join("child")).unwrap();
        fs::write(dir.join("child/cgroup.procs"), "9\n").unwrap();

        assert_eq!(
            cg.procs(true).unwrap(),
            vec![CgroupPid::from(9u64), CgroupPid::from(42u64)]
        );
        assert_eq!(cg.procs(false).unwrap(), vec![CgroupPid::from(42u64)]);
    }

    #[test]
    fn stat_skips_subsystems_that_never_materialized() {
        let root = tempfile::tempdir().unwrap();
        let mount = MountPoint::new(root.path());
        let cg = Cgroup::load_with(&mount, "pod", &[Name::Pids, Name::HugeTlb]).unwrap();

        let m = cg.stat().unwrap();
        assert_eq!(m, Metrics::default());
    }

    #[test]
    fn freeze_without_the_freezer_subsystem_is_unsupported() {
        let root = tempfile::tempdir().unwrap();
        let mount = MountPoint::new(root.path());
        let cg = Cgroup::new_with(&mount, "pod", &[Name::Pids], &Resources::default()).unwrap();

        let err = cg.freeze(None).unwrap_err();
        assert!(err.is_not_supported());
        assert!(cg.freezer_state().unwrap_err().is_not_supported());
    }

    #[test]
    fn delete_clears_every_hierarchy() {
        let root = tempfile::tempdir().unwrap();
        let mount = MountPoint::new(root.path());
        let cg =
            Cgroup::new_with(&mount, "pod", &[Name::Pids, Name::Cpu], &Resources::default())
                .unwrap();
        fs::create_dir(root.path().join("pids/pod/child")).unwrap();

        cg.delete().unwrap();
        assert!(!root.path().join("pids/pod").exists());
        assert!(!root.path().join("cpu/pod").exists());
        // Deleting an already deleted group is not an error.
        cg.delete().unwrap();
    }
}
