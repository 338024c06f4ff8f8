// Copyright (c) 2021-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! The unified hierarchy manager. Start here for cgroup v2 work!

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::ErrorKind::*;
use crate::error::*;
use crate::stats::{BlkioEntry, HugetlbStat, Metrics};
use crate::v2::value;
use crate::{CancelToken, CgroupPid, FreezerState, MaxValue, MountPoint, Resources};

/// The controllers the kernel offers for delegation at the hierarchy
/// root, in the order `cgroup.controllers` lists them.
pub fn supported_controllers(mount: &MountPoint) -> Vec<String> {
    fs::read_to_string(mount.root.join("cgroup.controllers"))
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// A control group on the unified hierarchy.
///
/// All controllers share the one group directory, so a handle covers
/// every resource at once instead of fanning out per subsystem.
#[derive(Debug, Clone)]
pub struct Cgroup {
    mount: MountPoint,
    group: String,
    controllers: Vec<String>,
}

impl Cgroup {
    /// Create the group (parents included) with every controller the
    /// root offers, then apply `res`.
    pub fn new(mount: &MountPoint, group: &str, res: &Resources) -> Result<Self> {
        let controllers = supported_controllers(mount);
        Self::new_with(mount, group, &controllers, res)
    }

    /// Create the group, delegating the given controllers down to it,
    /// then apply `res`.
    pub fn new_with(
        mount: &MountPoint,
        group: &str,
        controllers: &[String],
        res: &Resources,
    ) -> Result<Self> {
        let cg = Self::with_controllers(mount, group, controllers)?;
        cg.create(res)?;
        Ok(cg)
    }

    /// Build a handle on an existing group without touching the
    /// filesystem.
    pub fn load(mount: &MountPoint, group: &str) -> Result<Self> {
        Self::with_controllers(mount, group, &[])
    }

    fn with_controllers(mount: &MountPoint, group: &str, controllers: &[String]) -> Result<Self> {
        let group = crate::relative_group(group);
        // The hierarchy root itself is off limits.
        if group.is_empty() {
            return Err(Error::new(InvalidPath));
        }
        Ok(Self {
            mount: mount.clone(),
            group: group.to_string(),
            controllers: controllers.to_vec(),
        })
    }

    /// The group path relative to the hierarchy root.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// The mount configuration behind this handle.
    pub fn mount(&self) -> &MountPoint {
        &self.mount
    }

    /// The controllers delegated to the group on create.
    pub fn controllers(&self) -> &[String] {
        &self.controllers
    }

    /// The directory backing the group.
    pub fn path(&self) -> PathBuf {
        self.mount.root.join(&self.group)
    }

    fn create(&self, res: &Resources) -> Result<()> {
        crate::ensure_dir(&self.mount.root, self.mount.dir_mode)?;
        enable_controllers(&self.controllers, &self.mount.root);
        let elements: Vec<&str> = self.group.split('/').filter(|e| !e.is_empty()).collect();
        let last = elements.len() - 1;
        let mut dir = self.mount.root.clone();
        for (i, element) in elements.iter().enumerate() {
            dir.push(element);
            crate::ensure_dir(&dir, self.mount.dir_mode)?;
            // Delegation stops at the parent, a leaf with enabled
            // controllers could not take processes any more.
            if i < last {
                enable_controllers(&self.controllers, &dir);
            }
        }
        self.update(res)
    }

    /// Apply `res`, writing only the files its set fields name. The
    /// first failed write aborts the update.
    pub fn update(&self, res: &Resources) -> Result<()> {
        let dir = self.path();
        for value in value::values(res) {
            value.write_to(&dir)?;
        }
        Ok(())
    }

    /// Move a process into the group.
    pub fn add_proc(&self, pid: CgroupPid) -> Result<()> {
        self.attach(pid, "cgroup.procs")
    }

    /// Move a single thread into the group.
    pub fn add_thread(&self, pid: CgroupPid) -> Result<()> {
        self.attach(pid, "cgroup.threads")
    }

    fn attach(&self, pid: CgroupPid, file_name: &str) -> Result<()> {
        crate::write_file(&self.path().join(file_name), &pid.pid.to_string())
    }

    /// Pids of the group's member processes, each reported once in
    /// ascending order. With `recursive` nested groups are walked too.
    pub fn procs(&self, recursive: bool) -> Result<Vec<CgroupPid>> {
        self.members("cgroup.procs", recursive)
    }

    /// Thread ids of the group's members.
    pub fn threads(&self) -> Result<Vec<CgroupPid>> {
        self.members("cgroup.threads", false)
    }

    fn members(&self, file_name: &str, recursive: bool) -> Result<Vec<CgroupPid>> {
        let dir = self.path();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut pids = if recursive {
            crate::read_pids_recursive(&dir, file_name)?
        } else {
            crate::read_pids_from(&dir.join(file_name))?
        };
        pids.sort_unstable();
        pids.dedup();
        Ok(pids.into_iter().map(CgroupPid::from).collect())
    }

    /// Freeze every process in the group and wait until the kernel
    /// reports the whole group frozen.
    pub fn freeze(&self, cancel: Option<&CancelToken>) -> Result<()> {
        self.transition(FreezerState::Frozen, "1", cancel)
    }

    /// Thaw the group, waiting for the frozen bit to clear.
    pub fn thaw(&self, cancel: Option<&CancelToken>) -> Result<()> {
        self.transition(FreezerState::Thawed, "0", cancel)
    }

    fn transition(
        &self,
        target: FreezerState,
        request: &str,
        cancel: Option<&CancelToken>,
    ) -> Result<()> {
        let dir = self.path();
        if read_freezer_state(&dir)? == target {
            return Ok(());
        }
        crate::write_file(&dir.join("cgroup.freeze"), request)?;
        crate::wait_freezer_state(
            || read_freezer_state(&dir),
            target,
            cancel,
            crate::FREEZER_POLLS,
        )
    }

    /// The freezer state as `cgroup.events` reports it.
    pub fn freezer_state(&self) -> Result<FreezerState> {
        read_freezer_state(&self.path())
    }

    /// Kill every process in the group in one write.
    ///
    /// `cgroup.kill` arrived in Linux 5.14, older kernels report
    /// `NotSupported`.
    pub fn kill(&self) -> Result<()> {
        let file = self.path().join("cgroup.kill");
        if !file.exists() {
            return Err(Error::new(NotSupported("cgroup.kill".to_string())));
        }
        crate::write_file(&file, "1")
    }

    /// Collect the usage counters of every controller active in the
    /// group. Files a kernel or configuration does not provide leave
    /// their section at its default.
    pub fn stat(&self) -> Result<Metrics> {
        let dir = self.path();
        let mut metrics = Metrics::default();
        if !dir.exists() {
            return Ok(metrics);
        }
        collect_pids(&dir, &mut metrics)?;
        collect_cpu(&dir, &mut metrics)?;
        collect_memory(&dir, &mut metrics)?;
        collect_io(&dir, &mut metrics)?;
        collect_hugetlb(&dir, &mut metrics)?;
        collect_rdma(&dir, &mut metrics)?;
        Ok(metrics)
    }

    /// Remove the group and any nested groups. Directories still busy
    /// with exiting processes are retried briefly.
    pub fn delete(&self) -> Result<()> {
        let dir = self.path();
        if !dir.exists() {
            return Ok(());
        }
        crate::remove_dir_retried(&dir, &mut crate::remove_dir_recursive)
    }
}

/// Ask `dir` to delegate `controllers` to its children. Failures are
/// ignored, the kernel refuses single controllers when they cannot be
/// delegated or a child already holds processes.
fn enable_controllers(controllers: &[String], dir: &Path) {
    let file = dir.join("cgroup.subtree_control");
    for controller in controllers {
        if let Err(e) = fs::write(&file, format!("+{}", controller)) {
            debug!("could not delegate {} at {}: {}", controller, dir.display(), e);
        }
    }
}

/// The unified freezer knows no in-between state, `cgroup.events`
/// carries a frozen bit that flips once the whole group is frozen.
fn read_freezer_state(dir: &Path) -> Result<FreezerState> {
    let events = crate::flat_keyed_to_hashmap(&dir.join("cgroup.events"))?;
    if events.get("frozen").copied() == Some(1) {
        Ok(FreezerState::Frozen)
    } else {
        Ok(FreezerState::Thawed)
    }
}

/// Read a `max`-or-number interface file, substituting `unlimited` for
/// a literal `max`.
fn read_max_or(path: &Path, unlimited: u64) -> Result<u64> {
    match crate::parse_max_value(&crate::read_string_from(path)?)? {
        MaxValue::Max => Ok(unlimited),
        MaxValue::Value(v) => Ok(v.max(0) as u64),
    }
}

fn collect_pids(dir: &Path, m: &mut Metrics) -> Result<()> {
    if !dir.join("pids.current").exists() {
        return Ok(());
    }
    m.pids.current = crate::read_u64_from(&dir.join("pids.current"))?;
    // An unlimited group reports a limit of zero.
    m.pids.limit = read_max_or(&dir.join("pids.max"), 0)?;
    Ok(())
}

fn collect_cpu(dir: &Path, m: &mut Metrics) -> Result<()> {
    let path = dir.join("cpu.stat");
    if !path.exists() {
        return Ok(());
    }
    let stat = crate::flat_keyed_to_hashmap(&path)?;
    let get = |key: &str| stat.get(key).copied().unwrap_or(0).max(0) as u64;
    // The unified hierarchy accounts in microseconds, reported here in
    // nanoseconds like the legacy cpuacct files.
    m.cpu.usage.total = get("usage_usec") * 1000;
    m.cpu.usage.user = get("user_usec") * 1000;
    m.cpu.usage.kernel = get("system_usec") * 1000;
    m.cpu.throttling.periods = get("nr_periods");
    m.cpu.throttling.throttled_periods = get("nr_throttled");
    m.cpu.throttling.throttled_time = get("throttled_usec") * 1000;
    Ok(())
}

fn collect_memory(dir: &Path, m: &mut Metrics) -> Result<()> {
    if !dir.join("memory.current").exists() {
        return Ok(());
    }
    let stat = crate::flat_keyed_to_hashmap(&dir.join("memory.stat"))?;
    let get = |key: &str| stat.get(key).copied().unwrap_or(0).max(0) as u64;
    m.memory.rss = get("anon");
    m.memory.rss_huge = get("anon_thp");
    m.memory.cache = get("file");
    m.memory.mapped_file = get("file_mapped");
    m.memory.dirty = get("file_dirty");
    m.memory.writeback = get("file_writeback");
    m.memory.pgfault = get("pgfault");
    m.memory.pgmajfault = get("pgmajfault");
    m.memory.usage.usage = crate::read_u64_from(&dir.join("memory.current"))?;
    m.memory.usage.limit = read_max_or(&dir.join("memory.max"), u64::MAX)?;
    let events = dir.join("memory.events");
    if events.exists() {
        let events = crate::flat_keyed_to_hashmap(&events)?;
        m.memory.usage.failcnt = events.get("max").copied().unwrap_or(0).max(0) as u64;
    }
    if dir.join("memory.swap.current").exists() {
        m.memory.swap.usage = crate::read_u64_from(&dir.join("memory.swap.current"))?;
        m.memory.swap.limit = read_max_or(&dir.join("memory.swap.max"), u64::MAX)?;
    }
    Ok(())
}

fn collect_io(dir: &Path, m: &mut Metrics) -> Result<()> {
    let path = dir.join("io.stat");
    if !path.exists() {
        return Ok(());
    }
    for line in crate::read_string_from(&path)?.lines() {
        let mut fields = line.split_whitespace();
        let device = match fields.next() {
            Some(device) => device,
            None => continue,
        };
        let (major, minor) = match device.split_once(':') {
            Some((major, minor)) => match (major.parse::<u64>(), minor.parse::<u64>()) {
                (Ok(major), Ok(minor)) => (major, minor),
                _ => continue,
            },
            None => continue,
        };
        for field in fields {
            let (key, raw) = match field.split_once('=') {
                Some(kv) => kv,
                None => continue,
            };
            let value = match raw.parse::<u64>() {
                Ok(value) => value,
                Err(_) => continue,
            };
            let (entries, op) = match key {
                "rbytes" => (&mut m.blkio.io_service_bytes_recursive, "Read"),
                "wbytes" => (&mut m.blkio.io_service_bytes_recursive, "Write"),
                "dbytes" => (&mut m.blkio.io_service_bytes_recursive, "Discard"),
                "rios" => (&mut m.blkio.io_serviced_recursive, "Read"),
                "wios" => (&mut m.blkio.io_serviced_recursive, "Write"),
                "dios" => (&mut m.blkio.io_serviced_recursive, "Discard"),
                _ => continue,
            };
            entries.push(BlkioEntry {
                op: op.to_string(),
                major,
                minor,
                value,
            });
        }
    }
    Ok(())
}

fn collect_hugetlb(dir: &Path, m: &mut Metrics) -> Result<()> {
    let entries = fs::read_dir(dir)
        .map_err(|e| Error::with_cause(ReadFailed(dir.display().to_string()), e))?;
    for entry in entries {
        let entry =
            entry.map_err(|e| Error::with_cause(ReadFailed(dir.display().to_string()), e))?;
        let name = entry.file_name();
        let name = match name.to_str() {
            Some(name) => name,
            None => continue,
        };
        // Page sizes come out of the file names, hugetlb.<size>.current.
        // The rsvd twins carry an extra dot and are left out.
        let size = match name
            .strip_prefix("hugetlb.")
            .and_then(|rest| rest.strip_suffix(".current"))
        {
            Some(size) if !size.contains('.') => size,
            _ => continue,
        };
        let mut stat = HugetlbStat {
            usage: crate::read_u64_from(&dir.join(name))?,
            pagesize: size.to_string(),
            ..Default::default()
        };
        let events = dir.join(format!("hugetlb.{}.events", size));
        if events.exists() {
            let events = crate::flat_keyed_to_hashmap(&events)?;
            stat.failcnt = events.get("max").copied().unwrap_or(0).max(0) as u64;
        }
        m.hugetlb.push(stat);
    }
    Ok(())
}

fn collect_rdma(dir: &Path, m: &mut Metrics) -> Result<()> {
    if !dir.join("rdma.current").exists() {
        return Ok(());
    }
    m.rdma.current = crate::v1::rdma::parse_entries(&dir.join("rdma.current"))?;
    m.rdma.limit = crate::v1::rdma::parse_entries(&dir.join("rdma.max"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(root: &Path, group: &str) -> Cgroup {
        let mount = MountPoint::new(root);
        Cgroup::new_with(&mount, group, &[], &Resources::default()).unwrap()
    }

    #[test]
    fn supported_controllers_come_from_the_root_file() {
        let root = tempfile::tempdir().unwrap();
        let mount = MountPoint::new(root.path());
        assert!(supported_controllers(&mount).is_empty());

        fs::write(
            root.path().join("cgroup.controllers"),
            "cpuset cpu io memory pids\n",
        )
        .unwrap();
        assert_eq!(
            supported_controllers(&mount),
            vec!["cpuset", "cpu", "io", "memory", "pids"]
        );
    }

    #[test]
    fn the_unified_root_is_not_a_group() {
        let mount = MountPoint::new("/tmp/nope");
        let err = Cgroup::load(&mount, "/").unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::InvalidPath);
    }

    #[test]
    fn create_delegates_controllers_above_the_leaf() {
        let root = tempfile::tempdir().unwrap();
        let mount = MountPoint::new(root.path());
        let controllers = vec!["cpu".to_string(), "io".to_string()];
        let cg = Cgroup::new_with(&mount, "pods/pod-1", &controllers, &Resources::default())
            .unwrap();

        assert_eq!(cg.controllers(), &controllers[..]);
        assert!(root.path().join("pods/pod-1").is_dir());
        assert!(root.path().join("cgroup.subtree_control").exists());
        assert!(root.path().join("pods/cgroup.subtree_control").exists());
        assert!(!root.path().join("pods/pod-1/cgroup.subtree_control").exists());
    }

    #[test]
    fn update_writes_the_translated_files() {
        let root = tempfile::tempdir().unwrap();
        let cg = pod(root.path(), "pod");

        let mut res = Resources::default();
        res.cpu.shares = Some(262144);
        res.memory.limit = Some(1 << 30);
        res.pid.limit = Some(MaxValue::Value(50));
        cg.update(&res).unwrap();

        let dir = cg.path();
        assert_eq!(fs::read_to_string(dir.join("cpu.weight")).unwrap(), "10000");
        assert_eq!(
            fs::read_to_string(dir.join("memory.max")).unwrap(),
            "1073741824"
        );
        assert_eq!(fs::read_to_string(dir.join("pids.max")).unwrap(), "50");
        assert!(!dir.join("cpu.max").exists());
    }

    #[test]
    fn attach_writes_the_pid() {
        let root = tempfile::tempdir().unwrap();
        let cg = pod(root.path(), "pod");
        let dir = cg.path();

        cg.add_proc(CgroupPid::from(1234)).unwrap();
        assert_eq!(fs::read_to_string(dir.join("cgroup.procs")).unwrap(), "1234");
        cg.add_thread(CgroupPid::from(1235)).unwrap();
        assert_eq!(
            fs::read_to_string(dir.join("cgroup.threads")).unwrap(),
            "1235"
        );
    }

    #[test]
    fn members_union_children_when_recursive() {
        let root = tempfile::tempdir().unwrap();
        let cg = pod(root.path(), "pod");
        let dir = cg.path();
        fs::write(dir.join("cgroup.procs"), "42\n7\n").unwrap();
        fs::create_dir(dir.join("child")).unwrap();
        fs::write(dir.join("child/cgroup.procs"), "42\n9\n").unwrap();

        let direct = cg.procs(false).unwrap();
        assert_eq!(direct, vec![CgroupPid::from(7), CgroupPid::from(42)]);
        let all = cg.procs(true).unwrap();
        assert_eq!(
            all,
            vec![
                CgroupPid::from(7),
                CgroupPid::from(9),
                CgroupPid::from(42)
            ]
        );
    }

    #[test]
    fn freezer_state_follows_cgroup_events() {
        let root = tempfile::tempdir().unwrap();
        let cg = pod(root.path(), "pod");
        let events = cg.path().join("cgroup.events");

        fs::write(&events, "populated 1\nfrozen 0\n").unwrap();
        assert_eq!(cg.freezer_state().unwrap(), FreezerState::Thawed);
        fs::write(&events, "populated 1\nfrozen 1\n").unwrap();
        assert_eq!(cg.freezer_state().unwrap(), FreezerState::Frozen);
    }

    #[test]
    fn freeze_requests_and_polls_the_kernel() {
        let root = tempfile::tempdir().unwrap();
        let cg = pod(root.path(), "pod");
        let dir = cg.path();
        fs::write(dir.join("cgroup.events"), "populated 1\nfrozen 1\n").unwrap();

        // Already frozen, nothing to request.
        cg.freeze(None).unwrap();
        assert!(!dir.join("cgroup.freeze").exists());

        // Thawing writes the request; the cancel fires before the first
        // poll comes around.
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = cg.thaw(Some(&cancel)).unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::Cancelled);
        assert_eq!(fs::read_to_string(dir.join("cgroup.freeze")).unwrap(), "0");
    }

    #[test]
    fn kill_needs_kernel_support() {
        let root = tempfile::tempdir().unwrap();
        let cg = pod(root.path(), "pod");
        let dir = cg.path();

        let err = cg.kill().unwrap_err();
        assert!(err.is_not_supported());

        fs::write(dir.join("cgroup.kill"), "").unwrap();
        cg.kill().unwrap();
        assert_eq!(fs::read_to_string(dir.join("cgroup.kill")).unwrap(), "1");
    }

    #[test]
    fn stat_reads_the_unified_files() {
        let root = tempfile::tempdir().unwrap();
        let cg = pod(root.path(), "pod");
        let dir = cg.path();

        fs::write(dir.join("pids.current"), "3\n").unwrap();
        fs::write(dir.join("pids.max"), "max\n").unwrap();
        fs::write(
            dir.join("cpu.stat"),
            "usage_usec 1000\nuser_usec 600\nsystem_usec 400\n\
             nr_periods 7\nnr_throttled 2\nthrottled_usec 5\n",
        )
        .unwrap();
        fs::write(dir.join("memory.current"), "4096\n").unwrap();
        fs::write(dir.join("memory.max"), "max\n").unwrap();
        fs::write(
            dir.join("memory.stat"),
            "anon 1024\nfile 2048\npgfault 11\n",
        )
        .unwrap();
        fs::write(dir.join("memory.events"), "low 0\nmax 6\n").unwrap();
        fs::write(dir.join("memory.swap.current"), "512\n").unwrap();
        fs::write(dir.join("memory.swap.max"), "1024\n").unwrap();
        fs::write(
            dir.join("io.stat"),
            "8:0 rbytes=4096 wbytes=512 rios=4 wios=1\n",
        )
        .unwrap();
        fs::write(dir.join("hugetlb.2MB.current"), "2097152\n").unwrap();
        fs::write(dir.join("hugetlb.2MB.events"), "max 3\n").unwrap();
        fs::write(dir.join("hugetlb.2MB.rsvd.current"), "0\n").unwrap();
        fs::write(
            dir.join("rdma.current"),
            "mlx5_1 hca_handle=2 hca_object=1000\n",
        )
        .unwrap();
        fs::write(
            dir.join("rdma.max"),
            "mlx5_1 hca_handle=max hca_object=max\n",
        )
        .unwrap();

        let m = cg.stat().unwrap();
        assert_eq!(m.pids.current, 3);
        assert_eq!(m.pids.limit, 0);
        assert_eq!(m.cpu.usage.total, 1_000_000);
        assert_eq!(m.cpu.usage.user, 600_000);
        assert_eq!(m.cpu.usage.kernel, 400_000);
        assert_eq!(m.cpu.throttling.periods, 7);
        assert_eq!(m.cpu.throttling.throttled_periods, 2);
        assert_eq!(m.cpu.throttling.throttled_time, 5_000);
        assert_eq!(m.memory.rss, 1024);
        assert_eq!(m.memory.cache, 2048);
        assert_eq!(m.memory.pgfault, 11);
        assert_eq!(m.memory.usage.usage, 4096);
        assert_eq!(m.memory.usage.limit, u64::MAX);
        assert_eq!(m.memory.usage.failcnt, 6);
        assert_eq!(m.memory.swap.usage, 512);
        assert_eq!(m.memory.swap.limit, 1024);

        let bytes = &m.blkio.io_service_bytes_recursive;
        assert_eq!(bytes.len(), 2);
        assert_eq!((bytes[0].op.as_str(), bytes[0].value), ("Read", 4096));
        assert_eq!((bytes[1].op.as_str(), bytes[1].value), ("Write", 512));
        let serviced = &m.blkio.io_serviced_recursive;
        assert_eq!((serviced[0].op.as_str(), serviced[0].value), ("Read", 4));
        assert_eq!((serviced[1].op.as_str(), serviced[1].value), ("Write", 1));

        assert_eq!(m.hugetlb.len(), 1);
        assert_eq!(m.hugetlb[0].pagesize, "2MB");
        assert_eq!(m.hugetlb[0].usage, 2097152);
        assert_eq!(m.hugetlb[0].failcnt, 3);

        assert_eq!(m.rdma.current[0].hca_objects, 1000);
        assert_eq!(m.rdma.limit[0].hca_handles, u32::MAX);
    }

    #[test]
    fn stat_on_a_bare_group_is_empty() {
        let root = tempfile::tempdir().unwrap();
        let cg = pod(root.path(), "pod");
        assert_eq!(cg.stat().unwrap(), Metrics::default());

        let mount = MountPoint::new(root.path());
        let ghost = Cgroup::load(&mount, "ghost").unwrap();
        assert_eq!(ghost.stat().unwrap(), Metrics::default());
    }

    #[test]
    fn delete_removes_the_subtree() {
        let root = tempfile::tempdir().unwrap();
        let cg = pod(root.path(), "pods/pod-1");
        let dir = cg.path();
        fs::create_dir(dir.join("child")).unwrap();

        cg.delete().unwrap();
        assert!(!dir.exists());
        assert!(root.path().join("pods").is_dir());
        cg.delete().unwrap();
    }
}
