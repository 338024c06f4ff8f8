// Copyright (c) 2021-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! The legacy control group hierarchies, one mount per controller.
//!
//! Every subsystem lives under `<root>/<name>/<group>` and is driven
//! through the [`Controller`] trait; [`Cgroup`] fans one logical group
//! out over a set of subsystems.

pub mod blkio;
pub mod cgroup;
pub mod cpu;
pub mod cpuacct;
pub mod cpuset;
pub mod devices;
pub mod freezer;
pub mod hugetlb;
pub mod memory;
pub mod net_cls;
pub mod net_prio;
pub mod perf_event;
pub mod pid;
pub mod rdma;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::*;
use crate::stats::Metrics;
use crate::{MountPoint, Resources, SettingValue};

use self::blkio::BlkIoController;
use self::cpu::CpuController;
use self::cpuacct::CpuAcctController;
use self::cpuset::CpuSetController;
use self::devices::DevicesController;
use self::freezer::FreezerController;
use self::hugetlb::HugeTlbController;
use self::memory::MemController;
use self::net_cls::NetClsController;
use self::net_prio::NetPrioController;
use self::perf_event::PerfEventController;
use self::pid::PidController;
use self::rdma::RdmaController;

#[doc(inline)]
pub use self::cgroup::Cgroup;

/// The kernel names of the v1 subsystems.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum Name {
    BlkIo,
    Cpu,
    CpuAcct,
    CpuSet,
    Devices,
    Freezer,
    HugeTlb,
    Mem,
    NetCls,
    NetPrio,
    PerfEvent,
    Pids,
    Rdma,
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Name::BlkIo => write!(f, "blkio"),
            Name::Cpu => write!(f, "cpu"),
            Name::CpuAcct => write!(f, "cpuacct"),
            Name::CpuSet => write!(f, "cpuset"),
            Name::Devices => write!(f, "devices"),
            Name::Freezer => write!(f, "freezer"),
            Name::HugeTlb => write!(f, "hugetlb"),
            Name::Mem => write!(f, "memory"),
            Name::NetCls => write!(f, "net_cls"),
            Name::NetPrio => write!(f, "net_prio"),
            Name::PerfEvent => write!(f, "perf_event"),
            Name::Pids => write!(f, "pids"),
            Name::Rdma => write!(f, "rdma"),
        }
    }
}

impl FromStr for Name {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "blkio" => Ok(Name::BlkIo),
            "cpu" => Ok(Name::Cpu),
            "cpuacct" => Ok(Name::CpuAcct),
            "cpuset" => Ok(Name::CpuSet),
            "devices" => Ok(Name::Devices),
            "freezer" => Ok(Name::Freezer),
            "hugetlb" => Ok(Name::HugeTlb),
            "memory" => Ok(Name::Mem),
            "net_cls" => Ok(Name::NetCls),
            "net_prio" => Ok(Name::NetPrio),
            "perf_event" => Ok(Name::PerfEvent),
            "pids" => Ok(Name::Pids),
            "rdma" => Ok(Name::Rdma),
            _ => Err(Error::from_string(format!("unknown subsystem {}", s))),
        }
    }
}

/// One pending write to a control group file.
#[derive(Debug, Clone)]
pub(crate) struct Setting {
    pub(crate) name: String,
    pub(crate) value: SettingValue,
}

impl Setting {
    pub(crate) fn new<N: Into<String>>(name: N, value: SettingValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Write settings to their files in order, stopping at the first failure.
/// Settings already written stay applied; nothing is rolled back.
pub(crate) fn write_settings(dir: &Path, settings: &[Setting]) -> Result<()> {
    for setting in settings {
        crate::write_file(&dir.join(&setting.name), &setting.value.to_string())?;
    }
    Ok(())
}

mod sealed {
    use super::*;

    pub trait ControllerInternal {
        fn mount(&self) -> &MountPoint;

        fn subsystem(&self) -> Name;

        /// Translate `res` into writes below `dir`. Absent fields must
        /// produce no write at all.
        fn apply(&self, dir: &Path, res: &Resources) -> Result<()>;

        /// Hook running after the group directory was created.
        fn post_create(&self, _dir: &Path) -> Result<()> {
            Ok(())
        }

        /// Merge this controller's statistics for `dir` into `m`.
        fn collect(&self, _dir: &Path, _m: &mut Metrics) -> Result<()> {
            Ok(())
        }
    }
}

pub(crate) use self::sealed::ControllerInternal;

/// A Controller is a subsystem attached to the control group.
///
/// Implementors translate the shared [`Resources`] into the files of one
/// subsystem; everything they do is keyed by the logical group path, no
/// kernel state is cached in between calls.
pub trait Controller {
    /// Which subsystem this controller drives.
    fn name(&self) -> Name;

    /// The filesystem directory backing `group` in this hierarchy.
    fn path(&self, group: &str) -> PathBuf;

    /// Create the group (idempotently) and apply `res`.
    fn create(&self, group: &str, res: &Resources) -> Result<()>;

    /// Re-apply `res` to the group.
    fn update(&self, group: &str, res: &Resources) -> Result<()>;

    /// Merge this controller's statistics for `group` into `m`.
    fn stat(&self, group: &str, m: &mut Metrics) -> Result<()>;
}

impl<T> Controller for T
where
    T: ControllerInternal,
{
    fn name(&self) -> Name {
        self.subsystem()
    }

    fn path(&self, group: &str) -> PathBuf {
        self.mount()
            .root
            .join(self.subsystem().to_string())
            .join(crate::relative_group(group))
    }

    fn create(&self, group: &str, res: &Resources) -> Result<()> {
        let dir = self.path(group);
        crate::ensure_dir(&dir, self.mount().dir_mode)?;
        self.post_create(&dir)?;
        self.apply(&dir, res)
    }

    fn update(&self, group: &str, res: &Resources) -> Result<()> {
        // The directory creation is idempotent and settings are sparse,
        // so an update is a create.
        self.create(group, res)
    }

    fn stat(&self, group: &str, m: &mut Metrics) -> Result<()> {
        self.collect(&self.path(group), m)
    }
}

/// Contains all the subsystems that are available in this crate.
#[derive(Debug, Clone)]
pub enum Subsystem {
    Pids(PidController),
    Mem(MemController),
    CpuSet(CpuSetController),
    CpuAcct(CpuAcctController),
    Cpu(CpuController),
    Devices(DevicesController),
    Freezer(FreezerController),
    NetCls(NetClsController),
    BlkIo(BlkIoController),
    PerfEvent(PerfEventController),
    NetPrio(NetPrioController),
    HugeTlb(HugeTlbController),
    Rdma(RdmaController),
}

impl Subsystem {
    pub fn to_controller(&self) -> &dyn Controller {
        match self {
            Subsystem::Pids(cont) => cont,
            Subsystem::Mem(cont) => cont,
            Subsystem::CpuSet(cont) => cont,
            Subsystem::CpuAcct(cont) => cont,
            Subsystem::Cpu(cont) => cont,
            Subsystem::Devices(cont) => cont,
            Subsystem::Freezer(cont) => cont,
            Subsystem::NetCls(cont) => cont,
            Subsystem::BlkIo(cont) => cont,
            Subsystem::PerfEvent(cont) => cont,
            Subsystem::NetPrio(cont) => cont,
            Subsystem::HugeTlb(cont) => cont,
            Subsystem::Rdma(cont) => cont,
        }
    }

    pub fn name(&self) -> Name {
        self.to_controller().name()
    }
}

fn subsystem_by_name(mount: &MountPoint, name: Name) -> Subsystem {
    match name {
        Name::Pids => Subsystem::Pids(PidController::new(mount)),
        Name::Mem => Subsystem::Mem(MemController::new(mount)),
        Name::CpuSet => Subsystem::CpuSet(CpuSetController::new(mount)),
        Name::CpuAcct => Subsystem::CpuAcct(CpuAcctController::new(mount)),
        Name::Cpu => Subsystem::Cpu(CpuController::new(mount)),
        Name::Devices => Subsystem::Devices(DevicesController::new(mount)),
        Name::Freezer => Subsystem::Freezer(FreezerController::new(mount)),
        Name::NetCls => Subsystem::NetCls(NetClsController::new(mount)),
        Name::BlkIo => Subsystem::BlkIo(BlkIoController::new(mount)),
        Name::PerfEvent => Subsystem::PerfEvent(PerfEventController::new(mount)),
        Name::NetPrio => Subsystem::NetPrio(NetPrioController::new(mount)),
        Name::HugeTlb => Subsystem::HugeTlb(HugeTlbController::new(mount)),
        Name::Rdma => Subsystem::Rdma(RdmaController::new(mount)),
    }
}

/// The default set of subsystems, in the order managers drive them.
pub fn subsystems(mount: &MountPoint) -> Vec<Subsystem> {
    DEFAULT_ORDER
        .iter()
        .map(|name| subsystem_by_name(mount, *name))
        .collect()
}

/// A caller-chosen set of subsystems, keeping the given order.
pub fn subsystems_by_name(mount: &MountPoint, names: &[Name]) -> Vec<Subsystem> {
    names
        .iter()
        .map(|name| subsystem_by_name(mount, *name))
        .collect()
}

const DEFAULT_ORDER: &[Name] = &[
    Name::Pids,
    Name::Mem,
    Name::CpuSet,
    Name::CpuAcct,
    Name::Cpu,
    Name::Devices,
    Name::Freezer,
    Name::NetCls,
    Name::BlkIo,
    Name::PerfEvent,
    Name::NetPrio,
    Name::HugeTlb,
    Name::Rdma,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_round_trips_kernel_spelling() {
        for name in DEFAULT_ORDER {
            assert_eq!(name.to_string().parse::<Name>().unwrap(), *name);
        }
        assert!("systemd".parse::<Name>().is_err());
    }

    #[test]
    fn registry_covers_every_subsystem() {
        let mount = MountPoint::default();
        let subs = subsystems(&mount);
        assert_eq!(subs.len(), DEFAULT_ORDER.len());
        for (sub, name) in subs.iter().zip(DEFAULT_ORDER) {
            assert_eq!(sub.name(), *name);
        }
    }

    #[test]
    fn write_settings_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let settings = vec![
            Setting::new("pids.max", SettingValue::Uint(10)),
            // The missing subdirectory makes this write fail.
            Setting::new("no-such-dir/pids.max", SettingValue::Uint(20)),
            Setting::new("cpu.shares", SettingValue::Uint(512)),
        ];

        let err = write_settings(dir.path(), &settings).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::WriteFailed(_, _)));
        assert!(dir.path().join("pids.max").exists());
        assert!(!dir.path().join("cpu.shares").exists());
    }
}
