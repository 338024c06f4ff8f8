// Copyright (c) 2021-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! Native management of Linux control groups.
//!
//! The crate covers both flavours of the kernel interface: the legacy
//! per-controller hierarchies ([`v1`]) and the unified hierarchy ([`v2`]).
//! Both sides share the sparse [`Resources`] request type, the
//! [`stats::Metrics`] snapshot and the error types in [`error`].
//!
//! Managers never cache kernel state and never lock: every operation
//! resolves paths and re-reads interface files when called. Callers that
//! mutate one group from several threads have to serialize themselves.

use log::*;

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nix::errno::Errno;

pub mod error;
pub mod stats;
pub mod v1;
pub mod v2;

use crate::error::ErrorKind::*;
use crate::error::*;

/// Default mount root for both hierarchies.
pub const DEFAULT_MOUNTPOINT: &str = "/sys/fs/cgroup";

/// Where a cgroup filesystem is mounted and how group directories are
/// created beneath it.
///
/// Passing the mount point explicitly keeps the crate free of global
/// state: managers with different roots can coexist in one process,
/// which is also what the test suites rely on.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MountPoint {
    /// Filesystem root the hierarchy is mounted at.
    pub root: PathBuf,
    /// Permission bits for group directories created under the root.
    pub dir_mode: u32,
}

impl Default for MountPoint {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_MOUNTPOINT),
            dir_mode: 0o755,
        }
    }
}

impl MountPoint {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }
}

/// A structure representing a `pid`. Currently implementations exist for `u64` and
/// `std::process::Child`.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct CgroupPid {
    /// The process identifier
    pub pid: u64,
}

impl From<u64> for CgroupPid {
    fn from(u: u64) -> CgroupPid {
        CgroupPid { pid: u }
    }
}

impl<'a> From<&'a std::process::Child> for CgroupPid {
    fn from(u: &std::process::Child) -> CgroupPid {
        CgroupPid { pid: u.id() as u64 }
    }
}

/// The values for files such as `pids.max` that accept either a number
/// or the literal `max`.
#[derive(Eq, PartialEq, Copy, Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MaxValue {
    /// This value is returned when the text is `"max"`.
    Max,
    /// When the value is a numerical value, they are returned via this enum field.
    Value(i64),
}

impl Default for MaxValue {
    fn default() -> Self {
        MaxValue::Max
    }
}

impl fmt::Display for MaxValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaxValue::Max => write!(f, "max"),
            MaxValue::Value(num) => write!(f, "{}", num),
        }
    }
}

pub fn parse_max_value(s: &str) -> Result<MaxValue> {
    if s.trim() == "max" {
        return Ok(MaxValue::Max);
    }
    match s.trim().parse() {
        Ok(val) => Ok(MaxValue::Value(val)),
        Err(e) => Err(Error::with_cause(ParseError, e)),
    }
}

/// The state of the freezer as reported by the kernel.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FreezerState {
    /// The tasks in the control group are running.
    Thawed,
    /// The kernel is still stopping the tasks, not every one is frozen yet.
    Freezing,
    /// Every task in the control group is frozen.
    Frozen,
}

impl fmt::Display for FreezerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FreezerState::Thawed => write!(f, "THAWED"),
            FreezerState::Freezing => write!(f, "FREEZING"),
            FreezerState::Frozen => write!(f, "FROZEN"),
        }
    }
}

impl FromStr for FreezerState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "THAWED" => Ok(FreezerState::Thawed),
            "FREEZING" => Ok(FreezerState::Freezing),
            "FROZEN" => Ok(FreezerState::Frozen),
            _ => Err(Error::new(ParseError)),
        }
    }
}

/// Cooperative cancellation flag for the freezer wait loops.
///
/// The waiting thread polls the flag between sleeps; any other thread may
/// clone the token and trip it to make the wait return early with
/// [`error::ErrorKind::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// The payload shapes a control group file write can take.
///
/// Every setting a controller emits pairs a file name with one of these;
/// `Display` renders the exact bytes handed to the kernel.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SettingValue {
    Uint(u64),
    Int(i64),
    Max(MaxValue),
    /// A `major:minor`-prefixed per-device value, e.g. `8:0 1048576`.
    Device { major: u64, minor: u64, value: u64 },
    Text(String),
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Uint(v) => write!(f, "{}", v),
            SettingValue::Int(v) => write!(f, "{}", v),
            SettingValue::Max(v) => write!(f, "{}", v),
            SettingValue::Device {
                major,
                minor,
                value,
            } => write!(f, "{}:{} {}", major, minor, value),
            SettingValue::Text(v) => write!(f, "{}", v),
        }
    }
}

/// Resource limits for the memory subsystem.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MemoryResources {
    /// Upper limit of memory usage of the control group's tasks.
    pub limit: Option<i64>,
    /// How much memory the tasks in the control group can use when the system is under memory
    /// pressure.
    pub soft_limit: Option<i64>,
    /// How much memory and swap together can the tasks in the control group use.
    pub swap_limit: Option<i64>,
    /// How much memory (in bytes) can the kernel consume.
    pub kernel_limit: Option<i64>,
    /// How much of the kernel's memory (in bytes) can be used for TCP-related buffers.
    pub kernel_tcp_limit: Option<i64>,
    /// Controls the tendency of the kernel to swap out parts of the address space of the tasks to
    /// disk. Lower value implies less likely.
    pub swappiness: Option<u64>,
    /// Whether the kernel OOM killer is disabled for the control group.
    pub disable_oom_killer: Option<bool>,
}

/// Resources limits on the number of processes.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PidResources {
    /// The maximum number of processes that can exist in the control group.
    ///
    /// Note that attaching processes to the control group will still succeed _even_ if the limit
    /// would be violated, however forks/clones inside the control group will fail with `EAGAIN` if
    /// they would violate the limit set here.
    pub limit: Option<MaxValue>,
}

/// Resources limits about how the tasks can use the CPU.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CpuResources {
    // cpuset
    /// A comma-separated list of CPU IDs where the task in the control group can run. Dashes
    /// between numbers indicate ranges.
    pub cpus: Option<String>,
    /// Same syntax as the `cpus` field of this structure, but applies to memory nodes instead of
    /// processors.
    pub mems: Option<String>,
    // cpu
    /// Weight of how much of the total CPU time should this control group get. Note that this is
    /// hierarchical, so this is weighted against the siblings of this control group.
    pub shares: Option<u64>,
    /// In one `period`, how much can the tasks run in microseconds.
    pub quota: Option<i64>,
    /// Period of time in microseconds.
    pub period: Option<u64>,
    /// Runtime budget of realtime tasks in microseconds per `realtime_period`.
    pub realtime_runtime: Option<i64>,
    /// Period of the realtime budget in microseconds.
    pub realtime_period: Option<u64>,
}

/// A device resource that can be allowed or denied access to.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceResource {
    /// If true, access to the device is allowed, otherwise it's denied.
    pub allow: bool,
    /// `'c'` for character device, `'b'` for block device; or `'a'` for all devices.
    pub devtype: crate::v1::devices::DeviceType,
    /// The major number of the device. Negative numbers mean the wildcard `*`.
    pub major: i64,
    /// The minor number of the device. Negative numbers mean the wildcard `*`.
    pub minor: i64,
    /// Sequence of `'r'`, `'w'` or `'m'`, each denoting read, write or mknod permissions.
    pub access: Vec<crate::v1::devices::DevicePermissions>,
}

/// Limit the usage of devices for the control group's tasks.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceResources {
    /// For each device in the list, the limits in the structure are applied.
    pub devices: Vec<DeviceResource>,
}

/// Assigned priority for a network device.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NetworkPriority {
    /// The name (as visible in `ifconfig`) of the interface.
    pub name: String,
    /// Assigned priority.
    pub priority: u64,
}

/// Tags and limits imposed on packets emitted by the tasks in the control
/// group.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NetworkResources {
    /// The networking class identifier to attach to the packets.
    ///
    /// This can then later be used in iptables and such to have special rules.
    pub class_id: Option<u32>,
    /// Priority of the egress traffic for each interface.
    pub priorities: Vec<NetworkPriority>,
}

/// A hugepage type and its consumption limit for the control group.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HugePageResource {
    /// The size of the hugepage, i.e. `2MB`, `1GB`, etc.
    pub size: String,
    /// The amount of bytes (of memory consumed by the tasks) that are allowed to be backed by
    /// hugepages.
    pub limit: u64,
}

/// Provides the ability to set consumption limit on each type of hugepages.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HugePageResources {
    /// Set a limit of consumption for each hugepages type.
    pub limits: Vec<HugePageResource>,
}

/// Weight for a particular block device.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlkIoDeviceResource {
    /// The major number of the device.
    pub major: u64,
    /// The minor number of the device.
    pub minor: u64,
    /// The weight of the device against the descendant nodes.
    pub weight: Option<u16>,
    /// The weight of the device against the sibling nodes.
    pub leaf_weight: Option<u16>,
}

/// Provides the ability to throttle a device (both byte/sec, and IO op/s)
#[derive(Debug, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlkIoDeviceThrottleResource {
    /// The major number of the device.
    pub major: u64,
    /// The minor number of the device.
    pub minor: u64,
    /// The rate.
    pub rate: u64,
}

/// General block I/O resource limits.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlkIoResources {
    /// The weight of the control group against descendant nodes.
    pub weight: Option<u16>,
    /// The weight of the control group against sibling nodes.
    pub leaf_weight: Option<u16>,
    /// For each device, a separate weight (both normal and leaf) can be provided.
    pub weight_device: Vec<BlkIoDeviceResource>,
    /// Throttled read bytes/second can be provided for each device.
    pub throttle_read_bps_device: Vec<BlkIoDeviceThrottleResource>,
    /// Throttled read IO operations per second can be provided for each device.
    pub throttle_read_iops_device: Vec<BlkIoDeviceThrottleResource>,
    /// Throttled written bytes/second can be provided for each device.
    pub throttle_write_bps_device: Vec<BlkIoDeviceThrottleResource>,
    /// Throttled write IO operations per second can be provided for each device.
    pub throttle_write_iops_device: Vec<BlkIoDeviceThrottleResource>,
}

/// Per-device limits for RDMA/IB resources.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RdmaLimit {
    /// The device name as listed under `/sys/class/infiniband`.
    pub device: String,
    /// Maximum number of HCA handles the tasks may keep open.
    pub hca_handle: Option<u32>,
    /// Maximum number of HCA objects the tasks may create.
    pub hca_object: Option<u32>,
}

/// Limits on RDMA resource consumption.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RdmaResources {
    /// One entry per RDMA device; entries without any limit set are skipped.
    pub limits: Vec<RdmaLimit>,
}

/// The resource limits and constraints that will be set on the control group.
///
/// Every field is optional: a `None` (or an empty list) means the
/// corresponding kernel setting is left untouched, so a value built with
/// `Default::default()` plus one field filled in updates exactly that one
/// setting.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Resources {
    /// Memory usage related limits.
    pub memory: MemoryResources,
    /// Process identifier related limits.
    pub pid: PidResources,
    /// CPU related limits.
    pub cpu: CpuResources,
    /// Device related limits.
    pub devices: DeviceResources,
    /// Network related tags and limits.
    pub network: NetworkResources,
    /// Hugepages consumption related limits.
    pub hugepages: HugePageResources,
    /// Block device I/O related limits.
    pub blkio: BlkIoResources,
    /// RDMA related limits.
    pub rdma: RdmaResources,
}

/// A logical group path with the leading slash trimmed, so that joining
/// it onto a mount root cannot replace the root.
pub(crate) fn relative_group(group: &str) -> &str {
    group.trim_start_matches('/')
}

pub(crate) fn write_file(path: &Path, value: &str) -> Result<()> {
    fs::write(path, value).map_err(|e| {
        Error::with_cause(
            WriteFailed(path.display().to_string(), value.to_string()),
            e,
        )
    })
}

pub(crate) fn read_string_from(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(s) => Ok(s.trim().to_string()),
        Err(e) => Err(Error::with_cause(
            ReadFailed(path.display().to_string()),
            e,
        )),
    }
}

pub(crate) fn read_u64_from(path: &Path) -> Result<u64> {
    read_string_from(path)?
        .parse::<u64>()
        .map_err(|e| Error::with_cause(ParseError, e))
}

// Flat keyed
//  KEY0 VAL0\n
//  KEY1 VAL1\n
pub(crate) fn flat_keyed_to_hashmap(path: &Path) -> Result<HashMap<String, i64>> {
    let content = read_string_from(path)?;

    let mut h = HashMap::new();
    for line in content.lines() {
        let parts: Vec<&str> = line.split(' ').collect();
        if parts.len() == 2 {
            if let Ok(i) = parts[1].parse::<i64>() {
                h.insert(parts[0].to_string(), i);
            }
        }
    }
    Ok(h)
}

/// Create the directory and any missing ancestors. Already-existing
/// directories keep their mode.
pub(crate) fn ensure_dir(path: &Path, mode: u32) -> Result<()> {
    fs::DirBuilder::new()
        .recursive(true)
        .mode(mode)
        .create(path)
        .map_err(|e| Error::with_cause(CreateFailed(path.display().to_string()), e))
}

// Removes a cgroup path recursively, by removing any subdirectories
// (sub-cgroups) first. The interface files inside cannot be unlinked,
// removing the directory is all the kernel allows.
pub(crate) fn remove_dir_recursive(dir: &Path) -> io::Result<()> {
    // try the fast path first.
    if fs::remove_dir(dir).is_ok() {
        return Ok(());
    }

    if dir.is_dir() {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                remove_dir_recursive(&path)?;
            }
        }
        fs::remove_dir(dir)?;
    }

    Ok(())
}

pub(crate) const REMOVE_RETRIES: u32 = 5;
pub(crate) const REMOVE_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Run `remove_fn` until it succeeds, retrying only when the failure is
/// `EBUSY` (tasks still draining), up to [`REMOVE_RETRIES`] attempts with
/// a fixed [`REMOVE_RETRY_DELAY`] pause in between. Any other error is
/// surfaced immediately.
pub(crate) fn remove_dir_retried<F>(dir: &Path, remove_fn: &mut F) -> Result<()>
where
    F: FnMut(&Path) -> io::Result<()>,
{
    let mut attempt = 0;
    loop {
        match remove_fn(dir) {
            Ok(()) => {
                if attempt > 0 {
                    debug!("removed {} after {} retries", dir.display(), attempt);
                }
                return Ok(());
            }
            Err(e) => {
                let busy = e.raw_os_error() == Some(Errno::EBUSY as i32);
                attempt += 1;
                if !busy || attempt == REMOVE_RETRIES {
                    return Err(Error::with_cause(
                        RemoveFailed(dir.display().to_string()),
                        e,
                    ));
                }
            }
        }
        thread::sleep(REMOVE_RETRY_DELAY);
    }
}

pub(crate) const FREEZER_POLLS: u32 = 100;
pub(crate) const FREEZER_POLL_DELAY: Duration = Duration::from_millis(10);

/// Poll `read_state` until it reports `target`, sleeping
/// [`FREEZER_POLL_DELAY`] between reads.
///
/// A tripped `cancel` token stops the loop before the next read. After
/// `polls` unsuccessful reads the wait gives up with `FreezerTimeout`;
/// the group is then in whatever state the kernel last reported, which
/// callers can still observe through the state getters.
pub(crate) fn wait_freezer_state<F>(
    mut read_state: F,
    target: FreezerState,
    cancel: Option<&CancelToken>,
    polls: u32,
) -> Result<()>
where
    F: FnMut() -> Result<FreezerState>,
{
    let mut attempt = 0;
    loop {
        if let Some(cancel) = cancel {
            if cancel.is_cancelled() {
                return Err(Error::new(Cancelled));
            }
        }
        if read_state()? == target {
            return Ok(());
        }
        attempt += 1;
        if attempt >= polls {
            return Err(Error::new(FreezerTimeout(target)));
        }
        thread::sleep(FREEZER_POLL_DELAY);
    }
}

/// Read a membership file (`cgroup.procs`, `tasks`, ...) into pids.
pub(crate) fn read_pids_from(path: &Path) -> Result<Vec<u64>> {
    let content = read_string_from(path)?;
    Ok(content
        .lines()
        .filter_map(|line| line.trim().parse::<u64>().ok())
        .collect())
}

/// Read a membership file in `dir` and in every descendant directory.
pub(crate) fn read_pids_recursive(dir: &Path, file_name: &str) -> Result<Vec<u64>> {
    let mut pids = read_pids_from(&dir.join(file_name))?;

    for entry in fs::read_dir(dir)
        .map_err(|e| Error::with_cause(ReadFailed(dir.display().to_string()), e))?
    {
        let path = entry
            .map_err(|e| Error::with_cause(ReadFailed(dir.display().to_string()), e))?
            .path();
        if path.is_dir() {
            pids.extend(read_pids_recursive(&path, file_name)?);
        }
    }

    Ok(pids)
}
