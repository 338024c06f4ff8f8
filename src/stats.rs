// Copyright (c) 2021-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! The metrics snapshot assembled by the `stat` operations.
//!
//! One shape serves both hierarchies; readers fill in whatever their
//! kernel exposes and leave the rest at the defaults. How the snapshot
//! is shipped elsewhere (protobuf, JSON, ...) is up to the caller; with
//! the `serde` feature every struct here derives `Serialize` and
//! `Deserialize`.

/// Statistics about the processes in the control group.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PidsStat {
    /// The number of processes currently in the control group.
    pub current: u64,
    /// The maximum number of processes, zero when the limit is `max`.
    pub limit: u64,
}

/// CPU time consumed by the control group, all values in nanoseconds.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CpuUsage {
    /// Total CPU time.
    pub total: u64,
    /// CPU time spent in kernel mode.
    pub kernel: u64,
    /// CPU time spent in user mode.
    pub user: u64,
    /// Total CPU time per processor.
    pub per_cpu: Vec<u64>,
}

/// Statistics about CPU bandwidth throttling.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Throttle {
    /// Number of enforcement periods that have elapsed.
    pub periods: u64,
    /// Number of periods in which the tasks were throttled.
    pub throttled_periods: u64,
    /// Total time the tasks were throttled, in nanoseconds.
    pub throttled_time: u64,
}

#[derive(Debug, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CpuStat {
    pub usage: CpuUsage,
    pub throttling: Throttle,
}

/// The `usage`/`limit`/`max_usage`/`failcnt` file quartet kept by the
/// memory controller for each accounting domain.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MemoryEntry {
    pub limit: u64,
    pub usage: u64,
    pub max: u64,
    pub failcnt: u64,
}

/// Statistics from the memory controller.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MemoryStat {
    pub cache: u64,
    pub rss: u64,
    pub rss_huge: u64,
    pub mapped_file: u64,
    pub dirty: u64,
    pub writeback: u64,
    pub pgfault: u64,
    pub pgmajfault: u64,
    /// Memory usage.
    pub usage: MemoryEntry,
    /// Memory plus swap usage. Left at default when the kernel was built
    /// without swap accounting.
    pub swap: MemoryEntry,
    /// Kernel memory usage.
    pub kernel: MemoryEntry,
    /// Kernel TCP buffer usage.
    pub kernel_tcp: MemoryEntry,
}

/// One line of a block I/O statistics file.
///
/// `op` carries the operation tag (`Read`, `Write`, `Sync`, ...) of
/// four-field lines and stays empty for three-field lines. Entries are
/// kept in file order, duplicates included; aggregation is left to the
/// consumer.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlkioEntry {
    pub op: String,
    pub major: u64,
    pub minor: u64,
    pub value: u64,
}

/// Statistics from the block I/O controller.
///
/// When the CFQ scheduler is not available only the two throttle-backed
/// categories are filled in.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlkioStat {
    pub io_service_bytes_recursive: Vec<BlkioEntry>,
    pub io_serviced_recursive: Vec<BlkioEntry>,
    pub io_queued_recursive: Vec<BlkioEntry>,
    pub io_service_time_recursive: Vec<BlkioEntry>,
    pub io_wait_time_recursive: Vec<BlkioEntry>,
    pub io_merged_recursive: Vec<BlkioEntry>,
    pub io_time_recursive: Vec<BlkioEntry>,
    pub sectors_recursive: Vec<BlkioEntry>,
}

/// Hugepage consumption for one page size.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HugetlbStat {
    /// Current usage in bytes.
    pub usage: u64,
    /// Peak usage in bytes; zero on the unified hierarchy, which keeps
    /// no peak counter.
    pub max: u64,
    /// Number of allocations that failed because the limit was hit.
    pub failcnt: u64,
    /// The page size label, e.g. `2MB`.
    pub pagesize: String,
}

/// Consumption of one RDMA device.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RdmaEntry {
    pub device: String,
    pub hca_handles: u32,
    pub hca_objects: u32,
}

/// Statistics from the RDMA controller.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RdmaStat {
    pub current: Vec<RdmaEntry>,
    pub limit: Vec<RdmaEntry>,
}

/// A point-in-time snapshot of everything the participating controllers
/// report about one control group.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Metrics {
    pub pids: PidsStat,
    pub cpu: CpuStat,
    pub memory: MemoryStat,
    pub blkio: BlkioStat,
    pub hugetlb: Vec<HugetlbStat>,
    pub rdma: RdmaStat,
}
