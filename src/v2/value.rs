// Copyright (c) 2021-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! Translation of [`Resources`] into unified hierarchy interface files.
//!
//! One [`Value`] is one write of one file relative to the group
//! directory. Only fields that are actually set translate, so a sparse
//! [`Resources`] touches nothing but the files it names.

use std::fs;
use std::io;
use std::io::Write;
use std::path::Path;

use crate::error::ErrorKind::*;
use crate::error::*;
use crate::{BlkIoDeviceThrottleResource, SettingValue};
use crate::{BlkIoResources, CpuResources, HugePageResources, MemoryResources, PidResources};
use crate::{MaxValue, Resources};

/// How a value reaches the filesystem.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Writer {
    /// Plain write of the named file.
    Default,
    /// Write the named file, then mirror it into its `rsvd` twin when
    /// the kernel exposes one.
    HugetlbRsvd,
}

/// A single pending write against a cgroup directory.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct Value {
    pub(crate) filename: String,
    pub(crate) value: SettingValue,
    writer: Writer,
}

impl Value {
    fn new<N: Into<String>>(filename: N, value: SettingValue) -> Self {
        Self {
            filename: filename.into(),
            value,
            writer: Writer::Default,
        }
    }

    fn rsvd<N: Into<String>>(filename: N, value: SettingValue) -> Self {
        Self {
            filename: filename.into(),
            value,
            writer: Writer::HugetlbRsvd,
        }
    }

    pub(crate) fn write_to(&self, dir: &Path) -> Result<()> {
        let value = self.value.to_string();
        crate::write_file(&dir.join(&self.filename), &value)?;
        if self.writer == Writer::HugetlbRsvd {
            self.write_rsvd_twin(dir, &value)?;
        }
        Ok(())
    }

    /// Mirror the write into the `rsvd` variant of the file. Reservation
    /// accounting arrived in Linux 5.7, on older kernels the twin does
    /// not exist and the write is skipped.
    fn write_rsvd_twin(&self, dir: &Path, value: &str) -> Result<()> {
        let twin = dir.join(rsvd_filename(&self.filename)?);
        let write_failed = |e| {
            Error::with_cause(
                WriteFailed(twin.display().to_string(), value.to_string()),
                e,
            )
        };
        match fs::OpenOptions::new().write(true).truncate(true).open(&twin) {
            Ok(mut file) => file.write_all(value.as_bytes()).map_err(write_failed),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(write_failed(e)),
        }
    }
}

/// Turn `hugetlb.<size>.max` into `hugetlb.<size>.rsvd.max`.
fn rsvd_filename(filename: &str) -> Result<String> {
    let parts: Vec<&str> = filename.split('.').collect();
    if parts.len() != 3 {
        return Err(Error::from_string(format!("invalid file: {}", filename)));
    }
    Ok(format!("{}.{}.rsvd.{}", parts[0], parts[1], parts[2]))
}

/// Map legacy cpu shares (2..262144) onto the unified weight range
/// (1..10000).
fn weight_from_shares(shares: u64) -> u64 {
    1 + shares.saturating_sub(2).saturating_mul(9999) / 262142
}

/// Map a blkio weight (10..1000) onto the `io.bfq.weight` range
/// (1..10000).
fn weight_from_blkio(weight: u16) -> u64 {
    let converted = 1 + (i64::from(weight) - 10) * 9999 / 990;
    converted.max(1) as u64
}

fn unlimited_when_negative(bytes: i64) -> SettingValue {
    if bytes < 0 {
        SettingValue::Max(MaxValue::Max)
    } else {
        SettingValue::Int(bytes)
    }
}

/// Flatten a resource update into the ordered list of file writes it
/// stands for.
pub(crate) fn values(res: &Resources) -> Vec<Value> {
    let mut values = Vec::new();
    cpu_values(&res.cpu, &mut values);
    memory_values(&res.memory, &mut values);
    pid_values(&res.pid, &mut values);
    io_values(&res.blkio, &mut values);
    rdma_values(res, &mut values);
    hugetlb_values(&res.hugepages, &mut values);
    values
}

fn cpu_values(cpu: &CpuResources, values: &mut Vec<Value>) {
    if let Some(shares) = cpu.shares {
        if shares > 0 {
            let weight = weight_from_shares(shares);
            values.push(Value::new("cpu.weight", SettingValue::Uint(weight)));
        }
    }
    // Bandwidth goes into one "<quota> <period>" write, nothing can be
    // set without a period.
    if let Some(period) = cpu.period {
        let quota = match cpu.quota {
            Some(quota) if quota > 0 => quota.to_string(),
            _ => "max".to_string(),
        };
        let line = format!("{} {}", quota, period);
        values.push(Value::new("cpu.max", SettingValue::Text(line)));
    }
    if let Some(cpus) = &cpu.cpus {
        values.push(Value::new("cpuset.cpus", SettingValue::Text(cpus.clone())));
    }
    if let Some(mems) = &cpu.mems {
        values.push(Value::new("cpuset.mems", SettingValue::Text(mems.clone())));
    }
}

fn memory_values(memory: &MemoryResources, values: &mut Vec<Value>) {
    // The legacy swap limit covered memory plus swap while the unified
    // file accounts swap alone, so the memory limit is carved out where
    // both are set. Negative limits mean unlimited on both hierarchies.
    if let Some(swap) = memory.swap_limit {
        let swap = match memory.limit {
            Some(limit) if swap >= 0 && limit > 0 => swap - limit,
            _ => swap,
        };
        values.push(Value::new("memory.swap.max", unlimited_when_negative(swap)));
    }
    if let Some(limit) = memory.limit {
        values.push(Value::new("memory.max", unlimited_when_negative(limit)));
    }
    if let Some(soft_limit) = memory.soft_limit {
        values.push(Value::new("memory.low", unlimited_when_negative(soft_limit)));
    }
}

fn pid_values(pid: &PidResources, values: &mut Vec<Value>) {
    if let Some(limit) = pid.limit {
        values.push(Value::new("pids.max", SettingValue::Max(limit)));
    }
}

fn io_values(blkio: &BlkIoResources, values: &mut Vec<Value>) {
    if let Some(weight) = blkio.weight {
        if weight > 0 {
            let weight = weight_from_blkio(weight);
            values.push(Value::new("io.bfq.weight", SettingValue::Uint(weight)));
        }
    }
    let mut throttle = |key: &str, devices: &[BlkIoDeviceThrottleResource]| {
        for device in devices {
            let line = format!("{}:{} {}={}", device.major, device.minor, key, device.rate);
            values.push(Value::new("io.max", SettingValue::Text(line)));
        }
    };
    throttle("rbps", &blkio.throttle_read_bps_device);
    throttle("riops", &blkio.throttle_read_iops_device);
    throttle("wbps", &blkio.throttle_write_bps_device);
    throttle("wiops", &blkio.throttle_write_iops_device);
}

fn rdma_values(res: &Resources, values: &mut Vec<Value>) {
    for line in crate::v1::rdma::max_lines(res) {
        values.push(Value::new("rdma.max", SettingValue::Text(line)));
    }
}

fn hugetlb_values(hugepages: &HugePageResources, values: &mut Vec<Value>) {
    for page in &hugepages.limits {
        let filename = format!("hugetlb.{}.max", page.size);
        values.push(Value::rsvd(filename, SettingValue::Uint(page.limit)));
    }
}
