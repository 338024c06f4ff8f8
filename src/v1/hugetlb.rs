// Copyright (c) 2021-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! This module contains the implementation of the `hugetlb` cgroup subsystem.
//!
//! See the Kernel's documentation for more information about this subsystem, found at:
//!  [Documentation/cgroup-v1/hugetlb.txt](https://www.kernel.org/doc/Documentation/cgroup-v1/hugetlb.txt)

use std::fs;
use std::path::Path;

use regex::Regex;

use crate::error::*;
use crate::stats::{HugetlbStat, Metrics};
use crate::v1::{write_settings, ControllerInternal, Name, Setting};
use crate::{MountPoint, Resources, SettingValue};

pub const HUGEPAGESIZE_DIR: &str = "/sys/kernel/mm/hugepages";

const SIZE_ABBRS: [&str; 5] = ["KB", "MB", "GB", "TB", "PB"];

/// Format a size in KiB the way the kernel names hugetlb files, e.g.
/// `2048` turns into `2MB`.
fn page_size_label(kib: u64) -> String {
    let mut size = kib as f64;
    let mut i = 0;
    while size >= 1024.0 && i < SIZE_ABBRS.len() - 1 {
        size /= 1024.0;
        i += 1;
    }
    format!("{}{}", size, SIZE_ABBRS[i])
}

/// The hugepage sizes supported by this machine, as `2MB`-style labels.
/// A kernel without hugepage support yields an empty list.
fn hugepage_sizes_in(dir: &Path) -> Vec<String> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    // Entries are named like `hugepages-2048kB`.
    let re = match Regex::new(r"^hugepages-(\d+)kB$") {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };

    let mut sizes = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        if let Some(caps) = name.to_str().and_then(|n| re.captures(n)) {
            if let Ok(kib) = caps[1].parse::<u64>() {
                sizes.push(page_size_label(kib));
            }
        }
    }
    sizes.sort();
    sizes
}

/// A controller that allows controlling the `hugetlb` subsystem of a Cgroup.
///
/// In essence, this controller is responsible for restricting the tasks in the control group to
/// the amounts of memory backed by hugepages of each supported size.
#[derive(Debug, Clone)]
pub struct HugeTlbController {
    mount: MountPoint,
    sizes: Vec<String>,
}

impl HugeTlbController {
    pub fn new(mount: &MountPoint) -> Self {
        Self {
            mount: mount.clone(),
            sizes: hugepage_sizes_in(Path::new(HUGEPAGESIZE_DIR)),
        }
    }

    /// The hugepage size labels statistics are gathered for.
    pub fn sizes(&self) -> &[String] {
        &self.sizes
    }

    #[cfg(test)]
    fn with_sizes(mount: &MountPoint, sizes: Vec<String>) -> Self {
        Self {
            mount: mount.clone(),
            sizes,
        }
    }
}

impl ControllerInternal for HugeTlbController {
    fn mount(&self) -> &MountPoint {
        &self.mount
    }

    fn subsystem(&self) -> Name {
        Name::HugeTlb
    }

    fn apply(&self, dir: &Path, res: &Resources) -> Result<()> {
        // Limits are written for whatever size the caller names; the
        // kernel rejects sizes it does not support.
        let settings: Vec<Setting> = res
            .hugepages
            .limits
            .iter()
            .map(|limit| {
                Setting::new(
                    format!("hugetlb.{}.limit_in_bytes", limit.size),
                    SettingValue::Uint(limit.limit),
                )
            })
            .collect();
        write_settings(dir, &settings)
    }

    fn collect(&self, dir: &Path, m: &mut Metrics) -> Result<()> {
        for size in &self.sizes {
            let usage = dir.join(format!("hugetlb.{}.usage_in_bytes", size));
            if !usage.exists() {
                continue;
            }
            m.hugetlb.push(HugetlbStat {
                usage: crate::read_u64_from(&usage)?,
                max: crate::read_u64_from(
                    &dir.join(format!("hugetlb.{}.max_usage_in_bytes", size)),
                )?,
                failcnt: crate::read_u64_from(&dir.join(format!("hugetlb.{}.failcnt", size)))?,
                pagesize: size.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::v1::Controller;
    use crate::HugePageResource;

    #[test]
    fn size_labels_match_kernel_naming() {
        assert_eq!(page_size_label(64), "64KB");
        assert_eq!(page_size_label(2048), "2MB");
        assert_eq!(page_size_label(1048576), "1GB");
        assert_eq!(page_size_label(16 * 1024 * 1024), "16GB");
    }

    #[test]
    fn discovery_parses_sysfs_names() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("hugepages-2048kB")).unwrap();
        fs::create_dir(dir.path().join("hugepages-1048576kB")).unwrap();
        fs::create_dir(dir.path().join("unrelated")).unwrap();

        assert_eq!(hugepage_sizes_in(dir.path()), vec!["1GB", "2MB"]);
    }

    #[test]
    fn limits_are_written_per_size() {
        let root = tempfile::tempdir().unwrap();
        let mount = MountPoint::new(root.path());
        let hugetlb = HugeTlbController::new(&mount);

        let mut res = Resources::default();
        res.hugepages.limits.push(HugePageResource {
            size: "2MB".to_string(),
            limit: 4194304,
        });
        hugetlb.create("pod", &res).unwrap();

        assert_eq!(
            fs::read_to_string(hugetlb.path("pod").join("hugetlb.2MB.limit_in_bytes")).unwrap(),
            "4194304"
        );
    }

    #[test]
    fn collect_reports_each_seeded_size() {
        let root = tempfile::tempdir().unwrap();
        let mount = MountPoint::new(root.path());
        let hugetlb =
            HugeTlbController::with_sizes(&mount, vec!["1GB".to_string(), "2MB".to_string()]);
        hugetlb.create("pod", &Resources::default()).unwrap();

        let dir = hugetlb.path("pod");
        fs::write(dir.join("hugetlb.2MB.usage_in_bytes"), "2097152").unwrap();
        fs::write(dir.join("hugetlb.2MB.max_usage_in_bytes"), "4194304").unwrap();
        fs::write(dir.join("hugetlb.2MB.failcnt"), "1").unwrap();

        let mut m = Metrics::default();
        hugetlb.stat("pod", &mut m).unwrap();

        // Only the seeded size shows up, the other is skipped.
        assert_eq!(m.hugetlb.len(), 1);
        assert_eq!(m.hugetlb[0].pagesize, "2MB");
        assert_eq!(m.hugetlb[0].usage, 2097152);
        assert_eq!(m.hugetlb[0].failcnt, 1);
    }
}
