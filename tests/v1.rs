// Copyright (c) 2021-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! End to end walks across the legacy hierarchies, driven against a
//! scratch mount root instead of the live `/sys/fs/cgroup`.

use std::fs;

use cgroupfs::v1::{Cgroup, Name};
use cgroupfs::{BlkIoDeviceResource, CgroupPid, FreezerState, MaxValue, MountPoint, Resources};

#[test]
fn sparse_updates_only_touch_the_named_files() {
    let root = tempfile::tempdir().unwrap();
    let mount = MountPoint::new(root.path());

    let mut res = Resources::default();
    res.pid.limit = Some(MaxValue::Value(50));
    let cg = Cgroup::new_with(&mount, "pods/pod-1", &[Name::Pids, Name::BlkIo], &res).unwrap();

    let pids_dir = root.path().join("pids/pods/pod-1");
    assert_eq!(fs::read_to_string(pids_dir.join("pids.max")).unwrap(), "50");

    // The blkio group came up alongside, with nothing written into it.
    let blkio_dir = root.path().join("blkio/pods/pod-1");
    assert!(blkio_dir.is_dir());
    assert!(!blkio_dir.join("blkio.weight").exists());

    // A later blkio-only update leaves the pids side alone.
    let mut res = Resources::default();
    res.blkio.weight_device.push(BlkIoDeviceResource {
        major: 8,
        minor: 0,
        weight: Some(500),
        leaf_weight: None,
    });
    cg.update(&res).unwrap();
    assert_eq!(
        fs::read_to_string(blkio_dir.join("blkio.weight_device")).unwrap(),
        "8:0 500"
    );
    assert_eq!(fs::read_to_string(pids_dir.join("pids.max")).unwrap(), "50");
}

#[test]
fn freezer_walks_the_state_machine() {
    let root = tempfile::tempdir().unwrap();
    let mount = MountPoint::new(root.path());
    let cg = Cgroup::new_with(&mount, "pod", &[Name::Freezer], &Resources::default()).unwrap();

    // The kernel seeds the state file of a new group, a scratch root
    // has to do it by hand.
    let state_file = root.path().join("freezer/pod/freezer.state");
    fs::write(&state_file, "THAWED").unwrap();

    cg.freeze(None).unwrap();
    assert_eq!(cg.freezer_state().unwrap(), FreezerState::Frozen);
    assert_eq!(fs::read_to_string(&state_file).unwrap(), "FROZEN");

    cg.thaw(None).unwrap();
    assert_eq!(cg.freezer_state().unwrap(), FreezerState::Thawed);
}

#[test]
fn attach_fans_out_to_every_hierarchy() {
    let root = tempfile::tempdir().unwrap();
    let mount = MountPoint::new(root.path());
    let cg = Cgroup::new_with(&mount, "pod", &[Name::Pids, Name::Mem], &Resources::default())
        .unwrap();

    cg.add_proc(CgroupPid::from(1234)).unwrap();
    for dir in ["pids/pod", "memory/pod"] {
        let procs = root.path().join(dir).join("cgroup.procs");
        assert_eq!(fs::read_to_string(procs).unwrap(), "1234");
    }
    assert_eq!(cg.procs(false).unwrap(), vec![CgroupPid::from(1234)]);
}

#[test]
fn stat_unions_the_hierarchies() {
    let root = tempfile::tempdir().unwrap();
    let mount = MountPoint::new(root.path());
    let cg = Cgroup::new_with(&mount, "pod", &[Name::Pids, Name::BlkIo], &Resources::default())
        .unwrap();

    let pids_dir = root.path().join("pids/pod");
    fs::write(pids_dir.join("pids.current"), "3\n").unwrap();
    fs::write(pids_dir.join("pids.max"), "max\n").unwrap();
    let blkio_dir = root.path().join("blkio/pod");
    fs::write(
        blkio_dir.join("blkio.throttle.io_serviced"),
        "8:0 Read 4\n8:0 Write 1\n8:0 Total 5\nTotal 5\n",
    )
    .unwrap();
    fs::write(
        blkio_dir.join("blkio.throttle.io_service_bytes"),
        "8:0 Read 4096\nTotal 4096\n",
    )
    .unwrap();

    let m = cg.stat().unwrap();
    assert_eq!(m.pids.current, 3);
    assert_eq!(m.pids.limit, 0);
    assert_eq!(m.blkio.io_serviced_recursive.len(), 3);
    assert_eq!(m.blkio.io_serviced_recursive[2].op, "Total");
    assert_eq!(m.blkio.io_service_bytes_recursive.len(), 1);
    assert_eq!(m.blkio.io_service_bytes_recursive[0].value, 4096);
    // Controllers that never materialized stay at their defaults.
    assert_eq!(m.memory, cgroupfs::stats::MemoryStat::default());
}

#[test]
fn delete_clears_every_hierarchy() {
    let root = tempfile::tempdir().unwrap();
    let mount = MountPoint::new(root.path());
    let cg = Cgroup::new_with(
        &mount,
        "pods/pod-1",
        &[Name::Pids, Name::Freezer],
        &Resources::default(),
    )
    .unwrap();

    cg.delete().unwrap();
    assert!(!root.path().join("pids/pods/pod-1").exists());
    assert!(!root.path().join("freezer/pods/pod-1").exists());
    assert!(root.path().join("pids/pods").is_dir());
    cg.delete().unwrap();
}
