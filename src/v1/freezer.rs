// Copyright (c) 2021-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! This module contains the implementation of the `freezer` cgroup subsystem.
//!
//! See the Kernel's documentation for more information about this subsystem, found at:
//!  [Documentation/cgroup-v1/freezer-subsystem.txt](https://www.kernel.org/doc/Documentation/cgroup-v1/freezer-subsystem.txt)

use std::path::Path;

use crate::error::*;
use crate::v1::{Controller, ControllerInternal, Name};
use crate::{CancelToken, FreezerState, MountPoint, Resources};

/// A controller that allows controlling the `freezer` subsystem of a Cgroup.
///
/// In essence, this controller allows the user to stop and resume every
/// task in the control group in one step.
#[derive(Debug, Clone)]
pub struct FreezerController {
    mount: MountPoint,
}

impl FreezerController {
    pub fn new(mount: &MountPoint) -> Self {
        Self {
            mount: mount.clone(),
        }
    }

    /// Stop every task in the group and wait until the kernel reports the
    /// whole group as `FROZEN`.
    ///
    /// Freezing an already frozen group returns at once. Stopping the
    /// tasks can take the kernel a while, so the wait is bounded: a group
    /// still `FREEZING` after the last poll is reported as
    /// [`ErrorKind::FreezerTimeout`] and stays in whatever state it
    /// reached, readable through [`FreezerController::state`].
    pub fn freeze(&self, group: &str, cancel: Option<&CancelToken>) -> Result<()> {
        self.transition(group, FreezerState::Frozen, cancel)
    }

    /// Resume every task in the group, waiting for `THAWED`.
    pub fn thaw(&self, group: &str, cancel: Option<&CancelToken>) -> Result<()> {
        self.transition(group, FreezerState::Thawed, cancel)
    }

    /// The state the kernel currently reports for the group.
    pub fn state(&self, group: &str) -> Result<FreezerState> {
        read_state(&self.path(group))
    }

    fn transition(
        &self,
        group: &str,
        target: FreezerState,
        cancel: Option<&CancelToken>,
    ) -> Result<()> {
        let dir = self.path(group);
        if read_state(&dir)? == target {
            return Ok(());
        }
        crate::write_file(&dir.join("freezer.state"), &target.to_string())?;
        crate::wait_freezer_state(|| read_state(&dir), target, cancel, crate::FREEZER_POLLS)
    }
}

fn read_state(dir: &Path) -> Result<FreezerState> {
    crate::read_string_from(&dir.join("freezer.state"))?.parse()
}

impl ControllerInternal for FreezerController {
    fn mount(&self) -> &MountPoint {
        &self.mount
    }

    fn subsystem(&self) -> Name {
        Name::Freezer
    }

    // The freezer carries no resource settings, groups are only ever
    // frozen and thawed explicitly.
    fn apply(&self, _dir: &Path, _res: &Resources) -> Result<()> {
        Ok(())
    }
}
