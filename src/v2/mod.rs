// Copyright (c) 2021-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! The unified control group hierarchy, one mount for all controllers.
//!
//! Groups live directly under `<root>/<group>`. Controllers are turned
//! on per subtree through `cgroup.subtree_control` and surface their
//! interface files inside the group directory itself, so there is no
//! per-controller fan-out like on the legacy hierarchies.

mod cgroup;
mod value;

pub use self::cgroup::{supported_controllers, Cgroup};
