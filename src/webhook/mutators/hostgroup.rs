// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Host group propagation to the install container.

use crate::constants::ENV_HOST_GROUP;
use crate::webhook::request::{env_value, find_install_container, set_env, MutationRequest};

#[must_use]
pub fn enabled(req: &MutationRequest) -> bool {
    req.dynakube.needs_app_injection() && req.dynakube.host_group().is_some()
}

/// The install container already present in the pod carries `HOST_GROUP`.
#[must_use]
pub fn injected(req: &MutationRequest) -> bool {
    find_install_container(&req.pod).is_some_and(|c| env_value(c, ENV_HOST_GROUP).is_some())
}

pub fn mutate(req: &mut MutationRequest) {
    if let Some(group) = req.dynakube.host_group() {
        set_env(&mut req.install_container, ENV_HOST_GROUP, &group);
    }
}

/// Update `HOST_GROUP` only when the value differs.
pub fn reinvoke(req: &mut MutationRequest) -> bool {
    match req.dynakube.host_group() {
        Some(group) => set_env(&mut req.install_container, ENV_HOST_GROUP, &group),
        None => false,
    }
}
