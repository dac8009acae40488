// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status condition helpers and the `DynaKube` status updater.
//!
//! Conditions follow the Kubernetes format (`type`, `status`, `reason`, `message`,
//! `lastTransitionTime`). The transition time only moves when the status value flips.
//!
//! # Example
//!
//! ```rust
//! use dynakube_operator::reconcilers::status::create_condition;
//!
//! let condition = create_condition("Ready", "True", "SecretsPropagated", "3 namespaces");
//! assert_eq!(condition.r#type, "Ready");
//! ```

use crate::crd::{CommunicationHost, Condition, DynaKube, DynaKubeStatus, OneAgentInstance};
use crate::status_reasons::phase_for_reason;
use anyhow::Result;
use chrono::Utc;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

/// New condition stamped with the current time.
#[must_use]
pub fn create_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) -> Condition {
    Condition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        last_transition_time: Some(Utc::now().to_rfc3339()),
    }
}

/// Whether `new_condition` differs from `existing` in type, status or message.
#[must_use]
pub fn condition_changed(existing: &Option<Condition>, new_condition: &Condition) -> bool {
    match existing {
        Some(current) => {
            current.r#type != new_condition.r#type
                || current.status != new_condition.status
                || current.message != new_condition.message
        }
        None => true,
    }
}

#[must_use]
pub fn find_condition<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// Set a condition in place, keeping `lastTransitionTime` when the status is unchanged.
pub fn update_condition_in_memory(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.r#type == condition_type) {
        if existing.status != status || existing.last_transition_time.is_none() {
            existing.last_transition_time = Some(Utc::now().to_rfc3339());
        }
        existing.status = status.to_string();
        existing.reason = Some(reason.to_string());
        existing.message = Some(message.to_string());
    } else {
        conditions.push(create_condition(condition_type, status, reason, message));
    }
}

/// Semantic equality of two condition lists; transition times are ignored.
#[must_use]
pub fn conditions_equal(current: &[Condition], new: &[Condition]) -> bool {
    current.len() == new.len()
        && new.iter().all(|n| {
            find_condition(current, &n.r#type).is_some_and(|c| {
                c.status == n.status && c.reason == n.reason && c.message == n.message
            })
        })
}

/// Collects status changes of one `DynaKube` during a reconcile and writes them in a
/// single merge patch.
///
/// Writing only when something changed keeps status updates from retriggering the
/// controller in a loop.
pub struct DynaKubeStatusUpdater {
    namespace: String,
    name: String,
    current_status: Option<DynaKubeStatus>,
    new_status: DynaKubeStatus,
}

impl DynaKubeStatusUpdater {
    #[must_use]
    pub fn new(dk: &DynaKube) -> Self {
        let current_status = dk.status.clone();
        Self {
            namespace: dk.namespace().unwrap_or_default(),
            name: dk.name_any(),
            new_status: current_status.clone().unwrap_or_default(),
            current_status,
        }
    }

    pub fn set_condition(&mut self, condition_type: &str, status: &str, reason: &str, message: &str) {
        update_condition_in_memory(
            &mut self.new_status.conditions,
            condition_type,
            status,
            reason,
            message,
        );
    }

    /// Set the encompassing `Ready` condition and derive `phase` from its reason.
    pub fn set_ready(&mut self, ready: bool, reason: &str, message: &str) {
        let status = if ready { "True" } else { "False" };
        self.set_condition(crate::status_reasons::CONDITION_TYPE_READY, status, reason, message);
        self.new_status.phase = Some(phase_for_reason(reason).to_string());
    }

    pub fn set_tenant(&mut self, tenant_uuid: &str, communication_hosts: Vec<CommunicationHost>) {
        self.new_status.tenant_uuid = Some(tenant_uuid.to_string());
        self.new_status.communication_hosts = communication_hosts;
    }

    pub fn set_oneagent_version(&mut self, version: &str) {
        self.new_status.one_agent.version = Some(version.to_string());
    }

    pub fn set_oneagent_instances(&mut self, instances: BTreeMap<String, OneAgentInstance>) {
        self.new_status.one_agent.instances = instances;
    }

    pub fn set_observed_generation(&mut self, generation: Option<i64>) {
        self.new_status.observed_generation = generation;
    }

    /// Status as it will be written.
    #[must_use]
    pub fn status(&self) -> &DynaKubeStatus {
        &self.new_status
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        find_condition(&self.new_status.conditions, crate::status_reasons::CONDITION_TYPE_READY)
            .is_some_and(|c| c.status == "True")
    }

    /// Whether the collected status differs semantically from the stored one.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        match &self.current_status {
            None => true,
            Some(current) => {
                current.tenant_uuid != self.new_status.tenant_uuid
                    || current.communication_hosts != self.new_status.communication_hosts
                    || current.one_agent != self.new_status.one_agent
                    || current.observed_generation != self.new_status.observed_generation
                    || current.phase != self.new_status.phase
                    || !conditions_equal(&current.conditions, &self.new_status.conditions)
            }
        }
    }

    /// Write the status if it changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the status patch fails.
    pub async fn apply(&self, client: &Client) -> Result<()> {
        if !self.has_changes() {
            debug!(namespace = %self.namespace, name = %self.name, "DynaKube status unchanged, skipping update");
            return Ok(());
        }

        let api: Api<DynaKube> = Api::namespaced(client.clone(), &self.namespace);
        let patch = json!({ "status": self.new_status });
        api.patch_status(&self.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;

        debug!(
            namespace = %self.namespace,
            name = %self.name,
            phase = ?self.new_status.phase,
            conditions = self.new_status.conditions.len(),
            "Updated DynaKube status"
        );
        Ok(())
    }
}

/// Set one condition on a `DynaKube` that is not the one being reconciled.
///
/// Used by the namespace mapper to flag every side of a selector conflict.
///
/// # Errors
///
/// Returns an error if the status patch fails.
pub async fn patch_dynakube_condition(
    client: &Client,
    dk: &DynaKube,
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) -> Result<()> {
    let mut updater = DynaKubeStatusUpdater::new(dk);
    updater.set_condition(condition_type, status, reason, message);
    updater.apply(client).await
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod status_tests;
