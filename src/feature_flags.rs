// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Feature flags read from `feature.dynatrace.com/*` annotations on a `DynaKube`.
//!
//! Boolean flags compare case-insensitively against `true` / `false`. Flags that were
//! renamed from a `disable-*` form still honour the old key when the new one is absent.

use crate::crd::DynaKube;
use crate::labels::FEATURE_FLAG_PREFIX;
use kube::ResourceExt;

/// Node map entries for host-agent nodes with unknown tenant are kept instead of removed.
pub const IGNORE_UNKNOWN_STATE: &str = "ignore-unknown-state";

/// `false` disables webhook reinvocation.
pub const WEBHOOK_REINVOCATION_POLICY: &str = "webhook-reinvocation-policy";

/// Deprecated form of [`WEBHOOK_REINVOCATION_POLICY`]; `true` disables.
pub const DISABLE_WEBHOOK_REINVOCATION_POLICY: &str = "disable-webhook-reinvocation-policy";

/// `false` disables the workload-metadata mutator.
pub const METADATA_ENRICHMENT: &str = "metadata-enrichment";

/// Deprecated form of [`METADATA_ENRICHMENT`]; `true` disables.
pub const DISABLE_METADATA_ENRICHMENT: &str = "disable-metadata-enrichment";

/// `false` makes injection opt-in per pod.
pub const AUTOMATIC_INJECTION: &str = "automatic-injection";

/// `false` disables version detection from workload labels.
pub const LABEL_VERSION_DETECTION: &str = "label-version-detection";

/// Initial connect retry of injected agents in milliseconds.
pub const ONEAGENT_INITIAL_CONNECT_RETRY: &str = "oneagent-initial-connect-retry-ms";

/// `true` mounts the CSI volume read-only and runs the install container as 420.
pub const INJECTION_READONLY_VOLUME: &str = "injection-readonly-volume";

/// Failed CSI mount attempts before falling back to the installer.
pub const MAX_CSI_MOUNT_ATTEMPTS: &str = "max-csi-mount-attempts";

/// `fail` makes the in-pod init exit non-zero on errors.
pub const INJECTION_FAILURE_POLICY: &str = "injection-failure-policy";

/// `true` keeps injected agents from using the `DynaKube` proxy.
pub const ONEAGENT_IGNORE_PROXY: &str = "oneagent-ignore-proxy";

/// Default of [`MAX_CSI_MOUNT_ATTEMPTS`].
pub const DEFAULT_MAX_CSI_MOUNT_ATTEMPTS: i64 = 10;

/// Raw value of a feature flag.
#[must_use]
pub fn raw<'a>(dk: &'a DynaKube, flag: &str) -> Option<&'a str> {
    dk.annotations()
        .get(&format!("{FEATURE_FLAG_PREFIX}{flag}"))
        .map(|v| v.trim())
}

fn is_true(dk: &DynaKube, flag: &str) -> bool {
    raw(dk, flag).is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

fn is_false(dk: &DynaKube, flag: &str) -> bool {
    raw(dk, flag).is_some_and(|v| v.eq_ignore_ascii_case("false"))
}

fn disabled_with_deprecated(dk: &DynaKube, flag: &str, deprecated: &str) -> bool {
    match raw(dk, flag) {
        Some(v) if !v.is_empty() => v.eq_ignore_ascii_case("false"),
        _ => is_true(dk, deprecated),
    }
}

/// Integer flag, falling back to `default` when unset or not a number.
#[must_use]
pub fn int_flag(dk: &DynaKube, flag: &str, default: i64) -> i64 {
    raw(dk, flag)
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(default)
}

#[must_use]
pub fn ignore_unknown_state(dk: &DynaKube) -> bool {
    is_true(dk, IGNORE_UNKNOWN_STATE)
}

#[must_use]
pub fn disable_webhook_reinvocation_policy(dk: &DynaKube) -> bool {
    disabled_with_deprecated(
        dk,
        WEBHOOK_REINVOCATION_POLICY,
        DISABLE_WEBHOOK_REINVOCATION_POLICY,
    )
}

#[must_use]
pub fn disable_metadata_enrichment(dk: &DynaKube) -> bool {
    disabled_with_deprecated(dk, METADATA_ENRICHMENT, DISABLE_METADATA_ENRICHMENT)
}

#[must_use]
pub fn automatic_injection(dk: &DynaKube) -> bool {
    !is_false(dk, AUTOMATIC_INJECTION)
}

#[must_use]
pub fn label_version_detection(dk: &DynaKube) -> bool {
    !is_false(dk, LABEL_VERSION_DETECTION)
}

/// `-1` when unset.
#[must_use]
pub fn initial_connect_retry(dk: &DynaKube) -> i64 {
    int_flag(
        dk,
        ONEAGENT_INITIAL_CONNECT_RETRY,
        crate::constants::INITIAL_CONNECT_RETRY_UNSET,
    )
}

#[must_use]
pub fn readonly_csi_volume(dk: &DynaKube) -> bool {
    is_true(dk, INJECTION_READONLY_VOLUME)
}

/// Negative values fall back to the default.
#[must_use]
pub fn max_csi_mount_attempts(dk: &DynaKube) -> i64 {
    let value = int_flag(dk, MAX_CSI_MOUNT_ATTEMPTS, DEFAULT_MAX_CSI_MOUNT_ATTEMPTS);
    if value < 0 {
        DEFAULT_MAX_CSI_MOUNT_ATTEMPTS
    } else {
        value
    }
}

/// `fail` or `silent`; anything else is `silent`.
#[must_use]
pub fn injection_failure_policy(dk: &DynaKube) -> &'static str {
    match raw(dk, INJECTION_FAILURE_POLICY) {
        Some(v) if v.eq_ignore_ascii_case("fail") => "fail",
        _ => crate::constants::DEFAULT_FAILURE_POLICY,
    }
}

#[must_use]
pub fn oneagent_ignore_proxy(dk: &DynaKube) -> bool {
    is_true(dk, ONEAGENT_IGNORE_PROXY)
}

#[cfg(test)]
#[path = "feature_flags_tests.rs"]
mod feature_flags_tests;
