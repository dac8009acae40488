// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Pod mutators.
//!
//! A mutator is one variant of [`Mutator`]. The pipeline walks [`MUTATORS`] in order and
//! asks each one whether it is enabled for the request, whether the pod already carries
//! its marker, and then either mutates (first injection) or reinvokes (containers added
//! after the first injection). Mutators run sequentially and see each other's edits.

pub mod hostgroup;
pub mod metadata;
pub mod oneagent;
pub mod otlp;

use crate::constants::OPERATOR_VERSION;
use crate::errors::OperatorError;
use crate::feature_flags;
use crate::labels::ANNOTATION_INJECT;
use crate::webhook::request::MutationRequest;

/// The mutators, in the order they run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mutator {
    OneAgent,
    Metadata,
    HostGroup,
    Otlp,
}

/// Declaration order of the pipeline.
pub const MUTATORS: [Mutator; 4] = [
    Mutator::OneAgent,
    Mutator::Metadata,
    Mutator::HostGroup,
    Mutator::Otlp,
];

impl Mutator {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::OneAgent => "oneagent",
            Self::Metadata => "metadata",
            Self::HostGroup => "host-group",
            Self::Otlp => "otlp",
        }
    }

    #[must_use]
    pub fn enabled(&self, req: &MutationRequest) -> bool {
        match self {
            Self::OneAgent => oneagent::enabled(req),
            Self::Metadata => metadata::enabled(req),
            Self::HostGroup => hostgroup::enabled(req),
            Self::Otlp => otlp::enabled(req),
        }
    }

    /// Whether the pod carries this mutator's marker from an earlier admission.
    #[must_use]
    pub fn injected(&self, req: &MutationRequest) -> bool {
        match self {
            Self::OneAgent => oneagent::injected(req),
            Self::Metadata => metadata::injected(req),
            Self::HostGroup => hostgroup::injected(req),
            Self::Otlp => otlp::injected(req),
        }
    }

    /// First injection.
    ///
    /// # Errors
    ///
    /// Returns an error when the request lacks something the mutator needs; the pipeline
    /// then admits the pod unmodified.
    pub fn mutate(&self, req: &mut MutationRequest) -> Result<(), OperatorError> {
        match self {
            Self::OneAgent => oneagent::mutate(req),
            Self::Metadata => metadata::mutate(req),
            Self::HostGroup => {
                hostgroup::mutate(req);
                Ok(())
            }
            Self::Otlp => otlp::mutate(req),
        }
    }

    /// Patch what an earlier injection missed. Returns `true` if anything changed.
    pub fn reinvoke(&self, req: &mut MutationRequest) -> bool {
        match self {
            Self::OneAgent => oneagent::reinvoke(req),
            Self::Metadata => metadata::reinvoke(req),
            Self::HostGroup => hostgroup::reinvoke(req),
            Self::Otlp => otlp::reinvoke(req),
        }
    }
}

fn annotation_bool(req: &MutationRequest, key: &str) -> Option<bool> {
    match req.annotation(key)?.trim() {
        v if v.eq_ignore_ascii_case("true") => Some(true),
        v if v.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

/// Pod-level opt-in: the mutator-specific annotation wins, then `dynatrace.com/inject`,
/// then the `automatic-injection` feature flag.
#[must_use]
pub fn opted_in(req: &MutationRequest, annotation: &str) -> bool {
    let pod_default = annotation_bool(req, ANNOTATION_INJECT)
        .unwrap_or_else(|| feature_flags::automatic_injection(&req.dynakube));
    annotation_bool(req, annotation).unwrap_or(pod_default)
}

/// `DT_DEPLOYMENT_METADATA` value for user containers.
#[must_use]
pub fn deployment_metadata(req: &MutationRequest) -> String {
    format!(
        "orchestration_tech=Operator-{};script_version={OPERATOR_VERSION};orchestrator_id={}",
        req.dynakube.one_agent_mode().deployment_type(),
        req.cluster_id
    )
}
