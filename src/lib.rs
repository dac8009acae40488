// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # dynakube-operator - Dynatrace operator core for Kubernetes
//!
//! Reconciles `DynaKube` custom resources into everything a cluster needs to be
//! monitored: per-namespace injection secrets, the mutating webhook that injects
//! code modules into pods, the webhook PKI, and the ActiveGate and OneAgent workloads.
//!
//! ## Modules
//!
//! - [`crd`] - the `DynaKube` custom resource
//! - [`mapper`] - which `DynaKube` owns which namespace
//! - [`initgeneration`] / [`ingestendpoint`] - init-config and data-ingest secrets
//! - [`certificates`] - self-signed CA and serving certificate of the webhook
//! - [`webhook`] - pod mutation and `DynaKube` validation endpoints
//! - [`reconcilers`] - the `DynaKube` and `Namespace` controllers
//! - [`standalone`] - the in-pod `init` command run by the install container
//!
//! ## Example
//!
//! ```rust
//! use dynakube_operator::crd::{ApplicationMonitoringSpec, DynaKube, DynaKubeSpec, OneAgentSpec};
//!
//! let dk = DynaKube::new(
//!     "dynakube",
//!     DynaKubeSpec {
//!         api_url: "https://abc123.live.dynatrace.com/api".to_string(),
//!         one_agent: OneAgentSpec {
//!             application_monitoring: Some(ApplicationMonitoringSpec::default()),
//!             ..Default::default()
//!         },
//!         ..Default::default()
//!     },
//! );
//! assert!(dk.needs_app_injection());
//! assert!(dk.validate().is_ok());
//! ```

pub mod certificates;
pub mod config;
pub mod constants;
pub mod context;
pub mod crd;
pub mod errors;
pub mod feature_flags;
pub mod ingestendpoint;
pub mod initgeneration;
pub mod labels;
pub mod mapper;
pub mod metrics;
pub mod reconcilers;
pub mod standalone;
pub mod status_reasons;
pub mod tenant;
pub mod tokens;
pub mod webhook;
pub mod workloads;
