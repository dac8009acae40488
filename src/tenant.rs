// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Tenant API client.
//!
//! The `DynaKube` reconciler asks the tenant for its UUID, communication endpoints and the
//! latest agent version. Calls go through [`TenantClient`] so reconciler logic can be
//! tested against a fake; [`HttpTenantClient`] is the `reqwest` implementation.
//!
//! Requests failing with 429 or 5xx, or without reaching the server, are retried with
//! exponential backoff for a few attempts before the error is returned.

use crate::crd::{CommunicationHost, DynaKube};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Path of the connection info endpoint, relative to `apiUrl`.
pub const CONNECTION_INFO_PATH: &str = "/v1/deployment/installer/agent/connectioninfo";

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Attempts per call, including the first.
const MAX_ATTEMPTS: u32 = 3;

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);

const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Errors from the tenant API.
#[derive(Debug, thiserror::Error)]
pub enum TenantError {
    /// The tenant answered with a non-success status.
    #[error("tenant API returned HTTP {status} for {url}: {message}")]
    Status {
        status: u16,
        url: String,
        message: String,
    },

    /// The response body did not have the expected shape.
    #[error("failed to decode tenant response from {url}: {reason}")]
    Decode { url: String, reason: String },

    /// The request never got an answer.
    #[error("failed to reach tenant at {url}: {reason}")]
    Transport { url: String, reason: String },

    /// The HTTP client could not be built from the `DynaKube` settings.
    #[error("invalid tenant client configuration: {0}")]
    Config(String),
}

impl TenantError {
    /// Whether retrying the request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => {
                StatusCode::from_u16(*status).is_ok_and(is_retryable_http_status)
            }
            Self::Transport { .. } => true,
            Self::Decode { .. } | Self::Config(_) => false,
        }
    }

    /// Whether the tenant rejected the token.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status: 401 | 403, .. })
    }
}

/// 429 and the transient 5xx codes.
#[must_use]
pub fn is_retryable_http_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// What the tenant reports about itself.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub tenant_uuid: String,
    pub tenant_token: String,
    pub communication_hosts: Vec<CommunicationHost>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionInfoResponse {
    #[serde(rename = "tenantUUID")]
    tenant_uuid: String,
    #[serde(default)]
    tenant_token: String,
    #[serde(default)]
    communication_endpoints: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatestVersionResponse {
    latest_agent_version: String,
}

/// Parse a communication endpoint URL into a host entry. Ports default by scheme.
#[must_use]
pub fn parse_communication_host(endpoint: &str) -> Option<CommunicationHost> {
    let url = url::Url::parse(endpoint).ok()?;
    let host = url.host_str().filter(|h| !h.is_empty())?.to_string();
    let port = url.port_or_known_default()?;
    Some(CommunicationHost {
        protocol: url.scheme().to_string(),
        host,
        port: u32::from(port),
    })
}

/// Tenant API operations.
#[async_trait]
pub trait TenantClient: Send + Sync {
    /// Tenant UUID, tenant token and communication hosts.
    async fn connection_info(&self) -> Result<ConnectionInfo, TenantError>;

    /// Latest agent version for `os` and `installer_type`, e.g. `unix` / `paas`.
    async fn latest_agent_version(&self, os: &str, installer_type: &str) -> Result<String, TenantError>;
}

/// [`TenantClient`] talking HTTP to `apiUrl`.
pub struct HttpTenantClient {
    http: reqwest::Client,
    api_url: String,
}

impl HttpTenantClient {
    /// Build a client for `api_url` authenticating with `paas_token`.
    ///
    /// # Errors
    ///
    /// Returns [`TenantError::Config`] when the token or proxy cannot be used.
    pub fn new(
        api_url: &str,
        paas_token: &str,
        proxy: Option<&str>,
        skip_cert_check: bool,
    ) -> Result<Self, TenantError> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Api-Token {paas_token}"))
            .map_err(|e| TenantError::Config(format!("token is not a valid header value: {e}")))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(skip_cert_check);
        if let Some(proxy) = proxy.filter(|p| !p.is_empty()) {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| TenantError::Config(format!("invalid proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let http = builder
            .build()
            .map_err(|e| TenantError::Config(e.to_string()))?;

        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    /// Client for a `DynaKube`. `proxy` is the resolved proxy URL, if any.
    ///
    /// # Errors
    ///
    /// See [`HttpTenantClient::new`].
    pub fn for_dynakube(dk: &DynaKube, paas_token: &str, proxy: Option<&str>) -> Result<Self, TenantError> {
        Self::new(&dk.spec.api_url, paas_token, proxy, dk.spec.skip_cert_check)
    }

    async fn get_once<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, TenantError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| TenantError::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TenantError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                message,
            });
        }

        let body = response.bytes().await.map_err(|e| TenantError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_slice(&body).map_err(|e| TenantError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, TenantError> {
        let url = format!("{}{path}", self.api_url);
        let mut backoff = INITIAL_BACKOFF;
        let mut attempt = 1;
        loop {
            match self.get_once(&url).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(url = %url, attempt, "Tenant request succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    warn!(url = %url, attempt, retry_after = ?backoff, error = %e, "Retryable tenant error, will retry");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl TenantClient for HttpTenantClient {
    async fn connection_info(&self) -> Result<ConnectionInfo, TenantError> {
        let response: ConnectionInfoResponse = self.get(CONNECTION_INFO_PATH).await?;
        let communication_hosts = response
            .communication_endpoints
            .iter()
            .filter_map(|endpoint| {
                let host = parse_communication_host(endpoint);
                if host.is_none() {
                    warn!(endpoint = %endpoint, "Ignoring unparsable communication endpoint");
                }
                host
            })
            .collect();

        Ok(ConnectionInfo {
            tenant_uuid: response.tenant_uuid,
            tenant_token: response.tenant_token,
            communication_hosts,
        })
    }

    async fn latest_agent_version(&self, os: &str, installer_type: &str) -> Result<String, TenantError> {
        let path = format!("/v1/deployment/installer/agent/versions/{os}/{installer_type}/latest/metainfo");
        let response: LatestVersionResponse = self.get(&path).await?;
        Ok(response.latest_agent_version)
    }
}

#[cfg(test)]
#[path = "tenant_tests.rs"]
mod tenant_tests;
