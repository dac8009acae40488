// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Webhook CA and serving certificate material.
//!
//! [`Certs`] mirrors the five fields of the `dynatrace-webhook-certs` secret. Calling
//! [`Certs::validate`] with the current time renews whatever is missing, unparseable or
//! close to expiry, keeping exactly one previous CA generation in `ca.crt.old` so that
//! API servers still holding the old bundle keep trusting the webhook while the new
//! bundle propagates.

use super::CertificateError;
use crate::constants::{
    CA_VALIDITY_DAYS, CERT_CA_CERT, CERT_CA_CERT_OLD, CERT_CA_KEY, CERT_RENEWAL_THRESHOLD_HOURS,
    CERT_TLS_CERT, CERT_TLS_KEY, SERVER_CERT_VALIDITY_DAYS,
};
use k8s_openapi::ByteString;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, PublicKeyData, PKCS_ECDSA_P256_SHA256,
};
use std::collections::BTreeMap;
use ::time::{Duration, OffsetDateTime};
use tracing::info;
use x509_parser::pem::{parse_x509_pem, Pem};
use x509_parser::prelude::*;

const ORGANIZATION: &str = "Dynatrace";

/// PEM material held in the webhook certs secret. Missing fields are empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Certs {
    pub ca_key: Vec<u8>,
    pub ca_cert: Vec<u8>,
    pub ca_cert_old: Vec<u8>,
    pub tls_key: Vec<u8>,
    pub tls_cert: Vec<u8>,
}

/// What a [`Certs::validate`] pass renewed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Renewal {
    pub ca: bool,
    pub server: bool,
    /// The old CA expired and was dropped from the bundle.
    pub old_ca_dropped: bool,
}

impl Renewal {
    #[must_use]
    pub fn changed(&self) -> bool {
        self.ca || self.server || self.old_ca_dropped
    }
}

impl Certs {
    /// Read the material from secret data. Unknown keys are ignored.
    #[must_use]
    pub fn from_secret_data(data: &BTreeMap<String, ByteString>) -> Self {
        let field = |key: &str| data.get(key).map(|v| v.0.clone()).unwrap_or_default();
        Self {
            ca_key: field(CERT_CA_KEY),
            ca_cert: field(CERT_CA_CERT),
            ca_cert_old: field(CERT_CA_CERT_OLD),
            tls_key: field(CERT_TLS_KEY),
            tls_cert: field(CERT_TLS_CERT),
        }
    }

    /// Secret payload. `ca.crt.old` is only present during rotation.
    #[must_use]
    pub fn to_secret_data(&self) -> BTreeMap<String, Vec<u8>> {
        let mut data = BTreeMap::from([
            (CERT_CA_KEY.to_string(), self.ca_key.clone()),
            (CERT_CA_CERT.to_string(), self.ca_cert.clone()),
            (CERT_TLS_KEY.to_string(), self.tls_key.clone()),
            (CERT_TLS_CERT.to_string(), self.tls_cert.clone()),
        ]);
        if !self.ca_cert_old.is_empty() {
            data.insert(CERT_CA_CERT_OLD.to_string(), self.ca_cert_old.clone());
        }
        data
    }

    /// The CA bundle stamped into webhook configurations: `ca.crt || ca.crt.old`.
    #[must_use]
    pub fn ca_bundle(&self) -> Vec<u8> {
        let mut bundle = self.ca_cert.clone();
        bundle.extend_from_slice(&self.ca_cert_old);
        bundle
    }

    /// Renew whatever is missing, invalid or within the renewal threshold of `now`.
    ///
    /// # Errors
    ///
    /// Returns [`CertificateError`] if key generation or signing fails.
    pub fn validate(&mut self, dns_name: &str, now: OffsetDateTime) -> Result<Renewal, CertificateError> {
        let mut renewal = Renewal::default();

        if !self.ca_is_valid(now) {
            info!(dns_name, "Renewing webhook CA certificate");
            // Only the immediately previous CA is kept; an unreadable one ends the chain.
            if parse_certificate_pem(&self.ca_cert).is_ok() {
                self.ca_cert_old = std::mem::take(&mut self.ca_cert);
            } else {
                self.ca_cert_old.clear();
            }
            let (key, cert) = generate_ca(dns_name, now)?;
            self.ca_key = key.into_bytes();
            self.ca_cert = cert.into_bytes();
            renewal.ca = true;
        }

        if !self.ca_cert_old.is_empty() && expires_within(&self.ca_cert_old, now, Duration::ZERO) {
            info!("Dropping expired previous webhook CA certificate");
            self.ca_cert_old.clear();
            renewal.old_ca_dropped = true;
        }

        if renewal.ca || !self.server_is_valid(now) {
            info!(dns_name, "Renewing webhook serving certificate");
            let (key, cert) = generate_server(dns_name, &self.ca_cert, &self.ca_key, now)?;
            self.tls_key = key.into_bytes();
            self.tls_cert = cert.into_bytes();
            renewal.server = true;
        }

        Ok(renewal)
    }

    /// Time until the earliest certificate enters its renewal window.
    #[must_use]
    pub fn until_renewal(&self, now: OffsetDateTime) -> Option<std::time::Duration> {
        let threshold = Duration::hours(CERT_RENEWAL_THRESHOLD_HOURS);
        [&self.ca_cert, &self.tls_cert]
            .into_iter()
            .filter_map(|pem| not_after(pem).ok())
            .map(|expiry| expiry - threshold.whole_seconds() - now.unix_timestamp())
            .min()
            .map(|secs| std::time::Duration::from_secs(u64::try_from(secs).unwrap_or(0)))
    }

    fn ca_is_valid(&self, now: OffsetDateTime) -> bool {
        key_matches_certificate(&self.ca_key, &self.ca_cert)
            && !expires_within(&self.ca_cert, now, Duration::hours(CERT_RENEWAL_THRESHOLD_HOURS))
    }

    fn server_is_valid(&self, now: OffsetDateTime) -> bool {
        if !key_matches_certificate(&self.tls_key, &self.tls_cert)
            || expires_within(&self.tls_cert, now, Duration::hours(CERT_RENEWAL_THRESHOLD_HOURS))
        {
            return false;
        }
        verify_signed_by(&self.tls_cert, &self.ca_cert).unwrap_or(false)
    }
}

/// DER bytes of the first certificate in `pem`.
///
/// # Errors
///
/// Returns [`CertificateError::Parse`] if `pem` holds no parseable certificate.
pub fn parse_certificate_pem(pem: &[u8]) -> Result<Vec<u8>, CertificateError> {
    let (_, pem) = parse_x509_pem(pem)
        .map_err(|e| CertificateError::Parse(format!("failed to parse PEM: {e}")))?;
    X509Certificate::from_der(&pem.contents)
        .map_err(|e| CertificateError::Parse(format!("failed to parse certificate: {e}")))?;
    Ok(pem.contents)
}

/// Whether `key_pem` is the private key of the first certificate in `cert_pem`.
#[must_use]
pub fn key_matches_certificate(key_pem: &[u8], cert_pem: &[u8]) -> bool {
    let Ok(key) = KeyPair::from_pem(&String::from_utf8_lossy(key_pem)) else {
        return false;
    };
    let Ok(der) = parse_certificate_pem(cert_pem) else {
        return false;
    };
    match X509Certificate::from_der(&der) {
        Ok((_, cert)) => cert.public_key().raw == key.subject_public_key_info().as_slice(),
        Err(_) => false,
    }
}

fn not_after(pem: &[u8]) -> Result<i64, CertificateError> {
    let der = parse_certificate_pem(pem)?;
    let (_, cert) = X509Certificate::from_der(&der)
        .map_err(|e| CertificateError::Parse(format!("failed to parse certificate: {e}")))?;
    Ok(cert.validity().not_after.timestamp())
}

/// True when `pem` is unparseable or its `notAfter` is within `threshold` of `now`.
fn expires_within(pem: &[u8], now: OffsetDateTime, threshold: Duration) -> bool {
    match not_after(pem) {
        Ok(expiry) => expiry - now.unix_timestamp() <= threshold.whole_seconds(),
        Err(_) => true,
    }
}

/// Check that the first certificate in `cert_pem` is signed by any certificate in `bundle_pem`.
///
/// # Errors
///
/// Returns [`CertificateError::Parse`] if `cert_pem` cannot be parsed.
pub fn verify_signed_by(cert_pem: &[u8], bundle_pem: &[u8]) -> Result<bool, CertificateError> {
    let leaf_der = parse_certificate_pem(cert_pem)?;
    let (_, leaf) = X509Certificate::from_der(&leaf_der)
        .map_err(|e| CertificateError::Parse(format!("failed to parse certificate: {e}")))?;

    for pem in Pem::iter_from_buffer(bundle_pem).flatten() {
        if let Ok((_, ca)) = X509Certificate::from_der(&pem.contents) {
            if leaf.verify_signature(Some(ca.public_key())).is_ok() {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

fn distinguished_name(dns_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(dns_name.to_string()));
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String(ORGANIZATION.to_string()),
    );
    dn
}

/// Self-signed P-256 CA valid for one year from `now`. Returns `(key, cert)` PEM.
///
/// # Errors
///
/// Returns [`CertificateError`] if key generation or signing fails.
pub fn generate_ca(dns_name: &str, now: OffsetDateTime) -> Result<(String, String), CertificateError> {
    let mut params = CertificateParams::new(vec![dns_name.to_string()])
        .map_err(|e| CertificateError::Generation(format!("invalid DNS name {dns_name}: {e}")))?;
    params.distinguished_name = distinguished_name(dns_name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    params.not_before = now;
    params.not_after = now + Duration::days(CA_VALIDITY_DAYS);

    let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
        .map_err(|e| CertificateError::KeyGeneration(format!("failed to generate CA key: {e}")))?;
    let cert = params
        .self_signed(&key)
        .map_err(|e| CertificateError::Generation(format!("failed to create CA cert: {e}")))?;

    Ok((key.serialize_pem(), cert.pem()))
}

/// P-256 serving certificate for `dns_name`, valid for seven days and signed by the CA.
///
/// # Errors
///
/// Returns [`CertificateError`] if the CA cannot be loaded or signing fails.
pub fn generate_server(
    dns_name: &str,
    ca_cert_pem: &[u8],
    ca_key_pem: &[u8],
    now: OffsetDateTime,
) -> Result<(String, String), CertificateError> {
    let ca_key = KeyPair::from_pem(&String::from_utf8_lossy(ca_key_pem))
        .map_err(|e| CertificateError::Parse(format!("failed to load CA key: {e}")))?;
    let issuer = Issuer::from_ca_cert_pem(&String::from_utf8_lossy(ca_cert_pem), &ca_key)
        .map_err(|e| CertificateError::Parse(format!("failed to create issuer: {e}")))?;

    let mut params = CertificateParams::new(vec![dns_name.to_string()])
        .map_err(|e| CertificateError::Generation(format!("invalid DNS name {dns_name}: {e}")))?;
    params.distinguished_name = distinguished_name(dns_name);
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    params.not_before = now;
    params.not_after = now + Duration::days(SERVER_CERT_VALIDITY_DAYS);

    let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).map_err(|e| {
        CertificateError::KeyGeneration(format!("failed to generate serving key: {e}"))
    })?;
    let cert = params
        .signed_by(&key, &issuer)
        .map_err(|e| CertificateError::Generation(format!("failed to sign serving cert: {e}")))?;

    Ok((key.serialize_pem(), cert.pem()))
}

#[cfg(test)]
#[path = "certs_tests.rs"]
mod certs_tests;
