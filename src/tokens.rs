// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Tenant tokens read from the user-owned token secret.

use crate::constants::{TOKEN_API, TOKEN_DATA_INGEST, TOKEN_PAAS};
use k8s_openapi::api::core::v1::Secret;

/// Tokens of one `DynaKube`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tokens {
    pub api_token: String,
    /// Falls back to the API token when the secret has no `paasToken`.
    pub paas_token: String,
    pub data_ingest_token: String,
}

impl Tokens {
    /// Read tokens from a secret. Values are trimmed.
    #[must_use]
    pub fn from_secret(secret: &Secret) -> Self {
        let field = |key: &str| -> String {
            secret
                .data
                .as_ref()
                .and_then(|data| data.get(key))
                .map(|bytes| String::from_utf8_lossy(&bytes.0).trim().to_string())
                .unwrap_or_default()
        };

        let api_token = field(TOKEN_API);
        let paas_token = Some(field(TOKEN_PAAS))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| api_token.clone());

        Self {
            api_token,
            paas_token,
            data_ingest_token: field(TOKEN_DATA_INGEST),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.api_token.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    fn secret(fields: &[(&str, &str)]) -> Secret {
        Secret {
            data: Some(
                fields
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), ByteString(v.as_bytes().to_vec())))
                    .collect::<BTreeMap<_, _>>(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn test_paas_token_falls_back_to_api_token() {
        let tokens = Tokens::from_secret(&secret(&[("apiToken", "api")]));
        assert_eq!(tokens.api_token, "api");
        assert_eq!(tokens.paas_token, "api");
        assert!(tokens.data_ingest_token.is_empty());
    }

    #[test]
    fn test_all_tokens() {
        let tokens = Tokens::from_secret(&secret(&[
            ("apiToken", "api\n"),
            ("paasToken", "paas"),
            ("dataIngestToken", "ingest"),
        ]));
        assert_eq!(tokens.api_token, "api");
        assert_eq!(tokens.paas_token, "paas");
        assert_eq!(tokens.data_ingest_token, "ingest");
        assert!(!tokens.is_empty());
    }

    #[test]
    fn test_empty_secret() {
        assert!(Tokens::from_secret(&Secret::default()).is_empty());
    }
}
