// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `ingestendpoint.rs`

#[cfg(test)]
mod tests {
    use crate::crd::{ActiveGateSpec, Capability, DynaKube, DynaKubeSpec, DynaKubeStatus};
    use crate::errors::OperatorError;
    use crate::ingestendpoint::*;
    use crate::tokens::Tokens;
    use std::collections::BTreeMap;

    fn dynakube(api_url: &str, capabilities: Vec<Capability>, tenant: Option<&str>) -> DynaKube {
        let mut dk = DynaKube::new(
            "dk",
            DynaKubeSpec {
                api_url: api_url.to_string(),
                active_gate: (!capabilities.is_empty()).then(|| ActiveGateSpec {
                    capabilities,
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        dk.metadata.namespace = Some("dynatrace".into());
        dk.status = Some(DynaKubeStatus {
            tenant_uuid: tenant.map(String::from),
            ..Default::default()
        });
        dk
    }

    #[test]
    fn test_api_url_endpoint() {
        let dk = dynakube("https://tenant.test/api", vec![], None);
        assert_eq!(
            build_endpoint_properties(&dk, "token").unwrap(),
            "DT_METRICS_INGEST_URL=https://tenant.test/api/v2/metrics/ingest\nDT_METRICS_INGEST_API_TOKEN=token\n"
        );
    }

    #[test]
    fn test_local_activegate_endpoint() {
        let dk = dynakube("https://tenant.test/api", vec![Capability::MetricsIngest], Some("T"));
        let tokens = Tokens {
            data_ingest_token: "ingest".into(),
            ..Default::default()
        };

        let data = build_endpoint_secret_data(&dk, &tokens).unwrap();
        let properties = String::from_utf8(data["endpoint.properties"].clone()).unwrap();

        assert!(properties.contains(
            "DT_METRICS_INGEST_URL=https://dk-activegate.dynatrace/e/T/api/v2/metrics/ingest\n"
        ));
        assert!(properties.contains("DT_METRICS_INGEST_API_TOKEN=ingest\n"));
        assert_eq!(data["dataIngestToken"], b"ingest".to_vec());
    }

    #[test]
    fn test_statsd_line() {
        let dk = dynakube(
            "https://tenant.test/api",
            vec![Capability::MetricsIngest, Capability::StatsdIngest],
            Some("T"),
        );
        let properties = build_endpoint_properties(&dk, "t").unwrap();
        assert!(properties.ends_with("DT_STATSD_INGEST_URL=dk-activegate.dynatrace:18125\n"));
    }

    #[test]
    fn test_neither_gateway_nor_api_url_fails() {
        let dk = dynakube("", vec![], None);
        assert!(matches!(
            metrics_ingest_url(&dk),
            Err(OperatorError::Validation { .. })
        ));
    }

    #[test]
    fn test_gateway_without_tenant_is_transient() {
        let dk = dynakube("", vec![Capability::MetricsIngest], None);
        let err = metrics_ingest_url(&dk).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_metadata_enrichment_disabled_leaves_only_statsd() {
        let mut dk = dynakube("https://tenant.test/api", vec![], None);
        dk.metadata.annotations = Some(BTreeMap::from([(
            "feature.dynatrace.com/disable-metadata-enrichment".to_string(),
            "true".to_string(),
        )]));
        assert_eq!(build_endpoint_properties(&dk, "t").unwrap(), "");
    }

    #[test]
    fn test_endpoint_secret_needed() {
        let mut enriched = dynakube("https://tenant.test/api", vec![], None);
        assert!(endpoint_secret_needed(&enriched));

        enriched.metadata.annotations = Some(BTreeMap::from([(
            "feature.dynatrace.com/disable-metadata-enrichment".to_string(),
            "true".to_string(),
        )]));
        assert!(!endpoint_secret_needed(&enriched));

        let mut otlp = dynakube("https://tenant.test/api", vec![Capability::MetricsIngest], Some("T"));
        otlp.metadata.annotations = enriched.metadata.annotations.clone();
        assert!(endpoint_secret_needed(&otlp));
    }

    #[test]
    fn test_properties_are_deterministic() {
        let dk = dynakube("https://tenant.test/api/", vec![], None);
        let tokens = Tokens {
            data_ingest_token: "x".into(),
            ..Default::default()
        };
        assert_eq!(
            build_endpoint_secret_data(&dk, &tokens).unwrap(),
            build_endpoint_secret_data(&dk, &tokens).unwrap()
        );
        assert_eq!(
            metrics_ingest_url(&dk).unwrap(),
            "https://tenant.test/api/v2/metrics/ingest"
        );
    }
}
