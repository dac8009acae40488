// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `tenant.rs`

#[cfg(test)]
mod tests {
    use crate::crd::CommunicationHost;
    use crate::tenant::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> HttpTenantClient {
        HttpTenantClient::new(&format!("{}/api", server.uri()), "paas-token", None, false).unwrap()
    }

    #[tokio::test]
    async fn test_connection_info() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/deployment/installer/agent/connectioninfo"))
            .and(header("Authorization", "Api-Token paas-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tenantUUID": "abc12345",
                "tenantToken": "tok",
                "communicationEndpoints": [
                    "https://abc12345.live.dynatrace.com/communication",
                    "http://10.0.0.1:9999/communication",
                    "not a url"
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let info = client(&server).connection_info().await.unwrap();
        assert_eq!(info.tenant_uuid, "abc12345");
        assert_eq!(info.tenant_token, "tok");
        assert_eq!(
            info.communication_hosts,
            vec![
                CommunicationHost {
                    protocol: "https".to_string(),
                    host: "abc12345.live.dynatrace.com".to_string(),
                    port: 443,
                },
                CommunicationHost {
                    protocol: "http".to_string(),
                    host: "10.0.0.1".to_string(),
                    port: 9999,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_latest_agent_version() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/deployment/installer/agent/versions/unix/paas/latest/metainfo"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"latestAgentVersion": "1.281.0.20231020-130511"})),
            )
            .mount(&server)
            .await;

        let version = client(&server).latest_agent_version("unix", "paas").await.unwrap();
        assert_eq!(version, "1.281.0.20231020-130511");
    }

    #[tokio::test]
    async fn test_unauthorized_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).connection_info().await.unwrap_err();
        assert!(err.is_unauthorized());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_unavailable_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"latestAgentVersion": "1.2.3"})))
            .mount(&server)
            .await;

        let version = client(&server).latest_agent_version("unix", "paas").await.unwrap();
        assert_eq!(version, "1.2.3");
    }

    #[tokio::test]
    async fn test_retries_give_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let err = client(&server).latest_agent_version("unix", "paas").await.unwrap_err();
        assert!(matches!(err, TenantError::Status { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client(&server).connection_info().await.unwrap_err();
        assert!(matches!(err, TenantError::Decode { .. }));
    }

    #[test]
    fn test_parse_communication_host() {
        assert_eq!(
            parse_communication_host("https://sg.example.com:8443/communication"),
            Some(CommunicationHost {
                protocol: "https".to_string(),
                host: "sg.example.com".to_string(),
                port: 8443,
            })
        );
        assert_eq!(parse_communication_host("garbage"), None);
    }
}
