//! Atlassian Statuspage client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::types::{Incident, IncidentsResponse, MetricsResponse};
use super::IncidentFeed;
use crate::error::FeedError;

/// Incidents listing path, relative to the status page base URL.
pub const INCIDENTS_PATH: &str = "/api/v2/incidents.json";

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("statuswatch/", env!("CARGO_PKG_VERSION"));

/// Public, unauthenticated status page client.
pub struct StatuspageClient {
    base_url: String,
    metric_path: String,
    client: Client,
}

impl StatuspageClient {
    /// Create a new client with a request timeout.
    pub fn new(
        base_url: impl Into<String>,
        metric_path: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self::with_client(client, base_url, metric_path))
    }

    /// Create a client around an existing HTTP client.
    pub fn with_client(
        client: Client,
        base_url: impl Into<String>,
        metric_path: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            metric_path: metric_path.into(),
            client,
        }
    }

    /// GET a JSON document. Anything but 200 is an error.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, FeedError> {
        let transport = |source| FeedError::Transport {
            endpoint: path.to_string(),
            source,
        };

        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(FeedError::Status {
                endpoint: path.to_string(),
                status: status.as_u16(),
            });
        }

        let raw = response.bytes().await.map_err(transport)?;
        serde_json::from_slice(&raw).map_err(|e| FeedError::Decode {
            endpoint: path.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl IncidentFeed for StatuspageClient {
    async fn fetch_incidents(&self) -> Result<Vec<Incident>, FeedError> {
        let response: IncidentsResponse = self.get_json(INCIDENTS_PATH).await?;
        debug!(count = response.incidents.len(), "Fetched incidents");
        Ok(response.incidents)
    }

    async fn fetch_latency_metric(&self) -> Result<f64, FeedError> {
        let response: MetricsResponse = self.get_json(&self.metric_path).await?;
        debug!(mean = response.summary.mean, "Fetched latency metric");
        Ok(response.summary.mean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const METRIC_PATH: &str = "/metrics-display/abc/day.json";

    fn client(server: &MockServer) -> StatuspageClient {
        StatuspageClient::new(server.uri(), METRIC_PATH, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_incidents_newest_first() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(INCIDENTS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "page": { "id": "p" },
                "incidents": [
                    { "id": "b", "name": "B", "created_at": "2024-02-01T00:00:00Z",
                      "incident_updates": [] },
                    { "id": "a", "name": "A", "created_at": "2024-01-01T00:00:00Z",
                      "incident_updates": [] }
                ]
            })))
            .mount(&server)
            .await;

        let incidents = client(&server).fetch_incidents().await.unwrap();
        let ids: Vec<_> = incidents.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["b", "a"]);
    }

    #[tokio::test]
    async fn test_requests_carry_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(INCIDENTS_PATH))
            .and(header("user-agent", USER_AGENT))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "incidents": [] })))
            .mount(&server)
            .await;

        let incidents = client(&server).fetch_incidents().await.unwrap();
        assert!(incidents.is_empty());
        assert!(USER_AGENT.starts_with("statuswatch/"));
    }

    #[tokio::test]
    async fn test_non_200_is_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(INCIDENTS_PATH))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server).fetch_incidents().await.unwrap_err();
        assert_eq!(err.status(), Some(503));
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(INCIDENTS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client(&server).fetch_incidents().await.unwrap_err();
        assert!(matches!(err, FeedError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_fetch_latency_metric() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(METRIC_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "metrics": [],
                "summary": { "sum": 1000.0, "mean": 42.6 }
            })))
            .mount(&server)
            .await;

        let mean = client(&server).fetch_latency_metric().await.unwrap();
        assert!((mean - 42.6).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_unreachable_is_transport_error() {
        let client = StatuspageClient::new("http://127.0.0.1:9", METRIC_PATH, Duration::from_secs(1))
            .unwrap();
        let err = client.fetch_incidents().await.unwrap_err();
        assert!(matches!(err, FeedError::Transport { .. }));
    }
}
