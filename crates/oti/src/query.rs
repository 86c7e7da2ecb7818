//! Client for the Jaeger HTTP query API.
//!
//! Used to confirm that emitted spans actually reached the trace backend.
//! Spans show up after the collector has indexed them, so lookups poll under
//! a [`PollPolicy`] instead of asking once.

use std::time::Duration;

use serde::Deserialize;

use crate::error::QueryError;

/// Default Jaeger query endpoint.
pub const DEFAULT_QUERY_URL: &str = "http://localhost:16686";

/// Bounded retry schedule for trace lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: 4,
            interval: Duration::from_millis(500),
        }
    }
}

/// Body of `GET /api/traces`.
#[derive(Debug, Clone, Deserialize)]
pub struct TracesResponse {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub data: Vec<TraceRecord>,
    #[serde(default)]
    pub errors: Option<Vec<serde_json::Value>>,
}

impl TracesResponse {
    /// No backend errors and at least one trace.
    pub fn is_ready(&self) -> bool {
        self.errors.is_none() && !self.data.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TraceRecord {
    #[serde(rename = "traceID", default)]
    pub trace_id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub spans: Vec<SpanRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpanRecord {
    #[serde(rename = "traceID", default)]
    pub trace_id: String,
    #[serde(rename = "spanID", default)]
    pub span_id: String,
    #[serde(rename = "operationName")]
    pub operation_name: String,
}

/// Jaeger sends `"data": null` alongside errors.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Polls a Jaeger query service for traces.
#[derive(Debug, Clone)]
pub struct TraceQueryClient {
    client: reqwest::Client,
    base_url: String,
    lookback: String,
    limit: u32,
    policy: PollPolicy,
}

impl TraceQueryClient {
    /// - `base_url`: query service root (e.g. `http://localhost:16686`)
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            lookback: "20m".to_string(),
            limit: 1,
            policy: PollPolicy::default(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_lookback(mut self, lookback: impl Into<String>) -> Self {
        self.lookback = lookback.into();
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Poll until the backend reports at least one trace for `service`.
    ///
    /// Returns `Ok(None)` when every attempt came back empty. Request failures
    /// are retried; if the last attempt failed, that error is returned.
    pub async fn fetch_traces_by_service(
        &self,
        service: &str,
    ) -> Result<Option<TracesResponse>, QueryError> {
        let mut last_error = None;

        for attempt in 1..=self.policy.attempts {
            match self.query_once(service).await {
                Ok(response) if response.is_ready() => {
                    tracing::debug!(
                        service = %service,
                        attempt,
                        traces = response.data.len(),
                        "Trace backend returned traces"
                    );
                    return Ok(Some(response));
                }
                Ok(response) => {
                    tracing::debug!(
                        service = %service,
                        attempt,
                        errors = ?response.errors,
                        "No traces yet"
                    );
                    last_error = None;
                }
                Err(e) => {
                    tracing::warn!(service = %service, attempt, error = %e, "Trace query failed");
                    last_error = Some(e);
                }
            }

            if attempt < self.policy.attempts {
                tokio::time::sleep(self.policy.interval).await;
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    async fn query_once(&self, service: &str) -> Result<TracesResponse, QueryError> {
        let limit = self.limit.to_string();
        let response = self
            .client
            .get(format!("{}/api/traces", self.base_url))
            .query(&[
                ("service", service),
                ("lookback", self.lookback.as_str()),
                ("prettyPrint", "true"),
                ("limit", limit.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
            return Err(QueryError::Status(status));
        }

        Ok(response.json::<TracesResponse>().await?)
    }
}
