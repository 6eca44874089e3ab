// src/query_client.rs
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::chart::ChartSpec;
use crate::error::TransportError;

/// Body of `POST <base-url>/query`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRequest {
    pub prompt: String,
    pub headers: Vec<String>,
    pub sample: Vec<Value>,
}

/// What the service said about one prompt, with its precedence already applied:
/// an `error` suppresses the chart, a `description` rides along with it.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryReply {
    Rejected {
        error: String,
    },
    Chart {
        description: Option<String>,
        spec: ChartSpec,
    },
}

impl QueryReply {
    /// Classify a decoded response body of shape `{ "response": { ... } }`.
    pub fn from_body(body: Value) -> Result<Self, TransportError> {
        let Value::Object(mut envelope) = body else {
            return Err(TransportError::Decode("response body is not a JSON object".into()));
        };
        let spec = match envelope.remove("response") {
            Some(Value::Object(spec)) => spec,
            _ => {
                return Err(TransportError::Decode(
                    "response body has no `response` object".into(),
                ))
            }
        };

        if let Some(error) = spec.get("error").and_then(message_text) {
            return Ok(QueryReply::Rejected { error });
        }
        let description = spec.get("description").and_then(message_text);
        Ok(QueryReply::Chart { description, spec })
    }
}

/// Text of an optional message field. Falsy values (null, false, zero and the
/// empty string) count as "not present"; other non-strings are shown as JSON.
fn message_text(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Seam between the orchestrator and the inference service.
#[async_trait]
pub trait QueryTransport: Send + Sync {
    async fn query(&self, request: &QueryRequest) -> Result<Value, TransportError>;
}

/// Talks to the inference service over HTTP.
pub struct HttpTransport {
    endpoint: String,
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: &str, connect_timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(HttpTransport {
            endpoint: Self::query_url(base_url),
            http,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn query_url(base_url: &str) -> String {
        format!("{}/query", base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl QueryTransport for HttpTransport {
    async fn query(&self, request: &QueryRequest) -> Result<Value, TransportError> {
        debug!(endpoint = %self.endpoint, columns = request.headers.len(), "query request");

        let response = self
            .http
            .post(&self.endpoint)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            debug!(%status, body = %text, "query rejected by service");
            return Err(TransportError::Status(status.as_u16()));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}
