//! The single-attempt wire call.
//!
//! [`Exchange`] performs exactly one HTTP round-trip and reports whatever
//! status came back; deciding what counts as success is the retry layer's
//! job. [`HttpExchange`] is the reqwest-backed implementation.

use std::time::Duration;

use async_trait::async_trait;
use chatrelay_core::TransportError;
use tracing::debug;

use crate::request::{Body, Method, OutboundRequest, Part};

/// Status and fully-read body of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ExchangeResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

#[async_trait]
pub trait Exchange: Send + Sync {
    async fn send(&self, request: &OutboundRequest) -> Result<ExchangeResponse, TransportError>;
}

/// [`Exchange`] over a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpExchange {
    client: reqwest::Client,
}

impl HttpExchange {
    /// Build a client whose every request is bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::InvalidRequest(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build(&self, request: &OutboundRequest) -> Result<reqwest::RequestBuilder, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match &request.body {
            Body::Empty => builder,
            Body::Json(bytes) => builder
                .header("Content-Type", "application/json")
                .body(bytes.clone()),
            Body::Multipart(parts) => builder.multipart(to_form(parts)?),
        };

        Ok(builder)
    }
}

fn to_form(parts: &[Part]) -> Result<reqwest::multipart::Form, TransportError> {
    let mut form = reqwest::multipart::Form::new();
    for part in parts {
        form = match part {
            Part::Text { name, value } => form.text(name.clone(), value.clone()),
            Part::File {
                name,
                file_name,
                bytes,
            } => {
                let file = reqwest::multipart::Part::bytes(bytes.clone())
                    .file_name(file_name.clone())
                    .mime_str("application/octet-stream")
                    .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
                form.part(name.clone(), file)
            }
        };
    }
    Ok(form)
}

fn classify(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_builder() {
        TransportError::InvalidRequest(e.to_string())
    } else {
        TransportError::Network(e.to_string())
    }
}

#[async_trait]
impl Exchange for HttpExchange {
    async fn send(&self, request: &OutboundRequest) -> Result<ExchangeResponse, TransportError> {
        let response = self.build(request)?.send().await.map_err(classify)?;

        let status = response.status().as_u16();
        debug!(method = request.method.as_str(), url = %request.url, status, "Response received");

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(e.to_string())
            } else {
                TransportError::BodyRead(e.to_string())
            }
        })?;

        Ok(ExchangeResponse::new(status, body.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn sends_headers_and_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/threads"))
            .and(header("authorization", "Bearer sk-test"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"id":"thread_1"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let exchange = HttpExchange::new(Duration::from_secs(5)).unwrap();
        let request = OutboundRequest::post(format!("{}/threads", server.uri()))
            .bearer("sk-test")
            .json(&serde_json::json!({}))
            .unwrap();

        let response = exchange.send(&request).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, br#"{"id":"thread_1"}"#);
    }

    #[tokio::test]
    async fn non_200_is_reported_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let exchange = HttpExchange::new(Duration::from_secs(5)).unwrap();
        let response = exchange
            .send(&OutboundRequest::get(server.uri()))
            .await
            .unwrap();
        assert_eq!(response.status, 503);
        assert_eq!(response.body, b"busy");
    }

    #[tokio::test]
    async fn multipart_carries_file_and_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/files"))
            .and(body_string_contains("filename=\"faq.txt\""))
            .and(body_string_contains("assistants"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let exchange = HttpExchange::new(Duration::from_secs(5)).unwrap();
        let request = OutboundRequest::post(format!("{}/files", server.uri())).multipart(vec![
            Part::Text {
                name: "purpose".into(),
                value: "assistants".into(),
            },
            Part::File {
                name: "file".into(),
                file_name: "faq.txt".into(),
                bytes: b"opening hours 9-18".to_vec(),
            },
        ]);

        let response = exchange.send(&request).await.unwrap();
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn connection_refused_is_network_error() {
        let exchange = HttpExchange::new(Duration::from_secs(2)).unwrap();
        let err = exchange
            .send(&OutboundRequest::get("http://127.0.0.1:1/unreachable"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
