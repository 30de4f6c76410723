//! HTTP client for the Responses backend

use super::error::BackendError;
use crate::config::AuthScheme;
use crate::error::{AppError, AppResult};
use crate::formats::responses::{CanonicalRequest, ResponsesChunk, ResponsesResponse};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::{Stream, StreamExt};
use reqwest::header::{AUTHORIZATION, HeaderMap, RETRY_AFTER};
use serde_json::Value;
use std::pin::Pin;
use std::time::Duration;

/// Stream of backend chunks; ends after the last chunk or the first error
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ResponsesChunk, BackendError>> + Send>>;

/// Terminal SSE payload sent by the backend
const STREAM_DONE: &str = "[DONE]";
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// A Responses API implementation the gateway can call
#[async_trait]
pub trait ResponsesBackend: Send + Sync {
    async fn create(&self, request: &CanonicalRequest) -> Result<ResponsesResponse, BackendError>;

    /// Open a streaming call; errors before the first byte surface here so
    /// they go through the retry path
    async fn create_stream(&self, request: &CanonicalRequest) -> Result<ChunkStream, BackendError>;

    /// Liveness probe used by background health checks
    async fn probe(&self) -> bool {
        true
    }
}

pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    auth_scheme: AuthScheme,
}

impl HttpBackend {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        auth_scheme: AuthScheme,
        request_timeout: Duration,
    ) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| AppError::HttpClient(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            auth_scheme,
        })
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth_scheme {
            AuthScheme::ApiKey => builder.header("api-key", &self.api_key),
            AuthScheme::Bearer => {
                builder.header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            }
        }
    }

    fn responses_url(&self) -> String {
        format!("{}/responses", self.base_url)
    }

    async fn send(&self, request: &CanonicalRequest) -> Result<reqwest::Response, BackendError> {
        let response = self
            .authorize(self.client.post(self.responses_url()))
            .json(request)
            .send()
            .await
            .map_err(BackendError::from_reqwest)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = parse_retry_after(response.headers());
        let text = response.text().await.unwrap_or_default();
        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
        Err(BackendError::Api {
            status: status.as_u16(),
            body,
            retry_after,
        })
    }
}

/// `Retry-After` in delta-seconds; HTTP-date values are ignored
fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
}

#[async_trait]
impl ResponsesBackend for HttpBackend {
    async fn create(&self, request: &CanonicalRequest) -> Result<ResponsesResponse, BackendError> {
        let response = self.send(request).await?;
        let bytes = response.bytes().await.map_err(BackendError::from_reqwest)?;
        serde_json::from_slice::<ResponsesResponse>(&bytes)
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn create_stream(&self, request: &CanonicalRequest) -> Result<ChunkStream, BackendError> {
        let response = self.send(request).await?;
        let mut events = response.bytes_stream().eventsource();

        let stream = async_stream::stream! {
            while let Some(event) = events.next().await {
                match event {
                    Ok(event) => {
                        let data = event.data.trim();
                        if data == STREAM_DONE {
                            break;
                        }
                        if data.is_empty() {
                            continue;
                        }
                        if event.event == "error" {
                            let body = serde_json::from_str::<Value>(data)
                                .unwrap_or_else(|_| Value::String(data.to_string()));
                            yield Err(BackendError::Api { status: 500, body, retry_after: None });
                            break;
                        }
                        match serde_json::from_str::<ResponsesChunk>(data) {
                            Ok(chunk) => yield Ok(chunk),
                            Err(e) => {
                                yield Err(BackendError::Decode(e.to_string()));
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(BackendError::Transport {
                            code: "ECONNRESET".to_string(),
                            message: e.to_string(),
                        });
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    /// HEAD `{base_url}/models`; any response below 500 counts as alive
    async fn probe(&self) -> bool {
        let url = format!("{}/models", self.base_url);
        let result = self
            .authorize(self.client.head(&url))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;
        match result {
            Ok(response) => !response.status().is_server_error(),
            Err(e) => {
                tracing::debug!(
                    error = %crate::sanitize::sanitize(&e.without_url().to_string()),
                    "Backend probe failed"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::responses::{InputMessage, InputRole};
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(stream: bool) -> CanonicalRequest {
        CanonicalRequest {
            model: "gpt-5".to_string(),
            input: vec![InputMessage::new(InputRole::User, "Hello")],
            max_output_tokens: 50,
            reasoning: None,
            previous_response_id: None,
            temperature: None,
            top_p: None,
            stream,
        }
    }

    fn backend(server: &MockServer, scheme: AuthScheme) -> HttpBackend {
        HttpBackend::new(server.uri(), "test-key", scheme, Duration::from_secs(5))
            .expect("client builds")
    }

    #[tokio::test]
    async fn test_create_posts_to_responses_with_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/responses"))
            .and(header("api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "resp_1",
                "object": "response",
                "created": 1,
                "model": "gpt-5",
                "output": [{"type": "text", "text": "Hi"}],
                "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = backend(&server, AuthScheme::ApiKey)
            .create(&request(false))
            .await
            .expect("call succeeds");
        assert_eq!(response.id, "resp_1");
        assert_eq!(response.text(), "Hi");
    }

    #[tokio::test]
    async fn test_bearer_scheme() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/responses"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "resp_2", "model": "gpt-5", "output": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        backend(&server, AuthScheme::Bearer)
            .create(&request(false))
            .await
            .expect("call succeeds");
    }

    #[tokio::test]
    async fn test_error_status_carries_body_and_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/responses"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "17")
                    .set_body_json(json!({"error": {"type": "rate_limit_error", "message": "slow down"}})),
            )
            .mount(&server)
            .await;

        let err = backend(&server, AuthScheme::ApiKey)
            .create(&request(false))
            .await
            .expect_err("429 is an error");
        match err {
            BackendError::Api {
                status,
                body,
                retry_after,
            } => {
                assert_eq!(status, 429);
                assert_eq!(body["error"]["type"], "rate_limit_error");
                assert_eq!(retry_after, Some(17));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_undecodable_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/responses"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = backend(&server, AuthScheme::ApiKey)
            .create(&request(false))
            .await
            .expect_err("bad body");
        assert!(matches!(err, BackendError::Decode(_)));
    }

    #[tokio::test]
    async fn test_stream_parses_chunks_until_done() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"id\":\"resp_s\",\"output\":[{\"type\":\"text\",\"text\":\"Hel\"}]}\n\n",
            "data: {\"id\":\"resp_s\",\"output\":[{\"type\":\"text\",\"text\":\"lo\"}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"id\":\"ignored\",\"output\":[]}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/responses"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let stream = backend(&server, AuthScheme::ApiKey)
            .create_stream(&request(true))
            .await
            .expect("stream opens");
        let chunks: Vec<_> = stream.collect().await;
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(Result::is_ok));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let backend = HttpBackend::new(
            "http://127.0.0.1:1",
            "k",
            AuthScheme::ApiKey,
            Duration::from_secs(2),
        )
        .expect("client builds");
        let err = backend.create(&request(false)).await.expect_err("nothing listens");
        assert!(matches!(err, BackendError::Transport { .. }), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_probe_checks_models_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        assert!(backend(&server, AuthScheme::ApiKey).probe().await);
    }
}
