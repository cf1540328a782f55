//! Generative model access.
//!
//! The pipeline only needs `submit(prompt) -> completion text`, so the surface is a single
//! [`CompletionClient`] trait. The OpenAI-compatible adapter issues chat-completion requests
//! directly over HTTP, optionally embedding an image as a base64 data URL and optionally
//! asking for strict JSON-object output.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;

/// Errors surfaced while requesting a completion.
#[derive(Debug, Error)]
pub enum CompletionClientError {
    /// Provider was unreachable or rejected the credentials.
    #[error("Completion provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate completion: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// Output format requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Free text that is expected to contain a JSON object somewhere.
    #[default]
    Text,
    /// Strict JSON-object mode enforced by the provider.
    JsonObject,
}

/// Image attached to a prompt.
#[derive(Debug, Clone)]
pub struct ImageAttachment {
    /// MIME type reported by the upload, e.g. `image/png`.
    pub mime_type: String,
    /// Raw image bytes.
    pub data: Vec<u8>,
}

impl ImageAttachment {
    /// Encode the image as a `data:` URL.
    pub fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type,
            BASE64.encode(&self.data)
        )
    }
}

/// Request payload passed to the completion provider.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Model identifier understood by the provider.
    pub model: String,
    /// Optional system instruction sent ahead of the prompt.
    pub system: Option<String>,
    /// User prompt.
    pub prompt: String,
    /// Optional image sent alongside the prompt.
    pub image: Option<ImageAttachment>,
    /// Requested output format.
    pub output: OutputMode,
    /// Sampling temperature.
    pub temperature: f32,
    /// Optional completion token ceiling.
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    /// Plain-text request with no system message, image, or token ceiling.
    pub fn new(model: impl Into<String>, prompt: impl Into<String>, temperature: f32) -> Self {
        Self {
            model: model.into(),
            system: None,
            prompt: prompt.into(),
            image: None,
            output: OutputMode::Text,
            temperature,
            max_tokens: None,
        }
    }
}

/// Interface implemented by generative model providers.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Submit the request and return the completion text.
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionClientError>;
}

/// Chat-completions client for OpenAI and API-compatible servers.
pub struct OpenAiCompletionClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiCompletionClient {
    /// Build a client for `base_url` (for example `https://api.openai.com/v1`).
    pub fn new(base_url: String, api_key: String) -> Result<Self, CompletionClientError> {
        let http = Client::builder()
            .user_agent("quizgen/completions")
            .build()
            .map_err(|error| {
                CompletionClientError::ProviderUnavailable(format!(
                    "failed to construct HTTP client: {error}"
                ))
            })?;
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Assemble the chat-completions JSON body for a request.
pub(crate) fn build_request_body(request: &CompletionRequest) -> Value {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = request.system.as_deref() {
        messages.push(json!({ "role": "system", "content": system }));
    }

    let user_content = match &request.image {
        Some(image) => json!([
            { "type": "text", "text": request.prompt },
            { "type": "image_url", "image_url": { "url": image.data_url() } }
        ]),
        None => Value::String(request.prompt.clone()),
    };
    messages.push(json!({ "role": "user", "content": user_content }));

    let mut body = json!({
        "model": request.model,
        "messages": messages,
        "temperature": request.temperature,
    });
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if request.output == OutputMode::JsonObject {
        body["response_format"] = json!({ "type": "json_object" });
    }
    body
}

#[async_trait]
impl CompletionClient for OpenAiCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionClientError> {
        let payload = build_request_body(&request);
        tracing::debug!(
            model = %request.model,
            output = ?request.output,
            has_image = request.image.is_some(),
            prompt_chars = request.prompt.len(),
            "Requesting completion"
        );

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                CompletionClientError::ProviderUnavailable(format!(
                    "failed to reach completion API at {}: {error}",
                    self.base_url
                ))
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(CompletionClientError::ProviderUnavailable(format!(
                "completion API rejected credentials ({status})"
            )));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionClientError::GenerationFailed(format!(
                "completion API returned {status}: {body}"
            )));
        }

        let body: ChatCompletionResponse = response.json().await.map_err(|error| {
            CompletionClientError::InvalidResponse(format!(
                "failed to decode completion response: {error}"
            ))
        })?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                CompletionClientError::InvalidResponse("no content returned by the model".into())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn client_for(server: &MockServer) -> OpenAiCompletionClient {
        OpenAiCompletionClient::new(server.url("/v1"), "sk-test".into()).expect("client")
    }

    #[test]
    fn request_body_embeds_image_and_json_mode() {
        let mut request = CompletionRequest::new("gpt-4o", "Describe", 0.3);
        request.system = Some("You analyze images.".into());
        request.output = OutputMode::JsonObject;
        request.max_tokens = Some(2000);
        request.image = Some(ImageAttachment {
            mime_type: "image/png".into(),
            data: vec![1, 2, 3],
        });

        let body = build_request_body(&request);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"][0]["text"], "Describe");
        assert_eq!(
            body["messages"][1]["content"][1]["image_url"]["url"],
            "data:image/png;base64,AQID"
        );
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["max_tokens"], 2000);
    }

    #[test]
    fn plain_request_body_omits_optional_fields() {
        let body = build_request_body(&CompletionRequest::new("gpt-4.1-mini", "Hello", 0.3));
        assert_eq!(body["messages"].as_array().map(Vec::len), Some(1));
        assert_eq!(body["messages"][0]["content"], "Hello");
        assert!(body.get("response_format").is_none());
        assert!(body.get("max_tokens").is_none());
    }

    #[tokio::test]
    async fn openai_client_returns_first_choice_content() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .header("authorization", "Bearer sk-test");
                then.status(200).json_body(json!({
                    "choices": [
                        { "message": { "role": "assistant", "content": "{\"qa_pairs\":[]}" } }
                    ]
                }));
            })
            .await;

        let completion = client_for(&server)
            .complete(CompletionRequest::new("gpt-4.1-mini", "Prompt", 0.3))
            .await
            .expect("completion");

        mock.assert();
        assert_eq!(completion, "{\"qa_pairs\":[]}");
    }

    #[tokio::test]
    async fn openai_client_maps_error_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(500).body("boom");
            })
            .await;

        let error = client_for(&server)
            .complete(CompletionRequest::new("gpt-4.1-mini", "Prompt", 0.3))
            .await
            .expect_err("error response");

        assert!(
            matches!(error, CompletionClientError::GenerationFailed(ref message) if message.contains("500"))
        );
    }

    #[tokio::test]
    async fn openai_client_rejects_empty_choices() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200).json_body(json!({ "choices": [] }));
            })
            .await;

        let error = client_for(&server)
            .complete(CompletionRequest::new("gpt-4.1-mini", "Prompt", 0.3))
            .await
            .expect_err("missing content");

        assert!(matches!(error, CompletionClientError::InvalidResponse(_)));
    }
}
