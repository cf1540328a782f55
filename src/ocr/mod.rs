//! OCR and document-structure extraction.
//!
//! The chunker only needs the flat document text plus, per page, the ordered paragraphs as
//! ranges into that text. [`DocumentReader`] exposes exactly that; [`DocumentAiClient`] fills it
//! from Google Document AI's `:process` REST endpoint.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer};
use serde_json::{Value, json};
use thiserror::Error;

use crate::config::Config;

/// Errors returned while extracting document structure.
#[derive(Debug, Error)]
pub enum OcrError {
    /// Document AI is not configured for this process.
    #[error("Document AI is not configured: {0}")]
    NotConfigured(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Document AI responded with an unexpected status code.
    #[error("Unexpected Document AI response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the service.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// The service answered but without a usable document.
    #[error("Malformed Document AI response: {0}")]
    InvalidResponse(String),
}

/// Char range into [`OcrDocument::text`]. A missing start index means the start of the text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextSegment {
    /// Inclusive start offset.
    #[serde(default, deserialize_with = "deserialize_index")]
    pub start_index: usize,
    /// Exclusive end offset.
    #[serde(default, deserialize_with = "deserialize_index")]
    pub end_index: usize,
}

/// One paragraph on a page, referencing its text through one or more segments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OcrParagraph {
    /// Segments in the flat text; only the first is used when reading the paragraph.
    pub segments: Vec<TextSegment>,
}

/// One page of a processed document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OcrPage {
    /// Paragraphs in reading order.
    pub paragraphs: Vec<OcrParagraph>,
}

/// Flat text plus page and paragraph structure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OcrDocument {
    /// Entire document text.
    pub text: String,
    /// Page structure; empty when the service did not report pages.
    pub pages: Vec<OcrPage>,
}

impl OcrDocument {
    /// Text referenced by a paragraph's first segment, or an empty string.
    pub fn paragraph_text(&self, paragraph: &OcrParagraph) -> &str {
        match paragraph.segments.first() {
            Some(segment) => char_slice(&self.text, segment.start_index, segment.end_index),
            None => "",
        }
    }

    /// Number of chars in the flat text.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Slice `text` by char offsets, clamping out-of-range bounds.
pub fn char_slice(text: &str, start: usize, end: usize) -> &str {
    if end <= start {
        return "";
    }
    let mut offsets = text
        .char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(text.len()));
    let Some(byte_start) = offsets.nth(start) else {
        return "";
    };
    let byte_end = offsets.nth(end - start - 1).unwrap_or(text.len());
    &text[byte_start..byte_end]
}

/// Interface implemented by OCR / document-structure services.
#[async_trait]
pub trait DocumentReader: Send + Sync {
    /// Extract text and page structure from raw document bytes.
    async fn read_document(
        &self,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<OcrDocument, OcrError>;
}

/// Google Document AI client using the v1 REST API.
pub struct DocumentAiClient {
    pub(crate) client: Client,
    pub(crate) endpoint: String,
    pub(crate) processor_name: String,
    pub(crate) access_token: Option<String>,
}

impl DocumentAiClient {
    /// Build a client from configuration; fails when the project or processor is missing.
    pub fn from_config(config: &Config) -> Result<Self, OcrError> {
        let (Some(project_id), Some(processor_id)) = (
            config.google_cloud_project_id.as_deref(),
            config.document_ai_processor_id.as_deref(),
        ) else {
            return Err(OcrError::NotConfigured(
                "GOOGLE_CLOUD_PROJECT_ID and GOOGLE_DOCUMENT_AI_PROCESSOR_ID are required".into(),
            ));
        };

        let location = config.google_cloud_location.as_str();
        let endpoint = config
            .document_ai_endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{location}-documentai.googleapis.com"));
        let client = Client::builder().user_agent("quizgen/ocr").build()?;

        tracing::debug!(
            endpoint = %endpoint,
            location,
            has_token = config.google_access_token.is_some(),
            "Initialized Document AI client"
        );

        Ok(Self {
            client,
            endpoint,
            processor_name: format!(
                "projects/{project_id}/locations/{location}/processors/{processor_id}"
            ),
            access_token: config.google_access_token.clone(),
        })
    }

    fn process_url(&self) -> String {
        format!(
            "{}/v1/{}:process",
            self.endpoint.trim_end_matches('/'),
            self.processor_name
        )
    }
}

#[derive(Debug, Deserialize)]
struct ProcessResponse {
    document: Option<RawDocument>,
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    text: String,
    #[serde(default)]
    pages: Vec<RawPage>,
}

#[derive(Debug, Deserialize)]
struct RawPage {
    #[serde(default)]
    paragraphs: Vec<RawParagraph>,
}

#[derive(Debug, Deserialize)]
struct RawParagraph {
    #[serde(default)]
    layout: Option<RawLayout>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLayout {
    #[serde(default)]
    text_anchor: Option<RawTextAnchor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTextAnchor {
    #[serde(default)]
    text_segments: Vec<TextSegment>,
}

impl From<RawDocument> for OcrDocument {
    fn from(raw: RawDocument) -> Self {
        let pages = raw
            .pages
            .into_iter()
            .map(|page| OcrPage {
                paragraphs: page
                    .paragraphs
                    .into_iter()
                    .map(|paragraph| OcrParagraph {
                        segments: paragraph
                            .layout
                            .and_then(|layout| layout.text_anchor)
                            .map(|anchor| anchor.text_segments)
                            .unwrap_or_default(),
                    })
                    .collect(),
            })
            .collect();
        Self {
            text: raw.text,
            pages,
        }
    }
}

/// Document AI encodes int64 fields as JSON strings; accept both forms.
fn deserialize_index<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(number) => number
            .as_u64()
            .map(|value| value as usize)
            .ok_or_else(|| serde::de::Error::custom("text index must be a non-negative integer")),
        Value::String(text) => text
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid text index '{text}'"))),
        Value::Null => Ok(0),
        other => Err(serde::de::Error::custom(format!(
            "unexpected text index {other}"
        ))),
    }
}

#[async_trait]
impl DocumentReader for DocumentAiClient {
    async fn read_document(
        &self,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<OcrDocument, OcrError> {
        let body = json!({
            "rawDocument": {
                "content": BASE64.encode(bytes),
                "mimeType": mime_type,
            }
        });

        let mut request = self.client.post(self.process_url()).json(&body);
        if let Some(token) = self.access_token.as_deref() {
            request = request.bearer_auth(token);
        }

        tracing::info!(
            processor = %self.processor_name,
            mime_type,
            bytes = bytes.len(),
            "Processing document with Document AI"
        );
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = OcrError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Document AI request failed");
            return Err(error);
        }

        let ProcessResponse { document } = response
            .json()
            .await
            .map_err(|error| OcrError::InvalidResponse(error.to_string()))?;
        let document: OcrDocument = document
            .ok_or_else(|| OcrError::InvalidResponse("no document returned".into()))?
            .into();

        tracing::info!(
            text_chars = document.char_len(),
            pages = document.pages.len(),
            "Document AI processing completed"
        );
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn client_for(server: &MockServer) -> DocumentAiClient {
        DocumentAiClient {
            client: Client::builder()
                .user_agent("quizgen-test")
                .build()
                .expect("client"),
            endpoint: server.base_url(),
            processor_name: "projects/demo/locations/us/processors/abc".into(),
            access_token: Some("token-123".into()),
        }
    }

    #[test]
    fn char_slice_handles_multibyte_and_bounds() {
        let text = "héllo wörld";
        assert_eq!(char_slice(text, 0, 5), "héllo");
        assert_eq!(char_slice(text, 6, 11), "wörld");
        assert_eq!(char_slice(text, 6, 400), "wörld");
        assert_eq!(char_slice(text, 50, 60), "");
        assert_eq!(char_slice(text, 3, 3), "");
    }

    #[test]
    fn paragraph_text_uses_first_segment_only() {
        let document = OcrDocument {
            text: "Alpha Beta Gamma".into(),
            pages: vec![],
        };
        let paragraph = OcrParagraph {
            segments: vec![
                TextSegment {
                    start_index: 6,
                    end_index: 10,
                },
                TextSegment {
                    start_index: 11,
                    end_index: 16,
                },
            ],
        };
        assert_eq!(document.paragraph_text(&paragraph), "Beta");
        assert_eq!(document.paragraph_text(&OcrParagraph::default()), "");
    }

    #[tokio::test]
    async fn read_document_parses_string_indices_and_missing_start() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/projects/demo/locations/us/processors/abc:process")
                    .header("authorization", "Bearer token-123")
                    .body_contains("\"mimeType\":\"application/pdf\"");
                then.status(200).json_body(json!({
                    "document": {
                        "text": "Intro\nBody text",
                        "pages": [
                            { "paragraphs": [
                                { "layout": { "textAnchor": { "textSegments": [ { "endIndex": "5" } ] } } }
                            ] },
                            { "paragraphs": [
                                { "layout": { "textAnchor": { "textSegments": [ { "startIndex": "6", "endIndex": 15 } ] } } }
                            ] }
                        ]
                    }
                }));
            })
            .await;

        let document = client_for(&server)
            .read_document(b"%PDF-1.7", "application/pdf")
            .await
            .expect("document");

        mock.assert();
        assert_eq!(document.pages.len(), 2);
        assert_eq!(
            document.paragraph_text(&document.pages[0].paragraphs[0]),
            "Intro"
        );
        assert_eq!(
            document.paragraph_text(&document.pages[1].paragraphs[0]),
            "Body text"
        );
    }

    #[tokio::test]
    async fn read_document_surfaces_error_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(403).body("PERMISSION_DENIED");
            })
            .await;

        let error = client_for(&server)
            .read_document(b"bytes", "image/png")
            .await
            .expect_err("forbidden");

        assert!(matches!(
            error,
            OcrError::UnexpectedStatus { status, .. } if status == StatusCode::FORBIDDEN
        ));
    }

    #[tokio::test]
    async fn read_document_requires_document_field() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200).json_body(json!({}));
            })
            .await;

        let error = client_for(&server)
            .read_document(b"bytes", "application/pdf")
            .await
            .expect_err("missing document");

        assert!(matches!(error, OcrError::InvalidResponse(_)));
    }

    #[test]
    fn from_config_requires_processor() {
        let config = Config {
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".into(),
            qa_model: "gpt-4.1-mini".into(),
            vision_model: "gpt-4o".into(),
            chat_model: "gpt-4.1-mini".into(),
            google_cloud_project_id: Some("demo".into()),
            google_cloud_location: "eu".into(),
            document_ai_processor_id: None,
            google_access_token: None,
            document_ai_endpoint: None,
            max_upload_bytes: crate::config::DEFAULT_MAX_UPLOAD_BYTES,
            server_port: None,
        };
        assert!(matches!(
            DocumentAiClient::from_config(&config),
            Err(OcrError::NotConfigured(_))
        ));

        let configured = Config {
            document_ai_processor_id: Some("abc".into()),
            ..config
        };
        let client = DocumentAiClient::from_config(&configured).expect("client");
        assert_eq!(
            client.process_url(),
            "https://eu-documentai.googleapis.com/v1/projects/demo/locations/eu/processors/abc:process"
        );
    }
}
