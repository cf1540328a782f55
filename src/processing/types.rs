//! Core data types and error definitions for the quiz generation pipeline.

use crate::llm::CompletionClientError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Page-range label applied to pairs generated from OCR'd image text.
pub const IMAGE_PAGE_RANGE: &str = "Extracted from image";
/// Page-range label applied to pairs generated by looking at the image directly.
pub const DIRECT_VISION_PAGE_RANGE: &str = "Extracted from image (direct vision)";

/// Errors raised while validating an upload, before any processing starts.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// The upload carried no bytes.
    #[error("No file content provided for {0}")]
    Empty(String),
    /// MIME type outside the accepted set.
    #[error("Invalid file type: {mime_type}. Supported types: {supported}")]
    UnsupportedType {
        /// MIME type reported for the upload.
        mime_type: String,
        /// Comma-separated list of accepted types.
        supported: String,
    },
    /// Upload exceeds the configured size limit.
    #[error("File too large: {size_mb:.1}MB. Maximum size: {limit_mb:.1}MB")]
    TooLarge {
        /// Upload size in megabytes.
        size_mb: f64,
        /// Limit in megabytes.
        limit_mb: f64,
    },
    /// Multi-document request without any files.
    #[error("No files provided")]
    NoDocuments,
    /// Chat request without a message.
    #[error("Message is required")]
    EmptyMessage,
    /// Chunk request without text or page range.
    #[error("Text and page range are required")]
    EmptyChunk,
}

/// Errors emitted by the quiz generation pipeline.
///
/// Per-chunk and per-file failures never surface here; they are logged and counted.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// A required service is not configured for this process.
    #[error("{0}")]
    Configuration(String),
    /// Input was rejected before processing began.
    #[error("{0}")]
    Validation(#[from] ValidationError),
    /// A model call that the operation cannot recover from failed.
    #[error("Model request failed: {0}")]
    Completion(#[from] CompletionClientError),
    /// Every image processing path failed.
    #[error("Failed to process image: {0}")]
    Image(String),
}

/// A contiguous span of document pages combined into one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextChunk {
    /// Concatenated page text with page markers.
    pub text: String,
    /// `"3-7"`, or `"3"` when the chunk spans one page.
    pub page_range: String,
    /// 1-based first page (inclusive).
    pub start_page: usize,
    /// 1-based last page (inclusive).
    pub end_page: usize,
    /// Trimmed paragraphs that contributed to the chunk.
    #[serde(default)]
    pub paragraphs: Vec<String>,
}

/// One generated multiple-choice question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaPair {
    /// Question text, never empty.
    pub question: String,
    /// Exactly four answer options.
    pub options: [String; 4],
    /// Index of the correct option, `0..=3`.
    #[serde(rename = "correctAnswer")]
    pub correct_answer: u8,
    /// Why the correct option is right.
    pub explanation: String,
    /// Why each wrong option is wrong, in option order skipping the correct one.
    #[serde(rename = "wrongAnswerExplanations")]
    pub wrong_answer_explanations: [String; 3],
    /// Provenance label copied from the source chunk.
    pub page_range: String,
    /// Model confidence in `[0, 1]`.
    pub confidence: f32,
}

impl QaPair {
    /// Text of the option marked correct.
    pub fn correct_option(&self) -> &str {
        &self.options[usize::from(self.correct_answer.min(3))]
    }

    /// Letter (`A`..`D`) of the option marked correct.
    pub fn correct_letter(&self) -> char {
        option_letter(usize::from(self.correct_answer))
    }
}

/// Letter label for an option index.
pub fn option_letter(index: usize) -> char {
    (b'A' + (index.min(25) as u8)) as char
}

/// Document kind accepted by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// `application/pdf`.
    Pdf,
    /// One of the supported image types.
    Image,
}

/// Raw uploaded document.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    /// Original file name, used in logs and placeholder chunks.
    pub file_name: String,
    /// MIME type reported by the upload.
    pub mime_type: String,
    /// File contents.
    pub bytes: Vec<u8>,
}

impl DocumentInput {
    /// Build an input from its parts.
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Size of the upload in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Coarse progress notification emitted by the pipeline driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    /// Human-readable stage label.
    pub stage: String,
    /// Completion percentage, non-decreasing within a run.
    pub percent: u8,
}

/// Result of a pipeline run over one or more documents.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionOutcome {
    /// Identifier attached to every log line of the run.
    pub run_id: String,
    /// RFC 3339 completion time.
    pub generated_at: String,
    /// Deduplicated pairs in first-occurrence order.
    pub qa_pairs: Vec<QaPair>,
    /// Documents processed, including ones that failed.
    pub documents: usize,
    /// Documents whose every generation attempt failed.
    pub failed_documents: usize,
    /// Chunks submitted to the model.
    pub chunks: usize,
    /// Chunks whose model call failed or returned no JSON.
    pub failed_chunks: usize,
    /// Pairs generated before deduplication.
    pub total_pairs: usize,
    /// Pairs removed as duplicates.
    pub skipped_duplicates: usize,
}

/// Result of processing a single image.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageOutcome {
    /// Generated pairs.
    pub qa_pairs: Vec<QaPair>,
    /// Which path produced the pairs.
    pub method: ImageMethod,
    /// OCR text, when OCR succeeded.
    pub ocr_text: Option<String>,
}

/// Processing path used for an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImageMethod {
    /// Document AI OCR followed by text generation.
    #[serde(rename = "Document AI + OpenAI")]
    OcrThenModel,
    /// Image sent straight to a vision-capable model.
    #[serde(rename = "Direct OpenAI Vision")]
    DirectVision,
}
