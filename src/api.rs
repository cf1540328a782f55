//! HTTP surface for quizgen.
//!
//! This module exposes a compact Axum router:
//!
//! - `POST /process-pdf` – Multipart upload (field `pdf`); chunk the PDF, generate questions for
//!   every chunk, and return the deduplicated set with run counters.
//! - `POST /process-image` – Multipart upload (field `image`); OCR the image and generate
//!   questions, falling back to direct vision.
//! - `POST /process-documents` – Multipart upload with any number of `files` fields (PDFs and
//!   images); questions are deduplicated across all files.
//! - `POST /extract-chunks` – Multipart upload (field `pdf`); return the page chunks only.
//! - `POST /process-chunk` – Generate questions for one caller-supplied chunk.
//! - `POST /chatbot` – Study-assistant chat grounded in a question set.
//! - `GET /metrics` – Observe pipeline counters.
//! - `GET /commands` – Machine-readable command catalog for quick discovery by tools/hosts.
//!
//! Successful responses use `{ "success": true, "data": ..., "metadata": ... }`; failures use
//! `{ "success": false, "error": "..." }` with 400 for rejected input, 503 when the model
//! provider is not configured, and 500 otherwise.

use crate::metrics::MetricsSnapshot;
use crate::processing::{
    ChatRequest, DocumentInput, ImageMethod, ProcessingError, QaPair, QuizApi, TextChunk,
};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State, multipart::Field, multipart::MultipartError},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Headroom allowed on top of the upload ceiling for multipart framing.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;
/// Upper bound on the number of full-size files accepted by `/process-documents`.
const MAX_BATCH_FILES: usize = 10;

/// Build the HTTP router exposing the quiz API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: QuizApi + 'static,
{
    let upload_limit = service.upload_limit();
    let single_limit = upload_limit.saturating_add(MULTIPART_OVERHEAD_BYTES);
    let batch_limit = upload_limit
        .saturating_mul(MAX_BATCH_FILES)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .route(
            "/process-pdf",
            post(process_pdf::<S>).layer(DefaultBodyLimit::max(single_limit)),
        )
        .route(
            "/process-image",
            post(process_image::<S>).layer(DefaultBodyLimit::max(single_limit)),
        )
        .route(
            "/process-documents",
            post(process_documents::<S>).layer(DefaultBodyLimit::max(batch_limit)),
        )
        .route(
            "/extract-chunks",
            post(extract_chunks::<S>).layer(DefaultBodyLimit::max(single_limit)),
        )
        .route("/process-chunk", post(process_chunk::<S>))
        .route("/chatbot", post(chat::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/commands", get(get_commands))
        .with_state(service)
}

/// Envelope shared by every successful response.
#[derive(Serialize)]
struct ApiResponse<D, M> {
    success: bool,
    data: D,
    metadata: M,
}

impl<D, M> ApiResponse<D, M> {
    fn ok(data: D, metadata: M) -> Json<Self> {
        Json(Self {
            success: true,
            data,
            metadata,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PairsData {
    qa_pairs: Vec<QaPair>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FileMetadata {
    file_name: String,
    file_size: usize,
    file_type: String,
}

impl From<&DocumentInput> for FileMetadata {
    fn from(input: &DocumentInput) -> Self {
        Self {
            file_name: input.file_name.clone(),
            file_size: input.size(),
            file_type: input.mime_type.clone(),
        }
    }
}

/// Counters attached to pipeline runs.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunMetadata {
    run_id: String,
    generated_at: String,
    total_chunks: usize,
    failed_chunks: usize,
    #[serde(rename = "totalQAPairs")]
    total_qa_pairs: usize,
    #[serde(rename = "uniqueQAPairs")]
    unique_qa_pairs: usize,
    skipped_duplicates: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PdfMetadata {
    #[serde(flatten)]
    file: FileMetadata,
    #[serde(flatten)]
    run: RunMetadata,
}

/// Run the single-PDF pipeline on the uploaded `pdf` field.
async fn process_pdf<S>(
    State(service): State<Arc<S>>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<PairsData, PdfMetadata>>, AppError>
where
    S: QuizApi,
{
    let input = read_single_upload(&mut multipart, "pdf", "No PDF file provided").await?;
    let file = FileMetadata::from(&input);
    let outcome = service.process_pdf(input).await?;
    tracing::info!(
        file = %file.file_name,
        run_id = %outcome.run_id,
        unique = outcome.qa_pairs.len(),
        "PDF request completed"
    );

    let run = RunMetadata {
        run_id: outcome.run_id,
        generated_at: outcome.generated_at,
        total_chunks: outcome.chunks,
        failed_chunks: outcome.failed_chunks,
        total_qa_pairs: outcome.total_pairs,
        unique_qa_pairs: outcome.qa_pairs.len(),
        skipped_duplicates: outcome.skipped_duplicates,
    };
    Ok(ApiResponse::ok(
        PairsData {
            qa_pairs: outcome.qa_pairs,
        },
        PdfMetadata { file, run },
    ))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageMetadata {
    #[serde(flatten)]
    file: FileMetadata,
    processing_method: ImageMethod,
    #[serde(rename = "totalQAPairs")]
    total_qa_pairs: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    ocr_text: Option<String>,
}

/// Generate questions from the uploaded `image` field.
async fn process_image<S>(
    State(service): State<Arc<S>>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<PairsData, ImageMetadata>>, AppError>
where
    S: QuizApi,
{
    let input = read_single_upload(&mut multipart, "image", "No image file provided").await?;
    let file = FileMetadata::from(&input);
    let outcome = service.process_image(input).await?;
    tracing::info!(
        file = %file.file_name,
        method = ?outcome.method,
        pairs = outcome.qa_pairs.len(),
        "Image request completed"
    );

    let metadata = ImageMetadata {
        file,
        processing_method: outcome.method,
        total_qa_pairs: outcome.qa_pairs.len(),
        ocr_text: outcome.ocr_text,
    };
    Ok(ApiResponse::ok(
        PairsData {
            qa_pairs: outcome.qa_pairs,
        },
        metadata,
    ))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentsMetadata {
    files: Vec<FileMetadata>,
    failed_documents: usize,
    #[serde(flatten)]
    run: RunMetadata,
}

/// Run the multi-document pipeline over every uploaded `files` field.
async fn process_documents<S>(
    State(service): State<Arc<S>>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<PairsData, DocumentsMetadata>>, AppError>
where
    S: QuizApi,
{
    let mut inputs = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("files") {
            inputs.push(read_field(field).await?);
        }
    }
    if inputs.is_empty() {
        return Err(AppError::BadRequest("No files provided".into()));
    }

    let files = inputs.iter().map(FileMetadata::from).collect();
    let outcome = service.process_documents(inputs).await?;
    tracing::info!(
        run_id = %outcome.run_id,
        documents = outcome.documents,
        failed_documents = outcome.failed_documents,
        unique = outcome.qa_pairs.len(),
        "Documents request completed"
    );

    let metadata = DocumentsMetadata {
        files,
        failed_documents: outcome.failed_documents,
        run: RunMetadata {
            run_id: outcome.run_id,
            generated_at: outcome.generated_at,
            total_chunks: outcome.chunks,
            failed_chunks: outcome.failed_chunks,
            total_qa_pairs: outcome.total_pairs,
            unique_qa_pairs: outcome.qa_pairs.len(),
            skipped_duplicates: outcome.skipped_duplicates,
        },
    };
    Ok(ApiResponse::ok(
        PairsData {
            qa_pairs: outcome.qa_pairs,
        },
        metadata,
    ))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IndexedChunk {
    #[serde(flatten)]
    chunk: TextChunk,
    index: usize,
}

#[derive(Serialize)]
struct ChunksData {
    chunks: Vec<IndexedChunk>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChunksMetadata {
    #[serde(flatten)]
    file: FileMetadata,
    total_chunks: usize,
}

/// Return the page chunks of the uploaded `pdf` field without calling the model.
async fn extract_chunks<S>(
    State(service): State<Arc<S>>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<ChunksData, ChunksMetadata>>, AppError>
where
    S: QuizApi,
{
    let input = read_single_upload(&mut multipart, "pdf", "No PDF file provided").await?;
    let file = FileMetadata::from(&input);
    let chunks = service.extract_chunks(input).await?;
    let total_chunks = chunks.len();
    let chunks = chunks
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| IndexedChunk { chunk, index })
        .collect();
    Ok(ApiResponse::ok(
        ChunksData { chunks },
        ChunksMetadata { file, total_chunks },
    ))
}

/// Request body for `POST /process-chunk`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChunkRequest {
    #[serde(default)]
    text: String,
    #[serde(default)]
    page_range: String,
    /// Echoed back so clients driving chunks one by one can correlate replies.
    #[serde(default)]
    chunk_index: Option<usize>,
    #[serde(default)]
    total_chunks: Option<usize>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChunkMetadata {
    page_range: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    chunk_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_chunks: Option<usize>,
    qa_pairs_count: usize,
}

/// Generate questions for one chunk supplied by the caller.
async fn process_chunk<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<ChunkRequest>,
) -> Result<Json<ApiResponse<PairsData, ChunkMetadata>>, AppError>
where
    S: QuizApi,
{
    let ChunkRequest {
        text,
        page_range,
        chunk_index,
        total_chunks,
    } = request;
    let qa_pairs = service.process_chunk(text, page_range.clone()).await?;
    let metadata = ChunkMetadata {
        page_range,
        chunk_index,
        total_chunks,
        qa_pairs_count: qa_pairs.len(),
    };
    Ok(ApiResponse::ok(PairsData { qa_pairs }, metadata))
}

#[derive(Serialize)]
struct ChatResponse {
    success: bool,
    response: String,
}

/// Answer a chat message grounded in the supplied question set.
async fn chat<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError>
where
    S: QuizApi,
{
    let response = service.chat(request).await?;
    Ok(Json(ChatResponse {
        success: true,
        response,
    }))
}

/// Return the current pipeline counters.
async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: QuizApi,
{
    Json(service.metrics_snapshot())
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery/UX in hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "process_pdf",
                method: "POST",
                path: "/process-pdf",
                description: "Multipart upload with a `pdf` field. Chunks the PDF into overlapping page windows, generates multiple-choice questions per chunk, and returns the deduplicated set.",
                request_example: None,
            },
            CommandDescriptor {
                name: "process_image",
                method: "POST",
                path: "/process-image",
                description: "Multipart upload with an `image` field. Generates questions from OCR text, falling back to direct vision.",
                request_example: None,
            },
            CommandDescriptor {
                name: "process_documents",
                method: "POST",
                path: "/process-documents",
                description: "Multipart upload with one or more `files` fields (PDF or image). Questions are deduplicated across files on question and options.",
                request_example: None,
            },
            CommandDescriptor {
                name: "extract_chunks",
                method: "POST",
                path: "/extract-chunks",
                description: "Multipart upload with a `pdf` field. Returns the page chunks without generating questions.",
                request_example: None,
            },
            CommandDescriptor {
                name: "process_chunk",
                method: "POST",
                path: "/process-chunk",
                description: "Generate questions for a single chunk of text.",
                request_example: Some(json!({
                    "text": "=== PAGE 1 ===\n\nPhotosynthesis converts light into chemical energy.",
                    "pageRange": "1-5",
                    "chunkIndex": 0,
                    "totalChunks": 3
                })),
            },
            CommandDescriptor {
                name: "chatbot",
                method: "POST",
                path: "/chatbot",
                description: "Ask the study assistant a question grounded in a question set.",
                request_example: Some(json!({
                    "message": "Why is option B wrong in question 2?",
                    "qaPairs": [],
                    "context": "Biology, chapter 4",
                    "conversationHistory": [{ "role": "user", "content": "Hi" }]
                })),
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return pipeline counters useful for observability dashboards.",
                request_example: None,
            },
        ],
    })
}

async fn read_single_upload(
    multipart: &mut Multipart,
    field_name: &str,
    missing_message: &str,
) -> Result<DocumentInput, AppError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(field_name) {
            return read_field(field).await;
        }
    }
    Err(AppError::BadRequest(missing_message.to_string()))
}

async fn read_field(field: Field<'_>) -> Result<DocumentInput, AppError> {
    let file_name = field.file_name().unwrap_or("upload").to_string();
    let mime_type = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_string();
    let bytes = field.bytes().await?;
    tracing::debug!(file = %file_name, mime_type = %mime_type, bytes = bytes.len(), "Received upload");
    Ok(DocumentInput::new(file_name, mime_type, bytes.to_vec()))
}

enum AppError {
    Processing(ProcessingError),
    BadRequest(String),
    Multipart(MultipartError),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Processing(ProcessingError::Validation(_)) | Self::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Processing(ProcessingError::Configuration(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Multipart(error) => error.status(),
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Processing(error) => error.to_string(),
            Self::BadRequest(message) => message.clone(),
            Self::Multipart(error) => error.body_text(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();
        if status.is_server_error() {
            tracing::error!(status = %status, error = %message, "Request failed");
        } else {
            tracing::warn!(status = %status, error = %message, "Request rejected");
        }
        (status, Json(json!({ "success": false, "error": message }))).into_response()
    }
}

impl From<ProcessingError> for AppError {
    fn from(inner: ProcessingError) -> Self {
        Self::Processing(inner)
    }
}

impl From<MultipartError> for AppError {
    fn from(inner: MultipartError) -> Self {
        Self::Multipart(inner)
    }
}
