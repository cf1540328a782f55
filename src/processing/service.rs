//! Pipeline driver coordinating OCR, chunking, generation, and deduplication.

use crate::{
    config::{
        Config, DEFAULT_CHAT_MODEL, DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_QA_MODEL,
        DEFAULT_VISION_MODEL,
    },
    llm::{CompletionClient, ImageAttachment, OpenAiCompletionClient},
    metrics::{MetricsSnapshot, PipelineMetrics},
    ocr::{DocumentAiClient, DocumentReader},
    processing::{
        chat::{ChatRequest, chat_request},
        chunking,
        dedup::{DedupStrategy, dedupe_pairs},
        generator::{self, image_text_request, request_pairs, vision_request},
        types::{
            DIRECT_VISION_PAGE_RANGE, DocumentInput, DocumentKind, ExtractionOutcome,
            IMAGE_PAGE_RANGE, ImageMethod, ImageOutcome, ProcessingError, Progress, QaPair,
            TextChunk, ValidationError,
        },
        validate::{validate_kind, validate_upload},
    },
};
use async_trait::async_trait;
use std::sync::Arc;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::Instrument;
use uuid::Uuid;

const QA_UNAVAILABLE: &str =
    "PDF Q&A extraction is not available. Please configure OpenAI API key.";
const IMAGE_UNAVAILABLE: &str =
    "Image processing is not available. Please configure OpenAI API key.";
const DOCUMENTS_UNAVAILABLE: &str =
    "Document processing is not available. Please configure OpenAI API key.";
const CHAT_UNAVAILABLE: &str = "Chatbot is not available. OpenAI API key not configured.";

/// Model names and limits used by a [`QuizService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Model used for PDF chunks.
    pub qa_model: String,
    /// Vision-capable model used for images.
    pub vision_model: String,
    /// Model used by the chat assistant.
    pub chat_model: String,
    /// Upload ceiling in bytes.
    pub max_upload_bytes: usize,
}

impl PipelineSettings {
    /// Copy the relevant fields out of the process configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            qa_model: config.qa_model.clone(),
            vision_model: config.vision_model.clone(),
            chat_model: config.chat_model.clone(),
            max_upload_bytes: config.max_upload_bytes,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            qa_model: DEFAULT_QA_MODEL.into(),
            vision_model: DEFAULT_VISION_MODEL.into(),
            chat_model: DEFAULT_CHAT_MODEL.into(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

/// Coordinates the quiz pipeline: OCR, page chunking, per-chunk generation, and deduplication.
///
/// The service owns long-lived handles to the model client, the OCR reader, and the metrics
/// registry so the HTTP surface and the CLI reuse the same components. Construct it once near
/// process start and share it through an `Arc`. Either client may be absent: a missing OCR
/// reader degrades to placeholder chunks, a missing model client fails each operation with
/// [`ProcessingError::Configuration`].
pub struct QuizService {
    completion_client: Option<Arc<dyn CompletionClient>>,
    document_reader: Option<Arc<dyn DocumentReader>>,
    settings: PipelineSettings,
    metrics: Arc<PipelineMetrics>,
}

/// Abstraction over the pipeline used by external surfaces (HTTP, CLI).
#[async_trait]
pub trait QuizApi: Send + Sync {
    /// Validate a PDF and return its chunks without calling the model.
    async fn extract_chunks(&self, input: DocumentInput) -> Result<Vec<TextChunk>, ProcessingError>;

    /// Generate pairs for one caller-supplied chunk.
    async fn process_chunk(
        &self,
        text: String,
        page_range: String,
    ) -> Result<Vec<QaPair>, ProcessingError>;

    /// Run the single-PDF pipeline.
    async fn process_pdf(&self, input: DocumentInput) -> Result<ExtractionOutcome, ProcessingError>;

    /// Generate pairs from one image.
    async fn process_image(&self, input: DocumentInput) -> Result<ImageOutcome, ProcessingError>;

    /// Run the multi-document pipeline.
    async fn process_documents(
        &self,
        inputs: Vec<DocumentInput>,
    ) -> Result<ExtractionOutcome, ProcessingError>;

    /// Answer a study-assistant message grounded in the supplied pairs.
    async fn chat(&self, request: ChatRequest) -> Result<String, ProcessingError>;

    /// Retrieve the current metrics snapshot for diagnostics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;

    /// Largest accepted upload in bytes.
    fn upload_limit(&self) -> usize;
}

/// Reports progress to a sink, keeping the emitted percentages non-decreasing.
///
/// Percentages passed to [`ProgressTracker::report`] are local to the current window; the
/// multi-document driver narrows the window to each document's share of the run.
pub struct ProgressTracker<'a> {
    sink: &'a mut (dyn FnMut(Progress) + Send),
    last: u8,
    window: (f64, f64),
}

impl<'a> ProgressTracker<'a> {
    /// Wrap a sink; the window starts as the full `0..=100` range.
    pub fn new(sink: &'a mut (dyn FnMut(Progress) + Send)) -> Self {
        Self {
            sink,
            last: 0,
            window: (0.0, 100.0),
        }
    }

    /// Map subsequent reports into `start..=end`.
    pub fn set_window(&mut self, start: f64, end: f64) {
        self.window = (start.clamp(0.0, 100.0), end.clamp(0.0, 100.0));
    }

    /// Emit a progress event, clamped so it never moves backwards.
    pub fn report(&mut self, percent: u8, stage: impl Into<String>) {
        let (start, end) = self.window;
        let scaled = start + (end - start) * f64::from(percent.min(100)) / 100.0;
        let percent = (scaled.round() as u8).clamp(self.last, 100);
        self.last = percent;
        let stage = stage.into();
        tracing::debug!(percent, stage = %stage, "Progress");
        (self.sink)(Progress { stage, percent });
    }
}

#[derive(Debug, Default)]
struct DocumentRun {
    pairs: Vec<QaPair>,
    chunks: usize,
    failed_chunks: usize,
}

impl DocumentRun {
    fn failed(&self) -> bool {
        self.chunks > 0 && self.failed_chunks == self.chunks
    }
}

impl QuizService {
    /// Build a service from explicit collaborators.
    pub fn new(
        completion_client: Option<Arc<dyn CompletionClient>>,
        document_reader: Option<Arc<dyn DocumentReader>>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            completion_client,
            document_reader,
            settings,
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    /// Build a service whose clients are derived from the process configuration.
    pub fn from_config(config: &Config) -> Self {
        let completion_client = match config.openai_api_key.as_deref() {
            Some(api_key) => {
                match OpenAiCompletionClient::new(config.openai_base_url.clone(), api_key.into()) {
                    Ok(client) => {
                        tracing::info!(base_url = %config.openai_base_url, "Completion client initialized");
                        Some(Arc::new(client) as Arc<dyn CompletionClient>)
                    }
                    Err(error) => {
                        tracing::error!(error = %error, "Failed to initialize completion client");
                        None
                    }
                }
            }
            None => None,
        };

        let document_reader = if config.capabilities().document_ai_ocr {
            match DocumentAiClient::from_config(config) {
                Ok(client) => {
                    tracing::info!("Document AI client initialized");
                    Some(Arc::new(client) as Arc<dyn DocumentReader>)
                }
                Err(error) => {
                    tracing::error!(error = %error, "Failed to initialize Document AI client");
                    None
                }
            }
        } else {
            None
        };

        Self::new(
            completion_client,
            document_reader,
            PipelineSettings::from_config(config),
        )
    }

    /// Settings the service was built with.
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    fn require_client(&self, message: &str) -> Result<&dyn CompletionClient, ProcessingError> {
        self.completion_client
            .as_deref()
            .ok_or_else(|| ProcessingError::Configuration(message.to_string()))
    }

    /// Validate a PDF and return its chunks without calling the model.
    pub async fn extract_chunks(
        &self,
        input: &DocumentInput,
    ) -> Result<Vec<TextChunk>, ProcessingError> {
        validate_kind(input, DocumentKind::Pdf, self.settings.max_upload_bytes)?;
        Ok(chunking::extract_chunks(self.document_reader.as_deref(), input).await)
    }

    /// Generate pairs for one caller-supplied chunk. Model failures yield an empty list.
    pub async fn process_chunk(
        &self,
        text: &str,
        page_range: &str,
    ) -> Result<Vec<QaPair>, ProcessingError> {
        if text.trim().is_empty() || page_range.trim().is_empty() {
            return Err(ValidationError::EmptyChunk.into());
        }
        let client = self.require_client(QA_UNAVAILABLE)?;
        let generated =
            generator::try_generate_pairs(client, &self.settings.qa_model, text, page_range).await;
        let failed = generated.is_none();
        let pairs = generated.unwrap_or_default();
        self.metrics.record_chunk(pairs.len() as u64, failed);
        tracing::info!(page_range, pairs = pairs.len(), "Processed chunk");
        Ok(pairs)
    }

    /// Run the single-PDF pipeline: extract, generate per chunk, dedupe on question text.
    ///
    /// Chunk failures are logged and skipped; the run only fails on configuration or
    /// validation problems.
    pub async fn process_pdf(
        &self,
        input: &DocumentInput,
        progress: &mut (dyn FnMut(Progress) + Send),
    ) -> Result<ExtractionOutcome, ProcessingError> {
        let client = self.require_client(QA_UNAVAILABLE)?;
        validate_kind(input, DocumentKind::Pdf, self.settings.max_upload_bytes)?;

        let run_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("quiz_run", run_id = %run_id);
        let outcome = async {
            tracing::info!(file = %input.file_name, bytes = input.size(), "Processing PDF");
            let mut tracker = ProgressTracker::new(progress);
            let run = self.run_pdf(client, input, &mut tracker).await;
            tracker.report(95, "Finalizing results");
            let outcome = self.finish(run_id, vec![run], DedupStrategy::Question);
            tracker.report(100, "Complete");
            outcome
        }
        .instrument(span)
        .await;
        Ok(outcome)
    }

    /// Generate pairs from one image: OCR followed by text generation, falling back to sending
    /// the image to the vision model when OCR is unavailable, fails, or finds no text.
    pub async fn process_image(
        &self,
        input: &DocumentInput,
    ) -> Result<ImageOutcome, ProcessingError> {
        let client = self.require_client(IMAGE_UNAVAILABLE)?;
        validate_kind(input, DocumentKind::Image, self.settings.max_upload_bytes)?;
        let result = self.run_image(client, input).await;
        self.metrics.record_document();
        match &result {
            Ok(outcome) => self
                .metrics
                .record_chunk(outcome.qa_pairs.len() as u64, false),
            Err(_) => self.metrics.record_chunk(0, true),
        }
        result
    }

    /// Run the multi-document pipeline over PDFs and images.
    ///
    /// Every input is validated before any work starts. Documents are processed one at a time;
    /// per-chunk and per-document failures are logged and counted, and the aggregate is
    /// deduplicated once on question plus options.
    pub async fn process_documents(
        &self,
        inputs: &[DocumentInput],
        progress: &mut (dyn FnMut(Progress) + Send),
    ) -> Result<ExtractionOutcome, ProcessingError> {
        let client = self.require_client(DOCUMENTS_UNAVAILABLE)?;
        if inputs.is_empty() {
            return Err(ValidationError::NoDocuments.into());
        }
        let kinds = inputs
            .iter()
            .map(|input| validate_upload(input, self.settings.max_upload_bytes))
            .collect::<Result<Vec<_>, _>>()?;

        let run_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("quiz_run", run_id = %run_id);
        let outcome = async {
            tracing::info!(documents = inputs.len(), "Processing documents");
            let mut tracker = ProgressTracker::new(progress);
            let total = inputs.len() as f64;
            let mut runs = Vec::with_capacity(inputs.len());

            for (index, (input, kind)) in inputs.iter().zip(kinds).enumerate() {
                let start = 10.0 + 85.0 * index as f64 / total;
                let end = 10.0 + 85.0 * (index + 1) as f64 / total;
                tracker.set_window(start, end);

                let run = match kind {
                    DocumentKind::Pdf => self.run_pdf(client, input, &mut tracker).await,
                    DocumentKind::Image => {
                        tracker.report(10, format!("Extracting text from {}", input.file_name));
                        let run = self.run_image_document(client, input).await;
                        tracker.report(90, format!("Processed {}", input.file_name));
                        run
                    }
                };
                if run.failed() {
                    tracing::warn!(file = %input.file_name, "No questions could be generated for document");
                }
                runs.push(run);
            }

            tracker.set_window(0.0, 100.0);
            tracker.report(95, "Finalizing results");
            let outcome = self.finish(run_id, runs, DedupStrategy::QuestionAndOptions);
            tracker.report(100, "Complete");
            outcome
        }
        .instrument(span)
        .await;
        Ok(outcome)
    }

    /// Answer a study-assistant message grounded in the supplied pairs.
    pub async fn chat(&self, request: &ChatRequest) -> Result<String, ProcessingError> {
        let completion = chat_request(&self.settings.chat_model, request)?;
        let client = self.require_client(CHAT_UNAVAILABLE)?;
        tracing::debug!(
            pairs = request.qa_pairs.len(),
            history = request.conversation_history.len(),
            "Forwarding chat message"
        );
        let reply = client.complete(completion).await?;
        Ok(reply.trim().to_string())
    }

    /// Return the current pipeline metrics snapshot.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn run_pdf(
        &self,
        client: &dyn CompletionClient,
        input: &DocumentInput,
        tracker: &mut ProgressTracker<'_>,
    ) -> DocumentRun {
        tracker.report(10, format!("Extracting text from {}", input.file_name));
        let chunks = chunking::extract_chunks(self.document_reader.as_deref(), input).await;
        tracker.report(40, "Processing text chunks");

        let total = chunks.len();
        let mut run = DocumentRun {
            chunks: total,
            ..DocumentRun::default()
        };
        for (index, chunk) in chunks.iter().enumerate() {
            let percent = 40 + (index as f64 / total as f64 * 50.0).round() as u8;
            tracker.report(percent, format!("Processing chunk {}/{}", index + 1, total));

            let generated = generator::try_generate_pairs(
                client,
                &self.settings.qa_model,
                &chunk.text,
                &chunk.page_range,
            )
            .await;
            match generated {
                Some(pairs) => {
                    tracing::debug!(page_range = %chunk.page_range, pairs = pairs.len(), "Chunk processed");
                    self.metrics.record_chunk(pairs.len() as u64, false);
                    run.pairs.extend(pairs);
                }
                None => {
                    self.metrics.record_chunk(0, true);
                    run.failed_chunks += 1;
                }
            }
        }

        self.metrics.record_document();
        tracing::info!(
            file = %input.file_name,
            chunks = run.chunks,
            failed_chunks = run.failed_chunks,
            pairs = run.pairs.len(),
            "Document processed"
        );
        run
    }

    async fn run_image_document(
        &self,
        client: &dyn CompletionClient,
        input: &DocumentInput,
    ) -> DocumentRun {
        self.metrics.record_document();
        match self.run_image(client, input).await {
            Ok(outcome) => {
                self.metrics
                    .record_chunk(outcome.qa_pairs.len() as u64, false);
                DocumentRun {
                    pairs: outcome.qa_pairs,
                    chunks: 1,
                    failed_chunks: 0,
                }
            }
            Err(error) => {
                tracing::warn!(file = %input.file_name, error = %error, "Image processing failed");
                self.metrics.record_chunk(0, true);
                DocumentRun {
                    pairs: Vec::new(),
                    chunks: 1,
                    failed_chunks: 1,
                }
            }
        }
    }

    async fn run_image(
        &self,
        client: &dyn CompletionClient,
        input: &DocumentInput,
    ) -> Result<ImageOutcome, ProcessingError> {
        let model = self.settings.vision_model.as_str();

        match self.document_reader.as_deref() {
            Some(reader) => match reader.read_document(&input.bytes, &input.mime_type).await {
                Ok(document) if !document.text.trim().is_empty() => {
                    let text = document.text;
                    tracing::debug!(file = %input.file_name, chars = text.len(), "OCR text extracted");
                    match request_pairs(client, image_text_request(model, &text), IMAGE_PAGE_RANGE)
                        .await
                    {
                        Ok(response) => {
                            return Ok(ImageOutcome {
                                qa_pairs: response.into_pairs(),
                                method: ImageMethod::OcrThenModel,
                                ocr_text: Some(text),
                            });
                        }
                        Err(error) => tracing::warn!(
                            file = %input.file_name,
                            error = %error,
                            "Generation from OCR text failed; falling back to direct vision"
                        ),
                    }
                }
                Ok(_) => tracing::warn!(
                    file = %input.file_name,
                    "OCR found no text; falling back to direct vision"
                ),
                Err(error) => tracing::warn!(
                    file = %input.file_name,
                    error = %error,
                    "Document AI processing failed; falling back to direct vision"
                ),
            },
            None => tracing::debug!(
                file = %input.file_name,
                "Document AI not configured; using direct vision"
            ),
        }

        let image = ImageAttachment {
            mime_type: input.mime_type.clone(),
            data: input.bytes.clone(),
        };
        let response = request_pairs(
            client,
            vision_request(model, image),
            DIRECT_VISION_PAGE_RANGE,
        )
        .await
        .map_err(|error| ProcessingError::Image(error.to_string()))?;

        Ok(ImageOutcome {
            qa_pairs: response.into_pairs(),
            method: ImageMethod::DirectVision,
            ocr_text: None,
        })
    }

    fn finish(
        &self,
        run_id: String,
        runs: Vec<DocumentRun>,
        strategy: DedupStrategy,
    ) -> ExtractionOutcome {
        let documents = runs.len();
        let failed_documents = runs.iter().filter(|run| run.failed()).count();
        let chunks = runs.iter().map(|run| run.chunks).sum();
        let failed_chunks = runs.iter().map(|run| run.failed_chunks).sum();
        let pairs: Vec<QaPair> = runs.into_iter().flat_map(|run| run.pairs).collect();
        let total_pairs = pairs.len();

        let (qa_pairs, skipped_duplicates) = dedupe_pairs(pairs, strategy);
        self.metrics.record_duplicates(skipped_duplicates as u64);

        tracing::info!(
            documents,
            failed_documents,
            chunks,
            failed_chunks,
            total_pairs,
            unique_pairs = qa_pairs.len(),
            skipped_duplicates,
            "Run complete"
        );

        ExtractionOutcome {
            run_id,
            generated_at: current_timestamp_rfc3339(),
            qa_pairs,
            documents,
            failed_documents,
            chunks,
            failed_chunks,
            total_pairs,
            skipped_duplicates,
        }
    }
}

fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

fn log_progress(progress: Progress) {
    tracing::info!(percent = progress.percent, stage = %progress.stage, "Progress");
}

#[async_trait]
impl QuizApi for QuizService {
    async fn extract_chunks(
        &self,
        input: DocumentInput,
    ) -> Result<Vec<TextChunk>, ProcessingError> {
        QuizService::extract_chunks(self, &input).await
    }

    async fn process_chunk(
        &self,
        text: String,
        page_range: String,
    ) -> Result<Vec<QaPair>, ProcessingError> {
        QuizService::process_chunk(self, &text, &page_range).await
    }

    async fn process_pdf(
        &self,
        input: DocumentInput,
    ) -> Result<ExtractionOutcome, ProcessingError> {
        let mut sink = log_progress;
        QuizService::process_pdf(self, &input, &mut sink).await
    }

    async fn process_image(&self, input: DocumentInput) -> Result<ImageOutcome, ProcessingError> {
        QuizService::process_image(self, &input).await
    }

    async fn process_documents(
        &self,
        inputs: Vec<DocumentInput>,
    ) -> Result<ExtractionOutcome, ProcessingError> {
        let mut sink = log_progress;
        QuizService::process_documents(self, &inputs, &mut sink).await
    }

    async fn chat(&self, request: ChatRequest) -> Result<String, ProcessingError> {
        QuizService::chat(self, &request).await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        QuizService::metrics_snapshot(self)
    }

    fn upload_limit(&self) -> usize {
        self.settings.max_upload_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionClientError, CompletionRequest, OutputMode};
    use crate::ocr::{OcrDocument, OcrError, OcrPage, OcrParagraph, TextSegment};
    use std::sync::Mutex;

    /// Replays canned completions in order and records every request.
    struct ScriptedClient {
        responses: Mutex<Vec<Result<String, CompletionClientError>>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<Result<String, CompletionClientError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<String, CompletionClientError> {
            self.requests.lock().expect("lock").push(request);
            let mut responses = self.responses.lock().expect("lock");
            if responses.is_empty() {
                return Err(CompletionClientError::GenerationFailed("script exhausted".into()));
            }
            responses.remove(0)
        }
    }

    struct PagedReader {
        pages: usize,
    }

    #[async_trait]
    impl DocumentReader for PagedReader {
        async fn read_document(
            &self,
            _bytes: &[u8],
            _mime_type: &str,
        ) -> Result<OcrDocument, OcrError> {
            let mut text = String::new();
            let mut pages = Vec::new();
            for page in 1..=self.pages {
                let start = text.chars().count();
                text.push_str(&format!("Page {page} text"));
                pages.push(OcrPage {
                    paragraphs: vec![OcrParagraph {
                        segments: vec![TextSegment {
                            start_index: start,
                            end_index: text.chars().count(),
                        }],
                    }],
                });
                text.push('\n');
            }
            Ok(OcrDocument { text, pages })
        }
    }

    struct FailingReader;

    #[async_trait]
    impl DocumentReader for FailingReader {
        async fn read_document(
            &self,
            _bytes: &[u8],
            _mime_type: &str,
        ) -> Result<OcrDocument, OcrError> {
            Err(OcrError::InvalidResponse("quota exceeded".into()))
        }
    }

    fn pairs_json(questions: &[&str]) -> String {
        let pairs: Vec<_> = questions
            .iter()
            .map(|question| {
                serde_json::json!({
                    "question": question,
                    "options": ["a", "b", "c", "d"],
                    "correctAnswer": 1,
                    "explanation": "because",
                    "wrongAnswerExplanations": ["x", "y", "z"],
                    "confidence": 0.8
                })
            })
            .collect();
        serde_json::json!({ "qa_pairs": pairs }).to_string()
    }

    fn service(
        client: Option<Arc<ScriptedClient>>,
        reader: Option<Arc<dyn DocumentReader>>,
    ) -> QuizService {
        QuizService::new(
            client.map(|client| client as Arc<dyn CompletionClient>),
            reader,
            PipelineSettings::default(),
        )
    }

    fn pdf(name: &str) -> DocumentInput {
        DocumentInput::new(name, "application/pdf", vec![7; 64])
    }

    fn image(name: &str) -> DocumentInput {
        DocumentInput::new(name, "image/png", vec![1, 2, 3])
    }

    #[tokio::test]
    async fn failed_chunk_does_not_abort_the_run() {
        let client = ScriptedClient::new(vec![
            Ok(pairs_json(&["Q1", "Q2"])),
            Err(CompletionClientError::GenerationFailed("rate limited".into())),
            Ok(format!("Here you go: {}", pairs_json(&["Q5"]))),
        ]);
        let service = service(Some(client.clone()), Some(Arc::new(PagedReader { pages: 12 })));

        let mut events = Vec::new();
        let mut sink = |progress: Progress| events.push(progress);
        let outcome = service
            .process_pdf(&pdf("book.pdf"), &mut sink)
            .await
            .expect("run succeeds");

        let questions: Vec<_> = outcome
            .qa_pairs
            .iter()
            .map(|pair| pair.question.as_str())
            .collect();
        assert_eq!(questions, vec!["Q1", "Q2", "Q5"]);
        assert_eq!(outcome.chunks, 3);
        assert_eq!(outcome.failed_chunks, 1);
        assert_eq!(outcome.failed_documents, 0);
        assert_eq!(outcome.qa_pairs[2].page_range, "9-12");
        assert!(!outcome.run_id.is_empty());

        let requests = client.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|request| request.model == "gpt-4.1-mini"));
        assert!(requests[1].prompt.contains("=== PAGE 5 (OVERLAP"));

        let snapshot = service.metrics_snapshot();
        assert_eq!(snapshot.documents_processed, 1);
        assert_eq!(snapshot.chunks_processed, 3);
        assert_eq!(snapshot.failed_chunks, 1);
        assert_eq!(snapshot.pairs_generated, 3);
    }

    #[tokio::test]
    async fn progress_follows_pipeline_stages() {
        let client = ScriptedClient::new(vec![
            Ok(pairs_json(&["Q1"])),
            Ok(pairs_json(&["q1 "])),
            Ok(pairs_json(&["Q3"])),
        ]);
        let service = service(Some(client), Some(Arc::new(PagedReader { pages: 12 })));

        let mut events = Vec::new();
        let mut sink = |progress: Progress| events.push(progress);
        let outcome = service
            .process_pdf(&pdf("book.pdf"), &mut sink)
            .await
            .expect("run succeeds");
        assert_eq!(outcome.skipped_duplicates, 1);
        assert_eq!(outcome.total_pairs, 3);

        let percents: Vec<_> = events.iter().map(|event| event.percent).collect();
        assert_eq!(percents, vec![10, 40, 40, 57, 73, 95, 100]);
        assert_eq!(events[0].stage, "Extracting text from book.pdf");
        assert_eq!(events[3].stage, "Processing chunk 2/3");
        assert_eq!(events[6].stage, "Complete");
    }

    #[tokio::test]
    async fn missing_model_client_is_a_configuration_error() {
        let service = service(None, None);
        let mut sink = |_: Progress| {};
        let error = service
            .process_pdf(&pdf("book.pdf"), &mut sink)
            .await
            .expect_err("no client");
        assert!(matches!(error, ProcessingError::Configuration(_)));

        let error = service
            .process_image(&image("photo.png"))
            .await
            .expect_err("no client");
        assert!(matches!(error, ProcessingError::Configuration(_)));
    }

    #[tokio::test]
    async fn pdf_validation_runs_before_processing() {
        let client = ScriptedClient::new(Vec::new());
        let service = service(Some(client.clone()), None);
        let mut sink = |_: Progress| {};

        let error = service
            .process_pdf(&image("photo.png"), &mut sink)
            .await
            .expect_err("wrong kind");
        assert!(matches!(
            error,
            ProcessingError::Validation(ValidationError::UnsupportedType { .. })
        ));

        let empty = DocumentInput::new("empty.pdf", "application/pdf", Vec::new());
        let error = service
            .process_pdf(&empty, &mut sink)
            .await
            .expect_err("empty");
        assert!(matches!(
            error,
            ProcessingError::Validation(ValidationError::Empty(_))
        ));
        assert!(client.requests().is_empty());
    }

    #[tokio::test]
    async fn missing_reader_uses_placeholder_chunk() {
        let client = ScriptedClient::new(vec![Ok(pairs_json(&["Q"]))]);
        let service = service(Some(client.clone()), None);
        let mut sink = |_: Progress| {};
        let outcome = service
            .process_pdf(&pdf("notes.pdf"), &mut sink)
            .await
            .expect("run succeeds");
        assert_eq!(outcome.chunks, 1);
        assert_eq!(outcome.qa_pairs[0].page_range, "1");
        assert!(client.requests()[0].prompt.contains("PDF Content from notes.pdf"));
    }

    #[tokio::test]
    async fn image_uses_ocr_text_when_available() {
        let client = ScriptedClient::new(vec![Ok(pairs_json(&["From OCR"]))]);
        let service = service(Some(client.clone()), Some(Arc::new(PagedReader { pages: 1 })));

        let outcome = service
            .process_image(&image("slide.png"))
            .await
            .expect("image processed");
        assert_eq!(outcome.method, ImageMethod::OcrThenModel);
        assert_eq!(outcome.qa_pairs[0].page_range, IMAGE_PAGE_RANGE);
        assert!(outcome.ocr_text.is_some_and(|text| text.contains("Page 1 text")));

        let request = &client.requests()[0];
        assert_eq!(request.model, "gpt-4o");
        assert_eq!(request.output, OutputMode::JsonObject);
        assert!(request.image.is_none());
    }

    #[tokio::test]
    async fn image_falls_back_to_direct_vision_when_ocr_fails() {
        let client = ScriptedClient::new(vec![Ok(pairs_json(&["From pixels"]))]);
        let service = service(Some(client.clone()), Some(Arc::new(FailingReader)));

        let outcome = service
            .process_image(&image("slide.png"))
            .await
            .expect("image processed");
        assert_eq!(outcome.method, ImageMethod::DirectVision);
        assert_eq!(outcome.qa_pairs[0].page_range, DIRECT_VISION_PAGE_RANGE);
        assert!(outcome.ocr_text.is_none());
        assert!(client.requests()[0].image.is_some());
    }

    #[tokio::test]
    async fn image_fails_when_direct_vision_fails() {
        let client = ScriptedClient::new(vec![Err(CompletionClientError::ProviderUnavailable(
            "offline".into(),
        ))]);
        let service = service(Some(client), None);
        let error = service
            .process_image(&image("slide.png"))
            .await
            .expect_err("both paths failed");
        assert!(
            matches!(error, ProcessingError::Image(ref message) if message.contains("offline"))
        );
        assert_eq!(service.metrics_snapshot().failed_chunks, 1);
    }

    #[tokio::test]
    async fn documents_are_deduplicated_on_question_and_options() {
        let same_question_other_options = serde_json::json!({
            "qa_pairs": [{
                "question": "Q1",
                "options": ["e", "f", "g", "h"],
                "correctAnswer": 0
            }]
        })
        .to_string();
        let client = ScriptedClient::new(vec![
            Ok(pairs_json(&["Q1"])),
            Err(CompletionClientError::GenerationFailed("boom".into())),
            Ok(same_question_other_options),
            Ok(pairs_json(&["q1"])),
        ]);
        // Four pages fit one window, so each PDF costs exactly one model call.
        let service = service(Some(client), Some(Arc::new(PagedReader { pages: 4 })));

        let mut events = Vec::new();
        let mut sink = |progress: Progress| events.push(progress.percent);
        let inputs = vec![pdf("a.pdf"), pdf("b.pdf"), image("c.png"), pdf("d.pdf")];
        let outcome = service
            .process_documents(&inputs, &mut sink)
            .await
            .expect("run succeeds");

        assert_eq!(outcome.documents, 4);
        assert_eq!(outcome.chunks, 4);
        assert_eq!(outcome.failed_documents, 1);
        assert_eq!(outcome.failed_chunks, 1);
        assert_eq!(outcome.total_pairs, 3);
        assert_eq!(outcome.qa_pairs.len(), 2);
        assert_eq!(outcome.skipped_duplicates, 1);

        assert!(events.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(events.last(), Some(&100));
        assert!(events.iter().all(|percent| *percent <= 100));
    }

    #[tokio::test]
    async fn documents_are_all_validated_up_front() {
        let client = ScriptedClient::new(Vec::new());
        let service = service(Some(client.clone()), None);
        let mut sink = |_: Progress| {};
        let inputs = vec![
            pdf("a.pdf"),
            DocumentInput::new("notes.txt", "text/plain", vec![1]),
        ];
        let error = service
            .process_documents(&inputs, &mut sink)
            .await
            .expect_err("invalid input");
        assert!(matches!(
            error,
            ProcessingError::Validation(ValidationError::UnsupportedType { .. })
        ));
        assert!(client.requests().is_empty());

        let error = service
            .process_documents(&[], &mut sink)
            .await
            .expect_err("no inputs");
        assert!(matches!(
            error,
            ProcessingError::Validation(ValidationError::NoDocuments)
        ));
    }

    #[tokio::test]
    async fn process_chunk_requires_text_and_range() {
        let client = ScriptedClient::new(vec![Ok(pairs_json(&["Q"]))]);
        let service = service(Some(client), None);
        let error = service
            .process_chunk("  ", "1-5")
            .await
            .expect_err("blank text");
        assert!(matches!(
            error,
            ProcessingError::Validation(ValidationError::EmptyChunk)
        ));

        let pairs = service
            .process_chunk("Some text", "3-7")
            .await
            .expect("pairs");
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].page_range, "3-7");
    }

    #[tokio::test]
    async fn chat_trims_reply_and_checks_message_first() {
        let client = ScriptedClient::new(vec![Ok("  Mitochondria make ATP.  ".into())]);
        let service = service(Some(client.clone()), None);
        let reply = service
            .chat(&ChatRequest {
                message: "What do mitochondria do?".into(),
                ..ChatRequest::default()
            })
            .await
            .expect("reply");
        assert_eq!(reply, "Mitochondria make ATP.");
        assert_eq!(client.requests()[0].max_tokens, Some(10_000));

        let unconfigured = service_without_client();
        let error = unconfigured
            .chat(&ChatRequest::default())
            .await
            .expect_err("blank message");
        assert!(matches!(
            error,
            ProcessingError::Validation(ValidationError::EmptyMessage)
        ));
    }

    fn service_without_client() -> QuizService {
        service(None, None)
    }

    #[test]
    fn progress_tracker_never_moves_backwards() {
        let mut events = Vec::new();
        let mut sink = |progress: Progress| events.push(progress.percent);
        let mut tracker = ProgressTracker::new(&mut sink);
        tracker.report(40, "a");
        tracker.report(10, "b");
        tracker.set_window(50.0, 100.0);
        tracker.report(0, "c");
        tracker.report(100, "d");
        drop(tracker);
        assert_eq!(events, vec![40, 40, 50, 100]);
    }
}
