//! Page-bounded chunking of extracted document text.
//!
//! Documents are cut into windows of [`PAGES_PER_CHUNK`] pages that overlap by
//! [`OVERLAP_PAGES`], so a concept straddling a window edge is seen whole by at least one model
//! call. Highlights:
//!
//! - Page text comes from the OCR paragraph structure. Pages without paragraphs fall back to an
//!   even char split of the flat text, proportional to page position.
//! - Every page is introduced by a `=== PAGE n ===` marker; the first page of a non-initial
//!   chunk is flagged as OVERLAP so the prompt can tell the model to use it only when relevant.
//! - Extraction never yields zero chunks: a document without page structure becomes one chunk,
//!   and a failed or unconfigured OCR service yields a placeholder chunk.

use crate::ocr::{DocumentReader, OcrDocument, char_slice};

use super::types::{DocumentInput, TextChunk};

/// Pages grouped into one chunk.
pub const PAGES_PER_CHUNK: usize = 5;
/// Pages shared between consecutive chunks.
pub const OVERLAP_PAGES: usize = 1;

const PAGE_SEPARATOR: &str = "\n\n--- PAGE SEPARATOR ---\n\n";

/// Split a processed document into overlapping page windows.
pub fn chunk_document(document: &OcrDocument) -> Vec<TextChunk> {
    let total_pages = document.pages.len();
    if total_pages == 0 {
        tracing::debug!("Document has no page structure; emitting a single chunk");
        return vec![TextChunk {
            text: document.text.clone(),
            page_range: "1-1".into(),
            start_page: 1,
            end_page: 1,
            paragraphs: Vec::new(),
        }];
    }

    let step = PAGES_PER_CHUNK - OVERLAP_PAGES;
    let mut chunks = Vec::with_capacity(total_pages.div_ceil(step));
    let mut window_start = 0;

    while window_start < total_pages {
        let window_end = (window_start + PAGES_PER_CHUNK).min(total_pages);
        let has_overlap = window_start > 0;
        let mut text = String::new();
        let mut paragraphs = Vec::new();

        for page_index in window_start..window_end {
            let (page_text, page_paragraphs) = page_text(document, page_index);
            let page_number = page_index + 1;

            if !text.is_empty() {
                text.push_str(PAGE_SEPARATOR);
            }
            if has_overlap && page_index == window_start {
                text.push_str(&format!(
                    "=== PAGE {page_number} (OVERLAP - USE ONLY IF RELEVANT TO FOLLOWING PAGES) ==="
                ));
            } else {
                text.push_str(&format!("=== PAGE {page_number} ==="));
            }
            text.push_str("\n\n");
            text.push_str(page_text.trim());

            tracing::trace!(
                page = page_number,
                paragraphs = page_paragraphs.len(),
                chars = page_text.len(),
                "Collected page text"
            );
            paragraphs.extend(page_paragraphs);
        }

        let start_page = window_start + 1;
        let end_page = window_end;
        let chunk = TextChunk {
            text: text.trim().to_string(),
            page_range: page_range_label(start_page, end_page),
            start_page,
            end_page,
            paragraphs,
        };
        tracing::debug!(
            index = chunks.len(),
            pages = %chunk.page_range,
            paragraphs = chunk.paragraphs.len(),
            chars = chunk.text.len(),
            "Built chunk"
        );
        chunks.push(chunk);
        window_start += step;
    }

    chunks
}

/// Text of one page plus the paragraphs it was built from.
fn page_text(document: &OcrDocument, page_index: usize) -> (String, Vec<String>) {
    let paragraphs: Vec<String> = document.pages[page_index]
        .paragraphs
        .iter()
        .map(|paragraph| document.paragraph_text(paragraph).trim())
        .filter(|text| !text.is_empty())
        .map(str::to_string)
        .collect();

    if !paragraphs.is_empty() {
        return (paragraphs.join("\n\n"), paragraphs);
    }

    let total_chars = document.char_len();
    if total_chars == 0 {
        return (String::new(), paragraphs);
    }
    let chars_per_page = total_chars.div_ceil(document.pages.len());
    let start = page_index * chars_per_page;
    let end = ((page_index + 1) * chars_per_page).min(total_chars);
    (
        char_slice(&document.text, start, end).to_string(),
        paragraphs,
    )
}

/// `"3-7"`, or `"3"` for a single page.
pub fn page_range_label(start_page: usize, end_page: usize) -> String {
    if start_page == end_page {
        start_page.to_string()
    } else {
        format!("{start_page}-{end_page}")
    }
}

/// Single chunk used when the OCR service is unavailable or fails.
pub fn placeholder_chunk(file_name: &str, size_bytes: usize, reason: &str) -> TextChunk {
    let size_kb = (size_bytes as f64 / 1024.0).round() as u64;
    TextChunk {
        text: format!(
            "PDF Content from {file_name}\n\n\
             This PDF contains {size_kb}KB of data.\n\n\
             Text extraction was unavailable: {reason}\n\n\
             To extract actual text content, please configure Google Document AI with:\n\
             - GOOGLE_CLOUD_PROJECT_ID\n\
             - GOOGLE_DOCUMENT_AI_PROCESSOR_ID\n\
             - Valid Google Cloud credentials"
        ),
        page_range: "1".into(),
        start_page: 1,
        end_page: 1,
        paragraphs: vec!["PDF processing requires Document AI configuration".into()],
    }
}

/// Extract chunks for a PDF, falling back to a placeholder chunk on any OCR problem.
///
/// A single attempt is made against the reader; there is no retry.
pub async fn extract_chunks(
    reader: Option<&dyn DocumentReader>,
    input: &DocumentInput,
) -> Vec<TextChunk> {
    let Some(reader) = reader else {
        tracing::warn!(
            file = %input.file_name,
            "Document AI not configured; falling back to basic extraction"
        );
        return vec![placeholder_chunk(
            &input.file_name,
            input.size(),
            "Document AI is not configured",
        )];
    };

    match reader.read_document(&input.bytes, &input.mime_type).await {
        Ok(document) => {
            let chunks = chunk_document(&document);
            tracing::info!(
                file = %input.file_name,
                pages = document.pages.len(),
                chunks = chunks.len(),
                "Extracted chunks"
            );
            chunks
        }
        Err(error) => {
            tracing::warn!(
                file = %input.file_name,
                error = %error,
                "Document AI extraction failed; falling back to basic extraction"
            );
            vec![placeholder_chunk(
                &input.file_name,
                input.size(),
                &error.to_string(),
            )]
        }
    }
}
