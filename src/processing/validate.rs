//! Upload checks applied before any processing begins.

use super::types::{DocumentInput, DocumentKind, ValidationError};

/// MIME type accepted for documents.
pub const PDF_MIME_TYPE: &str = "application/pdf";

/// MIME types accepted for images.
pub const IMAGE_MIME_TYPES: [&str; 7] = [
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/webp",
    "image/gif",
    "image/bmp",
    "image/tiff",
];

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Classify a MIME type, ignoring case and surrounding whitespace.
pub fn document_kind(mime_type: &str) -> Option<DocumentKind> {
    let normalized = mime_type.trim().to_lowercase();
    if normalized == PDF_MIME_TYPE {
        Some(DocumentKind::Pdf)
    } else if IMAGE_MIME_TYPES.contains(&normalized.as_str()) {
        Some(DocumentKind::Image)
    } else {
        None
    }
}

/// Guess a MIME type from a file extension; used by the CLI.
pub fn mime_type_for_extension(extension: &str) -> Option<&'static str> {
    match extension.to_lowercase().as_str() {
        "pdf" => Some(PDF_MIME_TYPE),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        "tif" | "tiff" => Some("image/tiff"),
        _ => None,
    }
}

/// Validate type and size of an upload and return its kind.
pub fn validate_upload(
    input: &DocumentInput,
    max_bytes: usize,
) -> Result<DocumentKind, ValidationError> {
    let Some(kind) = document_kind(&input.mime_type) else {
        return Err(ValidationError::UnsupportedType {
            mime_type: input.mime_type.clone(),
            supported: supported_types(),
        });
    };

    if input.bytes.is_empty() {
        return Err(ValidationError::Empty(input.file_name.clone()));
    }

    if input.size() > max_bytes {
        return Err(ValidationError::TooLarge {
            size_mb: input.size() as f64 / BYTES_PER_MB,
            limit_mb: max_bytes as f64 / BYTES_PER_MB,
        });
    }

    Ok(kind)
}

/// Validate an upload that must be of a particular kind.
pub fn validate_kind(
    input: &DocumentInput,
    expected: DocumentKind,
    max_bytes: usize,
) -> Result<(), ValidationError> {
    let kind = validate_upload(input, max_bytes)?;
    if kind != expected {
        let supported = match expected {
            DocumentKind::Pdf => PDF_MIME_TYPE.to_string(),
            DocumentKind::Image => IMAGE_MIME_TYPES.join(", "),
        };
        return Err(ValidationError::UnsupportedType {
            mime_type: input.mime_type.clone(),
            supported,
        });
    }
    Ok(())
}

fn supported_types() -> String {
    std::iter::once(PDF_MIME_TYPE)
        .chain(IMAGE_MIME_TYPES)
        .collect::<Vec<_>>()
        .join(", ")
}
