//! Quiz generation pipeline: validation, chunking, question generation, and deduplication.

pub mod chat;
pub mod chunking;
pub mod dedup;
pub mod generator;
mod service;
pub mod types;
pub mod validate;

pub use chat::{ChatRequest, ChatRole, ChatTurn};
pub use dedup::DedupStrategy;
pub use service::{PipelineSettings, ProgressTracker, QuizApi, QuizService};
pub use types::{
    DocumentInput, DocumentKind, ExtractionOutcome, ImageMethod, ImageOutcome, ProcessingError,
    Progress, QaPair, TextChunk, ValidationError,
};
