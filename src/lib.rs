#![deny(missing_docs)]

//! Core library for quizgen: turns PDF and image study material into multiple-choice questions.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Generative model client abstraction and adapters.
pub mod llm;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline metrics helpers.
pub mod metrics;
/// OCR / document-structure client abstraction and adapters.
pub mod ocr;
/// Quiz generation pipeline.
pub mod processing;
