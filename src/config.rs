use serde::Deserialize;
use std::env;
use std::sync::OnceLock;
use thiserror::Error;

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub(crate) const DEFAULT_QA_MODEL: &str = "gpt-4.1-mini";
pub(crate) const DEFAULT_VISION_MODEL: &str = "gpt-4o";
pub(crate) const DEFAULT_CHAT_MODEL: &str = "gpt-4.1-mini";
const DEFAULT_GOOGLE_LOCATION: &str = "us";

/// Upload ceiling shared by every surface: 4.5 MB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 4_718_592;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the quiz generation server and CLI.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// API key for the OpenAI-compatible completion endpoint. Generation is disabled without it.
    pub openai_api_key: Option<String>,
    /// Base URL of the completion API (no trailing `/chat/completions`).
    pub openai_base_url: String,
    /// Model used to generate question sets from PDF chunks.
    pub qa_model: String,
    /// Model used for image inputs, both OCR-derived text and direct vision.
    pub vision_model: String,
    /// Model used by the chat assistant.
    pub chat_model: String,
    /// Google Cloud project hosting the Document AI processor.
    pub google_cloud_project_id: Option<String>,
    /// Document AI region (`us`, `eu`, ...).
    pub google_cloud_location: String,
    /// Document AI processor identifier.
    pub document_ai_processor_id: Option<String>,
    /// OAuth bearer token presented to Document AI.
    pub google_access_token: Option<String>,
    /// Optional override for the Document AI endpoint (mostly for tests and proxies).
    pub document_ai_endpoint: Option<String>,
    /// Maximum accepted upload size in bytes.
    pub max_upload_bytes: usize,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Which optional features the current configuration enables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingCapabilities {
    /// A model credential is present, so question generation can run.
    pub qa_extraction: bool,
    /// Document AI is configured, so PDFs and images can be OCR'd.
    pub document_ai_ocr: bool,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            openai_api_key: load_env_optional("OPENAI_API_KEY"),
            openai_base_url: load_env_optional("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            qa_model: load_env_optional("QA_MODEL").unwrap_or_else(|| DEFAULT_QA_MODEL.into()),
            vision_model: load_env_optional("OPENAI_MODEL_NAME")
                .unwrap_or_else(|| DEFAULT_VISION_MODEL.into()),
            chat_model: load_env_optional("CHAT_MODEL")
                .unwrap_or_else(|| DEFAULT_CHAT_MODEL.into()),
            google_cloud_project_id: load_env_optional("GOOGLE_CLOUD_PROJECT_ID"),
            google_cloud_location: load_env_optional("GOOGLE_CLOUD_LOCATION")
                .unwrap_or_else(|| DEFAULT_GOOGLE_LOCATION.into()),
            document_ai_processor_id: load_env_optional("GOOGLE_DOCUMENT_AI_PROCESSOR_ID"),
            google_access_token: load_env_optional("GOOGLE_ACCESS_TOKEN"),
            document_ai_endpoint: load_env_optional("DOCUMENT_AI_ENDPOINT"),
            max_upload_bytes: load_env_optional("MAX_UPLOAD_BYTES")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("MAX_UPLOAD_BYTES".into()))
                })
                .transpose()?
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            server_port: load_env_optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
        })
    }

    /// Report which pipeline features are usable with this configuration.
    pub fn capabilities(&self) -> ProcessingCapabilities {
        ProcessingCapabilities {
            qa_extraction: self.openai_api_key.is_some(),
            document_ai_ocr: self.google_cloud_project_id.is_some()
                && self.document_ai_processor_id.is_some(),
        }
    }

    /// Emit startup warnings for missing optional services.
    pub fn log_warnings(&self) {
        if self.openai_api_key.is_none() {
            tracing::error!("OPENAI_API_KEY is not set; question generation is unavailable");
        }
        if self.google_cloud_project_id.is_none() {
            tracing::warn!(
                "GOOGLE_CLOUD_PROJECT_ID is not set; Document AI features will be disabled"
            );
        }
        if self.document_ai_processor_id.is_none() {
            tracing::warn!(
                "GOOGLE_DOCUMENT_AI_PROCESSOR_ID is not set; Document AI features will be disabled"
            );
        }
        if self.capabilities().document_ai_ocr && self.google_access_token.is_none() {
            tracing::warn!("GOOGLE_ACCESS_TOKEN is not set; Document AI calls will be rejected");
        }
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        openai_base_url = %config.openai_base_url,
        qa_model = %config.qa_model,
        vision_model = %config.vision_model,
        location = %config.google_cloud_location,
        server_port = ?config.server_port,
        capabilities = ?config.capabilities(),
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}
