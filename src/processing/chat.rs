//! Grounded study-assistant chat over the current question set.

use serde::{Deserialize, Serialize};

use crate::llm::CompletionRequest;

use super::types::{QaPair, ValidationError, option_letter};

/// Sampling temperature for chat replies.
pub const CHAT_TEMPERATURE: f32 = 0.7;
/// Completion token ceiling for chat replies.
pub const CHAT_MAX_TOKENS: u32 = 10_000;
/// Number of trailing conversation turns forwarded to the model.
pub const HISTORY_WINDOW: usize = 6;

const GUIDELINES: &str = "You are a helpful learning assistant designed to help students understand educational material. You have access to Q&A pairs from learning content and should use this information to provide accurate, helpful responses.

Guidelines:
1. Be friendly, encouraging, and supportive
2. Use the provided Q&A content to answer questions accurately
3. If asked about concepts covered in the Q&A pairs, reference the specific questions and explanations
4. Break down complex concepts into simpler terms
5. Provide examples and analogies when helpful
6. If a question is not covered in the available content, be honest about limitations but try to provide general guidance
7. Encourage active learning and critical thinking
8. Keep responses concise but informative (aim for 2-3 sentences for simple questions, more for complex explanations)";

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// The student.
    User,
    /// A previous model reply.
    Assistant,
}

impl ChatRole {
    fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One earlier turn of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Who spoke.
    pub role: ChatRole,
    /// What was said.
    pub content: String,
}

/// Chat request as received from a client.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// The student's message.
    #[serde(default)]
    pub message: String,
    /// Questions the reply should be grounded in.
    #[serde(default)]
    pub qa_pairs: Vec<QaPair>,
    /// Free-form context supplied by the client.
    #[serde(default)]
    pub context: Option<String>,
    /// Earlier turns, oldest first.
    #[serde(default)]
    pub conversation_history: Vec<ChatTurn>,
}

/// Assemble the system instruction for a chat request.
pub fn build_system_prompt(request: &ChatRequest) -> String {
    let mut prompt = String::from(GUIDELINES);
    prompt.push_str("\n\n");

    if let Some(context) = request.context.as_deref().filter(|text| !text.is_empty()) {
        prompt.push_str("Additional Context: ");
        prompt.push_str(context);
    }

    if !request.qa_pairs.is_empty() {
        let entries = request
            .qa_pairs
            .iter()
            .enumerate()
            .map(|(index, pair)| describe_pair(index, pair))
            .collect::<Vec<_>>()
            .join("\n\n");
        prompt.push_str("\n\nAvailable Q&A Content:\n");
        prompt.push_str(&entries);
    }

    let history = &request.conversation_history;
    if !history.is_empty() {
        let recent = &history[history.len().saturating_sub(HISTORY_WINDOW)..];
        let lines = recent
            .iter()
            .map(|turn| format!("{}: {}", turn.role.as_str(), turn.content))
            .collect::<Vec<_>>()
            .join("\n");
        prompt.push_str("\n\nRecent Conversation:\n");
        prompt.push_str(&lines);
    }

    prompt
}

fn describe_pair(index: usize, pair: &QaPair) -> String {
    let options = pair
        .options
        .iter()
        .enumerate()
        .map(|(option_index, option)| format!("{}. {option}", option_letter(option_index)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{}. Question: {}\n   Options: {options}\n   Correct Answer: {}. {}\n   Explanation: {}\n   Page Range: {}",
        index + 1,
        pair.question,
        pair.correct_letter(),
        pair.correct_option(),
        pair.explanation,
        pair.page_range,
    )
}

/// Validate a chat request and build the completion request for it.
pub fn chat_request(
    model: &str,
    request: &ChatRequest,
) -> Result<CompletionRequest, ValidationError> {
    let message = request.message.trim();
    if message.is_empty() {
        return Err(ValidationError::EmptyMessage);
    }
    let mut completion = CompletionRequest::new(model, message, CHAT_TEMPERATURE);
    completion.system = Some(build_system_prompt(request));
    completion.max_tokens = Some(CHAT_MAX_TOKENS);
    Ok(completion)
}
