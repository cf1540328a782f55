//! Question generation: prompt assembly, JSON extraction, and per-field coercion.
//!
//! The model is asked for `{ "qa_pairs": [ ... ] }` but routinely wraps it in prose or gets
//! individual fields wrong. The first top-level JSON object in the completion is parsed, and
//! every entry is pushed through [`coerce_pair`], which is total: a malformed entry becomes a
//! valid but low-information [`QaPair`] instead of being dropped.

use crate::llm::{
    CompletionClient, CompletionClientError, CompletionRequest, ImageAttachment, OutputMode,
};
use serde_json::{Map, Value};

use super::types::QaPair;

/// Confidence assigned when the model omits one.
pub const DEFAULT_CONFIDENCE: f32 = 0.7;
/// Question text used when the model omits one.
pub const UNKNOWN_QUESTION: &str = "Unknown question";
/// Options used when the model does not return exactly four.
pub const PLACEHOLDER_OPTIONS: [&str; 4] = ["Option A", "Option B", "Option C", "Option D"];
/// Wrong-answer explanations used when the model does not return exactly three.
pub const PLACEHOLDER_WRONG_EXPLANATIONS: [&str; 3] = ["Wrong A", "Wrong B", "Wrong C"];

const CHUNK_TEMPERATURE: f32 = 0.3;
const IMAGE_MAX_TOKENS: u32 = 2000;

const OUTPUT_FORMAT: &str = r#"OUTPUT FORMAT (JSON):
{
  "qa_pairs": [
    {
      "question": "What is the main concept discussed in this section?",
      "options": ["Correct answer", "Plausible wrong answer 1", "Plausible wrong answer 2", "Plausible wrong answer 3"],
      "correctAnswer": 0,
      "explanation": "Explanation for why option A is correct based on the text",
      "wrongAnswerExplanations": ["Why option B is wrong", "Why option C is wrong", "Why option D is wrong"],
      "confidence": 0.95
    }
  ]
}"#;

const BASE_INSTRUCTIONS: &str = "INSTRUCTIONS:
1. Create multiple choice questions based on the content
2. Each question must have exactly 4 options (A, B, C, D)
3. One option is correct, three are wrong but plausible
4. Provide explanation for why the correct answer is right
5. Provide explanations for why each wrong answer is incorrect, in option order
6. Focus on key concepts, definitions, examples, and important facts";

/// Parsed model output for one chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum PairResponse {
    /// A JSON object was found; entries were coerced into pairs (possibly none).
    Parsed(Vec<QaPair>),
    /// No parseable JSON object was present in the completion.
    Empty,
}

impl PairResponse {
    /// Pairs carried by the response; `Empty` yields none.
    pub fn into_pairs(self) -> Vec<QaPair> {
        match self {
            Self::Parsed(pairs) => pairs,
            Self::Empty => Vec::new(),
        }
    }
}

/// Prompt for one PDF chunk.
pub fn build_chunk_prompt(text: &str) -> String {
    format!(
        "You are analyzing a syllabus/textbook content. Create multiple choice questions with exactly 4 options from the following text.\n\n\
         TEXT TO ANALYZE:\n{text}\n\n\
         {BASE_INSTRUCTIONS}\n\
         7. If this chunk contains overlap pages (marked as OVERLAP), only use content from those pages if it's relevant to the main content in this chunk\n\n\
         {OUTPUT_FORMAT}\n\n\
         Only return valid JSON. Extract 3-10 multiple choice Q&A pairs if available."
    )
}

/// Completion request for one PDF chunk.
pub fn chunk_request(model: &str, text: &str) -> CompletionRequest {
    CompletionRequest::new(model, build_chunk_prompt(text), CHUNK_TEMPERATURE)
}

/// Completion request for text recognized in an image.
pub fn image_text_request(model: &str, text: &str) -> CompletionRequest {
    let prompt = format!(
        "You are analyzing a document/textbook content. Create multiple choice questions with exactly 4 options from the following text.\n\n\
         TEXT TO ANALYZE:\n{text}\n\n\
         {BASE_INSTRUCTIONS}\n\n\
         {OUTPUT_FORMAT}\n\n\
         Extract 3-10 multiple choice Q&A pairs if available. Return ONLY the JSON object with no additional text."
    );
    CompletionRequest {
        model: model.to_string(),
        system: Some(
            "You are analyzing text content from documents. Create multiple choice questions with 4 options each from the following text."
                .into(),
        ),
        prompt,
        image: None,
        output: OutputMode::JsonObject,
        temperature: CHUNK_TEMPERATURE,
        max_tokens: Some(IMAGE_MAX_TOKENS),
    }
}

/// Completion request that sends the image itself to a vision model.
pub fn vision_request(model: &str, image: ImageAttachment) -> CompletionRequest {
    let prompt = format!(
        "Analyze this image and create multiple choice questions with exactly 4 options from any educational content you can see.\n\n\
         {BASE_INSTRUCTIONS}\n\
         7. Include practice questions, review questions, and examples visible in the image\n\n\
         {OUTPUT_FORMAT}\n\n\
         Extract 3-15 multiple choice Q&A pairs if available. Return ONLY the JSON object with no additional text."
    );
    CompletionRequest {
        model: model.to_string(),
        system: Some(
            "You are analyzing document/textbook images. Create multiple choice questions from the content you can see in the image."
                .into(),
        ),
        prompt,
        image: Some(image),
        output: OutputMode::JsonObject,
        temperature: CHUNK_TEMPERATURE,
        max_tokens: Some(IMAGE_MAX_TOKENS),
    }
}

/// Submit a request and map the completion into pairs, propagating transport errors.
pub async fn request_pairs(
    client: &dyn CompletionClient,
    request: CompletionRequest,
    page_range: &str,
) -> Result<PairResponse, CompletionClientError> {
    let completion = client.complete(request).await?;
    Ok(parse_pair_response(&completion, page_range))
}

/// Generate pairs for one chunk, returning `None` (after logging) when the call failed or the
/// completion held no JSON object.
pub async fn try_generate_pairs(
    client: &dyn CompletionClient,
    model: &str,
    text: &str,
    page_range: &str,
) -> Option<Vec<QaPair>> {
    match request_pairs(client, chunk_request(model, text), page_range).await {
        Ok(PairResponse::Parsed(pairs)) => Some(pairs),
        Ok(PairResponse::Empty) => {
            tracing::warn!(page_range, "Model response contained no JSON object");
            None
        }
        Err(error) => {
            tracing::warn!(page_range, error = %error, "Question generation failed for chunk");
            None
        }
    }
}

/// Generate pairs for one chunk. Every failure is logged and becomes an empty result.
pub async fn generate_pairs(
    client: &dyn CompletionClient,
    model: &str,
    text: &str,
    page_range: &str,
) -> Vec<QaPair> {
    try_generate_pairs(client, model, text, page_range)
        .await
        .unwrap_or_default()
}

/// Parse a raw completion into pairs labelled with `page_range`.
pub fn parse_pair_response(raw: &str, page_range: &str) -> PairResponse {
    let Some(object) = first_json_object(raw) else {
        return PairResponse::Empty;
    };

    let pairs = match object.get("qa_pairs") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| coerce_pair(item, page_range))
            .collect(),
        _ => Vec::new(),
    };
    PairResponse::Parsed(pairs)
}

/// First top-level balanced `{...}` span in `raw` that parses as a JSON object.
fn first_json_object(raw: &str) -> Option<Map<String, Value>> {
    let mut search_from = 0;
    while let Some(offset) = raw[search_from..].find('{') {
        let start = search_from + offset;
        let Some(end) = matching_brace(raw, start) else {
            search_from = start + 1;
            continue;
        };
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&raw[start..=end]) {
            return Some(map);
        }
        // Nested objects of a rejected span are never top-level candidates.
        search_from = end + 1;
    }
    None
}

/// Byte offset of the `}` closing the `{` at `start`, honouring JSON string literals.
pub(crate) fn matching_brace(raw: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, byte) in raw.as_bytes()[start..].iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Coerce one loosely-typed entry into a valid [`QaPair`]. Never fails.
///
/// Arrays of the wrong length are replaced wholesale rather than padded.
pub fn coerce_pair(item: &Value, page_range: &str) -> QaPair {
    let empty = Map::new();
    let fields = item.as_object().unwrap_or(&empty);

    let question = fields
        .get("question")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .unwrap_or(UNKNOWN_QUESTION)
        .to_string();

    let options = string_array::<4>(fields.get("options"))
        .unwrap_or_else(|| PLACEHOLDER_OPTIONS.map(str::to_string));

    let correct_answer = fields
        .get("correctAnswer")
        .and_then(answer_index)
        .unwrap_or(0);

    let explanation = fields
        .get("explanation")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let wrong_answer_explanations = string_array::<3>(fields.get("wrongAnswerExplanations"))
        .unwrap_or_else(|| PLACEHOLDER_WRONG_EXPLANATIONS.map(str::to_string));

    let confidence = fields
        .get("confidence")
        .and_then(Value::as_f64)
        .filter(|value| value.is_finite())
        .map(|value| value.clamp(0.0, 1.0) as f32)
        .unwrap_or(DEFAULT_CONFIDENCE);

    QaPair {
        question,
        options,
        correct_answer,
        explanation,
        wrong_answer_explanations,
        page_range: page_range.to_string(),
        confidence,
    }
}

fn string_array<const N: usize>(value: Option<&Value>) -> Option<[String; N]> {
    let items = value?.as_array()?;
    if items.len() != N {
        return None;
    }
    let strings: Vec<String> = items
        .iter()
        .map(|item| item.as_str().map(str::to_string))
        .collect::<Option<_>>()?;
    strings.try_into().ok()
}

fn answer_index(value: &Value) -> Option<u8> {
    let index = match value {
        Value::Number(number) => match number.as_u64() {
            Some(index) => index,
            None => {
                let float = number.as_f64()?;
                if float.fract() != 0.0 || float < 0.0 {
                    return None;
                }
                float as u64
            }
        },
        _ => return None,
    };
    (index <= 3).then_some(index as u8)
}
