use serde::{Deserialize, Serialize};
use serde_json::Value;

// Request bodies keep loosely typed fields as `Value` where the route answers
// a wrong type with its own error code instead of INVALID_REQUEST.

// POST /api/ai/chat
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Value,
    #[serde(default)]
    pub history: Value,
    #[serde(default)]
    pub session_id: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub reply: String,
    /// The client's own token when one was sent, else a generated id.
    pub session_id: Value,
}

// POST /api/ai/search
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub query: String,
}

// POST /api/ai/medical
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalRequest {
    #[serde(default)]
    pub text_parts: Value,
    #[serde(default)]
    pub inline_data_parts: Value,
    #[serde(default)]
    pub config: Option<MedicalGenerationOptions>,
}

/// Caller overrides for the medical generation defaults (snake_case on the
/// wire).
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct MedicalGenerationOptions {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub max_output_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextResponse {
    pub text: String,
}

// POST /api/ai/summary
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SummaryRequest {
    #[serde(default)]
    pub text: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryResponse {
    pub summary: String,
    pub timestamp: i64,
}

// POST /api/groq/stream
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    #[serde(default)]
    pub message: Value,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub output_type: Option<String>,
}

/// Shared body of the file-carrying Groq routes (ocr, extract-text,
/// transcribe).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRequest {
    #[serde(default)]
    pub file_base64: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub ocr_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrResponse {
    pub fields: Value,
    pub raw_text: String,
    pub truncated: bool,
}

// POST /api/groq/faq
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FaqRequest {
    #[serde(default)]
    pub context: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaqItem {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaqResponse {
    pub faqs: Vec<FaqItem>,
}

// POST /api/groq/medical-agent
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalAgentRequest {
    #[serde(default)]
    pub question: Value,
    #[serde(default)]
    pub records: Value,
    #[serde(default)]
    pub hospital_profile: Value,
    #[serde(default)]
    pub batch_report: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalAgentResponse {
    pub result: Value,
    pub model: String,
    pub generated_at: String,
}

// POST /api/groq/medical-archive
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalArchiveRequest {
    #[serde(default)]
    pub action: Value,
    #[serde(default)]
    pub report_text: Value,
    #[serde(default)]
    pub query: Value,
    #[serde(default)]
    pub records: Value,
    #[serde(default)]
    pub hospital_profile: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalArchiveResponse {
    pub mode: String,
    pub result: Value,
    pub model: String,
    pub generated_at: String,
    pub source: String,
}

// GET /api/health
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: i64,
}
