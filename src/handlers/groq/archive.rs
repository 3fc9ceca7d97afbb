use super::{AGENT_SYSTEM_PROMPT, ARCHIVE_EXTRACT_PROMPT, ARCHIVE_INSIGHTS_PROMPT, ARCHIVE_SEARCH_PROMPT};
use crate::error::ApiError;
use crate::extract::JsonBody;
use crate::handlers::support::{
    complete_with_retry, generate_with_retry, invalid_json_output, non_empty_str, now_rfc3339,
    parse_json_from_text, prompt_json, truncate_chars,
};
use crate::models::{MedicalAgentRequest, MedicalAgentResponse, MedicalArchiveRequest, MedicalArchiveResponse};
use crate::providers::gemini::{Content, GenerationConfig};
use crate::providers::{ChatCompletionRequest, GenerateContentRequest};
use crate::sanitizer::{filter_json_strings, sanitize_user_input};
use crate::state::SharedState;
use axum::Json;
use axum::extract::State;
use serde_json::Value;
use tracing::info;

const MISSING_QUESTION: &str = "يرجى إدخال سؤال للوكيل";
const AGENT_ERROR: &str = "تعذر تشغيل الوكيل الذكي حالياً";
const INVALID_ACTION: &str = "الإجراء المطلوب غير مدعوم";
const MISSING_REPORT: &str = "يرجى إدخال التقرير الطبي";
const MISSING_QUERY: &str = "يرجى إدخال سؤال البحث";
const ARCHIVE_ERROR: &str = "تعذر معالجة طلب الأرشيف حالياً";

const MAX_REPORT_CHARS: usize = 12_000;
const MAX_RECORDS_JSON_CHARS: usize = 12_000;
const MAX_PROFILE_JSON_CHARS: usize = 2_000;
const MAX_BATCH_JSON_CHARS: usize = 4_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveAction {
    Extract,
    Search,
    Insights,
}

impl ArchiveAction {
    fn parse(value: &Value) -> Option<Self> {
        match value.as_str()?.trim() {
            "extract" => Some(Self::Extract),
            "search" => Some(Self::Search),
            "insights" => Some(Self::Insights),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Search => "search",
            Self::Insights => "insights",
        }
    }

    fn system_prompt(self) -> &'static str {
        match self {
            Self::Extract => ARCHIVE_EXTRACT_PROMPT,
            Self::Search => ARCHIVE_SEARCH_PROMPT,
            Self::Insights => ARCHIVE_INSIGHTS_PROMPT,
        }
    }
}

fn profile_section(profile: &Value) -> String {
    if profile.is_null() {
        return "{}".to_string();
    }
    prompt_json(profile, MAX_PROFILE_JSON_CHARS)
}

/// User turn for one archive action, or the validation error for it.
fn archive_prompt(action: ArchiveAction, body: &MedicalArchiveRequest) -> Result<String, ApiError> {
    let profile = profile_section(&body.hospital_profile);
    match action {
        ArchiveAction::Extract => {
            let report = non_empty_str(&body.report_text)
                .ok_or(ApiError::bad_request("MISSING_REPORT", MISSING_REPORT))?;
            let report = sanitize_user_input(report);
            let (report, _) = truncate_chars(&report, MAX_REPORT_CHARS);
            Ok(format!("ملف المستشفى:\n{profile}\n\nالتقرير الطبي:\n{report}\n\nأعد JSON فقط."))
        }
        ArchiveAction::Search => {
            let query = non_empty_str(&body.query)
                .ok_or(ApiError::bad_request("MISSING_QUERY", MISSING_QUERY))?;
            let records = prompt_json(&body.records, MAX_RECORDS_JSON_CHARS);
            Ok(format!(
                "سؤال البحث: {}\n\nملف المستشفى:\n{profile}\n\nالسجلات:\n{records}\n\nأعد JSON فقط.",
                sanitize_user_input(query)
            ))
        }
        ArchiveAction::Insights => {
            let records = prompt_json(&body.records, MAX_RECORDS_JSON_CHARS);
            Ok(format!("ملف المستشفى:\n{profile}\n\nالسجلات:\n{records}\n\nأعد JSON فقط."))
        }
    }
}

fn agent_prompt(question: &str, body: &MedicalAgentRequest) -> String {
    format!(
        "{AGENT_SYSTEM_PROMPT}\n\nسؤال الإدارة: {question}\n\nملف المستشفى:\n{}\n\nتقرير الدفعة:\n{}\n\nالسجلات:\n{}\n\nأعد JSON فقط.",
        profile_section(&body.hospital_profile),
        prompt_json(&body.batch_report, MAX_BATCH_JSON_CHARS),
        prompt_json(&body.records, MAX_RECORDS_JSON_CHARS),
    )
}

// POST /api/groq/medical-agent
pub async fn medical_agent_handler(
    State(state): State<SharedState>,
    JsonBody(body): JsonBody<MedicalAgentRequest>,
) -> Result<Json<MedicalAgentResponse>, ApiError> {
    let gemini = state.gemini.clone().ok_or_else(ApiError::gemini_not_configured)?;

    let question = non_empty_str(&body.question)
        .ok_or(ApiError::bad_request("MISSING_QUESTION", MISSING_QUESTION))?;
    let question = sanitize_user_input(question);

    let request = GenerateContentRequest::new(vec![Content::user_text(agent_prompt(&question, &body))])
        .with_config(GenerationConfig::new(0.3, 1500));
    let output = generate_with_retry(&state, gemini.as_ref(), &request)
        .await
        .map_err(|e| ApiError::upstream_with_message("AGENT_ERROR", AGENT_ERROR, e))?;
    let result = parse_json_from_text(&output).ok_or_else(invalid_json_output)?;

    info!(model = gemini.model(), "Medical agent answered");
    Ok(Json(MedicalAgentResponse {
        result: filter_json_strings(result),
        model: gemini.model().to_string(),
        generated_at: now_rfc3339(),
    }))
}

// POST /api/groq/medical-archive
pub async fn medical_archive_handler(
    State(state): State<SharedState>,
    JsonBody(body): JsonBody<MedicalArchiveRequest>,
) -> Result<Json<MedicalArchiveResponse>, ApiError> {
    let groq = state.groq.clone().ok_or_else(ApiError::groq_not_configured)?;

    let action = ArchiveAction::parse(&body.action)
        .ok_or(ApiError::bad_request("INVALID_ACTION", INVALID_ACTION))?;
    let user_message = archive_prompt(action, &body)?;

    let request = ChatCompletionRequest::new(action.system_prompt(), &[], user_message, 0.2, 1200);
    let output = complete_with_retry(&state, groq.as_ref(), &request)
        .await
        .map_err(|e| ApiError::upstream_with_message("ARCHIVE_ERROR", ARCHIVE_ERROR, e))?;
    let result = parse_json_from_text(&output).ok_or_else(invalid_json_output)?;

    info!(action = action.as_str(), model = groq.model(), "Medical archive request served");
    Ok(Json(MedicalArchiveResponse {
        mode: action.as_str().to_string(),
        result: filter_json_strings(result),
        model: groq.model().to_string(),
        generated_at: now_rfc3339(),
        source: "groq".to_string(),
    }))
}
