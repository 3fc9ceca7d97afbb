use super::support::generate_with_retry;
use crate::error::{AI_UNAVAILABLE_MESSAGE, ApiError};
use crate::extract::JsonBody;
use crate::models::{MedicalGenerationOptions, MedicalRequest, TextResponse};
use crate::providers::gemini::{Content, GenerationConfig, Part};
use crate::providers::GenerateContentRequest;
use crate::sanitizer::{filter_ai_response, sanitize_user_input};
use crate::state::SharedState;
use axum::Json;
use axum::extract::State;
use serde_json::Value;

const MISSING_TEXT: &str = "الرجاء تقديم نص للتحليل";
const INVALID_IMAGE_DATA: &str = "بيانات الصورة غير صالحة";
const UNSUPPORTED_FILE_TYPE: &str = "نوع الملف غير مدعوم";
const ANALYSIS_ERROR: &str = "حدث خطأ أثناء التحليل";

const ALLOWED_MIME_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/webp", "application/dicom"];

fn generation_config(options: Option<MedicalGenerationOptions>) -> GenerationConfig {
    let options = options.unwrap_or_default();
    GenerationConfig {
        temperature: Some(options.temperature.unwrap_or(0.2)),
        top_p: Some(options.top_p.unwrap_or(0.9)),
        top_k: Some(options.top_k.unwrap_or(40)),
        max_output_tokens: Some(options.max_output_tokens.unwrap_or(2048)),
    }
}

fn text_parts(value: &Value) -> Result<Vec<Part>, ApiError> {
    let missing = || ApiError::bad_request("MISSING_TEXT", MISSING_TEXT);
    let items = value.as_array().filter(|items| !items.is_empty()).ok_or_else(missing)?;
    items
        .iter()
        .map(|item| item.as_str().map(|text| Part::text(sanitize_user_input(text))).ok_or_else(missing))
        .collect()
}

fn inline_parts(value: &Value) -> Result<Vec<Part>, ApiError> {
    let items = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        _ => return Err(ApiError::bad_request("INVALID_IMAGE_DATA", INVALID_IMAGE_DATA)),
    };

    items
        .iter()
        .map(|item| {
            let mime_type = item.get("mimeType").and_then(Value::as_str).filter(|s| !s.is_empty());
            let data = item.get("data").and_then(Value::as_str).filter(|s| !s.is_empty());
            let (Some(mime_type), Some(data)) = (mime_type, data) else {
                return Err(ApiError::bad_request("INVALID_IMAGE_DATA", INVALID_IMAGE_DATA));
            };
            if !ALLOWED_MIME_TYPES.contains(&mime_type) {
                return Err(ApiError::bad_request("UNSUPPORTED_FILE_TYPE", UNSUPPORTED_FILE_TYPE));
            }
            Ok(Part::inline(mime_type, data))
        })
        .collect()
}

// POST /api/ai/medical
pub async fn medical_handler(
    State(state): State<SharedState>,
    JsonBody(body): JsonBody<MedicalRequest>,
) -> Result<Json<TextResponse>, ApiError> {
    let gemini = state.gemini.clone().ok_or(ApiError::NotConfigured {
        code: "SERVICE_UNAVAILABLE",
        message: AI_UNAVAILABLE_MESSAGE,
    })?;

    let mut parts = text_parts(&body.text_parts)?;
    parts.extend(inline_parts(&body.inline_data_parts)?);

    let request = GenerateContentRequest::new(vec![Content::user(parts)])
        .with_config(generation_config(body.config));

    let text = generate_with_retry(&state, gemini.as_ref(), &request)
        .await
        .map_err(|e| ApiError::upstream_with_message("ANALYSIS_ERROR", ANALYSIS_ERROR, e))?;

    Ok(Json(TextResponse {
        text: filter_ai_response(text.trim()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn code(result: Result<Vec<Part>, ApiError>) -> &'static str {
        result.err().map(|e| e.error_code()).unwrap_or("OK")
    }

    #[test]
    fn test_text_parts_must_be_non_empty_strings() {
        assert_eq!(code(text_parts(&Value::Null)), "MISSING_TEXT");
        assert_eq!(code(text_parts(&json!([]))), "MISSING_TEXT");
        assert_eq!(code(text_parts(&json!(["ok", 3]))), "MISSING_TEXT");
        assert_eq!(text_parts(&json!(["<b>"])).unwrap(), vec![Part::text("&lt;b&gt;")]);
    }

    #[test]
    fn test_inline_parts_validation() {
        assert_eq!(code(inline_parts(&Value::Null)), "OK");
        assert_eq!(code(inline_parts(&json!([{"mimeType": "image/png"}]))), "INVALID_IMAGE_DATA");
        assert_eq!(code(inline_parts(&json!("nope"))), "INVALID_IMAGE_DATA");
        assert_eq!(
            code(inline_parts(&json!([{"mimeType": "image/gif", "data": "AAAA"}]))),
            "UNSUPPORTED_FILE_TYPE"
        );
        assert_eq!(
            code(inline_parts(&json!([{"mimeType": "image/svg+xml", "data": "AAAA"}]))),
            "UNSUPPORTED_FILE_TYPE"
        );
        let parts = inline_parts(&json!([{"mimeType": "application/dicom", "data": "AAAA"}])).unwrap();
        assert_eq!(parts, vec![Part::inline("application/dicom", "AAAA")]);
    }

    #[test]
    fn test_generation_defaults_and_overrides() {
        let defaults = generation_config(None);
        assert_eq!(defaults.temperature, Some(0.2));
        assert_eq!(defaults.top_p, Some(0.9));
        assert_eq!(defaults.top_k, Some(40));
        assert_eq!(defaults.max_output_tokens, Some(2048));

        let tuned = generation_config(Some(MedicalGenerationOptions {
            temperature: Some(0.5),
            max_output_tokens: Some(512),
            ..Default::default()
        }));
        assert_eq!(tuned.temperature, Some(0.5));
        assert_eq!(tuned.top_k, Some(40));
        assert_eq!(tuned.max_output_tokens, Some(512));
    }
}
