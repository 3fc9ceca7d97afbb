use super::{DOCUMENT_MIME_TYPES, FILE_TOO_LARGE, MISSING_FILE, OCR_SYSTEM_PROMPT, UNSUPPORTED_FILE};
use crate::classifier::ErrorSignal;
use crate::error::ApiError;
use crate::extract::JsonBody;
use crate::handlers::support::{
    complete_with_retry, decoded_len, generate_with_retry, invalid_json_output, parse_json_from_text,
    strip_data_prefix, truncate_chars,
};
use crate::models::{FileRequest, OcrResponse, TextResponse};
use crate::providers::gemini::{Content, GenerationConfig, Part};
use crate::providers::{ChatCompletionRequest, ContentProvider, GenerateContentRequest, UpstreamError};
use crate::sanitizer::{filter_ai_response, filter_json_strings, sanitize_user_input};
use crate::state::{AppState, SharedState};
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use tracing::info;

const MISSING_OCR_INPUT: &str = "يرجى رفع ملف أو نص OCR";
const OCR_UNAVAILABLE: &str = "خدمة OCR غير متاحة حالياً";
const OCR_PROCESSING_ERROR: &str = "حدث خطأ أثناء تحليل الملف";
const EXTRACTION_ERROR: &str = "تعذر استخراج النص من الملف";

const MAX_OCR_TEXT_CHARS: usize = 6000;
const DEFAULT_DOCUMENT_MIME: &str = "image/png";
const EXTRACT_TEXT_PROMPT: &str = "استخرج النص الكامل من المستند التالي. أعد النص فقط بدون شرح.";

fn is_document_mime(mime_type: &str) -> bool {
    DOCUMENT_MIME_TYPES.contains(&mime_type)
}

fn ocr_processing_error(error: UpstreamError) -> ApiError {
    let message = if error.status_code() == Some(503) {
        OCR_UNAVAILABLE
    } else {
        OCR_PROCESSING_ERROR
    };
    ApiError::upstream_with_message("OCR_PROCESSING_ERROR", message, error)
}

/// Plain text of a base64 document, read by Gemini.
async fn extract_document_text(
    state: &AppState,
    gemini: &dyn ContentProvider,
    data: &str,
    mime_type: &str,
) -> Result<String, UpstreamError> {
    let request = GenerateContentRequest::new(vec![Content::user(vec![
        Part::text(EXTRACT_TEXT_PROMPT),
        Part::inline(mime_type, data),
    ])])
    .with_config(GenerationConfig::new(0.1, 2048));

    let text = generate_with_retry(state, gemini, &request).await?;
    Ok(text.trim().to_string())
}

// POST /api/groq/ocr
pub async fn ocr_handler(
    State(state): State<SharedState>,
    JsonBody(body): JsonBody<FileRequest>,
) -> Result<Json<OcrResponse>, ApiError> {
    let groq = state.groq.clone().ok_or_else(ApiError::groq_not_configured)?;

    let ocr_text = body.ocr_text.as_deref().filter(|s| !s.is_empty());
    let file = body.file_base64.as_deref().filter(|s| !s.is_empty());
    if let (Some(_), Some(mime_type)) = (file, body.mime_type.as_deref()) {
        if !is_document_mime(mime_type) {
            return Err(ApiError::bad_request("UNSUPPORTED_FILE", UNSUPPORTED_FILE));
        }
    }

    let extracted = if let Some(text) = ocr_text {
        sanitize_user_input(text)
    } else if let Some(file) = file {
        let data = strip_data_prefix(file);
        if decoded_len(data) > state.config.body_limits.ocr {
            return Err(ApiError::with_status(
                StatusCode::PAYLOAD_TOO_LARGE,
                "OCR_FILE_TOO_LARGE",
                FILE_TOO_LARGE,
            ));
        }
        let gemini = state.gemini.clone().ok_or(ApiError::NotConfigured {
            code: "OCR_PROCESSING_ERROR",
            message: OCR_UNAVAILABLE,
        })?;
        let mime_type = body.mime_type.as_deref().unwrap_or(DEFAULT_DOCUMENT_MIME);
        extract_document_text(&state, gemini.as_ref(), data, mime_type)
            .await
            .map_err(ocr_processing_error)?
    } else {
        return Err(ApiError::bad_request("MISSING_OCR_INPUT", MISSING_OCR_INPUT));
    };

    let (raw_text, truncated) = truncate_chars(&extracted, MAX_OCR_TEXT_CHARS);
    let request = ChatCompletionRequest::new(
        OCR_SYSTEM_PROMPT,
        &[],
        format!("النص المستخرج:\n{raw_text}\n\nأعد JSON فقط حسب القواعد."),
        0.2,
        700,
    );

    let output = complete_with_retry(&state, groq.as_ref(), &request)
        .await
        .map_err(ocr_processing_error)?;
    let fields = parse_json_from_text(&output).ok_or_else(invalid_json_output)?;

    info!(chars = raw_text.chars().count(), truncated, "OCR fields extracted");
    Ok(Json(OcrResponse {
        fields: filter_json_strings(fields),
        raw_text: raw_text.to_string(),
        truncated,
    }))
}

// POST /api/groq/extract-text
pub async fn extract_text_handler(
    State(state): State<SharedState>,
    JsonBody(body): JsonBody<FileRequest>,
) -> Result<Json<TextResponse>, ApiError> {
    let gemini = state.gemini.clone().ok_or_else(ApiError::gemini_not_configured)?;

    let file = body
        .file_base64
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or(ApiError::bad_request("MISSING_FILE", MISSING_FILE))?;
    let mime_type = body.mime_type.as_deref().unwrap_or(DEFAULT_DOCUMENT_MIME);
    if !is_document_mime(mime_type) {
        return Err(ApiError::bad_request("UNSUPPORTED_FILE", UNSUPPORTED_FILE));
    }

    let data = strip_data_prefix(file);
    if decoded_len(data) > state.config.body_limits.ocr {
        return Err(ApiError::with_status(
            StatusCode::PAYLOAD_TOO_LARGE,
            "FILE_TOO_LARGE",
            FILE_TOO_LARGE,
        ));
    }

    let text = extract_document_text(&state, gemini.as_ref(), data, mime_type)
        .await
        .map_err(|e| ApiError::upstream_with_message("EXTRACTION_ERROR", EXTRACTION_ERROR, e))?;

    info!(
        file_name = body.file_name.as_deref().unwrap_or("-"),
        chars = text.chars().count(),
        "Document text extracted"
    );
    Ok(Json(TextResponse {
        text: filter_ai_response(&text),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_mime_allow_list_is_exact() {
        assert!(is_document_mime("application/pdf"));
        assert!(is_document_mime("image/jpg"));
        assert!(!is_document_mime("image/gif"));
        assert!(!is_document_mime("application/pdf; charset=binary"));
    }

    #[test]
    fn test_processing_error_wording() {
        let unavailable = ocr_processing_error(UpstreamError::NotConfigured("gemini"));
        assert_eq!(unavailable.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(unavailable.message(), OCR_UNAVAILABLE);

        let failed = ocr_processing_error(UpstreamError::Status {
            provider: "groq",
            status: 400,
            body: "bad".into(),
        });
        assert_eq!(failed.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(failed.error_code(), "OCR_PROCESSING_ERROR");
        assert_eq!(failed.message(), OCR_PROCESSING_ERROR);
    }
}
