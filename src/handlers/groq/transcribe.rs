use super::{FILE_TOO_LARGE, MISSING_FILE, UNSUPPORTED_FILE};
use crate::error::ApiError;
use crate::extract::JsonBody;
use crate::handlers::support::{decode_base64, decoded_len, strip_data_prefix};
use crate::metrics::UPSTREAM_FAILURES;
use crate::models::{FileRequest, TextResponse};
use crate::providers::AudioInput;
use crate::sanitizer::filter_ai_response;
use crate::state::SharedState;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use bytes::Bytes;
use tracing::info;

const TRANSCRIPTION_ERROR: &str = "تعذر تحويل الصوت إلى نص";
const DEFAULT_AUDIO_MIME: &str = "audio/wav";

fn is_audio_mime(mime_type: &str) -> bool {
    mime_type.starts_with("audio/") || mime_type == "video/webm"
}

// The transcription API picks the decoder from the file extension
fn default_file_name(mime_type: &str) -> String {
    let subtype = mime_type.rsplit('/').next().unwrap_or("wav");
    let subtype = subtype.split(';').next().unwrap_or(subtype).trim();
    let extension = match subtype.trim_start_matches("x-") {
        "mpeg" | "mp3" => "mp3",
        "wave" | "wav" => "wav",
        "mp4" | "m4a" => "m4a",
        "" => "wav",
        other => other,
    };
    format!("audio.{extension}")
}

// POST /api/groq/transcribe
pub async fn transcribe_handler(
    State(state): State<SharedState>,
    JsonBody(body): JsonBody<FileRequest>,
) -> Result<Json<TextResponse>, ApiError> {
    let groq = state.groq.clone().ok_or_else(ApiError::groq_not_configured)?;

    let missing_file = || ApiError::bad_request("MISSING_FILE", MISSING_FILE);
    let file = body
        .file_base64
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(missing_file)?;
    let mime_type = body.mime_type.clone().unwrap_or_else(|| DEFAULT_AUDIO_MIME.to_string());
    if !is_audio_mime(&mime_type) {
        return Err(ApiError::bad_request("UNSUPPORTED_FILE", UNSUPPORTED_FILE));
    }

    let data = strip_data_prefix(file);
    if decoded_len(data) > state.config.body_limits.upload {
        return Err(ApiError::with_status(
            StatusCode::PAYLOAD_TOO_LARGE,
            "FILE_TOO_LARGE",
            FILE_TOO_LARGE,
        ));
    }
    let bytes = decode_base64(data).ok_or_else(missing_file)?;

    let audio = AudioInput {
        bytes: Bytes::from(bytes),
        file_name: body
            .file_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| default_file_name(&mime_type)),
        mime_type,
    };
    let size = audio.bytes.len();

    let text = state
        .retry_policy("groq")
        .execute(|| groq.transcribe(audio.clone()))
        .await
        .inspect_err(|_| UPSTREAM_FAILURES.with_label_values(&["groq"]).inc())
        .map_err(|e| ApiError::upstream_with_message("TRANSCRIPTION_ERROR", TRANSCRIPTION_ERROR, e))?;

    info!(bytes = size, chars = text.chars().count(), "Audio transcribed");
    Ok(Json(TextResponse {
        text: filter_ai_response(text.trim()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_mime_allow_list() {
        assert!(is_audio_mime("audio/mpeg"));
        assert!(is_audio_mime("audio/webm;codecs=opus"));
        assert!(is_audio_mime("video/webm"));
        assert!(!is_audio_mime("video/mp4"));
        assert!(!is_audio_mime("image/png"));
    }

    #[test]
    fn test_default_file_names() {
        assert_eq!(default_file_name("audio/mpeg"), "audio.mp3");
        assert_eq!(default_file_name("audio/x-wav"), "audio.wav");
        assert_eq!(default_file_name("audio/webm;codecs=opus"), "audio.webm");
        assert_eq!(default_file_name("video/webm"), "audio.webm");
        assert_eq!(default_file_name("audio/ogg"), "audio.ogg");
    }
}
