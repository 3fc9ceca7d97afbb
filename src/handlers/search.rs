use super::support::generate_with_retry;
use crate::cache::make_cache_key;
use crate::error::{ApiError, INVALID_REQUEST_MESSAGE};
use crate::extract::JsonBody;
use crate::models::{SearchRequest, SearchResponse, SearchResult};
use crate::providers::gemini::{Content, GenerationConfig};
use crate::providers::GenerateContentRequest;
use crate::routes::Route;
use crate::sanitizer::{filter_ai_response, sanitize_user_input};
use crate::state::SharedState;
use axum::Json;
use axum::extract::State;
use serde_json::Value;
use tracing::{debug, warn};

const NO_QUERY: &str = "يرجى إدخال كلمة البحث";
const QUERY_TOO_SHORT: &str = "يجب أن تكون كلمة البحث 3 أحرف على الأقل";
const QUERY_TOO_LONG: &str = "كلمة البحث طويلة جداً";
const SEARCH_UNAVAILABLE: &str = "خدمة البحث غير متاحة حالياً";

const MIN_QUERY_CHARS: usize = 3;

const SEARCH_PROMPT: &str = r#"أنت محرك بحث ذكي لموقع BrightAI.
بناءً على استعلام المستخدم، قدم نتائج بحث ذات صلة من محتوى الموقع.

محتوى الموقع:
خدمات BrightAI:
1. وكلاء الذكاء الاصطناعي (AI Agents) - /ai-agent.html
2. تحليل البيانات الذكي - /data-analysis.html
3. الأتمتة الذكية - /smart-automation.html
4. روبوتات الدردشة الذكية - /ai-bots.html
5. أدوات الذكاء الاصطناعي - /tools.html
6. منتجاتنا - /our-products.html

صفحات أخرى:
- من نحن - /about-us.html
- المدونة - /blog.html
- تواصل معنا - /contact.html
- استشارة مجانية - /consultation.html

قواعد الإجابة:
1. أرجع النتائج بتنسيق JSON فقط
2. كل نتيجة تحتوي على: title (عنوان بالعربية), url (رابط الصفحة), description (وصف قصير بالعربية)
3. أرجع 3-5 نتائج ذات صلة
4. إذا لم تجد نتائج مناسبة، أرجع مصفوفة فارغة
5. لا تضف أي نص خارج JSON

مثال للتنسيق:
[{"title": "وكلاء الذكاء الاصطناعي", "url": "/ai-agent.html", "description": "حلول وكلاء ذكية لأتمتة المهام"}]"#;

const SEARCH_ACK: &str = "فهمت. سأقدم نتائج البحث بتنسيق JSON فقط.";

fn field(item: &Value, key: &str) -> String {
    match item.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Pulls the first `[...]` out of the model text and keeps the entries that
/// have both a title and a url. Anything unparsable yields no results.
pub fn parse_search_results(text: &str) -> Vec<SearchResult> {
    let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) else {
        return Vec::new();
    };
    if end < start {
        return Vec::new();
    }
    let items: Vec<Value> = match serde_json::from_str(&text[start..=end]) {
        Ok(items) => items,
        Err(e) => {
            debug!(error = %e, "Search output was not a JSON array");
            return Vec::new();
        }
    };

    items
        .iter()
        .filter(|item| item.is_object())
        .map(|item| SearchResult {
            title: filter_ai_response(&field(item, "title")),
            url: field(item, "url").replace(['<', '>', '"', '\''], ""),
            description: filter_ai_response(&field(item, "description")),
        })
        .filter(|result| !result.title.is_empty() && !result.url.is_empty())
        .collect()
}

// POST /api/ai/search
pub async fn search_handler(
    State(state): State<SharedState>,
    JsonBody(body): JsonBody<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let gemini = state.gemini.clone().ok_or(ApiError::NotConfigured {
        code: "API_NOT_CONFIGURED",
        message: SEARCH_UNAVAILABLE,
    })?;

    let Value::String(query) = &body.query else {
        return Err(ApiError::bad_request("INVALID_REQUEST", INVALID_REQUEST_MESSAGE));
    };
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(ApiError::bad_request("NO_QUERY", NO_QUERY));
    }
    if trimmed.chars().count() < MIN_QUERY_CHARS {
        return Err(ApiError::bad_request("QUERY_TOO_SHORT", QUERY_TOO_SHORT));
    }
    if query.chars().count() > state.config.max_input_length {
        return Err(ApiError::bad_request("QUERY_TOO_LONG", QUERY_TOO_LONG));
    }

    let sanitized = sanitize_user_input(query);
    let cache_key = make_cache_key(Route::Search.path(), &Value::String(sanitized.clone()));
    if let Some(cached) = state.cache.get(&cache_key) {
        match serde_json::from_value::<SearchResponse>(cached) {
            Ok(response) => return Ok(Json(response)),
            Err(e) => warn!(error = %e, "Discarding malformed cached search response"),
        }
    }

    let request = GenerateContentRequest::new(vec![
        Content::user_text(SEARCH_PROMPT),
        Content::model(SEARCH_ACK),
        Content::user_text(format!("ابحث عن: {sanitized}")),
    ])
    .with_config(GenerationConfig::new(0.3, 512));

    let text = generate_with_retry(&state, gemini.as_ref(), &request)
        .await
        .map_err(|e| ApiError::upstream("API_ERROR", e))?;

    let response = SearchResponse {
        results: parse_search_results(&text),
        query: sanitized,
    };
    if let Ok(value) = serde_json::to_value(&response) {
        state.cache.insert(cache_key, value);
    }
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_embedded_array() {
        let text = r#"النتائج:
[{"title": "الأتمتة الذكية", "url": "/smart-automation.html", "description": "أتمتة"},
 {"title": "", "url": "/blog.html"},
 {"title": "بدون رابط"},
 "not an object"]"#;
        let results = parse_search_results(text);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "/smart-automation.html");
        assert_eq!(results[0].description, "أتمتة");
    }

    #[test]
    fn test_strips_quotes_and_brackets_from_urls() {
        let text = r#"[{"title": "t", "url": "/a<b>\"c'.html", "description": ""}]"#;
        assert_eq!(parse_search_results(text)[0].url, "/abc.html");
    }

    #[test]
    fn test_filters_script_from_titles() {
        let text = r#"[{"title": "x<script>alert(1)</script>", "url": "/x", "description": ""}]"#;
        assert_eq!(parse_search_results(text)[0].title, "x");
    }

    #[test]
    fn test_unparsable_output_is_empty() {
        assert!(parse_search_results("لا توجد نتائج").is_empty());
        assert!(parse_search_results("[not json]").is_empty());
        assert!(parse_search_results("] before [").is_empty());
    }
}
