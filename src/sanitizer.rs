//! Untrusted text handling: escaping user input before it reaches a model
//! prompt, and stripping executable markup from model output before it
//! reaches a browser.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::borrow::Cow;

lazy_static! {
    // Paired tags are removed together with their content. Non-greedy so two
    // blocks in one reply do not swallow the prose between them.
    static ref PAIRED_TAGS: Vec<Regex> = vec![
        Regex::new(r"(?is)<script\b.*?</script\s*>").expect("script pattern"),
        Regex::new(r"(?is)<iframe\b.*?</iframe\s*>").expect("iframe pattern"),
        Regex::new(r"(?is)<object\b.*?</object\s*>").expect("object pattern"),
    ];
    // Unclosed or stray halves of the tags above, plus <embed>
    static ref LONE_TAGS: Regex =
        Regex::new(r"(?i)</?(?:script|iframe|object)\b[^>]*>|<embed\b[^>]*>").expect("lone tag pattern");
    static ref QUOTED_HANDLER: Regex =
        Regex::new(r#"(?i)\s*\bon[a-z]+\s*=\s*(?:"[^"]*"|'[^']*')"#).expect("quoted handler pattern");
    static ref BARE_HANDLER: Regex =
        Regex::new(r"(?i)\s*\bon[a-z]+\s*=\s*[^\s>]*").expect("bare handler pattern");
    static ref SCRIPT_SCHEMES: Regex =
        Regex::new(r"(?i)(?:javascript|vbscript)\s*:").expect("scheme pattern");
    static ref DATA_URIS: Regex =
        Regex::new(r#"(?i)data:(?:text/html|application/)[^"'\s]*"#).expect("data uri pattern");

    static ref OPEN_BLOCK: Regex =
        Regex::new(r"(?i)<(script|iframe|object)\b").expect("open block pattern");
    static ref CLOSE_BLOCK: Regex =
        Regex::new(r"(?i)</(script|iframe|object)\s*>").expect("close block pattern");

    static ref DANGEROUS_PATTERNS: Vec<Regex> = [
        r"(?i)<script",
        r"(?i)javascript:",
        r"(?i)on\w+\s*=",
        r"(?i)<iframe",
        r"(?i)<object",
        r"(?i)<embed",
        r"(?i)eval\s*\(",
        r"(?i)expression\s*\(",
        r"(?i)vbscript:",
        r"(?i)data:text/html",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("dangerous pattern"))
    .collect();
}

/// Escapes `& < > " ' /` as HTML entities.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            '/' => escaped.push_str("&#x2F;"),
            other => escaped.push(other),
        }
    }
    escaped
}

// ASCII control characters other than \t, \n and \r
fn is_stripped_control(c: char) -> bool {
    matches!(c, '\u{0}'..='\u{8}' | '\u{b}' | '\u{c}' | '\u{e}'..='\u{1f}' | '\u{7f}')
}

/// Prepares free text typed by a user for inclusion in a prompt.
///
/// Drops NUL and control characters (keeping newlines, carriage returns and
/// tabs), HTML-escapes the reserved characters and trims surrounding
/// whitespace. The result never contains a raw `<`, `>`, `"`, `'` or `/`.
pub fn sanitize_user_input(input: &str) -> String {
    let stripped: String = input.chars().filter(|c| !is_stripped_control(*c)).collect();
    escape_html(&stripped).trim().to_string()
}

/// Same as [`sanitize_user_input`] for a raw JSON field; anything but a
/// string becomes the empty string.
pub fn sanitize_json_input(value: &Value) -> String {
    value.as_str().map(sanitize_user_input).unwrap_or_default()
}

fn filter_pass(text: &str) -> String {
    let mut filtered = Cow::Borrowed(text);

    // tags first: a handler hidden inside a <script> body must go with it
    for tag in PAIRED_TAGS.iter() {
        if let Cow::Owned(next) = tag.replace_all(&filtered, "") {
            filtered = Cow::Owned(next);
        }
    }
    for pattern in [&*LONE_TAGS, &*QUOTED_HANDLER, &*BARE_HANDLER, &*SCRIPT_SCHEMES, &*DATA_URIS] {
        if let Cow::Owned(next) = pattern.replace_all(&filtered, "") {
            filtered = Cow::Owned(next);
        }
    }

    filtered.into_owned()
}

/// Strips executable constructs from model output: `<script>`, `<iframe>`
/// and `<object>` blocks, `<embed>` tags, `on*=` event handlers and
/// `javascript:` / `vbscript:` / `data:text/html` / `data:application/*`
/// URIs.
///
/// Every rule only deletes characters, so passes are repeated until the text
/// stops changing. That makes the filter idempotent even when one removal
/// splices together a new match (`<scr<script></script>ipt>`).
pub fn filter_ai_response(response: &str) -> String {
    let mut current = filter_pass(response);
    loop {
        let next = filter_pass(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

// A lone '<' in prose is released after this many bytes without a '>'
const MAX_UNFINISHED_TAG: usize = 256;
const SCHEME_PREFIXES: [&str; 4] = ["javascript:", "vbscript:", "data:text/html", "data:application/"];

/// Byte offset from which `text` may still become a filtered construct once
/// more text is appended: an unclosed script/iframe/object block, a tag
/// without its `>`, or a trailing word that could grow into a script scheme
/// or an `on*=` handler.
fn undecided_start(text: &str) -> Option<usize> {
    let open_block = OPEN_BLOCK.captures_iter(text).find_map(|open| {
        let whole = open.get(0)?;
        let name = open.get(1)?.as_str();
        let closed = CLOSE_BLOCK
            .captures_iter(&text[whole.end()..])
            .any(|close| close.get(1).is_some_and(|c| c.as_str().eq_ignore_ascii_case(name)));
        (!closed).then_some(whole.start())
    });

    let open_tag = text
        .rfind('<')
        .filter(|&at| !text[at..].contains('>') && text.len() - at <= MAX_UNFINISHED_TAG);

    let word_start = text
        .rfind(|c: char| !(c.is_ascii_alphanumeric() || c == ':' || c == '/'))
        .map_or(0, |at| at + text[at..].chars().next().map_or(1, char::len_utf8));
    let word = text[word_start..].to_ascii_lowercase();
    let open_word = (!word.is_empty()
        && (SCHEME_PREFIXES
            .iter()
            .any(|scheme| scheme.len() > word.len() && scheme.starts_with(word.as_str()))
            || (word.starts_with("on") && word.chars().all(|c| c.is_ascii_alphabetic()))))
    .then_some(word_start);

    [open_block, open_tag, open_word].into_iter().flatten().min()
}

/// [`filter_ai_response`] for output that arrives in pieces.
///
/// Markup split across tokens (`<scr` + `ipt>`) is held back until it can be
/// decided, so the concatenated output matches filtering the whole text.
#[derive(Debug, Default)]
pub struct StreamFilter {
    pending: String,
}

impl StreamFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a token and returns the filtered text that is now safe to emit,
    /// possibly empty.
    pub fn push(&mut self, token: &str) -> String {
        self.pending.push_str(token);
        let cut = undecided_start(&self.pending).unwrap_or(self.pending.len());
        let held = self.pending.split_off(cut);
        let ready = std::mem::replace(&mut self.pending, held);
        filter_ai_response(&ready)
    }

    /// Filters and returns whatever is still held back.
    pub fn finish(&mut self) -> String {
        filter_ai_response(&std::mem::take(&mut self.pending))
    }
}

/// Applies [`filter_ai_response`] to every string inside a JSON document
/// produced by a model.
pub fn filter_json_strings(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(filter_ai_response(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(filter_json_strings).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, filter_json_strings(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Returns true when none of the known attack patterns occur in `input`.
pub fn validate_input_safety(input: &str) -> bool {
    !DANGEROUS_PATTERNS.iter().any(|pattern| pattern.is_match(input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_escape_all_reserved() {
        assert_eq!(
            sanitize_user_input(r#"<a href="/x">'&'</a>"#),
            "&lt;a href=&quot;&#x2F;x&quot;&gt;&#x27;&amp;&#x27;&lt;&#x2F;a&gt;"
        );
    }

    #[test]
    fn test_control_chars_removed_but_whitespace_kept() {
        let input = "  a\u{0}b\u{7}c\td\ne\rf\u{7f}  ";
        assert_eq!(sanitize_user_input(input), "abc\td\ne\rf");
    }

    #[test]
    fn test_arabic_text_untouched() {
        let text = "مرحباً، أريد معرفة خدمات الذكاء الاصطناعي";
        assert_eq!(sanitize_user_input(text), text);
        assert_eq!(filter_ai_response(text), text);
    }

    #[test]
    fn test_non_string_json_yields_empty() {
        assert_eq!(sanitize_json_input(&json!(42)), "");
        assert_eq!(sanitize_json_input(&json!(null)), "");
        assert_eq!(sanitize_json_input(&json!(" hi ")), "hi");
    }

    #[test]
    fn test_filter_removes_script_blocks() {
        let reply = "Hello <SCRIPT type=\"x\">alert(1)</script> world";
        assert_eq!(filter_ai_response(reply), "Hello  world");
    }

    #[test]
    fn test_filter_two_blocks_keeps_middle_text() {
        let reply = "<script>a()</script>keep<script>b()</script>";
        assert_eq!(filter_ai_response(reply), "keep");
    }

    #[test]
    fn test_filter_iframe_object_embed() {
        let reply = "a<iframe src=x>inner</iframe>b<object data=y>z</object>c<embed src=q>d";
        assert_eq!(filter_ai_response(reply), "abcd");
    }

    #[test]
    fn test_filter_event_handlers() {
        assert_eq!(
            filter_ai_response(r#"<img src="a.png" onerror="alert(1)">"#),
            r#"<img src="a.png">"#
        );
        assert_eq!(
            filter_ai_response("<div onclick=steal()>x</div>"),
            "<div>x</div>"
        );
    }

    #[test]
    fn test_filter_schemes() {
        assert_eq!(
            filter_ai_response(r#"<a href="javascript:alert(1)">x</a>"#),
            r#"<a href="alert(1)">x</a>"#
        );
        assert_eq!(filter_ai_response("VBScript:run"), "run");
        assert_eq!(
            filter_ai_response(r#"<a href="data:text/html;base64,PHNj">x</a>"#),
            r#"<a href="">x</a>"#
        );
        assert_eq!(filter_ai_response("data:application/x-evil"), "");
    }

    #[test]
    fn test_filter_spliced_tags() {
        let reply = "<scr<script>x</script>ipt>alert(1)</script>";
        let filtered = filter_ai_response(reply);
        assert!(!filtered.to_lowercase().contains("<script"));
    }

    #[test]
    fn test_filter_keeps_markdown() {
        let reply = "**عنوان**\n- نقطة أولى\n- [رابط](https://brightai.sa/ai-bots.html)";
        assert_eq!(filter_ai_response(reply), reply);
    }

    #[test]
    fn test_filter_json_strings() {
        let value = json!({
            "question": "<script>x</script>ما هي الخدمة؟",
            "items": [{"name": "a<embed src=y>"}],
            "count": 3
        });
        assert_eq!(
            filter_json_strings(value),
            json!({"question": "ما هي الخدمة؟", "items": [{"name": "a"}], "count": 3})
        );
    }

    #[test]
    fn test_validate_input_safety() {
        assert!(validate_input_safety("ما هي خدماتكم؟"));
        assert!(!validate_input_safety("<script>alert(1)</script>"));
        assert!(!validate_input_safety("<img onerror = x>"));
        assert!(!validate_input_safety("eval (payload)"));
        assert!(!validate_input_safety("style=expression(alert())"));
    }

    fn streamed(tokens: &[&str]) -> String {
        let mut filter = StreamFilter::new();
        let mut out: String = tokens.iter().map(|token| filter.push(token)).collect();
        out.push_str(&filter.finish());
        out
    }

    #[test]
    fn test_stream_filter_catches_split_script() {
        let tokens = ["مرحبا <scr", "ipt>alert(1)</scr", "ipt> بك"];
        assert_eq!(streamed(&tokens), "مرحبا  بك");
        assert_eq!(streamed(&tokens), filter_ai_response(&tokens.concat()));
    }

    #[test]
    fn test_stream_filter_catches_split_scheme() {
        assert_eq!(
            streamed(&["click [here](java", "script:alert(1))"]),
            "click [here](alert(1))"
        );
        assert_eq!(streamed(&["<a ", "oncl", "ick=\"x()\">رابط</a>"]), "<a>رابط</a>");
    }

    #[test]
    fn test_stream_filter_releases_plain_text_immediately() {
        let mut filter = StreamFilter::new();
        assert_eq!(filter.push("مرحبا "), "مرحبا ");
        assert_eq!(filter.push("بك"), "بك");
        assert_eq!(filter.finish(), "");
    }

    #[test]
    fn test_stream_filter_flushes_unfinished_tail() {
        let mut filter = StreamFilter::new();
        assert_eq!(filter.push("a < b"), "a ");
        assert_eq!(filter.finish(), "< b");
    }

    #[test]
    fn test_stream_filter_matches_whole_text_at_every_split() {
        let samples = [
            "مرحبا <script>alert(1)</script> بك",
            "مرحبا <a href=\"javascript:x\" onclick=\"y\">رابط</a>",
        ];
        for sample in samples {
            let expected = filter_ai_response(sample);
            for (at, _) in sample.char_indices() {
                let (head, tail) = sample.split_at(at);
                assert_eq!(streamed(&[head, tail]), expected, "split at {at} of {sample:?}");
            }
        }
    }

    proptest! {
        #[test]
        fn prop_sanitized_input_has_no_raw_reserved(input in any::<String>()) {
            let sanitized = sanitize_user_input(&input);
            for reserved in ['<', '>', '"', '\'', '/'] {
                prop_assert!(!sanitized.contains(reserved));
            }
        }

        #[test]
        fn prop_filter_is_idempotent(input in any::<String>()) {
            let once = filter_ai_response(&input);
            prop_assert_eq!(filter_ai_response(&once), once);
        }

        #[test]
        fn prop_filter_idempotent_on_markup(
            input in r#"(<script>|</script>|<iframe>|</iframe>|<embed |on[a-z]{1,6}=|javascript:|"|'|>|<|[a-z ]{0,4}){0,12}"#
        ) {
            let once = filter_ai_response(&input);
            prop_assert_eq!(filter_ai_response(&once), once);
        }
    }
}
