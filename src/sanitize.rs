//! Secret redaction for anything that leaves the process
//!
//! Every human-readable error string that reaches a caller or a log line goes
//! through [`sanitize`]. Metadata values are additionally length-capped with
//! [`truncate_metadata`].

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Placeholder substituted for credentials, URLs and long opaque tokens
pub const REDACTED: &str = "[REDACTED]";
/// Placeholder substituted for email addresses
pub const EMAIL_REDACTED: &str = "[EMAIL_REDACTED]";
/// Marker appended to metadata values that exceed [`MAX_METADATA_LEN`]
pub const TRUNCATED: &str = "[TRUNCATED]";
/// Maximum number of characters kept from a single metadata value
pub const MAX_METADATA_LEN: usize = 200;

static BEARER_REGEX: OnceLock<Regex> = OnceLock::new();
static SK_KEY_REGEX: OnceLock<Regex> = OnceLock::new();
static KEY_VALUE_REGEX: OnceLock<Regex> = OnceLock::new();
static URL_REGEX: OnceLock<Regex> = OnceLock::new();
static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
static LONG_TOKEN_REGEX: OnceLock<Regex> = OnceLock::new();

fn bearer_regex() -> &'static Regex {
    BEARER_REGEX.get_or_init(|| {
        Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9._~+/=-]+").expect("bearer regex is valid")
    })
}

fn sk_key_regex() -> &'static Regex {
    SK_KEY_REGEX.get_or_init(|| {
        Regex::new(r"sk-(?:ant-|proj-)?[A-Za-z0-9_-]{8,}").expect("sk- key regex is valid")
    })
}

fn key_value_regex() -> &'static Regex {
    KEY_VALUE_REGEX.get_or_init(|| {
        Regex::new(
            r#"(?i)\b(api[_-]?key|apikey|access[_-]?token|auth[_-]?token|refresh[_-]?token|client[_-]?secret|secret|password|passwd|pwd|token)(["']?\s*[=:]\s*["']?)[^\s"'&,;}]+"#,
        )
        .expect("key/value secret regex is valid")
    })
}

fn url_regex() -> &'static Regex {
    URL_REGEX.get_or_init(|| {
        Regex::new(r#"(?i)\b(?:https?|wss?)://[^\s"'<>)\]]+"#).expect("url regex is valid")
    })
}

fn email_regex() -> &'static Regex {
    EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("email regex is valid")
    })
}

fn long_token_regex() -> &'static Regex {
    LONG_TOKEN_REGEX.get_or_init(|| {
        Regex::new(r"\b[A-Za-z0-9_\-]{32,}\b").expect("long token regex is valid")
    })
}

/// Redact credentials, endpoints and email addresses from free text
///
/// Replacement order matters: bearer tokens and `sk-` keys go first so the
/// generic key/value and long-token passes never see half of a secret.
pub fn sanitize(text: &str) -> String {
    let out = bearer_regex().replace_all(text, format!("Bearer {REDACTED}").as_str());
    let out = sk_key_regex().replace_all(&out, REDACTED);
    let out = key_value_regex().replace_all(&out, format!("${{1}}${{2}}{REDACTED}").as_str());
    let out = url_regex().replace_all(&out, REDACTED);
    let out = email_regex().replace_all(&out, EMAIL_REDACTED);
    let out = long_token_regex().replace_all(&out, REDACTED);
    out.into_owned()
}

/// Sanitize a metadata value and cap it at [`MAX_METADATA_LEN`] characters
pub fn truncate_metadata(value: &str) -> String {
    let clean = sanitize(value);
    if clean.chars().count() <= MAX_METADATA_LEN {
        return clean;
    }
    let mut truncated: String = clean.chars().take(MAX_METADATA_LEN).collect();
    truncated.push_str(TRUNCATED);
    truncated
}

/// Recursively sanitize every string inside a JSON value
pub fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(truncate_metadata(s)),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_value).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), sanitize_value(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sanitize_redacts_sk_keys() {
        let out = sanitize("invalid key sk-1234567890abcdef supplied");
        assert!(!out.contains("sk-1234567890abcdef"), "got: {}", out);
        assert!(out.contains(REDACTED));
    }

    #[test]
    fn test_sanitize_redacts_bearer_tokens() {
        let out = sanitize("header was Authorization: Bearer abc.def.ghi");
        assert!(!out.contains("abc.def.ghi"), "got: {}", out);
        assert!(out.contains("Bearer [REDACTED]"));
    }

    #[test]
    fn test_sanitize_redacts_key_value_secrets() {
        let out = sanitize("connect failed api_key=hunter2 password: letmein");
        assert!(!out.contains("hunter2"), "got: {}", out);
        assert!(!out.contains("letmein"), "got: {}", out);
        assert!(out.contains("api_key=[REDACTED]"), "got: {}", out);
    }

    #[test]
    fn test_sanitize_redacts_urls() {
        let out = sanitize("POST https://my-resource.openai.azure.com/openai/responses failed");
        assert!(!out.contains("azure.com"), "got: {}", out);
        assert_eq!(out, "POST [REDACTED] failed");
    }

    #[test]
    fn test_sanitize_redacts_emails() {
        let out = sanitize("quota exceeded for ops@example.com");
        assert_eq!(out, "quota exceeded for [EMAIL_REDACTED]");
    }

    #[test]
    fn test_sanitize_redacts_long_opaque_tokens() {
        let token = "a".repeat(40);
        let out = sanitize(&format!("deployment key {} rejected", token));
        assert!(!out.contains(&token));
    }

    #[test]
    fn test_sanitize_leaves_plain_text_alone() {
        let msg = "Rate limit exceeded, please slow down";
        assert_eq!(sanitize(msg), msg);
    }

    #[test]
    fn test_truncate_metadata_caps_length() {
        let long = "x ".repeat(300);
        let out = truncate_metadata(&long);
        assert!(out.ends_with(TRUNCATED));
        assert_eq!(out.chars().count(), MAX_METADATA_LEN + TRUNCATED.len());
    }

    #[test]
    fn test_truncate_metadata_keeps_short_values() {
        assert_eq!(truncate_metadata("short"), "short");
    }

    #[test]
    fn test_sanitize_value_walks_nested_json() {
        let value = serde_json::json!({
            "error": {"message": "bad key sk-abcdefghijklmnop", "code": 401},
            "tags": ["user@example.com"]
        });
        let out = sanitize_value(&value);
        let rendered = out.to_string();
        assert!(!rendered.contains("sk-abcdefghijklmnop"));
        assert!(rendered.contains(EMAIL_REDACTED));
        assert_eq!(out["error"]["code"], 401);
    }

    proptest! {
        #[test]
        fn prop_sk_keys_never_survive(suffix in "[A-Za-z0-9]{8,40}", prefix in "[a-z ]{0,20}") {
            let secret = format!("sk-{}", suffix);
            let out = sanitize(&format!("{}{} trailing", prefix, secret));
            prop_assert!(!out.contains(&secret));
        }
    }
}
