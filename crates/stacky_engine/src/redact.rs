//! Scrubbing of sensitive values before they reach the debug bus.

use serde_json::{Map, Value};

pub const REDACTED: &str = "[REDACTED]";

const SENSITIVE_WORDS: [&str; 11] = [
    "password",
    "token",
    "auth",
    "key",
    "secret",
    "credentials",
    "email",
    "phone",
    "ssn",
    "credit",
    "card",
];

const SENSITIVE_QUERY_PARAMS: [&str; 4] = ["token", "auth", "key", "password"];

fn mentions_sensitive_word(text: &str) -> bool {
    let lower = text.to_lowercase();
    SENSITIVE_WORDS.iter().any(|word| lower.contains(word))
}

/// Redacts a value the way it is stored on the bus.
///
/// A bare string is replaced wholesale if it mentions a sensitive word. Inside
/// objects and arrays only the keys decide: matching keys lose their value,
/// everything else is walked recursively and scalar leaves are kept.
pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::String(text) if mentions_sensitive_word(text) => Value::String(REDACTED.into()),
        Value::Object(_) | Value::Array(_) => redact_nested(value),
        other => other.clone(),
    }
}

fn redact_nested(value: &Value) -> Value {
    match value {
        Value::Object(fields) => {
            let mut redacted = Map::with_capacity(fields.len());
            for (key, field) in fields {
                let field = if mentions_sensitive_word(key) {
                    Value::String(REDACTED.into())
                } else {
                    redact_nested(field)
                };
                redacted.insert(key.clone(), field);
            }
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_nested).collect()),
        other => other.clone(),
    }
}

/// Replaces sensitive query parameters; anything that is not an absolute URL
/// comes back unchanged.
pub fn redact_url(raw: &str) -> String {
    let Ok(mut url) = url::Url::parse(raw) else {
        return raw.to_string();
    };
    let has_sensitive = url
        .query_pairs()
        .any(|(name, _)| SENSITIVE_QUERY_PARAMS.contains(&name.as_ref()));
    if !has_sensitive {
        return raw.to_string();
    }
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(name, value)| {
            let value = if SENSITIVE_QUERY_PARAMS.contains(&name.as_ref()) {
                REDACTED.to_string()
            } else {
                value.into_owned()
            };
            (name.into_owned(), value)
        })
        .collect();
    url.query_pairs_mut().clear().extend_pairs(pairs);
    url.to_string()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn sensitive_keys_are_replaced_at_any_depth() {
        let input = json!({
            "sessionId": "abc",
            "customer": {"name": "Ada", "email": "ada@example.com", "Phone": "555"},
            "apiKey": "sk-123",
            "items": [{"cardNumber": "4111"}, {"sku": "B-1"}]
        });
        let expected = json!({
            "sessionId": "abc",
            "customer": {"name": "Ada", "email": REDACTED, "Phone": REDACTED},
            "apiKey": REDACTED,
            "items": [{"cardNumber": REDACTED}, {"sku": "B-1"}]
        });
        assert_eq!(redact_value(&input), expected);
    }

    #[test]
    fn plain_strings_are_checked_for_sensitive_words() {
        assert_eq!(redact_value(&json!("my Password is hunter2")), json!(REDACTED));
        assert_eq!(redact_value(&json!("box arrived damaged")), json!("box arrived damaged"));
        assert_eq!(redact_value(&json!(42)), json!(42));
        assert_eq!(redact_value(&Value::Null), Value::Null);
    }

    #[test]
    fn url_query_secrets_are_hidden() {
        let redacted = redact_url("https://api.example.com/sessions?token=abc&page=2");
        assert!(redacted.contains("token=%5BREDACTED%5D"), "{redacted}");
        assert!(redacted.contains("page=2"));
        assert!(!redacted.contains("abc"));
    }

    #[test]
    fn urls_without_secrets_or_unparseable_are_untouched() {
        let clean = "https://api.example.com/sessions/abc/photos";
        assert_eq!(redact_url(clean), clean);
        assert_eq!(redact_url("/api/reply?key=1"), "/api/reply?key=1");
    }
}
