//! Gemini `generateContent`

use serde_json::{json, Value};

pub(super) const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub(super) fn request(
    client: &reqwest::Client,
    base: &str,
    api_key: &str,
    model: &str,
    prompt: &str,
) -> reqwest::RequestBuilder {
    let body = json!({
        "contents": [{"role": "user", "parts": [{"text": prompt}]}],
        "generationConfig": {"temperature": 0.3}
    });

    client
        .post(format!("{base}/models/{model}:generateContent"))
        .header("x-goog-api-key", api_key)
        .json(&body)
}

/// Text parts of the first candidate
pub(super) fn parse(body: &Value) -> Result<String, String> {
    let parts = body["candidates"][0]["content"]["parts"]
        .as_array()
        .ok_or_else(|| match body["promptFeedback"]["blockReason"].as_str() {
            Some(reason) => format!("prompt blocked: {reason}"),
            None => "missing candidates[0].content.parts".to_string(),
        })?;

    let text: String = parts.iter().filter_map(|part| part["text"].as_str()).collect();
    if text.is_empty() {
        Err("candidate contained no text".to_string())
    } else {
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_candidate_parts() {
        let body = json!({
            "candidates": [{"content": {"parts": [{"text": "a"}, {"text": "b"}]}}]
        });
        assert_eq!(parse(&body).unwrap(), "ab");
    }

    #[test]
    fn test_parse_blocked_prompt() {
        let body = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        assert_eq!(parse(&body).unwrap_err(), "prompt blocked: SAFETY");
    }
}
