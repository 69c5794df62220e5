//! Anthropic Messages API

use serde::Serialize;
use serde_json::Value;

pub(super) const API_BASE: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 8000;

#[derive(Serialize)]
struct MessageRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: [Message<'a>; 1],
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

pub(super) fn request(
    client: &reqwest::Client,
    base: &str,
    api_key: &str,
    model: &str,
    prompt: &str,
) -> reqwest::RequestBuilder {
    let body = MessageRequest {
        model,
        max_tokens: MAX_TOKENS,
        temperature: 0.3,
        messages: [Message {
            role: "user",
            content: prompt,
        }],
    };

    client
        .post(format!("{base}/v1/messages"))
        .header("x-api-key", api_key)
        .header("anthropic-version", API_VERSION)
        .json(&body)
}

/// Concatenated text blocks of the reply
pub(super) fn parse(body: &Value) -> Result<String, String> {
    let blocks = body["content"]
        .as_array()
        .ok_or_else(|| "missing content array".to_string())?;

    let text: String = blocks
        .iter()
        .filter(|block| block["type"] == "text")
        .filter_map(|block| block["text"].as_str())
        .collect();

    if text.is_empty() {
        Err("reply contained no text blocks".to_string())
    } else {
        Ok(text)
    }
}
