//! OpenAI-compatible chat completions (OpenAI and DeepSeek)

use serde::Serialize;
use serde_json::Value;

pub(super) const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub(super) const DEEPSEEK_API_BASE: &str = "https://api.deepseek.com";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
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
    let body = ChatRequest {
        model,
        messages: [ChatMessage {
            role: "user",
            content: prompt,
        }],
    };

    client
        .post(format!("{base}/chat/completions"))
        .bearer_auth(api_key)
        .json(&body)
}

pub(super) fn parse(body: &Value) -> Result<String, String> {
    body["choices"][0]["message"]["content"]
        .as_str()
        .filter(|text| !text.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| "missing choices[0].message.content".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_first_choice() {
        let body = json!({
            "choices": [{"message": {"role": "assistant", "content": "summary"}}]
        });
        assert_eq!(parse(&body).unwrap(), "summary");
    }

    #[test]
    fn test_parse_missing_choice() {
        assert!(parse(&json!({"choices": []})).is_err());
    }
}
