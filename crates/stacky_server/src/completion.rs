//! OpenAI-compatible chat completion call behind `/api/reply`.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use stacky_logging::{stacky_debug, stacky_error};

use crate::config::ServerConfig;
use crate::error::ApiError;

pub const SYSTEM_PROMPT: &str = "You are Stacky, a helpful AI assistant created by ReturnStack. \
You are friendly, knowledgeable, and can view and analyze images when they are shared with you.";
pub const MAX_TOKENS: u32 = 1000;
pub const TEMPERATURE: f32 = 0.7;

/// One prior transcript entry as sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HistoryMessage {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

fn user_content(text: &str, image: Option<&str>) -> MessageContent {
    match image {
        Some(url) if !url.is_empty() => MessageContent::Parts(vec![
            ContentPart::Text {
                text: text.to_string(),
            },
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: url.to_string(),
                },
            },
        ]),
        _ => MessageContent::Text(text.to_string()),
    }
}

/// System prompt, then the history (user and assistant entries only), then
/// the current message. Images become vision content parts.
pub fn build_messages(message: &str, image_data: Option<&str>, history: &[HistoryMessage]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage {
        role: "system",
        content: MessageContent::Text(SYSTEM_PROMPT.to_string()),
    });
    for entry in history {
        match entry.sender.as_str() {
            "user" => messages.push(ChatMessage {
                role: "user",
                content: user_content(&entry.text, entry.image.as_deref()),
            }),
            "assistant" => messages.push(ChatMessage {
                role: "assistant",
                content: MessageContent::Text(entry.text.clone()),
            }),
            _ => {}
        }
    }
    messages.push(ChatMessage {
        role: "user",
        content: user_content(message, image_data),
    });
    messages
}

pub async fn complete(
    client: &reqwest::Client,
    config: &ServerConfig,
    messages: &[ChatMessage],
) -> Result<String, ApiError> {
    let url = format!(
        "{}/v1/chat/completions",
        config.openai_base_url.trim_end_matches('/')
    );
    let body = CompletionRequest {
        model: &config.model,
        messages,
        max_tokens: MAX_TOKENS,
        temperature: TEMPERATURE,
        stream: false,
    };
    let mut request = client.post(&url).json(&body);
    if let Some(key) = &config.openai_api_key {
        request = request.bearer_auth(key);
    }
    stacky_debug!("Completion request with {} messages", messages.len());

    let response = request.send().await.map_err(|err| {
        stacky_error!("Completion request failed: {}", err);
        ApiError::internal("Internal server error")
    })?;

    let status = response.status();
    if !status.is_success() {
        let detail = response.text().await.unwrap_or_default();
        stacky_error!("OpenAI API error ({}): {}", status, detail);
        let status = StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        return Err(ApiError::new(status, "Failed to get AI response"));
    }

    let parsed: CompletionResponse = response.json().await.map_err(|err| {
        stacky_error!("Unreadable completion response: {}", err);
        ApiError::internal("Internal server error")
    })?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .filter(|content| !content.is_empty())
        .ok_or_else(|| ApiError::internal("No response from AI"))
}
