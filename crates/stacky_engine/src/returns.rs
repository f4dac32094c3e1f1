//! Client for the Customer Returns session API.
//!
//! The API is external; this module only knows its four session endpoints plus
//! photo deletion. Retry and session re-creation are left to the caller.

use std::collections::BTreeMap;

use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::{endpoint, parse_base, ApiTransport};
use crate::{ApiError, AssistantReply, CreatedSession};

/// Session statuses that mean the conversation cannot continue.
const CLOSED_STATUSES: [&str; 5] = ["inactive", "expired", "completed", "closed", "cancelled"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub status: String,
    #[serde(default)]
    pub current_step: Option<String>,
    #[serde(default)]
    pub messages: Vec<Value>,
}

impl SessionInfo {
    pub fn is_active(&self) -> bool {
        let status = self.status.trim();
        !CLOSED_STATUSES
            .iter()
            .any(|closed| status.eq_ignore_ascii_case(closed))
    }
}

/// Photo bytes handed to [`ReturnsApi::upload_photo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoUpload {
    pub bytes: Bytes,
    pub file_name: String,
    pub mime: String,
    pub description: String,
}

#[async_trait::async_trait]
pub trait ReturnsApi: Send + Sync {
    async fn create_session(
        &self,
        customer_info: &BTreeMap<String, String>,
    ) -> Result<CreatedSession, ApiError>;

    async fn send_message(
        &self,
        session_id: &str,
        message: &str,
        photo_url: Option<&str>,
    ) -> Result<AssistantReply, ApiError>;

    /// Returns the server URL of the stored photo.
    async fn upload_photo(&self, session_id: &str, photo: PhotoUpload) -> Result<String, ApiError>;

    async fn get_session(&self, session_id: &str) -> Result<SessionInfo, ApiError>;

    async fn delete_photo(&self, session_id: &str, photo_url: &str) -> Result<(), ApiError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionBody<'a> {
    customer_info: &'a BTreeMap<String, String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    session_id: String,
    #[serde(default)]
    current_step: Option<String>,
    #[serde(default)]
    customer_info: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    initial_message: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageBody<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    photo_url: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageResponse {
    bot_response: String,
    #[serde(default)]
    current_step: Option<String>,
    #[serde(default)]
    customer_info: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    structured_questions: Option<Vec<Value>>,
    #[serde(default)]
    next_steps: Option<Vec<Value>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadPhotoResponse {
    photo_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeletePhotoBody<'a> {
    photo_url: &'a str,
}

#[derive(Clone)]
pub struct ReqwestReturnsClient {
    base_url: url::Url,
    transport: ApiTransport,
}

impl ReqwestReturnsClient {
    pub fn new(base_url: &str, transport: ApiTransport) -> Result<Self, ApiError> {
        Ok(Self {
            base_url: parse_base(base_url)?,
            transport,
        })
    }
}

#[async_trait::async_trait]
impl ReturnsApi for ReqwestReturnsClient {
    async fn create_session(
        &self,
        customer_info: &BTreeMap<String, String>,
    ) -> Result<CreatedSession, ApiError> {
        let url = endpoint(&self.base_url, &["sessions"])?;
        let response: CreateSessionResponse = self
            .transport
            .execute_json(
                self.transport
                    .client()
                    .post(url)
                    .json(&CreateSessionBody { customer_info }),
            )
            .await?;
        Ok(CreatedSession {
            session_id: response.session_id,
            current_step: response.current_step,
            customer_info: response
                .customer_info
                .map(flatten_customer_info)
                .unwrap_or_else(|| customer_info.clone()),
            initial_message: response.initial_message,
        })
    }

    async fn send_message(
        &self,
        session_id: &str,
        message: &str,
        photo_url: Option<&str>,
    ) -> Result<AssistantReply, ApiError> {
        let url = endpoint(&self.base_url, &["sessions", session_id, "messages"])?;
        let response: SendMessageResponse = self
            .transport
            .execute_json(
                self.transport
                    .client()
                    .post(url)
                    .json(&SendMessageBody { message, photo_url }),
            )
            .await?;
        Ok(AssistantReply {
            text: response.bot_response,
            current_step: response.current_step,
            customer_info: response.customer_info.map(flatten_customer_info),
            structured_questions: response
                .structured_questions
                .map(texts_of)
                .unwrap_or_default(),
            next_steps: response.next_steps.map(texts_of).unwrap_or_default(),
        })
    }

    async fn upload_photo(&self, session_id: &str, photo: PhotoUpload) -> Result<String, ApiError> {
        let url = endpoint(&self.base_url, &["sessions", session_id, "photos"])?;
        let part = Part::bytes(photo.bytes.to_vec())
            .file_name(photo.file_name)
            .mime_str(&photo.mime)
            .map_err(crate::http::map_reqwest_error)?;
        let form = Form::new()
            .part("photo", part)
            .text("description", photo.description);
        let response: UploadPhotoResponse = self
            .transport
            .execute_json(self.transport.client().post(url).multipart(form))
            .await?;
        Ok(response.photo_url)
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionInfo, ApiError> {
        let url = endpoint(&self.base_url, &["sessions", session_id])?;
        self.transport
            .execute_json(self.transport.client().get(url))
            .await
    }

    async fn delete_photo(&self, session_id: &str, photo_url: &str) -> Result<(), ApiError> {
        let url = endpoint(&self.base_url, &["sessions", session_id, "photos"])?;
        self.transport
            .execute(
                self.transport
                    .client()
                    .delete(url)
                    .json(&DeletePhotoBody { photo_url }),
            )
            .await
            .map(|_| ())
    }
}

fn flatten_customer_info(info: BTreeMap<String, Value>) -> BTreeMap<String, String> {
    info.into_iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| {
            let text = match value {
                Value::String(text) => text,
                other => other.to_string(),
            };
            (key, text)
        })
        .collect()
}

/// Accepts either plain strings or objects carrying a `question`/`text`/`title` field.
fn texts_of(values: Vec<Value>) -> Vec<String> {
    values
        .into_iter()
        .filter_map(|value| match value {
            Value::String(text) => Some(text),
            Value::Object(fields) => ["question", "text", "title", "label"]
                .iter()
                .find_map(|key| fields.get(*key).and_then(Value::as_str))
                .map(str::to_owned),
            _ => None,
        })
        .collect()
}
