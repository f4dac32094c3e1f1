use serde::{Deserialize, Serialize};

use crate::http::{endpoint, parse_base, ApiTransport};
use crate::{ApiError, FailureKind, ReplyRequest};

/// Endpoints served by the Stacky backend itself.
#[async_trait::async_trait]
pub trait StackyApi: Send + Sync {
    /// `POST /api/reply`, returns the assistant text.
    async fn reply(&self, request: &ReplyRequest) -> Result<String, ApiError>;

    /// `POST /api/debug/login`; `Ok` only on a 2xx answer.
    async fn debug_login(&self, password: &str) -> Result<(), ApiError>;
}

#[derive(Deserialize)]
struct ReplyResponse {
    reply: Option<String>,
}

#[derive(Serialize)]
struct LoginBody<'a> {
    password: &'a str,
}

#[derive(Clone)]
pub struct ReqwestStackyClient {
    base_url: url::Url,
    transport: ApiTransport,
}

impl ReqwestStackyClient {
    /// `base_url` is the origin hosting `/api/...`.
    pub fn new(base_url: &str, transport: ApiTransport) -> Result<Self, ApiError> {
        Ok(Self {
            base_url: parse_base(base_url)?,
            transport,
        })
    }
}

#[async_trait::async_trait]
impl StackyApi for ReqwestStackyClient {
    async fn reply(&self, request: &ReplyRequest) -> Result<String, ApiError> {
        let url = endpoint(&self.base_url, &["api", "reply"])?;
        let response: ReplyResponse = self
            .transport
            .execute_json(self.transport.client().post(url).json(request))
            .await?;
        response
            .reply
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| ApiError::new(FailureKind::Decode, "No response from AI"))
    }

    async fn debug_login(&self, password: &str) -> Result<(), ApiError> {
        let url = endpoint(&self.base_url, &["api", "debug", "login"])?;
        self.transport
            .execute(
                self.transport
                    .client()
                    .post(url)
                    .json(&LoginBody { password }),
            )
            .await
            .map(|_| ())
    }
}
