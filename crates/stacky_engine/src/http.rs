use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use stacky_logging::{stacky_debug, stacky_warn};

use crate::{ApiError, FailureKind};

const MAX_ERROR_BODY: usize = 200;

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// One completed (or failed) HTTP exchange, reported to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiCall {
    pub method: String,
    pub url: String,
    /// `None` when no response arrived.
    pub status: Option<u16>,
    pub duration: Duration,
    pub error: Option<String>,
}

/// Instrumentation hook injected at the HTTP client boundary.
pub trait ApiObserver: Send + Sync {
    fn on_api_call(&self, call: &ApiCall);
}

/// Shared reqwest client plus the observers every request reports to.
#[derive(Clone)]
pub struct ApiTransport {
    client: reqwest::Client,
    observers: Vec<Arc<dyn ApiObserver>>,
}

impl ApiTransport {
    pub fn new(settings: &HttpSettings) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| ApiError::new(FailureKind::Network, err.to_string()))?;
        Ok(Self {
            client,
            observers: Vec::new(),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn ApiObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Sends the request and fails on any non-2xx status.
    pub async fn execute(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let request = request
            .build()
            .map_err(|err| ApiError::new(FailureKind::InvalidUrl, err.to_string()))?;
        let method = request.method().to_string();
        let url = request.url().to_string();
        stacky_debug!("API request: {} {}", method, url);

        let started = Instant::now();
        let result = self.client.execute(request).await;
        let duration = started.elapsed();

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                let error = map_reqwest_error(err);
                self.notify(ApiCall {
                    method,
                    url,
                    status: None,
                    duration,
                    error: Some(error.message.clone()),
                });
                return Err(error);
            }
        };

        let status = response.status();
        self.notify(ApiCall {
            method: method.clone(),
            url: url.clone(),
            status: Some(status.as_u16()),
            duration,
            error: None,
        });

        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = server_message(status, &body);
        stacky_warn!("API {} {} failed with {}: {}", method, url, status, message);
        Err(ApiError::new(FailureKind::HttpStatus(status.as_u16()), message))
    }

    pub async fn execute_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = self.execute(request).await?;
        let body = response.bytes().await.map_err(map_reqwest_error)?;
        serde_json::from_slice(&body)
            .map_err(|err| ApiError::new(FailureKind::Decode, format!("unexpected response: {err}")))
    }

    fn notify(&self, call: ApiCall) {
        for observer in &self.observers {
            observer.on_api_call(&call);
        }
    }
}

/// Picks the most useful explanation out of an error response.
pub(crate) fn server_message(status: StatusCode, body: &str) -> String {
    if let Ok(serde_json::Value::Object(fields)) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["error", "message"] {
            if let Some(text) = fields.get(key).and_then(|value| value.as_str()) {
                if !text.trim().is_empty() {
                    return text.to_string();
                }
            }
        }
    }
    let trimmed = body.trim();
    if !trimmed.is_empty() {
        let mut end = trimmed.len().min(MAX_ERROR_BODY);
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        return trimmed[..end].to_string();
    }
    status
        .canonical_reason()
        .map(|reason| format!("{} {}", status.as_u16(), reason))
        .unwrap_or_else(|| status.as_u16().to_string())
}

pub(crate) fn map_reqwest_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        return ApiError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_builder() {
        return ApiError::new(FailureKind::InvalidUrl, err.to_string());
    }
    if err.is_decode() {
        return ApiError::new(FailureKind::Decode, err.to_string());
    }
    ApiError::new(FailureKind::Network, err.to_string())
}

/// Appends path segments to a base URL, escaping each one.
pub(crate) fn endpoint(base: &url::Url, segments: &[&str]) -> Result<url::Url, ApiError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ApiError::new(FailureKind::InvalidUrl, format!("cannot extend {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

pub(crate) fn parse_base(raw: &str) -> Result<url::Url, ApiError> {
    url::Url::parse(raw).map_err(|err| ApiError::new(FailureKind::InvalidUrl, err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_json_error_field() {
        let message = server_message(StatusCode::BAD_REQUEST, r#"{"error":"Message is required"}"#);
        assert_eq!(message, "Message is required");
    }

    #[test]
    fn falls_back_to_message_field_then_body() {
        assert_eq!(
            server_message(StatusCode::NOT_FOUND, r#"{"message":"Session not found"}"#),
            "Session not found"
        );
        assert_eq!(
            server_message(StatusCode::BAD_GATEWAY, "upstream down"),
            "upstream down"
        );
    }

    #[test]
    fn empty_body_uses_status_text() {
        assert_eq!(
            server_message(StatusCode::SERVICE_UNAVAILABLE, ""),
            "503 Service Unavailable"
        );
    }

    #[test]
    fn endpoint_escapes_segments() {
        let base = parse_base("https://api.example.com/dev/customer-returns/").unwrap();
        let url = endpoint(&base, &["sessions", "a b/c"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/dev/customer-returns/sessions/a%20b%2Fc"
        );
    }
}
