use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub type OpId = u64;
pub type PhotoId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    Network,
    Decode,
    /// A local resource (for example a photo preview) is gone.
    MissingResource,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Network => write!(f, "network error"),
            FailureKind::Decode => write!(f, "malformed response"),
            FailureKind::MissingResource => write!(f, "missing local resource"),
        }
    }
}

/// Failure of a call to the reply proxy or the returns API.
///
/// `message` is the server-provided explanation when there is one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: FailureKind,
    pub message: String,
}

impl ApiError {
    pub(crate) fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self.kind {
            FailureKind::HttpStatus(code) => Some(code),
            _ => None,
        }
    }

    /// The returns API answers 404/410 for sessions that expired or were closed.
    pub fn is_session_gone(&self) -> bool {
        matches!(self.kind, FailureKind::HttpStatus(404 | 410))
    }
}

/// Assistant answer normalized across the reply proxy and the returns API.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AssistantReply {
    pub text: String,
    pub current_step: Option<String>,
    pub customer_info: Option<BTreeMap<String, String>>,
    pub structured_questions: Vec<String>,
    pub next_steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSession {
    pub session_id: String,
    pub current_step: Option<String>,
    pub customer_info: BTreeMap<String, String>,
    pub initial_message: Option<String>,
}

/// Entry of the `conversationHistory` array sent to `/api/reply`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub text: String,
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conversation_history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    SessionCreated(CreatedSession),
    SessionCreateFailed(ApiError),
    SessionChecked {
        session_id: String,
        active: bool,
    },
    ReplyReady {
        op_id: OpId,
        reply: AssistantReply,
    },
    SendFailed {
        op_id: OpId,
        error: ApiError,
    },
    RetryDue {
        op_id: OpId,
    },
    PhotoUploaded {
        photo_id: PhotoId,
        photo_url: String,
    },
    PhotoUploadFailed {
        photo_id: PhotoId,
        error: ApiError,
    },
    PhotoDeleted {
        photo_url: String,
        result: Result<(), ApiError>,
    },
    DebugLoginFinished(Result<(), ApiError>),
}
