use std::time::Duration;

use crate::{CustomerInfo, Message, OpId, PhotoId, Session};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    CreateSession { customer_info: CustomerInfo },
    ValidateSession { session_id: String },
    Send { op_id: OpId, request: SendRequest },
    ScheduleRetry {
        op_id: OpId,
        delay: Duration,
        attempt: u32,
    },
    CancelRetry { op_id: OpId },
    UploadPhoto {
        photo_id: PhotoId,
        session_id: String,
        blob_url: String,
        description: String,
    },
    RevokeBlob { blob_url: String },
    /// Best-effort removal of a staged photo nothing references.
    DeletePhoto { session_id: String, photo_url: String },
    PersistTranscript(Vec<Message>),
    PersistSession(Session),
    ClearSession,
    DebugLogin { password: String },
    PersistDebugFlag,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendRequest {
    Reply {
        message: String,
        /// Blob URL or inline image to attach.
        image: Option<String>,
        history: Vec<Message>,
    },
    Returns {
        session_id: String,
        message: String,
        photo_url: Option<String>,
    },
}
