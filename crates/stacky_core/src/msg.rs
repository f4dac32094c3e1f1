use crate::{CustomerInfo, Message, OpId, PhotoId, Session};

/// Assistant answer to a send, normalized across both backends.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BotReply {
    pub text: String,
    pub current_step: Option<String>,
    pub customer_info: Option<CustomerInfo>,
    pub structured_questions: Vec<String>,
    pub next_steps: Vec<String>,
}

impl BotReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// User edited the message input.
    InputChanged(String),
    /// User submitted the current input. `history_override` replaces the
    /// conversation history the request would otherwise carry.
    MessageSubmitted {
        timestamp_ms: i64,
        history_override: Option<Vec<Message>>,
    },
    /// Restore persisted state on startup.
    Restore {
        messages: Vec<Message>,
        session: Option<Session>,
        debug_enabled: bool,
    },
    /// User asked to open a returns session before typing anything.
    StartSessionClicked,
    SessionStarted {
        session_id: String,
        current_step: Option<String>,
        customer_info: CustomerInfo,
        initial_message: Option<String>,
        timestamp_ms: i64,
    },
    SessionStartFailed { error: String },
    /// Result of checking a restored session against the server.
    SessionChecked { session_id: String, active: bool },
    ReplyReceived {
        op_id: OpId,
        reply: BotReply,
        timestamp_ms: i64,
    },
    SendFailed {
        op_id: OpId,
        error: String,
        /// Server says the session is gone; a new one must be created.
        session_expired: bool,
    },
    RetryTimerFired { op_id: OpId },
    CancelRetryClicked,
    /// Local preview of a captured or picked photo is ready.
    PhotoSelected {
        blob_url: String,
        description: String,
        timestamp_ms: i64,
        /// Inline `data:` copy of the preview. Reply mode has no upload, so the
        /// message keeps this once the preview is released.
        image_data: Option<String>,
    },
    PhotoUploaded { photo_id: PhotoId, photo_url: String },
    PhotoUploadFailed {
        photo_id: PhotoId,
        error: String,
        /// Server says the session the photo went to is gone.
        session_expired: bool,
    },
    PhotoRetryClicked { photo_id: PhotoId },
    ErrorDismissed,
    DebugLoginSubmitted { password: String },
    DebugLoginSucceeded,
    DebugLoginFailed { error: String },
    /// Render tick.
    Tick,
    NoOp,
}
