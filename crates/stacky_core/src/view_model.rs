use crate::{ChatMode, Message, MessageId, OpId, PhotoId, PhotoStage, SessionStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryView {
    pub op_id: OpId,
    /// Retries scheduled so far, starting at 1.
    pub attempt: u32,
    pub max_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoView {
    pub photo_id: PhotoId,
    pub message_id: MessageId,
    pub stage: PhotoStage,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DebugAccessView {
    #[default]
    Locked,
    Checking,
    GrantedPendingRestart,
    Denied(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatViewModel {
    pub mode: ChatMode,
    pub messages: Vec<Message>,
    pub input: String,
    pub is_loading: bool,
    pub retry: Option<RetryView>,
    pub error: Option<String>,
    pub session_status: SessionStatus,
    pub session_id: Option<String>,
    pub current_step: Option<String>,
    pub photos: Vec<PhotoView>,
    pub debug_enabled: bool,
    pub debug: DebugAccessView,
    pub dirty: bool,
}
