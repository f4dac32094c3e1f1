use std::collections::{BTreeMap, VecDeque};

use crate::retry::{RetryHistoryPolicy, RetryPolicy};
use crate::view_model::{ChatViewModel, DebugAccessView, PhotoView, RetryView};

pub type MessageId = u64;
pub type OpId = u64;
pub type PhotoId = u64;
pub type CustomerInfo = BTreeMap<String, String>;

/// Banner text used when a failure carries no usable message.
pub const FALLBACK_ERROR: &str = "Uh Oh, Stacky knocked over some boxes!";
/// Caption for a photo message sent without a description.
pub const DEFAULT_PHOTO_TEXT: &str = "Photo";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub text: String,
    pub sender: Sender,
    pub timestamp_ms: i64,
    /// Inline image payload (usually a `data:` URL) sent to the reply endpoint.
    pub image: Option<String>,
    /// Process-local preview, valid until revoked.
    pub blob_url: Option<String>,
    /// Server-confirmed location of an uploaded photo.
    pub s3_url: Option<String>,
    pub structured_questions: Vec<String>,
    pub next_steps: Vec<String>,
}

impl Message {
    pub fn user(id: MessageId, text: impl Into<String>, timestamp_ms: i64) -> Self {
        Self::new(id, text, Sender::User, timestamp_ms)
    }

    pub fn assistant(id: MessageId, text: impl Into<String>, timestamp_ms: i64) -> Self {
        Self::new(id, text, Sender::Assistant, timestamp_ms)
    }

    fn new(id: MessageId, text: impl Into<String>, sender: Sender, timestamp_ms: i64) -> Self {
        Self {
            id,
            text: text.into(),
            sender,
            timestamp_ms,
            image: None,
            blob_url: None,
            s3_url: None,
            structured_questions: Vec::new(),
            next_steps: Vec::new(),
        }
    }

    /// Best image reference to display: server URL, then preview, then inline data.
    pub fn display_image(&self) -> Option<&str> {
        self.s3_url
            .as_deref()
            .or(self.blob_url.as_deref())
            .or(self.image.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Inactive,
    Initializing,
    Active,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Session {
    pub session_id: Option<String>,
    pub current_step: Option<String>,
    pub customer_info: CustomerInfo,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatMode {
    /// Plain completion proxy (`/api/reply`).
    #[default]
    Reply,
    /// Customer Returns session API.
    Returns,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatConfig {
    pub mode: ChatMode,
    pub retry: RetryPolicy,
    pub history_policy: RetryHistoryPolicy,
    /// Sent when a returns session is created.
    pub customer_info: CustomerInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoStage {
    /// Preview shown, waiting for a session to upload into.
    Staged,
    Uploading,
    UploadFailed,
    /// Server URL attached; the follow-up send is queued.
    Uploaded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StagedPhoto {
    pub(crate) photo_id: PhotoId,
    pub(crate) message_id: MessageId,
    pub(crate) blob_url: String,
    pub(crate) description: String,
    pub(crate) stage: PhotoStage,
    /// Session the photo was uploaded into.
    pub(crate) session_id: Option<String>,
    pub(crate) server_url: Option<String>,
    pub(crate) error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpPhase {
    Queued,
    WaitingForSession,
    InFlight,
    RetryPending,
}

/// One logical send. Retries reuse it so the transcript never gets a second user entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SendOp {
    pub(crate) op_id: OpId,
    pub(crate) text: String,
    /// User message this send belongs to, if it created one.
    pub(crate) user_message_id: Option<MessageId>,
    pub(crate) photo_id: Option<PhotoId>,
    pub(crate) photo_url: Option<String>,
    pub(crate) image_ref: Option<String>,
    /// Conversation history captured at send time, or an explicit override.
    pub(crate) history: Vec<Message>,
    pub(crate) history_overridden: bool,
    pub(crate) retries: u32,
    pub(crate) phase: OpPhase,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) enum DebugLogin {
    #[default]
    Idle,
    Checking,
    Granted,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatState {
    pub(crate) config: ChatConfig,
    pub(crate) messages: Vec<Message>,
    pub(crate) input: String,
    pub(crate) session: Session,
    pub(crate) outbox: VecDeque<SendOp>,
    pub(crate) photos: BTreeMap<PhotoId, StagedPhoto>,
    pub(crate) error: Option<String>,
    pub(crate) debug_enabled: bool,
    pub(crate) debug_login: DebugLogin,
    next_message_id: MessageId,
    next_op_id: OpId,
    next_photo_id: PhotoId,
    dirty: bool,
}

impl Default for ChatState {
    fn default() -> Self {
        Self::new(ChatConfig::default())
    }
}

impl ChatState {
    pub fn new(config: ChatConfig) -> Self {
        Self {
            config,
            messages: Vec::new(),
            input: String::new(),
            session: Session::default(),
            outbox: VecDeque::new(),
            photos: BTreeMap::new(),
            error: None,
            debug_enabled: false,
            debug_login: DebugLogin::Idle,
            next_message_id: 1,
            next_op_id: 1,
            next_photo_id: 1,
            dirty: false,
        }
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// True while a send is in flight, waiting for a session, or waiting on a retry timer.
    pub fn is_loading(&self) -> bool {
        !self.outbox.is_empty()
    }

    pub fn view(&self) -> ChatViewModel {
        let retry = self.outbox.front().and_then(|op| {
            (op.phase == OpPhase::RetryPending).then_some(RetryView {
                op_id: op.op_id,
                attempt: op.retries,
                max_retries: self.config.retry.max_retries,
            })
        });
        let debug = match &self.debug_login {
            DebugLogin::Idle => DebugAccessView::Locked,
            DebugLogin::Checking => DebugAccessView::Checking,
            DebugLogin::Granted => DebugAccessView::GrantedPendingRestart,
            DebugLogin::Failed(reason) => DebugAccessView::Denied(reason.clone()),
        };
        ChatViewModel {
            mode: self.config.mode,
            messages: self.messages.clone(),
            input: self.input.clone(),
            is_loading: self.is_loading(),
            retry,
            error: self.error.clone(),
            session_status: self.session.status,
            session_id: self.session.session_id.clone(),
            current_step: self.session.current_step.clone(),
            photos: self
                .photos
                .values()
                .map(|photo| PhotoView {
                    photo_id: photo.photo_id,
                    message_id: photo.message_id,
                    stage: photo.stage,
                    error: photo.error.clone(),
                })
                .collect(),
            debug_enabled: self.debug_enabled,
            debug,
            dirty: self.dirty,
        }
    }

    /// Returns whether anything changed since the last call, and resets the flag.
    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn push_message(&mut self, mut message: Message) -> MessageId {
        let id = self.allocate_message_id();
        message.id = id;
        self.messages.push(message);
        self.mark_dirty();
        id
    }

    pub(crate) fn message_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|message| message.id == id)
    }

    pub(crate) fn replace_messages(&mut self, messages: Vec<Message>) {
        self.next_message_id = messages
            .iter()
            .map(|message| message.id)
            .max()
            .map_or(1, |max| max + 1);
        self.messages = messages;
        self.mark_dirty();
    }

    fn allocate_message_id(&mut self) -> MessageId {
        let id = self.next_message_id;
        self.next_message_id += 1;
        id
    }

    pub(crate) fn allocate_op_id(&mut self) -> OpId {
        let id = self.next_op_id;
        self.next_op_id += 1;
        id
    }

    pub(crate) fn allocate_photo_id(&mut self) -> PhotoId {
        let id = self.next_photo_id;
        self.next_photo_id += 1;
        id
    }

    pub(crate) fn head_mut(&mut self, op_id: OpId) -> Option<&mut SendOp> {
        self.outbox.front_mut().filter(|op| op.op_id == op_id)
    }

    pub(crate) fn active_session_id(&self) -> Option<&str> {
        match self.session.status {
            SessionStatus::Active => self.session.session_id.as_deref(),
            _ => None,
        }
    }
}
