//! Stacky core: pure chat state machine and view-model helpers.
//!
//! Nothing in this crate performs IO. The shell feeds [`Msg`] values into
//! [`update`] and executes the returned [`Effect`]s.
mod effect;
mod msg;
mod retry;
mod state;
mod update;
mod view_model;

pub use effect::{Effect, SendRequest};
pub use msg::{BotReply, Msg};
pub use retry::{RetryHistoryPolicy, RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES};
pub use state::{
    ChatConfig, ChatMode, ChatState, CustomerInfo, Message, MessageId, OpId, PhotoId, PhotoStage,
    Sender, Session, SessionStatus, DEFAULT_PHOTO_TEXT, FALLBACK_ERROR,
};
pub use update::update;
pub use view_model::{ChatViewModel, DebugAccessView, PhotoView, RetryView};
