//! Stacky engine: HTTP clients, retry timers, previews, storage and the debug bus.
mod debug_bus;
mod engine;
mod http;
mod preview;
mod redact;
mod reply;
mod retry;
mod returns;
mod store;
mod types;

pub use debug_bus::{
    ApiCallEntry, BusLogger, Clock, DebugBus, DebugSnapshot, DebugSummary, ErrorEntry, LogEntry,
    PhotoEventEntry, SessionSnapshot, StateChangeEntry, MAX_ENTRIES,
};
pub use engine::{EngineCommand, EngineConfig, EngineError, EngineHandle};
pub use http::{ApiCall, ApiObserver, ApiTransport, HttpSettings};
pub use preview::{
    is_blob_url, mime_for_path, Preview, PreviewEvent, PreviewObserver, PreviewStore,
    BLOB_SCHEME_PREFIX,
};
pub use redact::{redact_url, redact_value, REDACTED};
pub use reply::{ReqwestStackyClient, StackyApi};
pub use retry::RetryScheduler;
pub use returns::{PhotoUpload, ReqwestReturnsClient, ReturnsApi, SessionInfo};
pub use store::{
    FileBackend, KeyValueBackend, LocalStore, MemoryBackend, SaveOutcome, StorageError,
    CHAT_MESSAGES_KEY, CURRENT_STEP_KEY, CUSTOMER_INFO_KEY, DEBUG_FLAG_KEY, DEFAULT_QUOTA_BYTES,
    RETURN_SESSION_ID_KEY, TRIMMED_ENTRY_COUNT,
};
pub use types::{
    ApiError, AssistantReply, CreatedSession, EngineEvent, FailureKind, HistoryEntry, OpId,
    PhotoId, ReplyRequest,
};
