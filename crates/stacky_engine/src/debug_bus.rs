//! In-memory diagnostic bus shown behind the password-gated debug view.
//!
//! Every buffer is capped at [`MAX_ENTRIES`]; the oldest entries fall off first.
//! Values are redacted before they are stored. Nothing in this module may use
//! the logging macros: [`BusLogger`] feeds log records back into the bus while
//! its lock is taken.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use log::{Level, LevelFilter, Log, Metadata, Record};
use serde::Serialize;
use serde_json::{json, Value};
use simplelog::{Config, SharedLogger};

use crate::http::{ApiCall, ApiObserver};
use crate::preview::{PreviewEvent, PreviewObserver};
use crate::redact::{redact_url, redact_value};

pub const MAX_ENTRIES: usize = 1000;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: String,
    pub level: String,
    pub message: String,
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCallEntry {
    pub id: u64,
    pub timestamp: String,
    pub method: String,
    pub url: String,
    /// `0` when the request never got a response.
    pub status: u16,
    pub duration_ms: u64,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChangeEntry {
    pub id: u64,
    pub timestamp: String,
    pub component: String,
    pub property: String,
    pub old_value: Value,
    pub new_value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhotoEventEntry {
    pub id: u64,
    pub timestamp: String,
    pub event: String,
    pub details: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEntry {
    pub id: u64,
    pub timestamp: String,
    pub message: String,
    pub context: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub timestamp: String,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugSummary {
    pub total_logs: usize,
    pub total_api_calls: usize,
    pub total_state_changes: usize,
    pub total_photo_events: usize,
    pub total_errors: usize,
    pub last_activity: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugSnapshot {
    pub session_data: Option<SessionSnapshot>,
    pub logs: Vec<LogEntry>,
    pub api_calls: Vec<ApiCallEntry>,
    pub state_changes: Vec<StateChangeEntry>,
    pub photo_events: Vec<PhotoEventEntry>,
    pub errors: Vec<ErrorEntry>,
    pub summary: DebugSummary,
}

#[derive(Default)]
struct Buffers {
    enabled: bool,
    next_id: u64,
    logs: VecDeque<LogEntry>,
    api_calls: VecDeque<ApiCallEntry>,
    state_changes: VecDeque<StateChangeEntry>,
    photo_events: VecDeque<PhotoEventEntry>,
    errors: VecDeque<ErrorEntry>,
    session: Option<SessionSnapshot>,
}

impl Buffers {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn clear(&mut self) {
        self.logs.clear();
        self.api_calls.clear();
        self.state_changes.clear();
        self.photo_events.clear();
        self.errors.clear();
    }
}

fn push_capped<T>(buffer: &mut VecDeque<T>, entry: T) {
    buffer.push_back(entry);
    while buffer.len() > MAX_ENTRIES {
        buffer.pop_front();
    }
}

pub struct DebugBus {
    inner: Mutex<Buffers>,
    clock: Clock,
}

impl Default for DebugBus {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugBus {
    /// A disabled bus using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(Utc::now))
    }

    pub fn with_clock(clock: Clock) -> Self {
        Self {
            inner: Mutex::new(Buffers::default()),
            clock,
        }
    }

    pub fn enable(&self) {
        self.lock().enabled = true;
        self.log(Level::Debug, "Debug bus enabled", None);
    }

    /// Disables recording and drops everything recorded so far.
    pub fn disable(&self) {
        let mut inner = self.lock();
        inner.enabled = false;
        inner.clear();
        inner.session = None;
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn log(&self, level: Level, message: impl Into<String>, data: Option<Value>) {
        let timestamp = self.now();
        let mut inner = self.lock();
        if !inner.enabled {
            return;
        }
        let entry = LogEntry {
            id: inner.allocate_id(),
            timestamp,
            level: level.as_str().to_ascii_lowercase(),
            message: message.into(),
            data: data.as_ref().map(redact_value),
        };
        push_capped(&mut inner.logs, entry);
    }

    pub fn log_api_call(
        &self,
        method: &str,
        url: &str,
        status: u16,
        duration: Duration,
        metadata: Value,
    ) {
        let timestamp = self.now();
        let mut inner = self.lock();
        if !inner.enabled {
            return;
        }
        let entry = ApiCallEntry {
            id: inner.allocate_id(),
            timestamp,
            method: method.to_string(),
            url: redact_url(url),
            status,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            metadata: redact_value(&metadata),
        };
        push_capped(&mut inner.api_calls, entry);
    }

    pub fn log_state_change(&self, component: &str, property: &str, old_value: Value, new_value: Value) {
        let timestamp = self.now();
        let mut inner = self.lock();
        if !inner.enabled {
            return;
        }
        let entry = StateChangeEntry {
            id: inner.allocate_id(),
            timestamp,
            component: component.to_string(),
            property: property.to_string(),
            old_value: redact_value(&old_value),
            new_value: redact_value(&new_value),
        };
        push_capped(&mut inner.state_changes, entry);
    }

    pub fn log_photo_event(&self, event: &str, details: Value) {
        let timestamp = self.now();
        let mut inner = self.lock();
        if !inner.enabled {
            return;
        }
        let entry = PhotoEventEntry {
            id: inner.allocate_id(),
            timestamp,
            event: event.to_string(),
            details: redact_value(&details),
        };
        push_capped(&mut inner.photo_events, entry);
    }

    /// Replaces the latest session snapshot; `Value::Null` means no session.
    pub fn log_session_data(&self, data: Value) {
        let timestamp = self.now();
        let mut inner = self.lock();
        if !inner.enabled {
            return;
        }
        inner.session = Some(SessionSnapshot {
            timestamp,
            data: redact_value(&data),
        });
    }

    pub fn log_error(&self, message: impl Into<String>, context: impl Into<String>, kind: impl Into<String>) {
        let timestamp = self.now();
        let mut inner = self.lock();
        if !inner.enabled {
            return;
        }
        let entry = ErrorEntry {
            id: inner.allocate_id(),
            timestamp,
            message: message.into(),
            context: context.into(),
            kind: kind.into(),
        };
        push_capped(&mut inner.errors, entry);
    }

    pub fn snapshot(&self) -> DebugSnapshot {
        let inner = self.lock();
        DebugSnapshot {
            session_data: inner.session.clone(),
            logs: inner.logs.iter().cloned().collect(),
            api_calls: inner.api_calls.iter().cloned().collect(),
            state_changes: inner.state_changes.iter().cloned().collect(),
            photo_events: inner.photo_events.iter().cloned().collect(),
            errors: inner.errors.iter().cloned().collect(),
            summary: DebugSummary {
                total_logs: inner.logs.len(),
                total_api_calls: inner.api_calls.len(),
                total_state_changes: inner.state_changes.len(),
                total_photo_events: inner.photo_events.len(),
                total_errors: inner.errors.len(),
                last_activity: inner.logs.back().map(|entry| entry.timestamp.clone()),
            },
        }
    }

    /// Pretty-printed JSON of [`DebugBus::snapshot`].
    pub fn export(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.snapshot())
    }

    fn now(&self) -> String {
        (self.clock)().to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    fn lock(&self) -> MutexGuard<'_, Buffers> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ApiObserver for DebugBus {
    fn on_api_call(&self, call: &ApiCall) {
        let status = call.status.unwrap_or(0);
        let success = call.error.is_none() && (200..300).contains(&status);
        let metadata = match &call.error {
            Some(error) => json!({ "ok": false, "failed": true, "error": error }),
            None => json!({ "ok": success }),
        };
        self.log_api_call(&call.method, &call.url, status, call.duration, metadata);

        if call.url.contains("/photos") {
            self.log_photo_event(
                "api_request",
                json!({
                    "method": call.method,
                    "url": redact_url(&call.url),
                    "status": status,
                    "duration": u64::try_from(call.duration.as_millis()).unwrap_or(u64::MAX),
                    "success": success,
                }),
            );
        }
        if let Some(error) = &call.error {
            self.log_error(
                error.clone(),
                format!("API request failed: {} {}", call.method, redact_url(&call.url)),
                "NetworkError",
            );
        }
    }
}

impl PreviewObserver for DebugBus {
    fn on_preview_event(&self, event: &PreviewEvent) {
        match event {
            PreviewEvent::Created {
                blob_url,
                mime,
                size,
            } => self.log_photo_event(
                "blob_created",
                json!({ "blobUrl": blob_url, "mimeType": mime, "size": size }),
            ),
            PreviewEvent::Revoked { blob_url } => {
                self.log_photo_event("blob_revoked", json!({ "blobUrl": blob_url }))
            }
        }
    }
}

/// Log sink forwarding warnings to the bus log and errors to its error buffer.
///
/// Registered next to the terminal/file loggers through `stacky_logging::initialize`.
pub struct BusLogger {
    bus: Arc<DebugBus>,
    level: LevelFilter,
    config: Config,
}

impl BusLogger {
    pub fn new(bus: Arc<DebugBus>) -> Box<Self> {
        Self::with_level(bus, LevelFilter::Warn)
    }

    pub fn with_level(bus: Arc<DebugBus>, level: LevelFilter) -> Box<Self> {
        Box::new(Self {
            bus,
            level,
            config: Config::default(),
        })
    }
}

impl Log for BusLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let message = record.args().to_string();
        match record.level() {
            Level::Error => self.bus.log_error(message, record.target(), "Error"),
            level => self.bus.log(level, message, None),
        }
    }

    fn flush(&self) {}
}

impl SharedLogger for BusLogger {
    fn level(&self) -> LevelFilter {
        self.level
    }

    fn config(&self) -> Option<&Config> {
        Some(&self.config)
    }

    fn as_log(self: Box<Self>) -> Box<dyn Log> {
        Box::new(*self)
    }
}
