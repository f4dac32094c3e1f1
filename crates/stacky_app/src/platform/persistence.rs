//! Maps chat state onto the local store keys.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stacky_core::{CustomerInfo, Message, Sender, Session, SessionStatus};
use stacky_engine::{
    LocalStore, SaveOutcome, CHAT_MESSAGES_KEY, CURRENT_STEP_KEY, CUSTOMER_INFO_KEY,
    DEBUG_FLAG_KEY, RETURN_SESSION_ID_KEY,
};
use stacky_logging::{stacky_info, stacky_warn};

const DEBUG_FLAG_ON: &str = "1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredMessage {
    id: u64,
    text: String,
    sender: String,
    /// RFC 3339.
    timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    blob_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    s3_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    structured_questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    next_steps: Vec<String>,
}

impl From<&Message> for StoredMessage {
    fn from(message: &Message) -> Self {
        let timestamp = Utc
            .timestamp_millis_opt(message.timestamp_ms)
            .single()
            .unwrap_or_else(Utc::now);
        Self {
            id: message.id,
            text: message.text.clone(),
            sender: match message.sender {
                Sender::User => "user".to_string(),
                Sender::Assistant => "assistant".to_string(),
            },
            timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            image: message.image.clone(),
            blob_url: message.blob_url.clone(),
            s3_url: message.s3_url.clone(),
            structured_questions: message.structured_questions.clone(),
            next_steps: message.next_steps.clone(),
        }
    }
}

impl StoredMessage {
    fn into_message(self) -> Message {
        let timestamp_ms = DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|parsed| parsed.timestamp_millis())
            .unwrap_or(0);
        let mut message = match self.sender.as_str() {
            "assistant" => Message::assistant(self.id, self.text, timestamp_ms),
            _ => Message::user(self.id, self.text, timestamp_ms),
        };
        message.image = self.image;
        message.blob_url = self.blob_url;
        message.s3_url = self.s3_url;
        message.structured_questions = self.structured_questions;
        message.next_steps = self.next_steps;
        message
    }
}

pub(crate) fn save_transcript(store: &LocalStore, messages: &[Message]) -> SaveOutcome {
    let stored: Vec<StoredMessage> = messages.iter().map(StoredMessage::from).collect();
    let outcome = store.save_json(CHAT_MESSAGES_KEY, &stored);
    if outcome != SaveOutcome::Stored {
        stacky_warn!("Transcript persisted with degradation: {:?}", outcome);
    }
    outcome
}

pub(crate) fn load_transcript(store: &LocalStore) -> Vec<Message> {
    let stored: Vec<StoredMessage> = store.load_as(CHAT_MESSAGES_KEY).unwrap_or_default();
    stored.into_iter().map(StoredMessage::into_message).collect()
}

pub(crate) fn save_session(store: &LocalStore, session: &Session) {
    let Some(session_id) = &session.session_id else {
        clear_session(store);
        return;
    };
    store.save(RETURN_SESSION_ID_KEY, &Value::String(session_id.clone()));
    store.save_json(CUSTOMER_INFO_KEY, &session.customer_info);
    match &session.current_step {
        Some(step) => {
            store.save(CURRENT_STEP_KEY, &Value::String(step.clone()));
        }
        None => store.remove(CURRENT_STEP_KEY),
    }
}

/// Restored sessions start as `Inactive`; the core validates them.
pub(crate) fn load_session(store: &LocalStore) -> Option<Session> {
    let session_id: String = store.load_as(RETURN_SESSION_ID_KEY)?;
    let customer_info: CustomerInfo = store.load_as(CUSTOMER_INFO_KEY).unwrap_or_default();
    let current_step: Option<String> = store.load_as(CURRENT_STEP_KEY);
    stacky_info!("Found persisted session {}", session_id);
    Some(Session {
        session_id: Some(session_id),
        current_step,
        customer_info,
        status: SessionStatus::Inactive,
    })
}

pub(crate) fn clear_session(store: &LocalStore) {
    store.remove(RETURN_SESSION_ID_KEY);
    store.remove(CUSTOMER_INFO_KEY);
    store.remove(CURRENT_STEP_KEY);
}

pub(crate) fn set_debug_flag(store: &LocalStore) {
    store.save(DEBUG_FLAG_KEY, &Value::String(DEBUG_FLAG_ON.to_string()));
}

pub(crate) fn debug_flag(store: &LocalStore) -> bool {
    store.load_as::<String>(DEBUG_FLAG_KEY).as_deref() == Some(DEBUG_FLAG_ON)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use stacky_engine::FileBackend;
    use tempfile::TempDir;

    use super::*;

    fn sample_transcript() -> Vec<Message> {
        let mut user = Message::user(1, "Here is the box", 1_714_564_800_123);
        user.s3_url = Some("https://s3/box.jpg".into());
        let mut bot = Message::assistant(2, "Thanks!", 1_714_564_801_000);
        bot.structured_questions = vec!["Is it damaged?".into()];
        bot.next_steps = vec!["Print label".into()];
        vec![user, bot]
    }

    #[test]
    fn transcript_survives_a_restart() {
        let temp = TempDir::new().unwrap();
        let store = LocalStore::new(Arc::new(FileBackend::new(temp.path().to_path_buf(), 1 << 20)));
        let transcript = sample_transcript();
        assert_eq!(save_transcript(&store, &transcript), SaveOutcome::Stored);

        let reopened = LocalStore::new(Arc::new(FileBackend::new(temp.path().to_path_buf(), 1 << 20)));
        assert_eq!(load_transcript(&reopened), transcript);
    }

    #[test]
    fn stored_transcript_uses_camel_case_keys() {
        let store = LocalStore::in_memory();
        save_transcript(&store, &sample_transcript());
        let raw = store.load(CHAT_MESSAGES_KEY).unwrap();
        assert_eq!(raw[0]["s3Url"], "https://s3/box.jpg");
        assert_eq!(raw[0]["sender"], "user");
        assert_eq!(raw[0]["timestamp"], "2024-05-01T12:00:00.123Z");
        assert_eq!(raw[1]["structuredQuestions"][0], "Is it damaged?");
        assert!(raw[1].get("image").is_none());
    }

    #[test]
    fn session_round_trip_and_clear() {
        let store = LocalStore::in_memory();
        let mut info = BTreeMap::new();
        info.insert("name".to_string(), "Ada".to_string());
        save_session(
            &store,
            &Session {
                session_id: Some("s-9".into()),
                current_step: Some("photos".into()),
                customer_info: info.clone(),
                status: SessionStatus::Active,
            },
        );

        let restored = load_session(&store).expect("session");
        assert_eq!(restored.session_id.as_deref(), Some("s-9"));
        assert_eq!(restored.current_step.as_deref(), Some("photos"));
        assert_eq!(restored.customer_info, info);
        assert_eq!(restored.status, SessionStatus::Inactive);

        clear_session(&store);
        assert_eq!(load_session(&store), None);
    }

    #[test]
    fn debug_flag_is_off_until_set() {
        let store = LocalStore::in_memory();
        assert!(!debug_flag(&store));
        set_debug_flag(&store);
        assert!(debug_flag(&store));
    }
}
