use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use serde_json::json;
use stacky_core::{BotReply, Effect, Message, Msg, OpId, SendRequest, Sender};
use stacky_engine::{
    is_blob_url, AssistantReply, DebugBus, EngineCommand, EngineEvent, EngineHandle, HistoryEntry,
    LocalStore, PreviewStore,
};
use stacky_logging::{stacky_debug, stacky_info, stacky_warn};

use super::app::Input;
use super::persistence;

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Executes core effects against the engine and the local store.
pub struct EffectRunner {
    engine: Arc<EngineHandle>,
    store: LocalStore,
    bus: Option<Arc<DebugBus>>,
}

impl EffectRunner {
    pub fn new(
        engine: EngineHandle,
        store: LocalStore,
        bus: Option<Arc<DebugBus>>,
        input_tx: mpsc::Sender<Input>,
    ) -> Self {
        let runner = Self {
            engine: Arc::new(engine),
            store,
            bus,
        };
        runner.spawn_event_loop(input_tx);
        runner
    }

    pub fn previews(&self) -> &PreviewStore {
        self.engine.previews()
    }

    pub fn run(&self, effects: Vec<Effect>) {
        for effect in effects {
            if let Some(command) = self.apply(effect) {
                self.engine.send(command);
            }
        }
    }

    /// Local effects are handled here; the rest become engine commands.
    fn apply(&self, effect: Effect) -> Option<EngineCommand> {
        match effect {
            Effect::CreateSession { customer_info } => {
                stacky_info!("Creating returns session");
                Some(EngineCommand::CreateSession { customer_info })
            }
            Effect::ValidateSession { session_id } => {
                Some(EngineCommand::ValidateSession { session_id })
            }
            Effect::Send { op_id, request } => Some(self.send_command(op_id, request)),
            Effect::ScheduleRetry {
                op_id,
                delay,
                attempt,
            } => {
                stacky_info!("Retrying op {} in {:?} (attempt {})", op_id, delay, attempt);
                if let Some(bus) = &self.bus {
                    bus.log_state_change(
                        "ChatWidget",
                        "retryState",
                        serde_json::Value::Null,
                        json!({
                            "opId": op_id,
                            "attempt": attempt,
                            "delayMs": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        }),
                    );
                }
                Some(EngineCommand::ScheduleRetry { op_id, delay })
            }
            Effect::CancelRetry { op_id } => Some(EngineCommand::CancelRetry { op_id }),
            Effect::UploadPhoto {
                photo_id,
                session_id,
                blob_url,
                description,
            } => Some(EngineCommand::UploadPhoto {
                photo_id,
                session_id,
                blob_url,
                description,
            }),
            Effect::RevokeBlob { blob_url } => Some(EngineCommand::RevokeBlob { blob_url }),
            Effect::DeletePhoto {
                session_id,
                photo_url,
            } => Some(EngineCommand::DeletePhoto {
                session_id,
                photo_url,
            }),
            Effect::PersistTranscript(messages) => {
                persistence::save_transcript(&self.store, &messages);
                None
            }
            Effect::PersistSession(session) => {
                persistence::save_session(&self.store, &session);
                Some(EngineCommand::RefreshDebugSession {
                    session_id: session.session_id,
                })
            }
            Effect::ClearSession => {
                persistence::clear_session(&self.store);
                Some(EngineCommand::RefreshDebugSession { session_id: None })
            }
            Effect::DebugLogin { password } => Some(EngineCommand::DebugLogin { password }),
            Effect::PersistDebugFlag => {
                persistence::set_debug_flag(&self.store);
                None
            }
        }
    }

    fn send_command(&self, op_id: OpId, request: SendRequest) -> EngineCommand {
        match request {
            SendRequest::Reply {
                message,
                image,
                history,
            } => EngineCommand::SendReply {
                op_id,
                message,
                image_ref: image,
                history: history
                    .iter()
                    .map(|entry| history_entry(self.previews(), entry))
                    .collect(),
            },
            SendRequest::Returns {
                session_id,
                message,
                photo_url,
            } => EngineCommand::SendReturns {
                op_id,
                session_id,
                message,
                photo_url,
            },
        }
    }

    fn spawn_event_loop(&self, input_tx: mpsc::Sender<Input>) {
        let engine = self.engine.clone();
        thread::spawn(move || loop {
            if let Some(msg) = engine
                .recv_timeout(Duration::from_millis(100))
                .and_then(map_event)
            {
                if input_tx.send(Input::Core(msg)).is_err() {
                    break;
                }
            }
        });
    }
}

/// Inline history images: server URLs pass through, previews become `data:` URLs.
fn history_entry(previews: &PreviewStore, message: &Message) -> HistoryEntry {
    let image = message
        .s3_url
        .clone()
        .or_else(|| message.image.clone())
        .or_else(|| {
            message
                .blob_url
                .as_deref()
                .filter(|url| is_blob_url(url))
                .and_then(|url| previews.data_url(url))
        });
    HistoryEntry {
        text: message.text.clone(),
        sender: match message.sender {
            Sender::User => "user".to_string(),
            Sender::Assistant => "assistant".to_string(),
        },
        image,
    }
}

fn bot_reply(reply: AssistantReply) -> BotReply {
    BotReply {
        text: reply.text,
        current_step: reply.current_step,
        customer_info: reply.customer_info,
        structured_questions: reply.structured_questions,
        next_steps: reply.next_steps,
    }
}

pub(crate) fn map_event(event: EngineEvent) -> Option<Msg> {
    let msg = match event {
        EngineEvent::SessionCreated(created) => Msg::SessionStarted {
            session_id: created.session_id,
            current_step: created.current_step,
            customer_info: created.customer_info,
            initial_message: created.initial_message,
            timestamp_ms: now_ms(),
        },
        EngineEvent::SessionCreateFailed(error) => {
            stacky_warn!("Session creation failed: {}", error);
            Msg::SessionStartFailed {
                error: error.message,
            }
        }
        EngineEvent::SessionChecked { session_id, active } => {
            Msg::SessionChecked { session_id, active }
        }
        EngineEvent::ReplyReady { op_id, reply } => Msg::ReplyReceived {
            op_id,
            reply: bot_reply(reply),
            timestamp_ms: now_ms(),
        },
        EngineEvent::SendFailed { op_id, error } => {
            stacky_warn!("Send {} failed ({}): {}", op_id, error.kind, error);
            Msg::SendFailed {
                op_id,
                session_expired: error.is_session_gone(),
                error: error.message,
            }
        }
        EngineEvent::RetryDue { op_id } => Msg::RetryTimerFired { op_id },
        EngineEvent::PhotoUploaded {
            photo_id,
            photo_url,
        } => Msg::PhotoUploaded {
            photo_id,
            photo_url,
        },
        EngineEvent::PhotoUploadFailed { photo_id, error } => {
            stacky_warn!("Photo {} upload failed: {}", photo_id, error);
            Msg::PhotoUploadFailed {
                photo_id,
                session_expired: error.is_session_gone(),
                error: error.message,
            }
        }
        EngineEvent::PhotoDeleted { photo_url, result } => {
            match result {
                Ok(()) => stacky_debug!("Deleted orphaned photo {}", photo_url),
                Err(error) => stacky_warn!("Could not delete photo {}: {}", photo_url, error),
            }
            return None;
        }
        EngineEvent::DebugLoginFinished(Ok(())) => Msg::DebugLoginSucceeded,
        EngineEvent::DebugLoginFinished(Err(error)) => Msg::DebugLoginFailed {
            error: error.message,
        },
    };
    Some(msg)
}

#[cfg(test)]
mod tests {
    use stacky_engine::{ApiError, FailureKind};

    use super::*;

    #[test]
    fn gone_session_errors_mark_the_send_expired() {
        let msg = map_event(EngineEvent::SendFailed {
            op_id: 3,
            error: ApiError {
                kind: FailureKind::HttpStatus(410),
                message: "Session expired".into(),
            },
        });
        assert_eq!(
            msg,
            Some(Msg::SendFailed {
                op_id: 3,
                error: "Session expired".into(),
                session_expired: true,
            })
        );

        let msg = map_event(EngineEvent::SendFailed {
            op_id: 3,
            error: ApiError {
                kind: FailureKind::Timeout,
                message: String::new(),
            },
        });
        assert!(matches!(
            msg,
            Some(Msg::SendFailed {
                session_expired: false,
                ..
            })
        ));
    }

    #[test]
    fn gone_session_errors_mark_the_upload_expired() {
        let msg = map_event(EngineEvent::PhotoUploadFailed {
            photo_id: 2,
            error: ApiError {
                kind: FailureKind::HttpStatus(404),
                message: "Session not found".into(),
            },
        });
        assert_eq!(
            msg,
            Some(Msg::PhotoUploadFailed {
                photo_id: 2,
                error: "Session not found".into(),
                session_expired: true,
            })
        );
    }

    #[test]
    fn photo_cleanup_results_stay_in_the_shell() {
        let msg = map_event(EngineEvent::PhotoDeleted {
            photo_url: "https://s3/x.jpg".into(),
            result: Ok(()),
        });
        assert_eq!(msg, None);
    }

    #[test]
    fn structured_reply_fields_reach_the_core() {
        let msg = map_event(EngineEvent::ReplyReady {
            op_id: 1,
            reply: AssistantReply {
                text: "Which item?".into(),
                current_step: Some("identify".into()),
                customer_info: None,
                structured_questions: vec!["Order number?".into()],
                next_steps: Vec::new(),
            },
        });
        match msg {
            Some(Msg::ReplyReceived { op_id, reply, .. }) => {
                assert_eq!(op_id, 1);
                assert_eq!(reply.current_step.as_deref(), Some("identify"));
                assert_eq!(reply.structured_questions, vec!["Order number?".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn history_prefers_server_urls_and_inlines_previews() {
        let previews = PreviewStore::new();
        let blob = previews.create_object_url(&b"hi"[..], "image/png", "a.png");

        let mut uploaded = Message::user(1, "box", 0);
        uploaded.s3_url = Some("https://s3/box.jpg".into());
        uploaded.blob_url = Some(blob.clone());
        assert_eq!(
            history_entry(&previews, &uploaded).image.as_deref(),
            Some("https://s3/box.jpg")
        );

        let mut local = Message::user(2, "label", 0);
        local.blob_url = Some(blob);
        assert_eq!(
            history_entry(&previews, &local).image.as_deref(),
            Some("data:image/png;base64,aGk=")
        );

        let reply = history_entry(&previews, &Message::assistant(3, "ok", 0));
        assert_eq!(reply.sender, "assistant");
        assert_eq!(reply.image, None);
    }
}
