use std::collections::BTreeMap;
use std::io;
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use serde_json::json;
use stacky_logging::{stacky_debug, stacky_info, stacky_warn};
use thiserror::Error;

use crate::debug_bus::DebugBus;
use crate::http::{ApiTransport, HttpSettings};
use crate::preview::{is_blob_url, PreviewStore};
use crate::reply::{ReqwestStackyClient, StackyApi};
use crate::returns::{PhotoUpload, ReqwestReturnsClient, ReturnsApi};
use crate::retry::RetryScheduler;
use crate::{ApiError, EngineEvent, FailureKind, OpId, PhotoId, ReplyRequest};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Origin serving `/api/reply` and `/api/debug/login`.
    pub reply_base_url: String,
    /// Base of the Customer Returns API, `/sessions` is appended.
    pub returns_base_url: String,
    pub http: HttpSettings,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to start async runtime: {0}")]
    Runtime(#[from] io::Error),
    #[error("invalid endpoint configuration: {0}")]
    Client(#[from] ApiError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    CreateSession {
        customer_info: BTreeMap<String, String>,
    },
    ValidateSession {
        session_id: String,
    },
    /// `image_ref` may be a preview blob URL; it is inlined as a `data:` URL.
    SendReply {
        op_id: OpId,
        message: String,
        image_ref: Option<String>,
        history: Vec<crate::HistoryEntry>,
    },
    SendReturns {
        op_id: OpId,
        session_id: String,
        message: String,
        photo_url: Option<String>,
    },
    ScheduleRetry {
        op_id: OpId,
        delay: Duration,
    },
    CancelRetry {
        op_id: OpId,
    },
    UploadPhoto {
        photo_id: PhotoId,
        session_id: String,
        blob_url: String,
        description: String,
    },
    RevokeBlob {
        blob_url: String,
    },
    DeletePhoto {
        session_id: String,
        photo_url: String,
    },
    DebugLogin {
        password: String,
    },
    /// Refreshes the session snapshot shown on the debug bus.
    RefreshDebugSession {
        session_id: Option<String>,
    },
}

struct Services {
    reply: Arc<dyn StackyApi>,
    returns: Arc<dyn ReturnsApi>,
    previews: PreviewStore,
    bus: Option<Arc<DebugBus>>,
}

/// Shareable across threads: one thread may send while another drains events.
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
    event_rx: Mutex<mpsc::Receiver<EngineEvent>>,
    previews: PreviewStore,
}

impl EngineHandle {
    /// Builds the reqwest clients and starts the engine thread.
    ///
    /// The bus, when given, observes every HTTP call and preview.
    pub fn new(
        config: EngineConfig,
        previews: PreviewStore,
        bus: Option<Arc<DebugBus>>,
    ) -> Result<Self, EngineError> {
        let mut transport = ApiTransport::new(&config.http)?;
        if let Some(bus) = &bus {
            transport = transport.with_observer(bus.clone());
        }
        let reply = ReqwestStackyClient::new(&config.reply_base_url, transport.clone())?;
        let returns = ReqwestReturnsClient::new(&config.returns_base_url, transport)?;
        Self::with_clients(Arc::new(reply), Arc::new(returns), previews, bus)
    }

    pub fn with_clients(
        reply: Arc<dyn StackyApi>,
        returns: Arc<dyn ReturnsApi>,
        previews: PreviewStore,
        bus: Option<Arc<DebugBus>>,
    ) -> Result<Self, EngineError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("stacky-engine")
            .build()?;
        let (cmd_tx, cmd_rx) = mpsc::channel::<EngineCommand>();
        let (event_tx, event_rx) = mpsc::channel();

        let (due_tx, mut due_rx) = tokio::sync::mpsc::unbounded_channel::<OpId>();
        let scheduler = RetryScheduler::new(runtime.handle().clone(), due_tx);
        let due_events = event_tx.clone();
        runtime.spawn(async move {
            while let Some(op_id) = due_rx.recv().await {
                if due_events.send(EngineEvent::RetryDue { op_id }).is_err() {
                    break;
                }
            }
        });

        let services = Arc::new(Services {
            reply,
            returns,
            previews: previews.clone(),
            bus,
        });

        thread::Builder::new()
            .name("stacky-engine-commands".into())
            .spawn(move || {
                while let Ok(command) = cmd_rx.recv() {
                    match command {
                        // Timer bookkeeping stays in command order.
                        EngineCommand::ScheduleRetry { op_id, delay } => {
                            scheduler.schedule(op_id, delay);
                        }
                        EngineCommand::CancelRetry { op_id } => {
                            scheduler.cancel(op_id);
                        }
                        EngineCommand::RevokeBlob { blob_url } => {
                            services.previews.revoke(&blob_url);
                        }
                        command => {
                            let services = services.clone();
                            let event_tx = event_tx.clone();
                            runtime.spawn(async move {
                                handle_command(&services, command, event_tx).await;
                            });
                        }
                    }
                }
                stacky_debug!("Engine command loop finished");
            })?;

        Ok(Self {
            cmd_tx,
            event_rx: Mutex::new(event_rx),
            previews,
        })
    }

    pub fn send(&self, command: EngineCommand) {
        if self.cmd_tx.send(command).is_err() {
            stacky_warn!("Engine thread is gone, command dropped");
        }
    }

    pub fn try_recv(&self) -> Option<EngineEvent> {
        self.events().try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<EngineEvent> {
        self.events().recv_timeout(timeout).ok()
    }

    pub fn previews(&self) -> &PreviewStore {
        &self.previews
    }

    fn events(&self) -> std::sync::MutexGuard<'_, mpsc::Receiver<EngineEvent>> {
        self.event_rx.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn handle_command(services: &Services, command: EngineCommand, event_tx: mpsc::Sender<EngineEvent>) {
    let event = match command {
        EngineCommand::CreateSession { customer_info } => {
            match services.returns.create_session(&customer_info).await {
                Ok(created) => {
                    stacky_info!("Session created: {}", created.session_id);
                    EngineEvent::SessionCreated(created)
                }
                Err(error) => EngineEvent::SessionCreateFailed(error),
            }
        }
        EngineCommand::ValidateSession { session_id } => {
            let active = match services.returns.get_session(&session_id).await {
                Ok(info) => info.is_active(),
                Err(error) => {
                    stacky_warn!("Session {} could not be validated: {}", session_id, error);
                    false
                }
            };
            EngineEvent::SessionChecked { session_id, active }
        }
        EngineCommand::SendReply {
            op_id,
            message,
            image_ref,
            history,
        } => {
            let result = match resolve_image(&services.previews, image_ref) {
                Ok(image_data) => {
                    let request = ReplyRequest {
                        message,
                        image_data,
                        conversation_history: history,
                    };
                    services.reply.reply(&request).await
                }
                Err(error) => Err(error),
            };
            match result {
                Ok(text) => EngineEvent::ReplyReady {
                    op_id,
                    reply: crate::AssistantReply {
                        text,
                        ..Default::default()
                    },
                },
                Err(error) => EngineEvent::SendFailed { op_id, error },
            }
        }
        EngineCommand::SendReturns {
            op_id,
            session_id,
            message,
            photo_url,
        } => match services
            .returns
            .send_message(&session_id, &message, photo_url.as_deref())
            .await
        {
            Ok(reply) => EngineEvent::ReplyReady { op_id, reply },
            Err(error) => EngineEvent::SendFailed { op_id, error },
        },
        EngineCommand::UploadPhoto {
            photo_id,
            session_id,
            blob_url,
            description,
        } => upload_photo(services, photo_id, &session_id, &blob_url, description).await,
        EngineCommand::DeletePhoto {
            session_id,
            photo_url,
        } => {
            let result = services.returns.delete_photo(&session_id, &photo_url).await;
            if let Err(error) = &result {
                stacky_warn!("Best-effort photo cleanup failed: {}", error);
            }
            EngineEvent::PhotoDeleted { photo_url, result }
        }
        EngineCommand::DebugLogin { password } => {
            EngineEvent::DebugLoginFinished(services.reply.debug_login(&password).await)
        }
        EngineCommand::RefreshDebugSession { session_id } => {
            refresh_debug_session(services, session_id).await;
            return;
        }
        EngineCommand::ScheduleRetry { .. }
        | EngineCommand::CancelRetry { .. }
        | EngineCommand::RevokeBlob { .. } => return,
    };
    let _ = event_tx.send(event);
}

fn resolve_image(previews: &PreviewStore, image_ref: Option<String>) -> Result<Option<String>, ApiError> {
    match image_ref {
        Some(reference) if is_blob_url(&reference) => previews
            .data_url(&reference)
            .map(Some)
            .ok_or_else(|| ApiError::new(FailureKind::MissingResource, "Photo preview is no longer available")),
        other => Ok(other),
    }
}

async fn upload_photo(
    services: &Services,
    photo_id: PhotoId,
    session_id: &str,
    blob_url: &str,
    description: String,
) -> EngineEvent {
    let Some(preview) = services.previews.get(blob_url) else {
        return EngineEvent::PhotoUploadFailed {
            photo_id,
            error: ApiError::new(FailureKind::MissingResource, "Photo preview is no longer available"),
        };
    };
    if let Some(bus) = &services.bus {
        bus.log_photo_event(
            "upload_start",
            json!({
                "fileName": preview.file_name,
                "fileSize": preview.bytes.len(),
                "fileType": preview.mime,
                "sessionId": session_id,
            }),
        );
    }
    let upload = PhotoUpload {
        bytes: preview.bytes,
        file_name: preview.file_name,
        mime: preview.mime,
        description,
    };
    match services.returns.upload_photo(session_id, upload).await {
        Ok(photo_url) => {
            if let Some(bus) = &services.bus {
                bus.log_photo_event(
                    "upload_success",
                    json!({ "photoUrl": photo_url, "sessionId": session_id }),
                );
                bus.log_photo_event(
                    "image_transition",
                    json!({ "from": blob_url, "to": photo_url, "transitionType": "blob_to_s3" }),
                );
            }
            EngineEvent::PhotoUploaded { photo_id, photo_url }
        }
        Err(error) => {
            if let Some(bus) = &services.bus {
                bus.log_photo_event(
                    "upload_error",
                    json!({ "error": error.message, "sessionId": session_id }),
                );
            }
            EngineEvent::PhotoUploadFailed { photo_id, error }
        }
    }
}

async fn refresh_debug_session(services: &Services, session_id: Option<String>) {
    let Some(bus) = services.bus.as_ref().filter(|bus| bus.is_enabled()) else {
        return;
    };
    let Some(session_id) = session_id else {
        bus.log_session_data(serde_json::Value::Null);
        return;
    };
    bus.log(log::Level::Info, format!("Fetching session data for: {session_id}"), None);
    match services.returns.get_session(&session_id).await {
        Ok(info) => {
            let data = serde_json::to_value(&info).unwrap_or(serde_json::Value::Null);
            bus.log_session_data(data);
        }
        Err(error) => {
            bus.log_error(
                error.message.clone(),
                format!("Failed to fetch session {session_id}"),
                "SessionFetchError",
            );
            bus.log_session_data(json!({
                "error": error.message,
                "sessionId": session_id,
                "fetchedAt": chrono::Utc::now().to_rfc3339(),
            }));
        }
    }
}
