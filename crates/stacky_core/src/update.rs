use stacky_logging::{stacky_debug, stacky_error, stacky_info, stacky_warn};

use crate::retry::RetryHistoryPolicy;
use crate::state::{DebugLogin, OpPhase, SendOp, StagedPhoto};
use crate::{
    BotReply, ChatMode, ChatState, CustomerInfo, Effect, Message, Msg, OpId, PhotoId, PhotoStage,
    SendRequest, Session, SessionStatus, DEFAULT_PHOTO_TEXT, FALLBACK_ERROR,
};

/// Pure update function: applies a message to state and returns any effects.
pub fn update(mut state: ChatState, msg: Msg) -> (ChatState, Vec<Effect>) {
    let effects = match msg {
        Msg::InputChanged(text) => {
            if state.input != text {
                state.input = text;
                state.mark_dirty();
            }
            Vec::new()
        }
        Msg::MessageSubmitted {
            timestamp_ms,
            history_override,
        } => submit_message(&mut state, timestamp_ms, history_override),
        Msg::Restore {
            messages,
            session,
            debug_enabled,
        } => restore(&mut state, messages, session, debug_enabled),
        Msg::StartSessionClicked => {
            if state.config.mode == ChatMode::Returns
                && matches!(
                    state.session.status,
                    SessionStatus::Inactive | SessionStatus::Error
                )
            {
                ensure_session(&mut state)
            } else {
                Vec::new()
            }
        }
        Msg::SessionStarted {
            session_id,
            current_step,
            customer_info,
            initial_message,
            timestamp_ms,
        } => session_started(
            &mut state,
            Session {
                session_id: Some(session_id),
                current_step,
                customer_info,
                status: SessionStatus::Active,
            },
            initial_message,
            timestamp_ms,
        ),
        Msg::SessionStartFailed { error } => session_start_failed(&mut state, &error),
        Msg::SessionChecked { session_id, active } => {
            session_checked(&mut state, &session_id, active)
        }
        Msg::ReplyReceived {
            op_id,
            reply,
            timestamp_ms,
        } => reply_received(&mut state, op_id, reply, timestamp_ms),
        Msg::SendFailed {
            op_id,
            error,
            session_expired,
        } => send_failed(&mut state, op_id, &error, session_expired),
        Msg::RetryTimerFired { op_id } => match state.head_mut(op_id) {
            Some(op) if op.phase == OpPhase::RetryPending => {
                op.phase = OpPhase::Queued;
                stacky_info!("Retrying send {} (attempt {})", op_id, op.retries);
                dispatch_head(&mut state)
            }
            _ => {
                stacky_debug!("Ignoring stale retry timer for send {}", op_id);
                Vec::new()
            }
        },
        Msg::CancelRetryClicked => cancel_retry(&mut state),
        Msg::PhotoSelected {
            blob_url,
            description,
            timestamp_ms,
            image_data,
        } => photo_selected(&mut state, blob_url, description, timestamp_ms, image_data),
        Msg::PhotoUploaded {
            photo_id,
            photo_url,
        } => photo_uploaded(&mut state, photo_id, photo_url),
        Msg::PhotoUploadFailed {
            photo_id,
            error,
            session_expired,
        } => photo_upload_failed(&mut state, photo_id, error, session_expired),
        Msg::PhotoRetryClicked { photo_id } => {
            match state
                .photos
                .get_mut(&photo_id)
                .filter(|photo| photo.stage == PhotoStage::UploadFailed)
            {
                Some(photo) => {
                    photo.stage = PhotoStage::Staged;
                    photo.error = None;
                    state.mark_dirty();
                    upload_staged_photos(&mut state)
                }
                None => Vec::new(),
            }
        }
        Msg::ErrorDismissed => {
            if state.error.take().is_some() {
                state.mark_dirty();
            }
            Vec::new()
        }
        Msg::DebugLoginSubmitted { password } => {
            if state.debug_login == DebugLogin::Checking {
                return (state, Vec::new());
            }
            state.mark_dirty();
            if password.is_empty() {
                state.debug_login = DebugLogin::Failed("Password required".to_string());
                Vec::new()
            } else {
                state.debug_login = DebugLogin::Checking;
                vec![Effect::DebugLogin { password }]
            }
        }
        Msg::DebugLoginSucceeded => {
            state.debug_login = DebugLogin::Granted;
            state.mark_dirty();
            vec![Effect::PersistDebugFlag]
        }
        Msg::DebugLoginFailed { error } => {
            state.debug_login = DebugLogin::Failed(error);
            state.mark_dirty();
            Vec::new()
        }
        Msg::Tick | Msg::NoOp => Vec::new(),
    };

    (state, effects)
}

fn submit_message(
    state: &mut ChatState,
    timestamp_ms: i64,
    history_override: Option<Vec<Message>>,
) -> Vec<Effect> {
    if state.input.trim().is_empty() {
        return Vec::new();
    }
    // Input stays disabled while a send is pending; a second send would race it.
    if state.is_loading() {
        stacky_debug!("Ignoring submit while send is pending");
        return Vec::new();
    }

    let text = std::mem::take(&mut state.input);
    let history_overridden = history_override.is_some();
    let history = history_override.unwrap_or_else(|| state.messages.clone());
    let user_message_id = state.push_message(Message::user(0, text.clone(), timestamp_ms));
    state.error = None;

    let op_id = state.allocate_op_id();
    state.outbox.push_back(SendOp {
        op_id,
        text,
        user_message_id: Some(user_message_id),
        photo_id: None,
        photo_url: None,
        image_ref: None,
        history,
        history_overridden,
        retries: 0,
        phase: OpPhase::Queued,
    });

    let mut effects = vec![persist_transcript(state)];
    effects.extend(dispatch_head(state));
    effects
}

fn restore(
    state: &mut ChatState,
    messages: Vec<Message>,
    session: Option<Session>,
    debug_enabled: bool,
) -> Vec<Effect> {
    let messages = messages
        .into_iter()
        .map(|mut message| {
            // Previews die with the process that created them.
            message.blob_url = None;
            message
        })
        .collect::<Vec<_>>();
    stacky_info!("Restoring {} messages", messages.len());
    state.replace_messages(messages);
    state.debug_enabled = debug_enabled;

    match session {
        Some(session) if state.config.mode == ChatMode::Returns => match session.session_id {
            Some(session_id) => {
                state.session = Session {
                    session_id: Some(session_id.clone()),
                    status: SessionStatus::Initializing,
                    ..session
                };
                vec![Effect::ValidateSession { session_id }]
            }
            None => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// Moves the outbox head towards the network if it is ready to go.
fn dispatch_head(state: &mut ChatState) -> Vec<Effect> {
    let mode = state.config.mode;
    let history_policy = state.config.history_policy;
    let session_id = state.active_session_id().map(str::to_owned);
    let latest = state.messages.clone();

    let Some(op) = state.outbox.front_mut() else {
        return Vec::new();
    };
    if op.phase != OpPhase::Queued {
        return Vec::new();
    }

    let request = match (mode, session_id) {
        (ChatMode::Reply, _) => {
            let history = if op.history_overridden || history_policy == RetryHistoryPolicy::SnapshotAtSend
            {
                op.history.clone()
            } else {
                latest
                    .into_iter()
                    .filter(|message| Some(message.id) != op.user_message_id)
                    .collect()
            };
            SendRequest::Reply {
                message: op.text.clone(),
                image: op.image_ref.clone(),
                history,
            }
        }
        (ChatMode::Returns, Some(session_id)) => SendRequest::Returns {
            session_id,
            message: op.text.clone(),
            photo_url: op.photo_url.clone(),
        },
        (ChatMode::Returns, None) => {
            op.phase = OpPhase::WaitingForSession;
            state.mark_dirty();
            return ensure_session(state);
        }
    };

    op.phase = OpPhase::InFlight;
    let op_id = op.op_id;
    state.mark_dirty();
    vec![Effect::Send { op_id, request }]
}

fn ensure_session(state: &mut ChatState) -> Vec<Effect> {
    match state.session.status {
        SessionStatus::Initializing | SessionStatus::Active => Vec::new(),
        SessionStatus::Inactive | SessionStatus::Error => {
            stacky_info!("Creating returns session");
            state.session.status = SessionStatus::Initializing;
            state.mark_dirty();
            vec![Effect::CreateSession {
                customer_info: state.config.customer_info.clone(),
            }]
        }
    }
}

fn head_waiting_for_session(state: &ChatState) -> bool {
    state
        .outbox
        .front()
        .is_some_and(|op| op.phase == OpPhase::WaitingForSession)
}

fn requeue_waiting_head(state: &mut ChatState) -> Vec<Effect> {
    match state.outbox.front_mut() {
        Some(op) if op.phase == OpPhase::WaitingForSession => {
            op.phase = OpPhase::Queued;
            dispatch_head(state)
        }
        _ => Vec::new(),
    }
}

fn session_started(
    state: &mut ChatState,
    session: Session,
    initial_message: Option<String>,
    timestamp_ms: i64,
) -> Vec<Effect> {
    stacky_info!(
        "Returns session {:?} active at step {:?}",
        session.session_id,
        session.current_step
    );
    let waiting = head_waiting_for_session(state);
    state.session = session;
    state.mark_dirty();

    let mut effects = vec![Effect::PersistSession(state.session.clone())];
    // A pending send gets its own answer; the greeting only opens an idle conversation.
    if let Some(greeting) = initial_message.filter(|text| !waiting && !text.trim().is_empty()) {
        state.push_message(Message::assistant(0, greeting, timestamp_ms));
        effects.push(persist_transcript(state));
    }
    effects.extend(upload_staged_photos(state));
    effects.extend(requeue_waiting_head(state));
    effects
}

fn session_start_failed(state: &mut ChatState, error: &str) -> Vec<Effect> {
    stacky_warn!("Returns session could not be created: {}", error);
    state.session.status = SessionStatus::Error;
    state.mark_dirty();
    for photo in state
        .photos
        .values_mut()
        .filter(|photo| photo.stage == PhotoStage::Staged)
    {
        photo.stage = PhotoStage::UploadFailed;
        photo.error = Some(error.to_string());
    }

    if head_waiting_for_session(state) {
        fail_head(state, error)
    } else {
        state.error = Some(banner_text(error));
        Vec::new()
    }
}

fn session_checked(state: &mut ChatState, session_id: &str, active: bool) -> Vec<Effect> {
    if state.session.session_id.as_deref() != Some(session_id) {
        return Vec::new();
    }
    state.mark_dirty();
    if active {
        state.session.status = SessionStatus::Active;
        let mut effects = upload_staged_photos(state);
        effects.extend(requeue_waiting_head(state));
        return effects;
    }

    stacky_info!("Session {} is no longer active; dropping it", session_id);
    state.session = Session::default();
    let mut effects = vec![Effect::ClearSession];
    let staged = state
        .photos
        .values()
        .any(|photo| photo.stage == PhotoStage::Staged);
    if head_waiting_for_session(state) || staged {
        effects.extend(ensure_session(state));
    }
    effects
}

fn reply_received(
    state: &mut ChatState,
    op_id: OpId,
    reply: BotReply,
    timestamp_ms: i64,
) -> Vec<Effect> {
    if state.head_mut(op_id).is_none() {
        stacky_debug!("Dropping reply for unknown send {}", op_id);
        return Vec::new();
    }
    let Some(op) = state.outbox.pop_front() else {
        return Vec::new();
    };

    let BotReply {
        text,
        current_step,
        customer_info,
        structured_questions,
        next_steps,
    } = reply;
    let mut message = Message::assistant(0, text, timestamp_ms);
    message.structured_questions = structured_questions;
    message.next_steps = next_steps;
    state.push_message(message);
    state.error = None;

    let mut effects = op
        .photo_id
        .map(|photo_id| release_photo(state, photo_id))
        .unwrap_or_default();
    effects.push(persist_transcript(state));
    if apply_session_update(state, current_step, customer_info) {
        effects.push(Effect::PersistSession(state.session.clone()));
    }
    effects.extend(dispatch_head(state));
    effects
}

fn apply_session_update(
    state: &mut ChatState,
    current_step: Option<String>,
    customer_info: Option<CustomerInfo>,
) -> bool {
    if state.config.mode != ChatMode::Returns {
        return false;
    }
    let mut changed = false;
    if let Some(step) = current_step {
        changed |= state.session.current_step.as_deref() != Some(step.as_str());
        state.session.current_step = Some(step);
    }
    if let Some(info) = customer_info {
        changed |= state.session.customer_info != info;
        state.session.customer_info = info;
    }
    changed
}

fn send_failed(
    state: &mut ChatState,
    op_id: OpId,
    error: &str,
    session_expired: bool,
) -> Vec<Effect> {
    match state.head_mut(op_id) {
        Some(op) if op.phase == OpPhase::InFlight => {}
        _ => {
            stacky_debug!("Ignoring failure for send {} that is not in flight", op_id);
            return Vec::new();
        }
    }

    let mut effects = Vec::new();
    if session_expired && state.config.mode == ChatMode::Returns {
        stacky_info!("Session expired while sending; it will be recreated");
        state.session = Session::default();
        effects.push(Effect::ClearSession);
    }
    effects.extend(fail_head(state, error));
    effects
}

/// Schedules a backoff retry for the head, or drops it once retries are spent.
fn fail_head(state: &mut ChatState, error: &str) -> Vec<Effect> {
    let policy = state.config.retry;
    if state.outbox.is_empty() {
        return Vec::new();
    }
    state.mark_dirty();
    let Some(op) = state.outbox.front_mut() else {
        return Vec::new();
    };

    if policy.allows_retry(op.retries) {
        let delay = policy.delay_for(op.retries);
        op.retries += 1;
        op.phase = OpPhase::RetryPending;
        stacky_warn!(
            "Send {} failed ({}); retry {}/{} in {:?}",
            op.op_id,
            error,
            op.retries,
            policy.max_retries,
            delay
        );
        return vec![Effect::ScheduleRetry {
            op_id: op.op_id,
            delay,
            attempt: op.retries,
        }];
    }

    let Some(op) = state.outbox.pop_front() else {
        return Vec::new();
    };
    stacky_error!(
        "Send {} failed after {} retries: {}",
        op.op_id,
        op.retries,
        error
    );
    state.error = Some(banner_text(error));
    let mut effects = Vec::new();
    if let Some(photo_id) = op.photo_id {
        effects.extend(abandon_photo(state, photo_id, "Photo could not be sent"));
    }
    effects.extend(dispatch_head(state));
    effects
}

fn cancel_retry(state: &mut ChatState) -> Vec<Effect> {
    let pending = state
        .outbox
        .front()
        .is_some_and(|op| op.phase == OpPhase::RetryPending);
    if !pending {
        return Vec::new();
    }
    let Some(op) = state.outbox.pop_front() else {
        return Vec::new();
    };
    stacky_info!("Retry for send {} cancelled", op.op_id);
    state.mark_dirty();

    let mut effects = vec![Effect::CancelRetry { op_id: op.op_id }];
    if let Some(photo_id) = op.photo_id {
        effects.extend(abandon_photo(state, photo_id, "Sending cancelled"));
    }
    effects.extend(dispatch_head(state));
    effects
}

fn photo_selected(
    state: &mut ChatState,
    blob_url: String,
    description: String,
    timestamp_ms: i64,
    image_data: Option<String>,
) -> Vec<Effect> {
    let text = if description.trim().is_empty() {
        DEFAULT_PHOTO_TEXT.to_string()
    } else {
        description
    };
    let history = state.messages.clone();
    let mut message = Message::user(0, text.clone(), timestamp_ms);
    message.blob_url = Some(blob_url.clone());
    if state.config.mode == ChatMode::Reply {
        message.image = image_data;
    }
    let message_id = state.push_message(message);
    let photo_id = state.allocate_photo_id();
    state.error = None;
    state.photos.insert(
        photo_id,
        StagedPhoto {
            photo_id,
            message_id,
            blob_url: blob_url.clone(),
            description: text.clone(),
            stage: PhotoStage::Staged,
            session_id: None,
            server_url: None,
            error: None,
        },
    );
    stacky_debug!("Photo {} staged as message {}", photo_id, message_id);

    let mut effects = vec![persist_transcript(state)];
    match state.config.mode {
        // No upload endpoint: the preview itself travels with the reply request.
        ChatMode::Reply => {
            let op_id = state.allocate_op_id();
            state.outbox.push_back(SendOp {
                op_id,
                text,
                user_message_id: Some(message_id),
                photo_id: Some(photo_id),
                photo_url: None,
                image_ref: Some(blob_url),
                history,
                history_overridden: false,
                retries: 0,
                phase: OpPhase::Queued,
            });
            effects.extend(dispatch_head(state));
        }
        ChatMode::Returns => effects.extend(upload_staged_photos(state)),
    }
    effects
}

fn upload_staged_photos(state: &mut ChatState) -> Vec<Effect> {
    if state.config.mode != ChatMode::Returns {
        return Vec::new();
    }
    let Some(session_id) = state.active_session_id().map(str::to_owned) else {
        let staged = state
            .photos
            .values()
            .any(|photo| photo.stage == PhotoStage::Staged);
        return if staged {
            ensure_session(state)
        } else {
            Vec::new()
        };
    };

    let effects: Vec<Effect> = state
        .photos
        .values_mut()
        .filter(|photo| photo.stage == PhotoStage::Staged)
        .map(|photo| {
            photo.stage = PhotoStage::Uploading;
            photo.session_id = Some(session_id.clone());
            photo.error = None;
            Effect::UploadPhoto {
                photo_id: photo.photo_id,
                session_id: session_id.clone(),
                blob_url: photo.blob_url.clone(),
                description: photo.description.clone(),
            }
        })
        .collect();
    if !effects.is_empty() {
        state.mark_dirty();
    }
    effects
}

fn photo_uploaded(state: &mut ChatState, photo_id: PhotoId, photo_url: String) -> Vec<Effect> {
    let Some(photo) = state
        .photos
        .get_mut(&photo_id)
        .filter(|photo| photo.stage == PhotoStage::Uploading)
    else {
        stacky_debug!("Ignoring upload result for photo {}", photo_id);
        return Vec::new();
    };
    photo.stage = PhotoStage::Uploaded;
    photo.server_url = Some(photo_url.clone());
    photo.error = None;
    let message_id = photo.message_id;
    let blob_url = photo.blob_url.clone();
    let text = photo.description.clone();

    if let Some(message) = state.message_mut(message_id) {
        message.s3_url = Some(photo_url.clone());
        message.blob_url = None;
    }
    state.mark_dirty();
    stacky_info!("Photo {} uploaded", photo_id);

    let op_id = state.allocate_op_id();
    state.outbox.push_back(SendOp {
        op_id,
        text,
        user_message_id: None,
        photo_id: Some(photo_id),
        photo_url: Some(photo_url),
        image_ref: None,
        history: Vec::new(),
        history_overridden: false,
        retries: 0,
        phase: OpPhase::Queued,
    });

    let mut effects = vec![
        Effect::RevokeBlob { blob_url },
        persist_transcript(state),
    ];
    effects.extend(dispatch_head(state));
    effects
}

fn photo_upload_failed(
    state: &mut ChatState,
    photo_id: PhotoId,
    error: String,
    session_expired: bool,
) -> Vec<Effect> {
    let recreate = session_expired && state.config.mode == ChatMode::Returns;
    let Some(photo) = state
        .photos
        .get_mut(&photo_id)
        .filter(|photo| photo.stage == PhotoStage::Uploading)
    else {
        stacky_debug!("Ignoring upload failure for photo {}", photo_id);
        return Vec::new();
    };
    if !recreate {
        stacky_warn!("Photo {} upload failed: {}", photo_id, error);
        photo.stage = PhotoStage::UploadFailed;
        photo.error = Some(error);
        state.mark_dirty();
        return Vec::new();
    }

    stacky_info!("Session expired while uploading photo {}; it will be recreated", photo_id);
    photo.stage = PhotoStage::Staged;
    photo.error = None;
    let dead_session = photo.session_id.take();
    state.mark_dirty();
    let mut effects = Vec::new();
    if dead_session.is_some() && dead_session == state.session.session_id {
        state.session = Session::default();
        effects.push(Effect::ClearSession);
    }
    effects.extend(upload_staged_photos(state));
    effects
}

/// Drops a photo that has reached its end state. Reply-mode previews are revoked
/// once the message holds an inline copy.
fn release_photo(state: &mut ChatState, photo_id: PhotoId) -> Vec<Effect> {
    let Some(photo) = state.photos.remove(&photo_id) else {
        return Vec::new();
    };
    state.mark_dirty();
    let Some(message) = state.message_mut(photo.message_id) else {
        return vec![Effect::RevokeBlob {
            blob_url: photo.blob_url,
        }];
    };
    if message.blob_url.is_none() {
        return Vec::new();
    }
    if message.image.is_none() && message.s3_url.is_none() {
        // The preview is all the transcript has; keep showing it.
        return Vec::new();
    }
    message.blob_url = None;
    vec![Effect::RevokeBlob {
        blob_url: photo.blob_url,
    }]
}

fn abandon_photo(state: &mut ChatState, photo_id: PhotoId, reason: &str) -> Vec<Effect> {
    if state.config.mode == ChatMode::Reply {
        let mut effects = release_photo(state, photo_id);
        if !effects.is_empty() {
            effects.push(persist_transcript(state));
        }
        return effects;
    }
    let Some(photo) = state.photos.get_mut(&photo_id) else {
        return Vec::new();
    };
    photo.error = Some(reason.to_string());
    match (photo.session_id.clone(), photo.server_url.clone()) {
        (Some(session_id), Some(photo_url)) => vec![Effect::DeletePhoto {
            session_id,
            photo_url,
        }],
        _ => Vec::new(),
    }
}

fn persist_transcript(state: &ChatState) -> Effect {
    Effect::PersistTranscript(state.messages.clone())
}

fn banner_text(error: &str) -> String {
    if error.trim().is_empty() {
        FALLBACK_ERROR.to_string()
    } else {
        error.to_string()
    }
}
