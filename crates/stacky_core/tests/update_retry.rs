use std::sync::Once;
use std::time::Duration;

use stacky_core::{
    update, BotReply, ChatConfig, ChatMode, ChatState, Effect, Msg, SendRequest,
    RetryHistoryPolicy, RetryView, FALLBACK_ERROR,
};

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(stacky_logging::initialize_for_tests);
}

fn submit(state: ChatState, text: &str) -> (ChatState, Vec<Effect>) {
    let (state, _) = update(state, Msg::InputChanged(text.to_string()));
    update(
        state,
        Msg::MessageSubmitted {
            timestamp_ms: 0,
            history_override: None,
        },
    )
}

fn fail(state: ChatState, op_id: u64) -> (ChatState, Vec<Effect>) {
    update(
        state,
        Msg::SendFailed {
            op_id,
            error: "502 Bad Gateway".to_string(),
            session_expired: false,
        },
    )
}

fn scheduled_delay(effects: &[Effect]) -> Option<Duration> {
    effects.iter().find_map(|effect| match effect {
        Effect::ScheduleRetry { delay, .. } => Some(*delay),
        _ => None,
    })
}

#[test]
fn backoff_doubles_and_stops_after_three_retries() {
    init_logging();
    let (mut state, _) = submit(ChatState::default(), "hello");
    let mut delays = Vec::new();

    for _ in 0..3 {
        let (next, effects) = fail(state, 1);
        delays.push(scheduled_delay(&effects).expect("retry scheduled"));
        let (next, effects) = update(next, Msg::RetryTimerFired { op_id: 1 });
        assert!(matches!(effects.as_slice(), [Effect::Send { op_id: 1, .. }]));
        state = next;
    }

    assert_eq!(
        delays,
        vec![
            Duration::from_millis(1000),
            Duration::from_millis(2000),
            Duration::from_millis(4000)
        ]
    );

    let (state, effects) = fail(state, 1);
    assert_eq!(scheduled_delay(&effects), None);
    assert!(effects.is_empty());
    let view = state.view();
    assert!(!view.is_loading);
    assert_eq!(view.error.as_deref(), Some("502 Bad Gateway"));
    // Only the user message survives a terminal failure.
    assert_eq!(view.messages.len(), 1);
}

#[test]
fn retry_state_is_exposed_while_timer_pending() {
    init_logging();
    let (state, _) = submit(ChatState::default(), "hello");
    let (state, effects) = fail(state, 1);

    assert_eq!(
        effects,
        vec![Effect::ScheduleRetry {
            op_id: 1,
            delay: Duration::from_millis(1000),
            attempt: 1,
        }]
    );
    assert_eq!(
        state.view().retry,
        Some(RetryView {
            op_id: 1,
            attempt: 1,
            max_retries: 3,
        })
    );

    let (state, _) = update(state, Msg::RetryTimerFired { op_id: 1 });
    assert_eq!(state.view().retry, None);
    assert!(state.view().is_loading);
}

#[test]
fn retry_success_does_not_duplicate_user_message() {
    init_logging();
    let (state, _) = submit(ChatState::default(), "hello");
    let (state, _) = fail(state, 1);
    let (state, _) = update(state, Msg::RetryTimerFired { op_id: 1 });
    let (state, _) = update(
        state,
        Msg::ReplyReceived {
            op_id: 1,
            reply: BotReply::text("hi"),
            timestamp_ms: 9,
        },
    );

    let texts: Vec<_> = state.messages().iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["hello", "hi"]);
    assert_eq!(state.view().error, None);
}

#[test]
fn cancel_clears_timer_and_loading() {
    init_logging();
    let (state, _) = submit(ChatState::default(), "hello");
    let (state, _) = fail(state, 1);
    let (state, effects) = update(state, Msg::CancelRetryClicked);

    assert_eq!(effects, vec![Effect::CancelRetry { op_id: 1 }]);
    assert!(!state.view().is_loading);
    assert_eq!(state.view().retry, None);

    // A timer that fires anyway after cancel is ignored.
    let (state, effects) = update(state, Msg::RetryTimerFired { op_id: 1 });
    assert!(effects.is_empty());
    assert_eq!(state.messages().len(), 1);
}

#[test]
fn cancel_without_pending_timer_is_noop() {
    init_logging();
    let (state, _) = submit(ChatState::default(), "hello");
    let (state, effects) = update(state, Msg::CancelRetryClicked);

    assert!(effects.is_empty());
    assert!(state.view().is_loading);
}

#[test]
fn failure_for_unknown_op_is_ignored() {
    init_logging();
    let (state, _) = submit(ChatState::default(), "hello");
    let (state, effects) = fail(state, 42);
    assert!(effects.is_empty());
    assert_eq!(state.view().retry, None);
}

#[test]
fn empty_error_falls_back_to_friendly_banner() {
    init_logging();
    let config = ChatConfig {
        retry: stacky_core::RetryPolicy {
            max_retries: 0,
            ..Default::default()
        },
        ..ChatConfig::default()
    };
    let (state, _) = submit(ChatState::new(config), "hello");
    let (state, _) = update(
        state,
        Msg::SendFailed {
            op_id: 1,
            error: String::new(),
            session_expired: false,
        },
    );
    assert_eq!(state.view().error.as_deref(), Some(FALLBACK_ERROR));

    let (state, _) = update(state, Msg::ErrorDismissed);
    assert_eq!(state.view().error, None);
}

#[test]
fn expired_session_is_recreated_on_retry() {
    init_logging();
    let config = ChatConfig {
        mode: ChatMode::Returns,
        ..ChatConfig::default()
    };
    let (state, _) = submit(ChatState::new(config), "where is my refund");
    let (state, _) = update(
        state,
        Msg::SessionStarted {
            session_id: "s-1".into(),
            current_step: None,
            customer_info: Default::default(),
            initial_message: None,
            timestamp_ms: 1,
        },
    );
    let (state, effects) = update(
        state,
        Msg::SendFailed {
            op_id: 1,
            error: "Session expired".into(),
            session_expired: true,
        },
    );
    assert_eq!(effects[0], Effect::ClearSession);
    assert!(matches!(effects[1], Effect::ScheduleRetry { .. }));
    assert_eq!(state.session().session_id, None);

    let (_state, effects) = update(state, Msg::RetryTimerFired { op_id: 1 });
    assert!(matches!(effects.as_slice(), [Effect::CreateSession { .. }]));
}

fn retry_history(policy: RetryHistoryPolicy) -> Vec<String> {
    let config = ChatConfig {
        history_policy: policy,
        ..ChatConfig::default()
    };
    let (state, _) = update(
        ChatState::new(config),
        Msg::Restore {
            messages: vec![stacky_core::Message::assistant(1, "earlier", 0)],
            session: None,
            debug_enabled: false,
        },
    );
    let (state, _) = submit(state, "question");
    let (state, _) = fail(state, 1);
    // A photo arrives while the text send waits on its timer.
    let (state, _) = update(
        state,
        Msg::PhotoSelected {
            blob_url: "blob:stacky/1".into(),
            description: "box".into(),
            timestamp_ms: 5,
            image_data: None,
        },
    );
    let (_state, effects) = update(state, Msg::RetryTimerFired { op_id: 1 });
    effects
        .iter()
        .find_map(|effect| match effect {
            Effect::Send {
                request: SendRequest::Reply { history, .. },
                ..
            } => Some(history.iter().map(|m| m.text.clone()).collect()),
            _ => None,
        })
        .expect("retried send")
}

#[test]
fn snapshot_policy_retries_with_transcript_at_send_time() {
    init_logging();
    assert_eq!(
        retry_history(RetryHistoryPolicy::SnapshotAtSend),
        vec!["earlier".to_string()]
    );
}

#[test]
fn latest_policy_retries_with_current_transcript() {
    init_logging();
    assert_eq!(
        retry_history(RetryHistoryPolicy::Latest),
        vec!["earlier".to_string(), "box".to_string()]
    );
}
