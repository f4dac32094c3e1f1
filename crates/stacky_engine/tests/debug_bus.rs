use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use log::{Level, Log, Record};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use stacky_engine::{
    ApiCall, ApiObserver, BusLogger, DebugBus, PreviewEvent, PreviewObserver, PreviewStore,
    MAX_ENTRIES, REDACTED,
};

fn fixed_clock_bus() -> DebugBus {
    DebugBus::with_clock(Arc::new(|| Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()))
}

#[test]
fn disabled_bus_records_nothing() {
    let bus = DebugBus::new();
    bus.log(Level::Info, "hello", None);
    bus.log_api_call("GET", "https://x/y", 200, Duration::from_millis(5), json!({}));
    bus.log_photo_event("blob_created", json!({}));
    bus.log_error("boom", "ctx", "Error");
    let snapshot = bus.snapshot();
    assert!(snapshot.logs.is_empty());
    assert!(snapshot.api_calls.is_empty());
    assert!(snapshot.photo_events.is_empty());
    assert!(snapshot.errors.is_empty());
}

#[test]
fn enabling_logs_and_timestamps_entries() {
    let bus = fixed_clock_bus();
    bus.enable();
    bus.log(Level::Warn, "slow response", Some(json!({"ms": 900})));

    let snapshot = bus.snapshot();
    assert_eq!(snapshot.logs.len(), 2);
    assert_eq!(snapshot.logs[1].level, "warn");
    assert_eq!(snapshot.logs[1].timestamp, "2024-05-01T12:00:00.000Z");
    assert_eq!(snapshot.summary.total_logs, 2);
    assert_eq!(
        snapshot.summary.last_activity.as_deref(),
        Some("2024-05-01T12:00:00.000Z")
    );
    assert!(snapshot.logs[0].id < snapshot.logs[1].id);
}

#[test]
fn buffers_are_capped() {
    let bus = DebugBus::new();
    bus.enable();
    for i in 0..(MAX_ENTRIES + 50) {
        bus.log_photo_event("tick", json!({ "i": i }));
    }
    let snapshot = bus.snapshot();
    assert_eq!(snapshot.photo_events.len(), MAX_ENTRIES);
    assert_eq!(snapshot.photo_events[0].details, json!({"i": 50}));
}

#[test]
fn stored_values_are_redacted() {
    let bus = DebugBus::new();
    bus.enable();
    bus.log(Level::Info, "login", Some(json!({"password": "hunter2", "user": "ada"})));
    bus.log_api_call(
        "GET",
        "https://api.example.com/sessions?token=abc",
        200,
        Duration::from_millis(12),
        json!({"authorization": "Bearer x"}),
    );
    bus.log_state_change("ChatWidget", "customerInfo", Value::Null, json!({"email": "a@b.c"}));
    bus.log_session_data(json!({"sessionId": "s-1", "phone": "555"}));

    let snapshot = bus.snapshot();
    assert_eq!(snapshot.logs[1].data, Some(json!({"password": REDACTED, "user": "ada"})));
    assert!(!snapshot.api_calls[0].url.contains("abc"));
    assert_eq!(snapshot.api_calls[0].metadata, json!({"authorization": REDACTED}));
    assert_eq!(snapshot.api_calls[0].duration_ms, 12);
    assert_eq!(snapshot.state_changes[0].new_value, json!({"email": REDACTED}));
    assert_eq!(
        snapshot.session_data.unwrap().data,
        json!({"sessionId": "s-1", "phone": REDACTED})
    );
}

#[test]
fn disabling_clears_everything() {
    let bus = DebugBus::new();
    bus.enable();
    bus.log_error("boom", "ctx", "Error");
    bus.log_session_data(json!({"sessionId": "s"}));
    bus.disable();
    assert!(!bus.is_enabled());

    let snapshot = bus.snapshot();
    assert!(snapshot.logs.is_empty());
    assert!(snapshot.errors.is_empty());
    assert!(snapshot.session_data.is_none());
}

#[test]
fn export_is_pretty_json_with_summary() {
    let bus = DebugBus::new();
    bus.enable();
    bus.log_error("boom", "API request failed", "NetworkError");
    let exported = bus.export().unwrap();
    assert!(exported.contains('\n'));
    let parsed: Value = serde_json::from_str(&exported).unwrap();
    assert_eq!(parsed["summary"]["totalErrors"], json!(1));
    assert_eq!(parsed["errors"][0]["type"], json!("NetworkError"));
    assert!(parsed["sessionData"].is_null());
}

#[test]
fn api_observer_records_photo_events_and_failures() {
    let bus = DebugBus::new();
    bus.enable();
    bus.on_api_call(&ApiCall {
        method: "POST".into(),
        url: "https://api.example.com/sessions/s-1/photos".into(),
        status: Some(200),
        duration: Duration::from_millis(40),
        error: None,
    });
    bus.on_api_call(&ApiCall {
        method: "GET".into(),
        url: "https://api.example.com/sessions/s-1".into(),
        status: None,
        duration: Duration::from_millis(3),
        error: Some("connection refused".into()),
    });

    let snapshot = bus.snapshot();
    assert_eq!(snapshot.api_calls.len(), 2);
    assert_eq!(snapshot.api_calls[1].status, 0);
    assert_eq!(snapshot.photo_events.len(), 1);
    assert_eq!(snapshot.photo_events[0].event, "api_request");
    assert_eq!(snapshot.photo_events[0].details["success"], json!(true));
    assert_eq!(snapshot.errors.len(), 1);
    assert_eq!(snapshot.errors[0].message, "connection refused");
}

#[test]
fn preview_events_flow_into_photo_buffer() {
    let bus = Arc::new(DebugBus::new());
    bus.enable();
    let previews = PreviewStore::new().with_observer(bus.clone());
    let url = previews.create_object_url(vec![0u8; 16], "image/png", "a.png");
    previews.revoke(&url);

    let events: Vec<String> = bus
        .snapshot()
        .photo_events
        .into_iter()
        .map(|entry| entry.event)
        .collect();
    assert_eq!(events, vec!["blob_created".to_string(), "blob_revoked".to_string()]);

    bus.on_preview_event(&PreviewEvent::Revoked {
        blob_url: "blob:stacky/other".into(),
    });
    assert_eq!(bus.snapshot().summary.total_photo_events, 3);
}

#[test]
fn bus_logger_forwards_warnings_and_errors() {
    let bus = Arc::new(DebugBus::new());
    bus.enable();
    let logger = BusLogger::new(bus.clone());

    logger.log(
        &Record::builder()
            .level(Level::Info)
            .target("stacky")
            .args(format_args!("ignored"))
            .build(),
    );
    logger.log(
        &Record::builder()
            .level(Level::Warn)
            .target("stacky")
            .args(format_args!("quota exceeded"))
            .build(),
    );
    logger.log(
        &Record::builder()
            .level(Level::Error)
            .target("stacky_engine")
            .args(format_args!("upload failed"))
            .build(),
    );

    let snapshot = bus.snapshot();
    let messages: Vec<&str> = snapshot.logs.iter().map(|entry| entry.message.as_str()).collect();
    assert!(messages.contains(&"quota exceeded"));
    assert!(!messages.contains(&"ignored"));
    assert_eq!(snapshot.errors.len(), 1);
    assert_eq!(snapshot.errors[0].context, "stacky_engine");
}
