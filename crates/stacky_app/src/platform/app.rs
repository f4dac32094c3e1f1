use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use serde_json::json;
use simplelog::SharedLogger;
use stacky_core::{update, ChatState, ChatViewModel, Msg};
use stacky_engine::{
    mime_for_path, BusLogger, DebugBus, EngineHandle, FileBackend, LocalStore, MemoryBackend,
    PreviewStore,
};
use stacky_logging::{stacky_error, stacky_info, LogDestination};

use super::commands::{parse_line, UserCommand, HELP};
use super::config::{config_path, AppConfig, Mode, CONFIG_ENV};
use super::effects::{now_ms, EffectRunner};
use super::persistence;
use super::render::Renderer;

const TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Everything the main loop reacts to.
pub(crate) enum Input {
    Core(Msg),
    DebugShow,
    DebugExport(std::path::PathBuf),
    Print(String),
    Quit,
}

pub fn run_app() -> anyhow::Result<()> {
    let (flags, args): (Vec<String>, Vec<String>) =
        std::env::args().partition(|arg| arg.starts_with("--"));
    let path = config_path(&args, std::env::var(CONFIG_ENV).ok());
    let mut config = AppConfig::load(path.as_deref())
        .context("loading configuration")?
        .with_overrides(|key| std::env::var(key).ok());
    if flags.iter().any(|flag| flag == "--ephemeral") {
        config.ephemeral = true;
    }

    let bus = Arc::new(DebugBus::new());
    stacky_logging::initialize(
        LogDestination::File(config.log_file.clone()),
        stacky_logging::level_from_str(&config.log_level),
        vec![BusLogger::new(bus.clone()) as Box<dyn SharedLogger>],
    );
    stacky_info!("Starting Stacky in {:?} mode", config.mode);

    let store = if config.ephemeral {
        LocalStore::new(Arc::new(MemoryBackend::new(config.storage_quota_bytes)))
    } else {
        LocalStore::new(Arc::new(FileBackend::new(
            config.storage_dir.clone(),
            config.storage_quota_bytes,
        )))
    };
    let debug_enabled = persistence::debug_flag(&store);
    if debug_enabled {
        bus.enable();
    }

    let previews = PreviewStore::new().with_observer(bus.clone());
    let engine = EngineHandle::new(config.engine_config(), previews, Some(bus.clone()))
        .context("starting engine")?;

    let (input_tx, input_rx) = mpsc::channel::<Input>();
    let runner = EffectRunner::new(engine, store.clone(), Some(bus.clone()), input_tx.clone());
    // Reply mode never uploads, so photo messages carry an inline copy.
    let inline_photos = config.mode == Mode::Reply;
    spawn_stdin_reader(input_tx.clone(), runner.previews().clone(), inline_photos);
    spawn_ticker(input_tx.clone());
    drop(input_tx);

    println!("{HELP}");

    let mut state = ChatState::new(config.chat_config());
    let mut renderer = Renderer::default();
    let mut last_view = ChatViewModel::default();
    let restore = Msg::Restore {
        messages: persistence::load_transcript(&store),
        session: persistence::load_session(&store),
        debug_enabled,
    };
    dispatch(&mut state, restore, &runner, &bus, &mut renderer, &mut last_view);

    for input in input_rx {
        match input {
            Input::Core(msg) => {
                dispatch(&mut state, msg, &runner, &bus, &mut renderer, &mut last_view);
            }
            Input::DebugShow => print_debug_summary(&bus),
            Input::DebugExport(path) => export_debug(&bus, &path),
            Input::Print(line) => println!("{line}"),
            Input::Quit => break,
        }
    }

    stacky_info!("Stacky shutting down");
    Ok(())
}

fn dispatch(
    state: &mut ChatState,
    msg: Msg,
    runner: &EffectRunner,
    bus: &DebugBus,
    renderer: &mut Renderer,
    last_view: &mut ChatViewModel,
) {
    let (next, effects) = update(std::mem::take(state), msg);
    *state = next;
    runner.run(effects);
    if !state.consume_dirty() {
        return;
    }

    let view = state.view();
    if bus.is_enabled() {
        log_view_changes(bus, last_view, &view);
    }
    for line in renderer.render(&view) {
        println!("{line}");
    }
    let _ = io::stdout().flush();
    *last_view = view;
}

fn log_view_changes(bus: &DebugBus, before: &ChatViewModel, after: &ChatViewModel) {
    if before.is_loading != after.is_loading {
        bus.log_state_change(
            "ChatWidget",
            "isLoading",
            json!(before.is_loading),
            json!(after.is_loading),
        );
    }
    if before.session_status != after.session_status {
        bus.log_state_change(
            "ChatWidget",
            "sessionStatus",
            json!(format!("{:?}", before.session_status)),
            json!(format!("{:?}", after.session_status)),
        );
    }
    if before.messages.len() != after.messages.len() {
        bus.log_state_change(
            "ChatWidget",
            "messages",
            json!(before.messages.len()),
            json!(after.messages.len()),
        );
    }
}

fn spawn_ticker(input_tx: mpsc::Sender<Input>) {
    thread::spawn(move || {
        while input_tx.send(Input::Core(Msg::Tick)).is_ok() {
            thread::sleep(TICK_INTERVAL);
        }
    });
}

fn spawn_stdin_reader(input_tx: mpsc::Sender<Input>, previews: PreviewStore, inline_photos: bool) {
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let inputs = match command_inputs(parse_line(&line), &previews, inline_photos) {
                Some(inputs) => inputs,
                None => {
                    let _ = input_tx.send(Input::Quit);
                    return;
                }
            };
            for input in inputs {
                if input_tx.send(input).is_err() {
                    return;
                }
            }
        }
        let _ = input_tx.send(Input::Quit);
    });
}

/// `None` means the user asked to quit.
fn command_inputs(
    command: UserCommand,
    previews: &PreviewStore,
    inline_photos: bool,
) -> Option<Vec<Input>> {
    let inputs = match command {
        UserCommand::Say(text) => vec![
            Input::Core(Msg::InputChanged(text)),
            Input::Core(Msg::MessageSubmitted {
                timestamp_ms: now_ms(),
                history_override: None,
            }),
        ],
        UserCommand::Photo { path, description } => match std::fs::read(&path) {
            Ok(bytes) => {
                let file_name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "photo".to_string());
                let blob_url = previews.create_object_url(bytes, mime_for_path(&path), file_name);
                let image_data = if inline_photos {
                    previews.data_url(&blob_url)
                } else {
                    None
                };
                vec![Input::Core(Msg::PhotoSelected {
                    blob_url,
                    description,
                    timestamp_ms: now_ms(),
                    image_data,
                })]
            }
            Err(err) => {
                stacky_error!("Could not read photo {}: {}", path.display(), err);
                vec![Input::Print(format!(
                    "! could not read {}: {err}",
                    path.display()
                ))]
            }
        },
        UserCommand::CancelRetry => vec![Input::Core(Msg::CancelRetryClicked)],
        UserCommand::RetryPhoto(photo_id) => {
            vec![Input::Core(Msg::PhotoRetryClicked { photo_id })]
        }
        UserCommand::DismissError => vec![Input::Core(Msg::ErrorDismissed)],
        UserCommand::StartSession => vec![Input::Core(Msg::StartSessionClicked)],
        UserCommand::DebugLogin(password) => {
            vec![Input::Core(Msg::DebugLoginSubmitted { password })]
        }
        UserCommand::DebugShow => vec![Input::DebugShow],
        UserCommand::DebugExport(path) => vec![Input::DebugExport(path)],
        UserCommand::Help => vec![Input::Print(HELP.to_string())],
        UserCommand::Invalid(reason) => vec![Input::Print(format!("! {reason}"))],
        UserCommand::Empty => Vec::new(),
        UserCommand::Quit => return None,
    };
    Some(inputs)
}

fn print_debug_summary(bus: &DebugBus) {
    if !bus.is_enabled() {
        println!("Debug bus is off. Use /debug login <password> and restart.");
        return;
    }
    let snapshot = bus.snapshot();
    let summary = &snapshot.summary;
    println!(
        "Debug: {} logs, {} api calls, {} state changes, {} photo events, {} errors (last activity {})",
        summary.total_logs,
        summary.total_api_calls,
        summary.total_state_changes,
        summary.total_photo_events,
        summary.total_errors,
        summary.last_activity.as_deref().unwrap_or("never"),
    );
    for call in snapshot.api_calls.iter().rev().take(5) {
        println!(
            "  {} {} -> {} ({} ms)",
            call.method, call.url, call.status, call.duration_ms
        );
    }
    for error in snapshot.errors.iter().rev().take(5) {
        println!("  error: {} ({})", error.message, error.context);
    }
}

fn export_debug(bus: &DebugBus, path: &Path) {
    if !bus.is_enabled() {
        println!("Debug bus is off, nothing to export.");
        return;
    }
    let result = bus
        .export()
        .context("serializing debug bus")
        .and_then(|json| std::fs::write(path, json).context("writing export"));
    match result {
        Ok(()) => println!("Debug data written to {}", path.display()),
        Err(err) => {
            stacky_error!("Debug export to {} failed: {:#}", path.display(), err);
            println!("! debug export failed: {err:#}");
        }
    }
}
