use anyhow::Context;
use log::LevelFilter;
use stacky_logging::{stacky_info, LogDestination};
use stacky_server::{router, AppState, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let level = std::env::var("STACKY_LOG")
        .ok()
        .map(|raw| stacky_logging::level_from_str(&raw))
        .unwrap_or(LevelFilter::Info);
    stacky_logging::initialize(LogDestination::Terminal, level, Vec::new());

    let config = ServerConfig::from_env().context("reading server configuration")?;
    let bind = config.bind;
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    stacky_info!("Stacky server listening on {}", bind);

    axum::serve(listener, router(AppState::new(config)))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("serving requests")?;
    Ok(())
}
