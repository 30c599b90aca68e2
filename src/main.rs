use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use onboarding_flows::config::ServerConfig;
use onboarding_flows::flows::routes::cors_layer;
use onboarding_flows::flows::{EventBus, FlowEvent, FlowRouteState, flow_routes};
use onboarding_flows::store::{FlowStore, LibSqlBackend, MemoryDocumentStore, MemoryStore};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("Invalid configuration")?;

    // Initialize tracing; the guard flushes the file writer on exit.
    let (file_layer, _log_guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "onboarding.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    eprintln!("Onboarding flows v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://{}/api", config.listen_addr());
    eprintln!("   Store: {}", config.db_path);

    // ── Store ────────────────────────────────────────────────────────────
    let store: Arc<dyn FlowStore> = if config.uses_memory_store() {
        tracing::warn!("Using in-memory store; flows will not survive a restart");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(
            LibSqlBackend::new_local(Path::new(&config.db_path))
                .await
                .with_context(|| format!("Failed to open database at {}", config.db_path))?,
        )
    };

    // ── Services ─────────────────────────────────────────────────────────
    let events = EventBus::new();
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(FlowEvent::FlowPublished { flow, superseded }) => {
                    tracing::info!(flow_id = %flow.id, org_id = %flow.org_id, superseded = ?superseded, "Live flow changed");
                }
                Ok(event) => tracing::debug!(flow_id = %event.flow_id(), "Flow event"),
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "Event log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let state = FlowRouteState::new(
        store,
        Arc::new(MemoryDocumentStore::new()),
        events,
        config.strict_versions,
    );
    let app = flow_routes(state).layer(cors_layer(&config.cors_origins));

    let listener = tokio::net::TcpListener::bind(config.listen_addr())
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr()))?;
    tracing::info!(addr = %config.listen_addr(), "Onboarding flow server started");
    axum::serve(listener, app).await?;
    Ok(())
}
