use anyhow::{Context, Result};
use dotenv::dotenv;
use embedder::{
    api::{self, AppState},
    bus::{MemoryBus, NotificationBus, RedisBus},
    config::{self, Backend, EmbedderConfig},
    coordinator::{ShutdownCoordinator, Trigger},
    embeddings::{Embedder, OllamaEmbedder},
    ingest::IngestionCoordinator,
    lookup::Lookup,
    store::{MappingStore, MemoryStore, RedisStore},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use utils::errors::{SERVER_BIND_FAILED, SIGNAL_HANDLER_FAILED};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    utils::tracing::run_with_tracing(run).await
}

async fn run() -> Result<()> {
    info!("Embedder service starting up");
    let config = config::load();

    let (store, bus) = backends(&config).await?;
    let embedder: Arc<dyn Embedder> = Arc::new(OllamaEmbedder::from_config(&config.model));
    let ingestion = IngestionCoordinator::new(Arc::clone(&store), Arc::clone(&bus))
        .with_dimension(config.model.dimension);
    let lookup = Lookup::new(store);

    // Installed before the listeners start: a peer shutdown raises SIGINT on
    // this process and the default disposition would kill it mid-handshake.
    let mut interrupts = Interrupts::install()?;
    let listeners = ShutdownCoordinator::new(bus, config.bus.poll_timeout())
        .with_process_interrupt(true)
        .start();
    let termination = listeners.termination();

    let address = config.server.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("{SERVER_BIND_FAILED}: {address}"))?;
    let app = api::router(AppState {
        ingestion,
        lookup,
        embedder,
    });

    let server_stop = Trigger::new();
    let mut server = tokio::spawn({
        let stop = server_stop.clone();
        async move {
            info!(address = %address, "Starting HTTP server");
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.fired().await })
                .await
        }
    });

    let (report, server_done) = tokio::select! {
        _ = interrupts.recv() => {
            if termination.is_fired() {
                info!("SIGINT raised by peer shutdown, stopping");
                (listeners.join().await, false)
            } else {
                info!("Received SIGINT, shutting down");
                (listeners.initiate_shutdown().await, false)
            }
        }
        _ = termination.fired() => {
            info!("Shutdown requested by peer, stopping");
            (listeners.join().await, false)
        }
        result = &mut server => {
            error!(result = ?result, "HTTP server exited unexpectedly");
            (listeners.initiate_shutdown().await, true)
        }
    };

    server_stop.fire();
    if !server_done {
        match server.await {
            Ok(Ok(())) => info!("HTTP server stopped"),
            Ok(Err(e)) => error!(error = %e, "HTTP server error"),
            Err(e) => error!(error = %e, "HTTP server task failed"),
        }
    }

    if report.is_clean() {
        info!("Embedder service stopped");
    } else {
        warn!(report = ?report, "Embedder service stopped after listener failure");
    }
    Ok(())
}

async fn backends(
    config: &EmbedderConfig,
) -> Result<(Arc<dyn MappingStore>, Arc<dyn NotificationBus>)> {
    match config.store.backend {
        Backend::Redis => {
            let store = RedisStore::connect(&config.store.redis_url).await?;
            let bus = RedisBus::connect(&config.store.redis_url).await?;
            Ok((Arc::new(store), Arc::new(bus)))
        }
        Backend::Memory => {
            warn!("Using in-memory store and bus, state is not shared with other processes");
            Ok((Arc::new(MemoryStore::new()), Arc::new(MemoryBus::new())))
        }
    }
}

#[cfg(unix)]
struct Interrupts(tokio::signal::unix::Signal);

#[cfg(unix)]
impl Interrupts {
    fn install() -> Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};
        let stream = signal(SignalKind::interrupt()).context(SIGNAL_HANDLER_FAILED)?;
        Ok(Self(stream))
    }

    async fn recv(&mut self) {
        self.0.recv().await;
    }
}

#[cfg(not(unix))]
struct Interrupts;

#[cfg(not(unix))]
impl Interrupts {
    fn install() -> Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "{SIGNAL_HANDLER_FAILED}");
        }
    }
}
