//! Telnet and HTTP listeners.

use crate::api;
use crate::config::{Config, StorageBackend};
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::session::{Session, REFUSED};
use crate::store::SqliteStore;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use telechat_core::{ChatStore, Distributor, MemoryStore, WEB_CLIENT_NAME};
use telechat_protocol::LineCodec;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Registry, mailboxes and rounds.
    pub distributor: Arc<Distributor>,
    /// One permit per admitted telnet connection.
    permits: Arc<Semaphore>,
}

impl AppState {
    /// Create state with the given store and register the web pseudo client.
    ///
    /// # Errors
    ///
    /// Fails if the pseudo client cannot be registered.
    pub fn new(config: Config, store: Arc<dyn ChatStore>) -> Result<Self> {
        let distributor = Distributor::with_config(store, config.distributor());
        distributor.register_pseudo(WEB_CLIENT_NAME)?;

        Ok(Self {
            permits: Arc::new(Semaphore::new(config.limits.max_clients)),
            distributor: Arc::new(distributor),
            config,
        })
    }

    /// Telnet connections currently admitted.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.config.limits.max_clients - self.permits.available_permits()
    }

    fn codec(&self) -> LineCodec {
        LineCodec::new(self.config.limits.max_line_length)
    }
}

/// Open the configured chat store.
///
/// # Errors
///
/// Fails if the SQLite database cannot be opened or migrated.
pub fn open_store(config: &Config) -> Result<Arc<dyn ChatStore>> {
    match config.storage.backend {
        StorageBackend::Sqlite => {
            let path = config.storage_path();
            let store = SqliteStore::open(&path)
                .with_context(|| format!("Failed to open database {}", path.display()))?;
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => {
            info!("Using in-memory chat history");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Run the telnet and HTTP servers.
///
/// # Errors
///
/// Returns an error if storage cannot be opened or a listener cannot bind.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(&config.host, config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let store = open_store(&config)?;
    let state = Arc::new(AppState::new(config.clone(), store)?);

    let telnet_addr = config.telnet_addr()?;
    let telnet = TcpListener::bind(telnet_addr)
        .await
        .with_context(|| format!("Failed to bind telnet listener on {telnet_addr}"))?;

    if !config.http.enabled {
        return serve_telnet(telnet, state).await;
    }

    let http_addr = config.http_addr()?;
    let http = TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("Failed to bind HTTP listener on {http_addr}"))?;
    info!("HTTP facade listening on {}", http_addr);

    let app = api::router(Arc::clone(&state.distributor));
    tokio::try_join!(serve_telnet(telnet, state), async {
        axum::serve(http, app).await.context("HTTP server failed")
    })?;

    Ok(())
}

/// Accept telnet connections until the listener fails.
///
/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn serve_telnet(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    info!("Chat server listening on {}", listener.local_addr()?);

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "Accept failed");
                metrics::record_error("accept");
                continue;
            }
        };

        match Arc::clone(&state.permits).try_acquire_owned() {
            Ok(permit) => {
                info!(peer = %addr, "New client has connected");
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    handle_connection(stream, addr, &state).await;
                    drop(permit);
                });
            }
            Err(_) => {
                info!(peer = %addr, "Connection refused, too many current clients");
                metrics::record_refused();
                tokio::spawn(refuse(stream, addr));
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, addr: SocketAddr, state: &AppState) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %addr, error = %e, "Failed to set TCP_NODELAY");
    }

    let (reader, writer) = stream.into_split();
    Session::new(
        addr.to_string(),
        Arc::clone(&state.distributor),
        writer,
        state.codec(),
    )
    .run(reader)
    .await;

    debug!(peer = %addr, "Connection finished");
}

async fn refuse(mut stream: TcpStream, addr: SocketAddr) {
    if let Err(e) = stream.write_all(REFUSED.as_bytes()).await {
        debug!(peer = %addr, error = %e, "Failed to send refusal");
    }
    if let Err(e) = stream.shutdown().await {
        debug!(peer = %addr, error = %e, "Failed to close refused connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config(max_clients: usize) -> Config {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::Memory;
        config.limits.max_clients = max_clients;
        config
    }

    #[test]
    fn test_state_registers_web_client() {
        let config = memory_config(2);
        let store = open_store(&config).unwrap();
        let state = AppState::new(config, store).unwrap();

        assert!(state.distributor.registry().contains(WEB_CLIENT_NAME));
        assert!(state.distributor.registry().user_names().is_empty());
        assert_eq!(state.active_connections(), 0);
    }

    #[test]
    fn test_open_sqlite_store() {
        let dir = std::env::temp_dir().join(format!("telechat-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let mut config = Config::default();
        config.storage.path = dir.join("chat.db").display().to_string();
        let store = open_store(&config).unwrap();
        assert_eq!(store.name(), "sqlite");

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
