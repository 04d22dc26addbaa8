//! WebSocket server listener
//!
//! Handles the TCP accept loop, the WebSocket upgrade, and spawns one
//! connection handler per client. Also owns the root cancellation token
//! that every background task hangs off.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::event::EventDecoder;
use crate::feed::ChangeFeed;
use crate::registry::{self, BroadcasterHandle};
use crate::server::config::ServerConfig;
use crate::session::{self, SessionContext};
use crate::store::EventStore;

/// Event relay server
pub struct EventServer {
    config: Arc<ServerConfig>,
    context: SessionContext,
    cancel: CancellationToken,
    next_session_id: AtomicU64,
}

impl EventServer {
    /// Create a new server around a store and decoder, spawning the
    /// broadcaster and session manager tasks.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn EventStore>,
        decoder: Arc<dyn EventDecoder>,
    ) -> Self {
        let config = Arc::new(config);
        let cancel = CancellationToken::new();
        let broadcaster = registry::spawn(Arc::clone(&store), cancel.child_token());
        let sessions = session::spawn_manager(broadcaster.clone(), cancel.child_token());
        let context = SessionContext {
            config: Arc::clone(&config),
            store,
            decoder,
            broadcaster,
            sessions,
        };
        Self {
            config,
            context,
            cancel,
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Get a handle to the broadcaster
    pub fn broadcaster(&self) -> &BroadcasterHandle {
        &self.context.broadcaster
    }

    /// Token cancelled when the server shuts down
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Spawn the change-feed task that bridges store notifications to the
    /// broadcaster. The task ends with an error if the notification channel
    /// fails; callers decide whether to restart or shut down.
    pub fn spawn_change_feed(&self) -> tokio::task::JoinHandle<Result<()>> {
        let feed = ChangeFeed::new(
            Arc::clone(&self.context.store),
            Arc::clone(&self.context.decoder),
            self.context.broadcaster.clone(),
            self.config.filter.clone(),
            self.config.notify_wait,
        );
        tokio::spawn(feed.run(self.cancel.child_token()))
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "event relay listening");
        self.serve(listener).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "event relay listening");

        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("shutdown signal received");
                Ok(())
            }
            result = self.serve_inner(&listener) => result,
        };

        self.cancel.cancel();
        result
    }

    /// Accept connections on an already-bound listener until shutdown.
    /// Useful for tests that bind an ephemeral port first.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let result = self.serve_inner(&listener).await;
        self.cancel.cancel();
        result
    }

    async fn serve_inner(&self, listener: &TcpListener) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr),
                    Err(e) => {
                        tracing::error!(error = %e, "failed to accept connection");
                    }
                },
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        let session_id = format!(
            "s{:06}",
            self.next_session_id.fetch_add(1, Ordering::Relaxed)
        );
        tracing::debug!(session_id = %session_id, peer = %peer_addr, "new connection");

        if let Err(e) = socket.set_nodelay(true) {
            tracing::warn!(peer = %peer_addr, error = %e, "failed to set nodelay");
        }

        let mut ws_config = WebSocketConfig::default();
        if let Some(size) = self.config.max_message_size {
            ws_config.max_message_size = Some(size);
        }

        let context = self.context.clone();
        tokio::spawn(async move {
            let ws = match tokio_tungstenite::accept_async_with_config(socket, Some(ws_config))
                .await
            {
                Ok(ws) => ws,
                Err(e) => {
                    tracing::debug!(peer = %peer_addr, error = %e, "websocket handshake failed");
                    return;
                }
            };

            if let Err(e) = session::run_connection(session_id.clone(), context, ws).await {
                tracing::debug!(session_id = %session_id, error = %e, "connection error");
            }
            tracing::debug!(session_id = %session_id, "connection closed");
        });
    }
}
