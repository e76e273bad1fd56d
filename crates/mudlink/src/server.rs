//! `MudlinkServer` builder and accept loop.
//!
//! Ties the layers together: the WebSocket transport accepts sockets, one
//! handler task per socket authenticates it and feeds it into the shared
//! [`ConnectionManager`], and inbound game commands come out of
//! [`MudlinkServer::take_commands`] for the game layer to act on.

use std::future::Future;
use std::sync::Arc;

use mudlink_protocol::{JsonCodec, PayloadOptimizer, PlayerId};
use mudlink_session::TokenDecoder;
use mudlink_store::PlayerStore;
use mudlink_transport::{ConnectionId, Transport, WebSocketConnection, WebSocketTransport};
use tokio::sync::mpsc;

use crate::handler::handle_connection;
use crate::rate_limit::RateLimiter;
use crate::{ConnectionManager, ManagerConfig, MudlinkError};

/// Buffered inbound commands before the handler starts rejecting them.
pub const COMMAND_QUEUE_CAPACITY: usize = 1024;

/// The connection manager type the server drives.
pub type WsConnectionManager<S> = ConnectionManager<WebSocketConnection, S>;

/// A game command received from an authenticated socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerCommand {
    pub player_id: PlayerId,
    /// The socket the command arrived on.
    pub connection_id: ConnectionId,
    pub command: String,
    pub args: Vec<String>,
}

/// Shared state handed to every connection task.
pub(crate) struct ServerState<S: PlayerStore> {
    pub(crate) manager: Arc<WsConnectionManager<S>>,
    pub(crate) commands: mpsc::Sender<PlayerCommand>,
    pub(crate) codec: JsonCodec,
}

/// Builder for configuring and starting a MUD connection server.
///
/// # Example
///
/// ```rust,ignore
/// use mudlink::prelude::*;
///
/// let server = MudlinkServer::builder()
///     .bind("0.0.0.0:8080")
///     .store(Arc::new(MemoryStore::new()))
///     .build(JwtDecoder::new(b"secret"))
///     .await?;
/// server.run().await
/// ```
pub struct MudlinkServerBuilder<S: PlayerStore> {
    bind_addr: String,
    config: ManagerConfig,
    store: Option<Arc<S>>,
    optimizer: Option<Arc<dyn PayloadOptimizer>>,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
}

impl<S: PlayerStore> MudlinkServerBuilder<S> {
    /// Creates a builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            config: ManagerConfig::default(),
            store: None,
            optimizer: None,
            rate_limiter: None,
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the connection manager configuration.
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the persistence layer. Without one no token can be resolved,
    /// so every handshake fails.
    pub fn store(mut self, store: Arc<S>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn optimizer(mut self, optimizer: Arc<dyn PayloadOptimizer>) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    pub fn rate_limiter(mut self, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    /// Binds the listener and builds the server with the given token
    /// decoder.
    ///
    /// # Errors
    /// Returns `MudlinkError::Transport` if the address cannot be bound.
    pub async fn build(self, decoder: impl TokenDecoder) -> Result<MudlinkServer<S>, MudlinkError> {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;

        let mut manager = ConnectionManager::new(self.config, Arc::new(decoder), self.store);
        if let Some(optimizer) = self.optimizer {
            manager = manager.with_optimizer(optimizer);
        }
        if let Some(rate_limiter) = self.rate_limiter {
            manager = manager.with_rate_limiter(rate_limiter);
        }

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let state = Arc::new(ServerState {
            manager: Arc::new(manager),
            commands: commands_tx,
            codec: JsonCodec,
        });

        Ok(MudlinkServer {
            transport,
            state,
            commands: Some(commands_rx),
        })
    }
}

impl<S: PlayerStore> Default for MudlinkServerBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound MUD connection server.
///
/// Grab [`manager()`](Self::manager) and
/// [`take_commands()`](Self::take_commands) first, then call
/// [`run()`](Self::run) to start accepting connections.
pub struct MudlinkServer<S: PlayerStore> {
    transport: WebSocketTransport,
    state: Arc<ServerState<S>>,
    commands: Option<mpsc::Receiver<PlayerCommand>>,
}

impl<S: PlayerStore> MudlinkServer<S> {
    /// Creates a new builder.
    pub fn builder() -> MudlinkServerBuilder<S> {
        MudlinkServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// The shared connection manager. Game systems use it to deliver
    /// events and query who is online.
    pub fn manager(&self) -> Arc<WsConnectionManager<S>> {
        Arc::clone(&self.state.manager)
    }

    /// Takes the receiver of inbound game commands. Returns `None` after
    /// the first call.
    pub fn take_commands(&mut self) -> Option<mpsc::Receiver<PlayerCommand>> {
        self.commands.take()
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), MudlinkError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop until `shutdown` completes, then shuts the
    /// connection manager down.
    ///
    /// Starts the manager's background tasks if nobody has yet.
    pub async fn run_until(
        mut self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), MudlinkError> {
        if !self.state.manager.is_running() {
            self.state.manager.start();
        }
        tracing::info!("mudlink server running");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    break;
                }
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(conn, state).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
            }
        }

        self.state.manager.shutdown().await;
        Ok(())
    }
}
