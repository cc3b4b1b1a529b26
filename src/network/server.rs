//! WebSocket Server
//!
//! Accept loop and per-connection transport plumbing. Each connection
//! gets a protocol handler, an outbound queue drained by a dedicated
//! sender task, and a read loop that feeds parsed messages into the
//! handler until the socket closes.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{accept_async_with_config, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::network::handler::ConnectionHandler;
use crate::network::maintenance::run_maintenance_loop;
use crate::network::protocol::{ClientMessage, ServerMessage};
use crate::network::registry::SessionRegistry;
use crate::sync::broadcast::ConnectionTable;
use crate::{INACTIVE_TIMEOUT_SECS, MAX_MESSAGE_SIZE, POSITION_UPDATE_THRESHOLD, UPDATE_RATE};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Maintenance sweep rate (Hz).
    pub update_rate: u32,
    /// Minimum movement before a position change is broadcast (meters).
    pub position_update_threshold: f64,
    /// Idle time before a player is flagged inactive (seconds).
    pub inactive_timeout: f64,
    /// Per-connection outbound queue depth.
    pub outbound_queue_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8765".parse().unwrap(),
            max_message_size: MAX_MESSAGE_SIZE,
            update_rate: UPDATE_RATE,
            position_update_threshold: POSITION_UPDATE_THRESHOLD,
            inactive_timeout: INACTIVE_TIMEOUT_SECS,
            outbound_queue_depth: 64,
        }
    }
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// The coordination server.
pub struct TacmapServer {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    connections: Arc<ConnectionTable>,
    shutdown_tx: broadcast::Sender<()>,
}

impl TacmapServer {
    /// Create a server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            registry: Arc::new(SessionRegistry::new()),
            connections: Arc::new(ConnectionTable::new()),
            shutdown_tx,
        }
    }

    /// The session registry.
    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    /// Signal the accept loop and all background tasks to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Run the accept loop until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("listening on {}", self.config.bind_addr);

        let maintenance_handle = tokio::spawn(run_maintenance_loop(
            self.registry.clone(),
            self.connections.clone(),
            self.config.update_rate,
            self.config.inactive_timeout,
            self.shutdown_tx.subscribe(),
        ));

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!("new connection from {addr}");
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("accept error: {e}");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        maintenance_handle.abort();
        Ok(())
    }

    /// Spawn the per-connection task: WebSocket handshake, sender task,
    /// read loop, disconnect cleanup.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let registry = self.registry.clone();
        let connections = self.connections.clone();
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ws_config = WebSocketConfig::default();
            ws_config.max_message_size = Some(config.max_message_size);
            let ws_stream = match accept_async_with_config(stream, Some(ws_config)).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!("WebSocket handshake failed for {addr}: {e}");
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(config.outbound_queue_depth);

            // Drains the outbound queue onto the socket. Broadcasts from
            // other connections land here without touching this task's
            // read loop.
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("failed to serialize message: {e}");
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            let mut handler = ConnectionHandler::new(
                registry,
                connections,
                msg_tx.clone(),
                config.position_update_threshold,
            );

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                match ClientMessage::from_json(&text) {
                                    Ok(client_msg) => handler.handle(client_msg).await,
                                    Err(e) => {
                                        debug!("invalid message from {addr}: {e}");
                                        let _ = msg_tx.send(ServerMessage::Error {
                                            error: "Invalid message format".to_string(),
                                        }).await;
                                    }
                                }
                            }
                            Some(Ok(Message::Binary(_))) => {
                                debug!("ignoring binary frame from {addr}");
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("client {addr} disconnected");
                                break;
                            }
                            Some(Err(e)) => {
                                debug!("WebSocket error for {addr}: {e}");
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            handler.handle_disconnect().await;
            sender_task.abort();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8765);
        assert_eq!(config.max_message_size, 1024 * 1024);
        assert_eq!(config.update_rate, 5);
        assert_eq!(config.position_update_threshold, 2.0);
        assert_eq!(config.inactive_timeout, 300.0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_accept_loop() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        let server = Arc::new(TacmapServer::new(config));

        let run_server = server.clone();
        let handle = tokio::spawn(async move { run_server.run().await });

        // Give the listener a moment to bind, then stop it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("run loop exits after shutdown")
            .expect("task not cancelled");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_server_starts_with_no_sessions() {
        let server = TacmapServer::new(ServerConfig::default());
        assert_eq!(server.registry().session_count().await, 0);
    }
}
