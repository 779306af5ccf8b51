//! WebSocket server.
//!
//! Accepts TCP connections, upgrades the ones that ask for the configured
//! path, and feeds every complete message to a `ConnectionHandler`. Framing,
//! masking, ping/pong and the close handshake are left to tokio-tungstenite.

use crate::config::Config;
use crate::connection::Connection;
use crate::handler::ConnectionHandler;
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Pending connection queue length for the listening socket
const LISTEN_BACKLOG: i32 = 1024;

/// How long shutdown waits for open connections to finish
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Server instance
pub struct Server<H> {
    config: Config,
    handler: Arc<H>,
    path: Arc<str>,
    connection_limit: Arc<Semaphore>,
}

impl<H: ConnectionHandler> Server<H> {
    /// Create a new server instance
    pub fn new(config: Config, handler: H) -> Self {
        Server {
            handler: Arc::new(handler),
            path: Arc::from(config.path.as_str()),
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            config,
        }
    }

    /// Create the listening socket.
    ///
    /// Must be called from within a tokio runtime. Port 0 binds an ephemeral
    /// port; use `local_addr` on the result to find it.
    pub fn bind(&self) -> io::Result<TcpListener> {
        let addr: SocketAddr = self
            .config
            .listen
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let socket = socket2::Socket::new(
            match addr {
                SocketAddr::V4(_) => socket2::Domain::IPV4,
                SocketAddr::V6(_) => socket2::Domain::IPV6,
            },
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;

        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(LISTEN_BACKLOG)?;

        TcpListener::from_std(socket.into())
    }

    /// Bind and serve until Ctrl-C.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = self.bind()?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Accept connections on `listener` until `shutdown` completes, then
    /// close every open connection and wait for them to finish.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), BoxError>
    where
        F: Future<Output = ()>,
    {
        info!(address = %listener.local_addr()?, path = %self.path, "Server listening");

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut shutdown = std::pin::pin!(shutdown);

        loop {
            // Wait for a connection slot
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = self.connection_limit.clone().acquire_owned() => permit?,
            };

            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
            };

            debug!(peer = %peer, "New connection");

            let handler = Arc::clone(&self.handler);
            let path = Arc::clone(&self.path);
            let ws_config = self.websocket_config();
            let handshake_timeout = self.config.handshake_timeout;
            let stop = stop_rx.clone();

            tokio::spawn(async move {
                let upgrade = Upgrade {
                    path: &path,
                    ws_config,
                    timeout: handshake_timeout,
                };
                if let Err(e) = handle_connection(stream, peer, handler, upgrade, stop).await {
                    debug!(peer = %peer, error = %e, "Connection error");
                }
                drop(permit);
            });
        }

        info!("Shutting down");
        drop(listener);
        let _ = stop_tx.send(true);
        self.drain().await;
        Ok(())
    }

    /// Wait until every connection slot has been released.
    async fn drain(&self) {
        let permits = u32::try_from(self.config.max_connections).unwrap_or(u32::MAX);
        match tokio::time::timeout(SHUTDOWN_GRACE, self.connection_limit.acquire_many(permits))
            .await
        {
            Ok(_) => debug!("All connections closed"),
            Err(_) => warn!(
                open = self.config.max_connections - self.connection_limit.available_permits(),
                "Timed out waiting for connections to close"
            ),
        }
    }

    fn websocket_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = self.config.max_message_size;
        config.max_frame_size = self.config.max_frame_size;
        config
    }
}

/// Completes on Ctrl-C. Never completes if the signal handler can't be installed.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

/// Handshake parameters for one connection
struct Upgrade<'a> {
    path: &'a str,
    ws_config: WebSocketConfig,
    /// `None` waits forever for the upgrade request.
    timeout: Option<Duration>,
}

/// Handle a single client connection
async fn handle_connection<H: ConnectionHandler>(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<H>,
    upgrade: Upgrade<'_>,
    mut stop: watch::Receiver<bool>,
) -> Result<(), BoxError> {
    let path = upgrade.path;
    let check_path = |request: &Request, response: Response| {
        if request.uri().path() == path {
            Ok(response)
        } else {
            debug!(peer = %peer, path = %request.uri().path(), "Rejecting upgrade for unknown path");
            Err(not_found())
        }
    };

    let handshake =
        tokio_tungstenite::accept_hdr_async_with_config(stream, check_path, Some(upgrade.ws_config));
    let mut ws = match upgrade.timeout {
        Some(limit) => tokio::time::timeout(limit, handshake)
            .await
            .map_err(|_| "handshake timed out")??,
        None => handshake.await?,
    };

    let mut conn = Connection::new(peer);
    handler.on_connect(&conn);

    while conn.is_open() {
        let next = tokio::select! {
            frame = ws.next() => Some(frame),
            _ = stop.changed() => None,
        };

        let Some(frame) = next else {
            let close = CloseFrame {
                code: CloseCode::Away,
                reason: "server shutting down".into(),
            };
            if let Err(e) = ws.close(Some(close)).await {
                debug!(peer = %peer, error = %e, "Failed to send close frame");
            }
            conn.close();
            continue;
        };

        let message = match frame {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                debug!(peer = %peer, error = %e, "Read error");
                conn.close();
                continue;
            }
            None => {
                conn.close();
                continue;
            }
        };

        let (payload, is_binary) = match &message {
            Message::Text(text) => (text.as_bytes(), false),
            Message::Binary(data) => (&data[..], true),
            // Control frames are answered by the transport
            _ => continue,
        };

        // Reply before reading the next message so replies keep arrival order
        if let Some(reply) = handler.on_message(&conn, payload, is_binary) {
            if let Err(e) = ws.send(Message::text(reply)).await {
                debug!(peer = %peer, error = %e, "Failed to send acknowledgement");
                conn.close();
            }
        }
    }

    handler.on_disconnect(&conn);
    Ok(())
}

fn not_found() -> ErrorResponse {
    let mut response = ErrorResponse::new(Some("Not Found".to_string()));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}
