//! Server event loop
//!
//! Socket tasks never touch session state. Each connection's handlers turn
//! inbound packets into [`ServerMessage`]s on one channel, and [`Server::run`]
//! applies them to the [`SessionAuthority`] one at a time in arrival order.

use crate::auth::{Identity, TokenVerifier, VerifyError};
use crate::config::ServerConfig;
use crate::listener::Listener;
use crate::session::{SessionAuthority, SessionError};
use log::{debug, error, info, warn};
use shared::packets::*;
use shared::{Connection, ConnectionId, Subscription};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Messages sent from connection tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    Connected {
        connection: Connection,
    },
    Request {
        connection_id: ConnectionId,
        request: Request,
    },
    Verified {
        connection_id: ConnectionId,
        username: String,
        outcome: Result<Identity, VerifyError>,
    },
    Disconnected {
        connection_id: ConnectionId,
    },
    Shutdown,
}

/// Game-affecting packets, decoded
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Authenticate { username: String, token: String },
    Move(Transform),
    Shoot,
    Chat(String),
}

/// Cloneable handle for stopping a running server
#[derive(Debug, Clone)]
pub struct ServerHandle {
    server_tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ServerHandle {
    pub fn shutdown(&self) {
        if self.server_tx.send(ServerMessage::Shutdown).is_err() {
            debug!("Server already stopped");
        }
    }
}

pub struct Server {
    listener: Listener,
    authority: SessionAuthority,
    verifier: Arc<dyn TokenVerifier>,
    audience: String,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    pub async fn bind(config: &ServerConfig, verifier: Arc<dyn TokenVerifier>) -> io::Result<Self> {
        Self::with_authority(config, SessionAuthority::new(config.session.clone()), verifier).await
    }

    pub async fn with_authority(
        config: &ServerConfig,
        authority: SessionAuthority,
        verifier: Arc<dyn TokenVerifier>,
    ) -> io::Result<Self> {
        let listener = Listener::bind(&config.bind_address()).await?;
        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener,
            authority,
            verifier,
            audience: config.audience().to_string(),
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            server_tx: self.server_tx.clone(),
        }
    }

    /// Main server loop. Returns after a shutdown request.
    pub async fn run(self) {
        let Server {
            listener,
            mut authority,
            verifier,
            audience,
            server_tx,
            mut server_rx,
        } = self;

        let accept_tx = server_tx.clone();
        let accept_task = tokio::spawn(listener.run(move |connection| {
            install_handlers(&connection, accept_tx.clone());
        }));

        info!("Server started successfully");

        while let Some(message) = server_rx.recv().await {
            match message {
                ServerMessage::Connected { connection } => authority.connect(connection),
                ServerMessage::Request {
                    connection_id,
                    request,
                } => {
                    let result = match request {
                        Request::Authenticate { username, token } => authority
                            .begin_authentication(connection_id, &username)
                            .map(|()| {
                                spawn_verification(
                                    verifier.as_ref(),
                                    &token,
                                    &audience,
                                    connection_id,
                                    username,
                                    server_tx.clone(),
                                )
                            }),
                        Request::Move(transform) => authority.handle_move(connection_id, transform),
                        Request::Shoot => authority.handle_shoot(connection_id),
                        Request::Chat(text) => authority.handle_chat(connection_id, text),
                    };
                    if let Err(e) = result {
                        authority.reject(connection_id, &e);
                    }
                }
                ServerMessage::Verified {
                    connection_id,
                    username,
                    outcome,
                } => {
                    if let Err(e) = authority.complete_authentication(connection_id, username, outcome) {
                        authority.reject(connection_id, &e);
                    }
                }
                ServerMessage::Disconnected { connection_id } => {
                    authority.disconnect(connection_id);
                }
                ServerMessage::Shutdown => {
                    info!("Server shutting down");
                    break;
                }
            }
        }

        accept_task.abort();
        authority.disconnect_all();
    }
}

fn spawn_verification(
    verifier: &dyn TokenVerifier,
    token: &str,
    audience: &str,
    connection_id: ConnectionId,
    username: String,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
) {
    let verification = verifier.verify(token, audience);
    tokio::spawn(async move {
        let outcome = verification.await;
        let _ = server_tx.send(ServerMessage::Verified {
            connection_id,
            username,
            outcome,
        });
    });
}

fn forward(server_tx: &mpsc::UnboundedSender<ServerMessage>, message: ServerMessage) {
    if let Err(e) = server_tx.send(message) {
        debug!("Server loop gone, dropping {:?}", e.0);
    }
}

/// Wires a freshly accepted connection into the server loop.
///
/// Pings are answered straight from the socket task in any state; every other
/// packet becomes a [`ServerMessage::Request`].
pub fn install_handlers(connection: &Connection, server_tx: mpsc::UnboundedSender<ServerMessage>) {
    let connection_id = connection.id();
    forward(
        &server_tx,
        ServerMessage::Connected {
            connection: connection.clone(),
        },
    );

    let responder = connection.clone();
    connection.on_packet(&PING_REQUEST, move |random| {
        responder.send(&PONG_RESPONSE, &random)?;
        Ok(Subscription::Keep)
    });

    let tx = server_tx.clone();
    connection.on_packet(&AUTHENTICATE_REQUEST, move |(username, token)| {
        forward(
            &tx,
            ServerMessage::Request {
                connection_id,
                request: Request::Authenticate { username, token },
            },
        );
        Ok(Subscription::Keep)
    });

    let tx = server_tx.clone();
    connection.on_packet(&PLAYER_MOVE_REQUEST, move |transform| {
        forward(
            &tx,
            ServerMessage::Request {
                connection_id,
                request: Request::Move(transform),
            },
        );
        Ok(Subscription::Keep)
    });

    let tx = server_tx.clone();
    connection.on_packet(&PLAYER_SHOOT_REQUEST, move |()| {
        forward(
            &tx,
            ServerMessage::Request {
                connection_id,
                request: Request::Shoot,
            },
        );
        Ok(Subscription::Keep)
    });

    let tx = server_tx.clone();
    connection.on_packet(&CHAT_MESSAGE_REQUEST, move |text| {
        forward(
            &tx,
            ServerMessage::Request {
                connection_id,
                request: Request::Chat(text),
            },
        );
        Ok(Subscription::Keep)
    });

    connection.on_error(|connection, failure| {
        let response = if failure.is_codec_failure() {
            warn!("<{}> Invalid packet: {}", connection, failure);
            INVALID_PACKET_ERROR
        } else {
            error!("<{}> Unexpected error: {}", connection, failure);
            UNEXPECTED_ERROR
        };
        if let Err(e) = connection.send(&response, &()) {
            debug!("<{}> Could not report failure: {}", connection, e);
        }
    });

    connection.on_close(move || {
        forward(&server_tx, ServerMessage::Disconnected { connection_id });
    });
}
