//! Client connection and login flow

use crate::game::ServerEvent;
use log::{debug, info};
use shared::packets::*;
use shared::{transport, Connection, Subscription};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Protocol(#[from] shared::Error),

    #[error("server rejected the credentials")]
    AuthenticationFailed,

    #[error("server reported an invalid connection state")]
    InvalidState,
}

pub type Result<T> = std::result::Result<T, ClientError>;

pub struct Client {
    connection: Connection,
    pump_task: JoinHandle<()>,
    timeout: Duration,
}

impl Client {
    /// Opens a WebSocket to `url` and starts pumping frames.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        let (connection, pump) = transport::connect(url).await?;
        info!("Connected to {}", url);
        let pump_task = tokio::spawn(pump.run());
        Ok(Self {
            connection,
            pump_task,
            timeout,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Round-trips a random value through the server and checks the echo.
    pub async fn ping(&self) -> Result<Duration> {
        let random: u32 = rand::random();
        let pong = self.connection.await_packet(&PONG_RESPONSE, self.timeout);
        let started = Instant::now();
        self.connection.send(&PING_REQUEST, &random)?;

        let echo = pong.await?;
        if echo != random {
            return Err(shared::Error::Protocol(format!(
                "ping echo mismatch: sent {:#010x}, received {:#010x}",
                random, echo
            ))
            .into());
        }
        let elapsed = started.elapsed();
        debug!("Ping round trip {:?}", elapsed);
        Ok(elapsed)
    }

    /// Authenticates, returning the assigned player ID and the other players
    /// already in the game.
    pub async fn login(&self, username: &str, token: &str) -> Result<(u8, Vec<PlayerSummary>)> {
        let accepted = self.connection.await_packet(&AUTHENTICATED_RESPONSE, self.timeout);
        let failed = self
            .connection
            .await_packet(&AUTHENTICATION_FAILED_ERROR, self.timeout);
        let invalid = self.connection.await_packet(&INVALID_STATE_ERROR, self.timeout);

        self.connection.send(
            &AUTHENTICATE_REQUEST,
            &(username.to_string(), token.to_string()),
        )?;

        // An error arm that times out is disabled; the accepted arm then
        // reports the timeout itself.
        tokio::select! {
            result = accepted => {
                let (player_id, players) = result?;
                info!("Logged in as {:?} with player ID {}", username, player_id);
                Ok((player_id, players))
            }
            Ok(()) = failed => Err(ClientError::AuthenticationFailed),
            Ok(()) = invalid => Err(ClientError::InvalidState),
        }
    }

    /// Streams roster and gameplay events. The stream ends when the
    /// connection closes. Subscribe before logging in so no event is missed.
    pub fn events(&self) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();

        let events = tx.clone();
        self.connection
            .on_packet(&ADD_PLAYER_EVENT, move |(player_id, username)| {
                Ok(publish(&events, ServerEvent::PlayerAdded { player_id, username }))
            });
        let events = tx.clone();
        self.connection.on_packet(&REMOVE_PLAYER_EVENT, move |player_id| {
            Ok(publish(&events, ServerEvent::PlayerRemoved { player_id }))
        });
        let events = tx.clone();
        self.connection
            .on_packet(&PLAYER_MOVE_EVENT, move |(player_id, transform)| {
                Ok(publish(&events, ServerEvent::PlayerMoved { player_id, transform }))
            });
        let events = tx.clone();
        self.connection.on_packet(&PLAYER_SHOOT_EVENT, move |player_id| {
            Ok(publish(&events, ServerEvent::PlayerShot { player_id }))
        });
        self.connection.on_packet(&CHAT_MESSAGE_EVENT, move |chunks| {
            Ok(publish(&tx, ServerEvent::Chat { chunks }))
        });

        rx
    }

    pub fn send_move(&self, transform: Transform) -> Result<()> {
        Ok(self.connection.send(&PLAYER_MOVE_REQUEST, &transform)?)
    }

    pub fn send_shoot(&self) -> Result<()> {
        Ok(self.connection.send(&PLAYER_SHOOT_REQUEST, &())?)
    }

    pub fn send_chat(&self, text: &str) -> Result<()> {
        Ok(self.connection.send(&CHAT_MESSAGE_REQUEST, &text.to_string())?)
    }

    /// Closes the socket and waits for the pump to finish.
    pub async fn disconnect(self) {
        self.connection.disconnect();
        if tokio::time::timeout(self.timeout, self.pump_task).await.is_err() {
            debug!("Transport did not close in time");
        }
    }
}

/// Unsubscribes once nobody is listening any more.
fn publish(events: &mpsc::UnboundedSender<ServerEvent>, event: ServerEvent) -> Subscription {
    match events.send(event) {
        Ok(()) => Subscription::Keep,
        Err(_) => Subscription::Stop,
    }
}
