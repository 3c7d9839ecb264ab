//! Authoritative session state
//!
//! The [`SessionAuthority`] owns every open connection's protocol state and the
//! roster of authenticated players. It is driven from a single task, so all
//! roster mutation and fan-out happens in one place with no locking.

use crate::auth::{Identity, VerifyError};
use crate::config::SessionConfig;
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use shared::packets::*;
use shared::{is_valid_username, ChatColor, Connection, ConnectionId, Wire};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Random draws attempted before falling back to scanning for a free ID.
pub const ID_SAMPLE_ATTEMPTS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Authenticated,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("packet not allowed in the current connection state")]
    InvalidState,

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    #[error("no free player IDs")]
    PlayerIdsExhausted,

    #[error("player ID {0} is already taken")]
    DuplicatePlayerId(u8),

    #[error(transparent)]
    Send(#[from] shared::Error),
}

impl SessionError {
    /// The wire error packet reported back to the offending peer.
    pub fn response(&self) -> PacketDescriptor<()> {
        match self {
            SessionError::InvalidState => INVALID_STATE_ERROR,
            SessionError::AuthenticationFailed(_) => AUTHENTICATION_FAILED_ERROR,
            SessionError::InvalidPacket(_) => INVALID_PACKET_ERROR,
            SessionError::PlayerIdsExhausted
            | SessionError::DuplicatePlayerId(_)
            | SessionError::Send(_) => UNEXPECTED_ERROR,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Player {
    pub connection: Connection,
    pub player_id: u8,
    pub username: String,
    pub transform: Transform,
}

struct Session {
    connection: Connection,
    state: ConnectionState,
    player_id: Option<u8>,
    /// An identity check for this connection is in flight.
    verifying: bool,
}

pub struct SessionAuthority {
    config: SessionConfig,
    sessions: HashMap<ConnectionId, Session>,
    roster: BTreeMap<u8, Player>,
    rng: StdRng,
}

impl SessionAuthority {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    pub fn with_rng(config: SessionConfig, rng: StdRng) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
            roster: BTreeMap::new(),
            rng,
        }
    }

    /// Starts tracking a freshly accepted connection in the `Connected` state.
    pub fn connect(&mut self, connection: Connection) {
        debug!("<{}> Session opened", connection);
        self.sessions.insert(
            connection.id(),
            Session {
                connection,
                state: ConnectionState::Connected,
                player_id: None,
                verifying: false,
            },
        );
    }

    pub fn connection(&self, connection_id: ConnectionId) -> Option<&Connection> {
        self.sessions.get(&connection_id).map(|session| &session.connection)
    }

    pub fn state(&self, connection_id: ConnectionId) -> Option<ConnectionState> {
        self.sessions.get(&connection_id).map(|session| session.state)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn player(&self, player_id: u8) -> Option<&Player> {
        self.roster.get(&player_id)
    }

    /// Authenticated players in ascending ID order.
    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.roster.values()
    }

    pub fn player_count(&self) -> usize {
        self.roster.len()
    }

    /// Picks an unused player ID. Samples at random first; if every draw
    /// collides the remaining free IDs are chosen from directly, so this only
    /// fails once all 256 IDs are taken.
    pub fn assign_player_id(&mut self) -> Result<u8, SessionError> {
        for _ in 0..ID_SAMPLE_ATTEMPTS {
            let candidate: u8 = self.rng.gen();
            if !self.roster.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
        let free: Vec<u8> = (0..=u8::MAX)
            .filter(|id| !self.roster.contains_key(id))
            .collect();
        free.choose(&mut self.rng)
            .copied()
            .ok_or(SessionError::PlayerIdsExhausted)
    }

    pub fn add_player(&mut self, player: Player) -> Result<(), SessionError> {
        if self.roster.contains_key(&player.player_id) {
            return Err(SessionError::DuplicatePlayerId(player.player_id));
        }
        self.roster.insert(player.player_id, player);
        Ok(())
    }

    pub fn remove_player(&mut self, player_id: u8) -> Option<Player> {
        self.roster.remove(&player_id)
    }

    pub fn move_player(&mut self, player_id: u8, transform: Transform) -> bool {
        match self.roster.get_mut(&player_id) {
            Some(player) => {
                player.transform = transform;
                true
            }
            None => false,
        }
    }

    /// Sends one event to every rostered player, optionally skipping one.
    ///
    /// The frame is serialized once; a peer whose socket is already gone is
    /// logged and skipped. Returns how many peers the frame was queued for.
    pub fn broadcast<F: Wire>(
        &self,
        descriptor: &PacketDescriptor<F>,
        fields: &F,
        exclude: Option<u8>,
    ) -> Result<usize, SessionError> {
        let frame = descriptor.serialize(fields)?;
        let mut delivered = 0;
        for player in self.roster.values() {
            if Some(player.player_id) == exclude {
                continue;
            }
            match player.connection.send_frame(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    "<{}> Failed to send {} to player {}: {}",
                    player.connection, descriptor.name, player.player_id, e
                ),
            }
        }
        Ok(delivered)
    }

    fn authenticated_player(&self, connection_id: ConnectionId) -> Result<u8, SessionError> {
        match self.sessions.get(&connection_id) {
            Some(Session {
                state: ConnectionState::Authenticated,
                player_id: Some(player_id),
                ..
            }) => Ok(*player_id),
            _ => Err(SessionError::InvalidState),
        }
    }

    /// Validates an Authenticate request before the token is checked.
    pub fn begin_authentication(
        &mut self,
        connection_id: ConnectionId,
        username: &str,
    ) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get_mut(&connection_id)
            .ok_or(SessionError::InvalidState)?;
        if session.state != ConnectionState::Connected || session.verifying {
            return Err(SessionError::InvalidState);
        }
        if !is_valid_username(username) {
            return Err(SessionError::AuthenticationFailed(format!(
                "invalid username {:?}",
                username
            )));
        }
        session.verifying = true;
        Ok(())
    }

    /// Applies the verifier's verdict. Returns the assigned player ID, or
    /// `None` if the connection closed while the token was being checked.
    pub fn complete_authentication(
        &mut self,
        connection_id: ConnectionId,
        username: String,
        outcome: Result<Identity, VerifyError>,
    ) -> Result<Option<u8>, SessionError> {
        let Some(session) = self.sessions.get_mut(&connection_id) else {
            debug!("Dropping verification result for closed connection {}", connection_id);
            return Ok(None);
        };
        session.verifying = false;
        let connection = session.connection.clone();

        let identity = outcome.map_err(|e| SessionError::AuthenticationFailed(e.to_string()))?;
        if self.config.banned_subjects.contains(&identity.subject) {
            return Err(SessionError::AuthenticationFailed(format!(
                "subject {} is banned",
                identity.subject
            )));
        }
        info!("<{}> Authenticated as {:?} ({})", connection, username, identity);

        let player_id = self.assign_player_id()?;
        self.admit(connection_id, player_id, username)?;
        Ok(Some(player_id))
    }

    /// Moves a verified connection into the roster under `player_id`.
    ///
    /// Existing players learn about the newcomer (add event, then a join
    /// notice) before the newcomer receives its ID and the roster snapshot,
    /// which never includes itself.
    pub fn admit(
        &mut self,
        connection_id: ConnectionId,
        player_id: u8,
        username: String,
    ) -> Result<(), SessionError> {
        if self.roster.contains_key(&player_id) {
            return Err(SessionError::DuplicatePlayerId(player_id));
        }
        let connection = match self.sessions.get(&connection_id) {
            Some(session) if session.state == ConnectionState::Connected => {
                session.connection.clone()
            }
            _ => return Err(SessionError::InvalidState),
        };

        let snapshot: Vec<PlayerSummary> = self
            .roster
            .values()
            .map(|player| PlayerSummary {
                player_id: player.player_id,
                username: player.username.clone(),
            })
            .collect();

        self.broadcast(&ADD_PLAYER_EVENT, &(player_id, username.clone()), None)?;
        self.broadcast(&CHAT_MESSAGE_EVENT, &join_notice(&username), None)?;

        self.add_player(Player {
            connection: connection.clone(),
            player_id,
            username,
            transform: Transform::default(),
        })?;
        if let Some(session) = self.sessions.get_mut(&connection_id) {
            session.state = ConnectionState::Authenticated;
            session.player_id = Some(player_id);
        }
        info!("<{}> Assigned player ID {}", connection, player_id);

        connection.send(&AUTHENTICATED_RESPONSE, &(player_id, snapshot))?;
        Ok(())
    }

    pub fn handle_move(
        &mut self,
        connection_id: ConnectionId,
        transform: Transform,
    ) -> Result<(), SessionError> {
        let player_id = self.authenticated_player(connection_id)?;
        self.move_player(player_id, transform);
        self.broadcast(&PLAYER_MOVE_EVENT, &(player_id, transform), Some(player_id))?;
        Ok(())
    }

    pub fn handle_shoot(&mut self, connection_id: ConnectionId) -> Result<(), SessionError> {
        let player_id = self.authenticated_player(connection_id)?;
        self.broadcast(&PLAYER_SHOOT_EVENT, &player_id, Some(player_id))?;
        Ok(())
    }

    /// Relays a chat line to every player, the sender included.
    pub fn handle_chat(&mut self, connection_id: ConnectionId, text: String) -> Result<(), SessionError> {
        let player_id = self.authenticated_player(connection_id)?;
        let length = text.chars().count();
        if length > self.config.max_chat_length {
            return Err(SessionError::InvalidPacket(format!(
                "chat message of {} characters exceeds {}",
                length, self.config.max_chat_length
            )));
        }
        let Some(sender) = self.roster.get(&player_id) else {
            return Err(SessionError::InvalidState);
        };
        let chunks = chat_line(&sender.username, text);
        self.broadcast(&CHAT_MESSAGE_EVENT, &chunks, None)?;
        Ok(())
    }

    /// Forgets a closed connection. An authenticated player leaves the roster
    /// and everyone remaining is told.
    pub fn disconnect(&mut self, connection_id: ConnectionId) -> Option<Player> {
        let session = self.sessions.remove(&connection_id)?;
        info!("<{}> Disconnected", session.connection);

        let player = self.remove_player(session.player_id?)?;
        if let Err(e) = self.broadcast(&REMOVE_PLAYER_EVENT, &player.player_id, None) {
            error!("Failed to announce removal of player {}: {}", player.player_id, e);
        }
        Some(player)
    }

    /// Reports a rejected request to its sender. The connection stays open.
    pub fn reject(&self, connection_id: ConnectionId, failure: &SessionError) {
        let Some(connection) = self.connection(connection_id) else {
            return;
        };
        match failure {
            SessionError::PlayerIdsExhausted
            | SessionError::DuplicatePlayerId(_)
            | SessionError::Send(_) => error!("<{}> {}", connection, failure),
            _ => warn!("<{}> {}", connection, failure),
        }
        if let Err(e) = connection.send(&failure.response(), &()) {
            debug!("<{}> Could not report failure: {}", connection, e);
        }
    }

    /// Asks every open connection to close.
    pub fn disconnect_all(&self) {
        for session in self.sessions.values() {
            session.connection.disconnect();
        }
    }
}

fn join_notice(username: &str) -> Vec<ChatChunk> {
    vec![
        ChatChunk::new(ChatColor::Blue, true, username),
        ChatChunk::new(ChatColor::Cyan, false, " has joined the game"),
    ]
}

fn chat_line(username: &str, text: String) -> Vec<ChatChunk> {
    vec![
        ChatChunk::new(ChatColor::Gray, true, username),
        ChatChunk::new(ChatColor::White, false, ": "),
        ChatChunk::new(ChatColor::White, false, text),
    ]
}
