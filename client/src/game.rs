//! Client-side mirror of the server roster
//!
//! The mirror only ever applies what the server tells it; it never decides
//! roster membership on its own.

use shared::packets::{ChatChunk, PlayerSummary, Transform};
use std::collections::{BTreeMap, VecDeque};

/// Most recent chat lines kept for display.
pub const CHAT_HISTORY: usize = 100;

/// Roster and gameplay events pushed by the server
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    PlayerAdded { player_id: u8, username: String },
    PlayerRemoved { player_id: u8 },
    PlayerMoved { player_id: u8, transform: Transform },
    PlayerShot { player_id: u8 },
    Chat { chunks: Vec<ChatChunk> },
}

/// What applying an event meant for the local session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Continue,
    /// The server removed the local player.
    Kicked,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemotePlayer {
    pub player_id: u8,
    pub username: String,
    pub transform: Transform,
    pub shots_fired: u32,
}

impl RemotePlayer {
    fn new(player_id: u8, username: String) -> Self {
        Self {
            player_id,
            username,
            transform: Transform::default(),
            shots_fired: 0,
        }
    }
}

#[derive(Debug, Default)]
pub struct ClientGameState {
    player_id: Option<u8>,
    players: BTreeMap<u8, RemotePlayer>,
    chat_log: VecDeque<String>,
}

impl ClientGameState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the mirror from the Authenticated response.
    pub fn apply_authenticated(&mut self, player_id: u8, players: Vec<PlayerSummary>) {
        self.player_id = Some(player_id);
        self.players = players
            .into_iter()
            .map(|summary| {
                (
                    summary.player_id,
                    RemotePlayer::new(summary.player_id, summary.username),
                )
            })
            .collect();
    }

    pub fn apply(&mut self, event: ServerEvent) -> Applied {
        match event {
            ServerEvent::PlayerAdded {
                player_id,
                username,
            } => {
                self.players
                    .insert(player_id, RemotePlayer::new(player_id, username));
            }
            ServerEvent::PlayerRemoved { player_id } => {
                if Some(player_id) == self.player_id {
                    self.player_id = None;
                    self.players.clear();
                    return Applied::Kicked;
                }
                self.players.remove(&player_id);
            }
            ServerEvent::PlayerMoved {
                player_id,
                transform,
            } => {
                if let Some(player) = self.players.get_mut(&player_id) {
                    player.transform = transform;
                }
            }
            ServerEvent::PlayerShot { player_id } => {
                if let Some(player) = self.players.get_mut(&player_id) {
                    player.shots_fired += 1;
                }
            }
            ServerEvent::Chat { chunks } => {
                if self.chat_log.len() == CHAT_HISTORY {
                    self.chat_log.pop_front();
                }
                self.chat_log.push_back(plain_text(&chunks));
            }
        }
        Applied::Continue
    }

    pub fn local_player_id(&self) -> Option<u8> {
        self.player_id
    }

    pub fn player(&self, player_id: u8) -> Option<&RemotePlayer> {
        self.players.get(&player_id)
    }

    /// Other players, in ascending ID order.
    pub fn players(&self) -> impl Iterator<Item = &RemotePlayer> {
        self.players.values()
    }

    /// Oldest line first.
    pub fn chat_log(&self) -> &VecDeque<String> {
        &self.chat_log
    }
}

/// Flattens a colored chat line to its text.
pub fn plain_text(chunks: &[ChatChunk]) -> String {
    chunks.iter().map(|chunk| chunk.text.as_str()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::ChatColor;

    fn summary(player_id: u8, username: &str) -> PlayerSummary {
        PlayerSummary {
            player_id,
            username: username.to_string(),
        }
    }

    fn joined() -> ClientGameState {
        let mut state = ClientGameState::new();
        state.apply_authenticated(4, vec![summary(1, "first"), summary(9, "ninth")]);
        state
    }

    #[test]
    fn test_authenticated_seeds_roster() {
        let state = joined();
        assert_eq!(state.local_player_id(), Some(4));
        let ids: Vec<u8> = state.players().map(|p| p.player_id).collect();
        assert_eq!(ids, vec![1, 9]);
        assert_eq!(state.player(9).unwrap().username, "ninth");
    }

    #[test]
    fn test_add_and_remove() {
        let mut state = joined();
        assert_eq!(
            state.apply(ServerEvent::PlayerAdded {
                player_id: 5,
                username: "fifth".to_string()
            }),
            Applied::Continue
        );
        assert!(state.player(5).is_some());

        assert_eq!(
            state.apply(ServerEvent::PlayerRemoved { player_id: 1 }),
            Applied::Continue
        );
        assert!(state.player(1).is_none());
        assert_eq!(state.players().count(), 2);
    }

    #[test]
    fn test_move_updates_transform() {
        let mut state = joined();
        state.apply(ServerEvent::PlayerMoved {
            player_id: 9,
            transform: Transform::new(1.5, -2.0, 3.25, 0.1, 1.2),
        });

        let player = state.player(9).unwrap();
        assert_approx_eq!(player.transform.pos_x, 1.5);
        assert_approx_eq!(player.transform.pos_y, -2.0);
        assert_approx_eq!(player.transform.pos_z, 3.25);
        assert_approx_eq!(player.transform.rot_x, 0.1);
        assert_approx_eq!(player.transform.rot_y, 1.2);
    }

    #[test]
    fn test_events_for_unknown_players_are_ignored() {
        let mut state = joined();
        state.apply(ServerEvent::PlayerMoved {
            player_id: 200,
            transform: Transform::default(),
        });
        state.apply(ServerEvent::PlayerShot { player_id: 200 });
        state.apply(ServerEvent::PlayerRemoved { player_id: 200 });
        assert!(state.player(200).is_none());
        assert_eq!(state.players().count(), 2);
    }

    #[test]
    fn test_shots_are_counted() {
        let mut state = joined();
        state.apply(ServerEvent::PlayerShot { player_id: 1 });
        state.apply(ServerEvent::PlayerShot { player_id: 1 });
        assert_eq!(state.player(1).unwrap().shots_fired, 2);
        assert_eq!(state.player(9).unwrap().shots_fired, 0);
    }

    #[test]
    fn test_removal_of_local_player_is_a_kick() {
        let mut state = joined();
        assert_eq!(
            state.apply(ServerEvent::PlayerRemoved { player_id: 4 }),
            Applied::Kicked
        );
        assert_eq!(state.local_player_id(), None);
        assert_eq!(state.players().count(), 0);
    }

    #[test]
    fn test_chat_history_is_bounded() {
        let mut state = joined();
        for i in 0..CHAT_HISTORY + 5 {
            state.apply(ServerEvent::Chat {
                chunks: vec![
                    ChatChunk::new(ChatColor::Gray, true, "first"),
                    ChatChunk::new(ChatColor::White, false, ": "),
                    ChatChunk::new(ChatColor::White, false, format!("line {}", i)),
                ],
            });
        }
        assert_eq!(state.chat_log().len(), CHAT_HISTORY);
        assert_eq!(state.chat_log()[0], "first: line 5");
        assert_eq!(
            state.chat_log().back().map(String::as_str),
            Some("first: line 104")
        );
    }
}
