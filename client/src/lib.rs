//! # Game Client Library
//!
//! Headless client for the multiplayer session server.
//!
//! [`network::Client`] connects over WebSocket, checks liveness with a ping
//! echo and logs in with an identity token. The events it streams afterwards
//! feed [`game::ClientGameState`], a local mirror of the server roster that
//! only ever applies what the server reports.

pub mod game;
pub mod network;
