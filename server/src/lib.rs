//! # Game Server Library
//!
//! Authoritative session server for the multiplayer game. Clients connect over
//! WebSocket, authenticate with an identity token, then exchange movement,
//! shooting and chat events that the server relays to every other player.
//!
//! ## Architecture Design
//!
//! ### Single-Owner Event Loop
//! Every connection runs in its own task, but none of them touch session
//! state. Decoded packets are forwarded over one channel to [`network::Server`],
//! which owns the [`session::SessionAuthority`] and applies each message to
//! completion before looking at the next. Roster mutation and fan-out are
//! therefore race free without locks, and ID assignment happens in the same
//! step as roster insertion.
//!
//! ### Connection States
//! A connection starts `Connected` and becomes `Authenticated` once its token
//! is verified. Game packets sent before that are answered with an Invalid
//! State error; protocol violations never close the socket.
//!
//! ## Module Organization
//!
//! - `auth`: token verification collaborators
//! - `config`: command line and TOML configuration
//! - `listener`: WebSocket accept loop
//! - `network`: the server event loop and per-connection wiring
//! - `session`: connection states, the roster and broadcast fan-out
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::auth::InsecureVerifier;
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let server = Server::bind(&config, Arc::new(InsecureVerifier)).await?;
//!     server.run().await;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod listener;
pub mod network;
pub mod session;
