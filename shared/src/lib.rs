//! # Shared Protocol Library
//!
//! Wire format and connection plumbing used by both the game server and the
//! client. Everything that crosses a socket is defined here so the two sides
//! cannot drift apart.
//!
//! ## Module Organization
//!
//! ### Bytes (`bytes`)
//! Fixed-capacity big-endian buffer with a bounds-checked cursor. Out of range
//! accesses fail without touching the buffer.
//!
//! ### Codec (`codec`)
//! The [`Wire`] trait: one implementation per field type, including
//! length-prefixed strings and count-prefixed record arrays.
//!
//! ### Packets (`packets`)
//! One [`PacketDescriptor`] per message kind, pairing a one-byte code with a
//! typed field layout, plus the shared record types.
//!
//! ### Connection (`connection`)
//! Per-socket handler registry, frame dispatch and request/response
//! correlation with timeouts.
//!
//! ### Transport (`transport`)
//! Binds a [`Connection`] to a WebSocket stream.

pub mod bytes;
pub mod codec;
pub mod connection;
pub mod constants;
pub mod error;
pub mod packets;
pub mod transport;

pub use bytes::ByteCursor;
pub use codec::Wire;
pub use connection::{Connection, ConnectionId, HandlerId, Subscription};
pub use constants::*;
pub use error::{Error, Result};
pub use packets::{ChatChunk, PacketDescriptor, PlayerSummary, Transform};
