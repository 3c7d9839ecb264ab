//! Packet descriptors: the wire contract for every message kind
//!
//! Byte 0 of every frame is the packet code; the remaining bytes are the
//! descriptor's fields in declared order. Codes 0x00-0x0f are liveness,
//! 0x1x authentication, 0x2x roster events, 0x3x player actions, 0x4x chat and
//! 0xfx error responses.

use crate::bytes::ByteCursor;
use crate::codec::Wire;
use crate::constants::ChatColor;
use crate::error::Result;
use std::fmt;
use std::marker::PhantomData;

/// Static contract for one packet kind: its code, display name and field
/// layout `F`.
pub struct PacketDescriptor<F> {
    pub code: u8,
    pub name: &'static str,
    fields: PhantomData<fn() -> F>,
}

impl<F> PacketDescriptor<F> {
    pub const fn new(code: u8, name: &'static str) -> Self {
        Self {
            code,
            name,
            fields: PhantomData,
        }
    }

    pub const fn info(&self) -> PacketInfo {
        PacketInfo {
            code: self.code,
            name: self.name,
        }
    }
}

impl<F: Wire> PacketDescriptor<F> {
    /// Builds a complete frame: the code byte followed by `fields`, in a
    /// buffer sized exactly for them.
    pub fn serialize(&self, fields: &F) -> Result<Vec<u8>> {
        let mut cursor = ByteCursor::zeroed(1 + fields.encoded_len());
        cursor.write_u8(self.code)?;
        fields.encode(&mut cursor)?;
        debug_assert_eq!(cursor.remaining(), 0);
        Ok(cursor.into_inner())
    }

    /// Reads the fields from a cursor already positioned past the code byte.
    pub fn deserialize(&self, cursor: &mut ByteCursor) -> Result<F> {
        F::decode(cursor)
    }
}

// Manual impls: derives would wrongly require `F: Clone` / `F: Debug`.
impl<F> Clone for PacketDescriptor<F> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<F> Copy for PacketDescriptor<F> {}

impl<F> fmt::Debug for PacketDescriptor<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02x})", self.name, self.code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketInfo {
    pub code: u8,
    pub name: &'static str,
}

/// Roster entry sent to a newly authenticated player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSummary {
    pub player_id: u8,
    pub username: String,
}

impl Wire for PlayerSummary {
    fn encoded_len(&self) -> usize {
        self.player_id.encoded_len() + self.username.encoded_len()
    }

    fn encode(&self, cursor: &mut ByteCursor) -> Result<()> {
        self.player_id.encode(cursor)?;
        self.username.encode(cursor)
    }

    fn decode(cursor: &mut ByteCursor) -> Result<Self> {
        Ok(Self {
            player_id: u8::decode(cursor)?,
            username: String::decode(cursor)?,
        })
    }
}

/// Position and view rotation of a player.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transform {
    pub pos_x: f32,
    pub pos_y: f32,
    pub pos_z: f32,
    pub rot_x: f32,
    pub rot_y: f32,
}

impl Transform {
    pub fn new(pos_x: f32, pos_y: f32, pos_z: f32, rot_x: f32, rot_y: f32) -> Self {
        Self {
            pos_x,
            pos_y,
            pos_z,
            rot_x,
            rot_y,
        }
    }
}

impl Wire for Transform {
    fn encoded_len(&self) -> usize {
        5 * 4
    }

    fn encode(&self, cursor: &mut ByteCursor) -> Result<()> {
        for value in [self.pos_x, self.pos_y, self.pos_z, self.rot_x, self.rot_y] {
            cursor.write_f32(value)?;
        }
        Ok(())
    }

    fn decode(cursor: &mut ByteCursor) -> Result<Self> {
        Ok(Self {
            pos_x: cursor.read_f32()?,
            pos_y: cursor.read_f32()?,
            pos_z: cursor.read_f32()?,
            rot_x: cursor.read_f32()?,
            rot_y: cursor.read_f32()?,
        })
    }
}

/// One styled run of text in a chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatChunk {
    pub color: u8,
    pub bold: bool,
    pub text: String,
}

impl ChatChunk {
    pub fn new(color: ChatColor, bold: bool, text: impl Into<String>) -> Self {
        Self {
            color: color as u8,
            bold,
            text: text.into(),
        }
    }
}

impl Wire for ChatChunk {
    fn encoded_len(&self) -> usize {
        self.color.encoded_len() + self.bold.encoded_len() + self.text.encoded_len()
    }

    fn encode(&self, cursor: &mut ByteCursor) -> Result<()> {
        self.color.encode(cursor)?;
        self.bold.encode(cursor)?;
        self.text.encode(cursor)
    }

    fn decode(cursor: &mut ByteCursor) -> Result<Self> {
        Ok(Self {
            color: u8::decode(cursor)?,
            bold: bool::decode(cursor)?,
            text: String::decode(cursor)?,
        })
    }
}

// Ping
pub const PING_REQUEST: PacketDescriptor<u32> = PacketDescriptor::new(0x00, "Ping Request");
pub const PONG_RESPONSE: PacketDescriptor<u32> = PacketDescriptor::new(0x01, "Pong Response");

// Authentication: (username, token) and (playerID, roster)
pub const AUTHENTICATE_REQUEST: PacketDescriptor<(String, String)> =
    PacketDescriptor::new(0x10, "Authenticate Request");
pub const AUTHENTICATED_RESPONSE: PacketDescriptor<(u8, Vec<PlayerSummary>)> =
    PacketDescriptor::new(0x11, "Authenticated Response");

// Roster
pub const ADD_PLAYER_EVENT: PacketDescriptor<(u8, String)> =
    PacketDescriptor::new(0x20, "Add Player Event");
pub const REMOVE_PLAYER_EVENT: PacketDescriptor<u8> =
    PacketDescriptor::new(0x21, "Remove Player Event");

// Actions
pub const PLAYER_MOVE_REQUEST: PacketDescriptor<Transform> =
    PacketDescriptor::new(0x30, "Player Move Request");
pub const PLAYER_SHOOT_REQUEST: PacketDescriptor<()> =
    PacketDescriptor::new(0x31, "Player Shoot Request");
pub const PLAYER_MOVE_EVENT: PacketDescriptor<(u8, Transform)> =
    PacketDescriptor::new(0x32, "Player Move Event");
pub const PLAYER_SHOOT_EVENT: PacketDescriptor<u8> =
    PacketDescriptor::new(0x33, "Player Shoot Event");

// Chat
pub const CHAT_MESSAGE_REQUEST: PacketDescriptor<String> =
    PacketDescriptor::new(0x40, "Chat Message Request");
pub const CHAT_MESSAGE_EVENT: PacketDescriptor<Vec<ChatChunk>> =
    PacketDescriptor::new(0x41, "Chat Message Event");

// Errors
pub const INVALID_PACKET_ERROR: PacketDescriptor<()> =
    PacketDescriptor::new(0xf0, "Invalid Packet Error");
pub const INVALID_STATE_ERROR: PacketDescriptor<()> =
    PacketDescriptor::new(0xf1, "Invalid State Error");
pub const AUTHENTICATION_FAILED_ERROR: PacketDescriptor<()> =
    PacketDescriptor::new(0xf2, "Authentication Failed Error");
pub const UNEXPECTED_ERROR: PacketDescriptor<()> = PacketDescriptor::new(0xff, "Unexpected Error");

pub const REGISTRY: [PacketInfo; 16] = [
    PING_REQUEST.info(),
    PONG_RESPONSE.info(),
    AUTHENTICATE_REQUEST.info(),
    AUTHENTICATED_RESPONSE.info(),
    ADD_PLAYER_EVENT.info(),
    REMOVE_PLAYER_EVENT.info(),
    PLAYER_MOVE_REQUEST.info(),
    PLAYER_SHOOT_REQUEST.info(),
    PLAYER_MOVE_EVENT.info(),
    PLAYER_SHOOT_EVENT.info(),
    CHAT_MESSAGE_REQUEST.info(),
    CHAT_MESSAGE_EVENT.info(),
    INVALID_PACKET_ERROR.info(),
    INVALID_STATE_ERROR.info(),
    AUTHENTICATION_FAILED_ERROR.info(),
    UNEXPECTED_ERROR.info(),
];

/// Looks up the display name for a packet code.
pub fn name_of(code: u8) -> Option<&'static str> {
    REGISTRY
        .iter()
        .find(|info| info.code == code)
        .map(|info| info.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::collections::HashSet;

    fn roundtrip<F: Wire>(descriptor: &PacketDescriptor<F>, fields: &F) -> F {
        let frame = descriptor.serialize(fields).unwrap();
        assert_eq!(frame[0], descriptor.code);
        assert_eq!(frame.len(), 1 + fields.encoded_len());

        let mut cursor = ByteCursor::new(frame);
        assert_eq!(cursor.read_u8().unwrap(), descriptor.code);
        let decoded = descriptor.deserialize(&mut cursor).unwrap();
        assert_eq!(cursor.remaining(), 0);
        decoded
    }

    #[test]
    fn test_codes_are_unique() {
        let codes: HashSet<u8> = REGISTRY.iter().map(|info| info.code).collect();
        assert_eq!(codes.len(), REGISTRY.len());
    }

    #[test]
    fn test_name_lookup() {
        assert_eq!(name_of(0x00), Some("Ping Request"));
        assert_eq!(name_of(0x41), Some("Chat Message Event"));
        assert_eq!(name_of(0xff), Some("Unexpected Error"));
        assert_eq!(name_of(0x99), None);
    }

    #[test]
    fn test_ping_frame_bytes() {
        let frame = PING_REQUEST.serialize(&0xdeadbeef).unwrap();
        assert_eq!(frame, vec![0x00, 0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_error_frames_are_single_byte() {
        for descriptor in [
            INVALID_PACKET_ERROR,
            INVALID_STATE_ERROR,
            AUTHENTICATION_FAILED_ERROR,
            UNEXPECTED_ERROR,
        ] {
            assert_eq!(descriptor.serialize(&()).unwrap(), vec![descriptor.code]);
        }
        assert_eq!(PLAYER_SHOOT_REQUEST.serialize(&()).unwrap(), vec![0x31]);
    }

    #[test]
    fn test_authenticate_roundtrip() {
        let fields = ("Player_One".to_string(), "token.with.dots".to_string());
        assert_eq!(roundtrip(&AUTHENTICATE_REQUEST, &fields), fields);
    }

    #[test]
    fn test_authenticated_response_keeps_full_roster() {
        let roster = vec![
            PlayerSummary {
                player_id: 3,
                username: "alice".into(),
            },
            PlayerSummary {
                player_id: 200,
                username: "bøb".into(),
            },
        ];
        let frame = AUTHENTICATED_RESPONSE.serialize(&(9, roster.clone())).unwrap();
        // code + id + count + (1 + 2 + 5) + (1 + 2 + 4)
        assert_eq!(frame.len(), 1 + 1 + 2 + 8 + 7);

        let (id, players) = roundtrip(&AUTHENTICATED_RESPONSE, &(9, roster.clone()));
        assert_eq!(id, 9);
        assert_eq!(players, roster);
    }

    #[test]
    fn test_move_event_layout() {
        let transform = Transform::new(1.0, -2.5, 3.25, 0.5, -0.75);
        let frame = PLAYER_MOVE_EVENT.serialize(&(3, transform)).unwrap();
        assert_eq!(frame.len(), 1 + 1 + 20);
        assert_eq!(frame[1], 3);
        assert_eq!(&frame[2..6], &1.0f32.to_be_bytes());

        let (id, decoded) = roundtrip(&PLAYER_MOVE_EVENT, &(3, transform));
        assert_eq!(id, 3);
        assert_approx_eq!(decoded.pos_y, -2.5);
        assert_approx_eq!(decoded.rot_y, -0.75);
    }

    #[test]
    fn test_chat_event_roundtrip() {
        let chunks = vec![
            ChatChunk::new(ChatColor::Gray, true, "alice"),
            ChatChunk::new(ChatColor::White, false, ": "),
            ChatChunk::new(ChatColor::White, false, "hello ✓"),
        ];
        assert_eq!(roundtrip(&CHAT_MESSAGE_EVENT, &chunks), chunks);
        assert_eq!(roundtrip(&CHAT_MESSAGE_EVENT, &Vec::new()), Vec::new());
    }

    #[test]
    fn test_simple_descriptors_roundtrip() {
        assert_eq!(roundtrip(&PONG_RESPONSE, &u32::MAX), u32::MAX);
        assert_eq!(
            roundtrip(&ADD_PLAYER_EVENT, &(255, "zed".to_string())),
            (255, "zed".to_string())
        );
        assert_eq!(roundtrip(&REMOVE_PLAYER_EVENT, &0), 0);
        assert_eq!(roundtrip(&PLAYER_SHOOT_EVENT, &42), 42);
        assert_eq!(
            roundtrip(&CHAT_MESSAGE_REQUEST, &String::new()),
            String::new()
        );
        roundtrip(&PLAYER_SHOOT_REQUEST, &());
    }

    #[test]
    fn test_truncated_move_request_fails() {
        let frame = PLAYER_MOVE_REQUEST
            .serialize(&Transform::default())
            .unwrap();
        let mut cursor = ByteCursor::new(frame[..frame.len() - 1].to_vec());
        cursor.read_u8().unwrap();
        let err = PLAYER_MOVE_REQUEST.deserialize(&mut cursor).unwrap_err();
        assert!(err.is_codec_failure());
    }

    #[test]
    fn test_oversized_chat_request_is_caller_error() {
        let err = CHAT_MESSAGE_REQUEST
            .serialize(&"x".repeat(70_000))
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::Encoding { .. }));
    }
}
