//! Error taxonomy for the wire protocol and connection layer.
//!
//! Codec failures (`FrameBounds`, `Encoding`, `InvalidUtf8`) are local to a
//! single encode or decode attempt. The dispatch boundary turns inbound codec
//! failures into an Invalid Packet response instead of closing the socket;
//! outbound encode failures are returned to the caller of `send`.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Error, Debug)]
pub enum Error {
    /// A read, write or seek would leave the buffer.
    #[error("frame bounds exceeded: {width} byte access at offset {offset} of a {len} byte buffer")]
    FrameBounds {
        offset: usize,
        width: usize,
        len: usize,
    },

    /// A string or array is too long for its u16 length prefix.
    #[error("encoded length {len} exceeds the wire limit of {limit}")]
    Encoding { len: usize, limit: usize },

    #[error("string field is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A correlated response failed a sanity check.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("timed out waiting for \"{packet}\" packet")]
    Timeout { packet: &'static str },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),
}

impl Error {
    /// True for failures caused by a malformed or oversized frame.
    pub fn is_codec_failure(&self) -> bool {
        matches!(
            self,
            Error::FrameBounds { .. } | Error::Encoding { .. } | Error::InvalidUtf8(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
