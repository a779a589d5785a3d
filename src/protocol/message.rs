//! Relay Message Types
//!
//! The relay never interprets what clients send. A payload is either UTF-8
//! text or raw bytes, mirroring the two WebSocket data frame kinds, and the
//! frame boundary is the message boundary.
//!
//! Control frames (ping, pong, close) are handled by the connection worker
//! and never become a [`Payload`].

use crate::connection::ConnectionId;
use bytes::Bytes;
use std::fmt;
use std::time::SystemTime;
use tokio_tungstenite::tungstenite::Message as Frame;

/// An opaque application payload.
///
/// Binary payloads use [`Bytes`] so broadcasting one message to many
/// connections clones a reference count, not the data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// A text frame
    Text(String),
    /// A binary frame
    Binary(Bytes),
}

impl Payload {
    pub fn text(text: impl Into<String>) -> Self {
        Payload::Text(text.into())
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Payload::Binary(data.into())
    }

    /// Converts an inbound frame into a payload.
    ///
    /// Returns `None` for control frames.
    pub fn from_frame(frame: Frame) -> Option<Self> {
        match frame {
            Frame::Text(text) => Some(Payload::Text(text)),
            Frame::Binary(data) => Some(Payload::Binary(Bytes::from(data))),
            Frame::Ping(_) | Frame::Pong(_) | Frame::Close(_) | Frame::Frame(_) => None,
        }
    }

    /// Returns the payload as raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(text) => text.as_bytes(),
            Payload::Binary(data) => data,
        }
    }

    /// Size of the payload in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Payload::Text(_))
    }
}

impl From<Payload> for Frame {
    fn from(payload: Payload) -> Self {
        match payload {
            Payload::Text(text) => Frame::Text(text),
            Payload::Binary(data) => Frame::Binary(data.to_vec()),
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self {
        Payload::Binary(data)
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Text(text) => write!(f, "text({} bytes)", text.len()),
            Payload::Binary(data) => write!(f, "binary({} bytes)", data.len()),
        }
    }
}

/// A payload tagged with where and when it arrived.
///
/// Created by the receive loop, consumed by the router, then dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The connection the payload arrived on
    pub source: ConnectionId,
    /// The uninterpreted payload
    pub payload: Payload,
    /// Arrival time
    pub received_at: SystemTime,
}

impl Message {
    /// Creates a message stamped with the current time.
    pub fn new(source: ConnectionId, payload: Payload) -> Self {
        Self {
            source,
            payload,
            received_at: SystemTime::now(),
        }
    }

    /// Consumes the message, returning its payload.
    pub fn into_payload(self) -> Payload {
        self.payload
    }
}
