//! Error Types
//!
//! Every failure the relay can observe is one variant of [`RelayError`].
//! Only the startup errors ([`RelayError::Bind`], [`RelayError::Config`]) are
//! fatal to the process; everything else is contained within a single
//! connection or a single acceptance attempt.
//!
//! ```text
//! Variant              Scope              Effect
//! ───────────────────  ─────────────────  ────────────────────────────────
//! Bind                 startup            process exits non-zero
//! Config               startup            process exits non-zero
//! Handshake            one accept         TCP stream dropped, loop continues
//! Transport            one connection     connection enters Closing
//! ClosedConnection     one send           write dropped
//! QueueFull            one send           write dropped (fan-out overflow)
//! DuplicateIdentifier  one accept         connection rejected
//! ```

use crate::connection::ConnectionId;
use std::net::SocketAddr;

/// Errors produced by the relay server.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The listening endpoint could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// A configuration value could not be parsed
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The WebSocket upgrade failed or timed out
    #[error("handshake with {peer} failed: {reason}")]
    Handshake { peer: SocketAddr, reason: String },

    /// Read or write failure on an established connection
    #[error("transport error: {0}")]
    Transport(String),

    /// Send attempted on a connection that is Closing or Closed
    #[error("connection {0} is closed")]
    ClosedConnection(ConnectionId),

    /// The outbound queue of the target connection is full
    #[error("outbound queue of connection {0} is full")]
    QueueFull(ConnectionId),

    /// A connection with the same identifier is already registered
    #[error("connection {0} is already registered")]
    DuplicateIdentifier(ConnectionId),
}

/// Result alias used throughout the crate.
pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_connection() {
        let err = RelayError::ClosedConnection(ConnectionId::new(3));
        assert_eq!(err.to_string(), "connection conn-3 is closed");

        let err = RelayError::DuplicateIdentifier(ConnectionId::new(9));
        assert_eq!(err.to_string(), "connection conn-9 is already registered");
    }

    #[test]
    fn test_bind_error_keeps_source() {
        use std::error::Error;

        let err = RelayError::Bind {
            addr: "127.0.0.1:1".into(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(err.to_string().starts_with("failed to bind 127.0.0.1:1"));
        assert!(err.source().is_some());
    }
}
