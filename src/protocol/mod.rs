//! Message Protocol
//!
//! This module defines what travels through the relay.
//!
//! ## Overview
//!
//! Framing is delegated entirely to WebSocket: one data frame is one
//! [`Payload`]. The relay attaches the source connection and arrival time,
//! producing a [`Message`] that the router consumes.
//!
//! ## Example
//!
//! ```
//! use wsrelay::connection::ConnectionId;
//! use wsrelay::protocol::{Message, Payload};
//!
//! let message = Message::new(ConnectionId::new(1), Payload::text("ping"));
//! assert_eq!(message.payload.len(), 4);
//! ```

pub mod message;

pub use message::{Message, Payload};
