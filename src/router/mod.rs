//! Message Router Module
//!
//! This module decides where each inbound message is relayed.
//!
//! ## Architecture
//!
//! ```text
//! Inbound Message
//!       │
//!       ▼
//! ┌─────────────────┐
//! │ Router::route   │  policy ──> RouterAction
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ Router::execute │  Echo      ──> source
//! │                 │  Broadcast ──> every open connection (registry snapshot)
//! │                 │  Forward   ──> ForwardHandler ──> source
//! └─────────────────┘
//! ```
//!
//! ## Policies
//!
//! - `echo`: every message goes back to its sender unchanged
//! - `broadcast`: every open connection, including the sender
//! - `broadcast-others`: every open connection except the sender
//! - `forward`: an application-supplied [`ForwardHandler`] answers

pub mod dispatch;
pub mod policy;

pub use dispatch::{RelayOutcome, Router};
pub use policy::{ForwardHandler, RouterAction, RoutingPolicy, UnknownPolicy};
