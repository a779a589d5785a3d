//! Connection Module
//!
//! This module manages individual client connections to the relay.
//! Each client connection is driven by its own pair of async tasks, so the
//! server handles thousands of concurrent clients and one stalled client
//! never delays another.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Listener (server module)                   │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ accept() + WebSocket upgrade
//!                        ▼
//!           ┌────────────────────────┐
//!           │   For each client...   │
//!           └────────────┬───────────┘
//!                        │
//!                        │ spawn task
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │ Read frame  │───>│  Message    │───>│   Router    │      │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘      │
//! │                                               │             │
//! │                                               ▼             │
//! │                    ┌─────────────┐    ┌─────────────┐       │
//! │                    │ Writer task │<───│  Outbound   │       │
//! │                    └─────────────┘    │  queue      │       │
//! │                                       └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Lifecycle**: Connecting → Open → Closing → Closed, never backwards
//! - **Bounded Queues**: every connection buffers at most `outbound_capacity` messages
//! - **Prompt Cancellation**: entering Closing aborts the pending read and any waiting send
//! - **Statistics**: tracks connection and message metrics

pub mod handle;
pub mod handler;
pub mod state;

// Re-export commonly used types
pub use handle::{CloseObserver, Connection, OutboundQueue};
pub use handler::{close_reason_for, inbound, write_loop, ConnectionHandler, ConnectionStats};
pub use state::{CloseReason, ConnectionId, ConnectionState, IdAllocator};
