//! # wsrelay - A Minimal WebSocket Relay Server
//!
//! wsrelay accepts WebSocket clients and relays every message it receives
//! according to one routing policy: back to the sender, to every connected
//! client, or through an application-supplied handler.
//!
//! ## Features
//!
//! - **Per-Connection Workers**: one reader and one writer task per client
//! - **Bounded Queues**: a slow client only ever stalls itself
//! - **Strict Lifecycle**: Connecting → Open → Closing → Closed, cleanup runs exactly once
//! - **Graceful Shutdown**: Ctrl-C closes every connection before exit
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              wsrelay                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ RelayServer │───>│ Connection  │───>│   Router    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  (policy)   │                  │
//! │  └──────┬──────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │         │ admit            │ Closed           │ snapshot / send         │
//! │         ▼                  ▼                  ▼                         │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────────┐    │
//! │  │ Supervisor  │───>│            ConnectionRegistry                │    │
//! │  │             │    │   RwLock<HashMap<ConnectionId, Connection>>  │    │
//! │  └─────────────┘    └──────────────────────────────────────────────┘    │
//! │                                               ▲                         │
//! │                                               │                         │
//! │                     ┌─────────────────────────┴───────────────────────┐ │
//! │                     │           HealthMonitor                         │ │
//! │                     │      (Background Tokio Task)                    │ │
//! │                     └─────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use wsrelay::router::RoutingPolicy;
//! use wsrelay::server::{RelayServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig {
//!         port: 9001,
//!         ..Default::default()
//!     };
//!
//!     let policy = RoutingPolicy::Broadcast { include_source: false };
//!     let server = RelayServer::bind(config, policy).await?;
//!
//!     server
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`server`]: Configuration, binding, the accept loop and shutdown
//! - [`connection`]: Connection state machine and per-connection workers
//! - [`registry`]: The table of live connections
//! - [`router`]: Routing policies and message relay
//! - [`supervisor`]: Exactly-once cleanup and health reporting
//! - [`protocol`]: Payloads and messages
//!
//! ## Design Highlights
//!
//! ### Backpressure
//!
//! Every connection has a bounded outbound queue. A reply to the sender
//! waits for room, which slows down only that sender. A broadcast to other
//! clients never waits: if a target's queue is full, the message is dropped
//! for that target and counted.
//!
//! ### Exactly-Once Cleanup
//!
//! Several paths can end a connection at once (peer close, transport error,
//! shutdown). Whichever moves it into `Closed` first notifies the
//! supervisor; every other path is a no-op.

pub mod connection;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod server;
pub mod supervisor;

// Re-export commonly used types for convenience
pub use connection::{CloseReason, Connection, ConnectionId, ConnectionState, ConnectionStats};
pub use error::{RelayError, RelayResult};
pub use protocol::{Message, Payload};
pub use registry::ConnectionRegistry;
pub use router::{ForwardHandler, Router, RoutingPolicy};
pub use server::{RelayServer, ServerConfig, DEFAULT_HOST, DEFAULT_PORT};
pub use supervisor::{HealthMonitor, Supervisor};

/// Version of wsrelay
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
