//! Server Module
//!
//! Binding, accepting, and shutting down.
//!
//! ```ignore
//! use wsrelay::router::RoutingPolicy;
//! use wsrelay::server::{RelayServer, ServerConfig};
//!
//! let server = RelayServer::bind(ServerConfig::default(), RoutingPolicy::Echo).await?;
//! server.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! ```

pub mod config;
pub mod listener;

pub use config::{parse_port, ServerConfig, DEFAULT_HOST, DEFAULT_PORT, MAX_OUTBOUND_CAPACITY};
pub use listener::RelayServer;
