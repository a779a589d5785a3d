//! Connection Registry Module
//!
//! This module provides the table of live connections for one server
//! instance.
//!
//! ## Features
//!
//! - **Single Lock**: one `RwLock` serializes register, deregister and snapshot
//! - **Idempotent Removal**: deregistering twice equals deregistering once
//! - **Snapshot Iteration**: broadcast never holds the lock across I/O
//!
//! ## Example
//!
//! ```
//! use wsrelay::connection::{Connection, ConnectionId};
//! use wsrelay::registry::ConnectionRegistry;
//! use std::sync::Arc;
//!
//! let registry = ConnectionRegistry::new();
//! let (conn, _outbound) =
//!     Connection::new(ConnectionId::new(1), "127.0.0.1:9000".parse().unwrap(), 16);
//! conn.mark_open();
//!
//! registry.register(Arc::clone(&conn)).unwrap();
//! assert_eq!(registry.len(), 1);
//!
//! registry.deregister(conn.id());
//! registry.deregister(conn.id());
//! assert!(registry.is_empty());
//! ```

pub mod table;

pub use table::ConnectionRegistry;
