//! Lifecycle Supervisor Module
//!
//! This module owns what happens around a connection rather than inside it:
//! admission into the registry, exactly-once cleanup when it closes, bulk
//! closure on shutdown, and periodic health reporting.
//!
//! ## Architecture
//!
//! ```text
//!        Connection enters Closed
//!                 │ on_closed (exactly once)
//!                 ▼
//!  ┌─────────────────────────────┐
//!  │        Supervisor           │
//!  │  - deregister from registry │
//!  │  - release router state     │
//!  │  - update statistics        │
//!  └─────────────────────────────┘
//!                 ▲
//!                 │ snapshots
//!  ┌─────────────────────────────┐
//!  │       HealthMonitor         │
//!  │   (Background Tokio Task)   │
//!  └─────────────────────────────┘
//! ```

pub mod lifecycle;
pub mod monitor;

pub use lifecycle::Supervisor;
pub use monitor::{HealthMonitor, HealthReport, MonitorConfig};
