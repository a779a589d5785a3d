//! Background Health Monitor
//!
//! A background task that periodically takes a [`HealthReport`] of the
//! registry and logs it. Last-activity timestamps are only reported here;
//! idle connections are never evicted.
//!
//! ## Design
//!
//! The monitor runs as a Tokio task and:
//! 1. Sleeps for the configured interval
//! 2. Wakes up and snapshots the registry
//! 3. Logs open/closing/idle counts and message totals
//! 4. Publishes the report for anyone holding the handle

use crate::connection::{ConnectionState, ConnectionStats};
use crate::registry::ConnectionRegistry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info};

/// Configuration for the health monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval between reports (default: 30s)
    pub interval: Duration,

    /// Connections without activity for this long are reported idle (default: 60s)
    pub idle_threshold: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            idle_threshold: Duration::from_secs(60),
        }
    }
}

/// A point-in-time view of connection health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    /// Registered connections in state Open
    pub open: usize,
    /// Registered connections in state Closing
    pub closing: usize,
    /// Open connections idle longer than the threshold
    pub idle: usize,
    /// Longest time any open connection has been idle
    pub max_idle: Duration,
    pub connections_accepted: u64,
    pub handshake_failures: u64,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub messages_dropped: u64,
}

impl HealthReport {
    /// Builds a report from the current registry and statistics.
    pub fn collect(
        registry: &ConnectionRegistry,
        stats: &ConnectionStats,
        idle_threshold: Duration,
    ) -> Self {
        let now = Instant::now();
        let mut report = HealthReport {
            connections_accepted: stats.connections_accepted.load(Ordering::Relaxed),
            handshake_failures: stats.handshake_failures.load(Ordering::Relaxed),
            messages_received: stats.messages_received.load(Ordering::Relaxed),
            messages_sent: stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: stats.messages_dropped.load(Ordering::Relaxed),
            ..Default::default()
        };

        registry.for_each(|connection| match connection.state() {
            ConnectionState::Open => {
                report.open += 1;
                let idle = now.saturating_duration_since(connection.last_activity());
                if idle >= idle_threshold {
                    report.idle += 1;
                }
                report.max_idle = report.max_idle.max(idle);
            }
            ConnectionState::Closing => report.closing += 1,
            ConnectionState::Connecting | ConnectionState::Closed => {}
        });

        report
    }
}

/// A handle to the running health monitor.
///
/// When this handle is dropped, the monitor task will be stopped.
#[derive(Debug)]
pub struct HealthMonitor {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,

    /// Most recent report
    report_rx: watch::Receiver<Option<HealthReport>>,
}

impl HealthMonitor {
    /// Starts the monitor as a background task.
    pub fn start(
        registry: Arc<ConnectionRegistry>,
        stats: Arc<ConnectionStats>,
        config: MonitorConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (report_tx, report_rx) = watch::channel(None);

        tokio::spawn(monitor_loop(registry, stats, config, shutdown_rx, report_tx));

        debug!("Health monitor started");

        Self {
            shutdown_tx,
            report_rx,
        }
    }

    /// The most recent report, if one has been taken.
    pub fn latest(&self) -> Option<HealthReport> {
        self.report_rx.borrow().clone()
    }

    /// Stops the monitor.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The main monitor loop.
async fn monitor_loop(
    registry: Arc<ConnectionRegistry>,
    stats: Arc<ConnectionStats>,
    config: MonitorConfig,
    mut shutdown_rx: watch::Receiver<bool>,
    report_tx: watch::Sender<Option<HealthReport>>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Health monitor received shutdown signal");
                    return;
                }
            }
        }

        let report = HealthReport::collect(&registry, &stats, config.idle_threshold);

        info!(
            open = report.open,
            closing = report.closing,
            idle = report.idle,
            max_idle_ms = report.max_idle.as_millis() as u64,
            accepted = report.connections_accepted,
            received = report.messages_received,
            sent = report.messages_sent,
            dropped = report.messages_dropped,
            "Connection health"
        );

        report_tx.send_replace(Some(report));
    }
}
