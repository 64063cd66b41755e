//! Delivery fan-out loop
//!
//! The steady-state loop of the relay: poll the change source, format
//! each event, deliver to every currently registered subscriber.
//! Failure isolation is per (event, recipient) — one blocked recipient
//! never stops delivery to the rest. Poll failures trigger one
//! reconnect attempt, then a backoff before the next cycle; the loop
//! itself only ends on the shutdown signal.

use crate::config::RelaySettings;
use crate::error::Result;
use crate::registry::SubscriberRegistry;
use crate::shutdown::ShutdownSignal;
use crate::source::ChangeSource;
use crate::telegram::ChatSender;
use promorelay_core::format_notification;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Runner lifecycle state, for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerStatus {
    /// Constructed, not yet polling
    Starting,
    /// Polling normally
    Running,
    /// Reconnecting after a poll failure
    Unhealthy,
    /// Stopped via shutdown
    Stopped,
}

impl std::fmt::Display for RunnerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Lock-free delivery counters, shared out before the runner is consumed.
pub struct FanoutStats {
    events_received: AtomicU64,
    notifications_sent: AtomicU64,
    delivery_failures: AtomicU64,
    reconnects: AtomicU64,
    status: RwLock<RunnerStatus>,
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FanoutStatsSnapshot {
    /// Events decoded from the source
    pub events_received: u64,
    /// Successful per-recipient sends
    pub notifications_sent: u64,
    /// Failed per-recipient sends
    pub delivery_failures: u64,
    /// Reconnect cycles entered
    pub reconnects: u64,
}

impl FanoutStats {
    fn new() -> Self {
        Self {
            events_received: AtomicU64::new(0),
            notifications_sent: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            status: RwLock::new(RunnerStatus::Starting),
        }
    }

    /// Snapshot the counters.
    pub fn snapshot(&self) -> FanoutStatsSnapshot {
        FanoutStatsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }

    /// Current runner status.
    pub async fn status(&self) -> RunnerStatus {
        *self.status.read().await
    }

    async fn set_status(&self, status: RunnerStatus) {
        *self.status.write().await = status;
    }
}

/// The delivery fan-out loop.
pub struct FanoutRunner {
    source: Box<dyn ChangeSource>,
    registry: Arc<dyn SubscriberRegistry>,
    sender: Arc<dyn ChatSender>,
    settings: RelaySettings,
    stats: Arc<FanoutStats>,
}

impl FanoutRunner {
    /// Create a runner over injected collaborators.
    pub fn new(
        source: Box<dyn ChangeSource>,
        registry: Arc<dyn SubscriberRegistry>,
        sender: Arc<dyn ChatSender>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            source,
            registry,
            sender,
            settings,
            stats: Arc::new(FanoutStats::new()),
        }
    }

    /// Shared handle to the counters; survives the runner.
    pub fn stats(&self) -> Arc<FanoutStats> {
        self.stats.clone()
    }

    /// Run until the shutdown signal fires.
    ///
    /// The signal is checked at each suspension point: after the poll,
    /// during backoff, and during the inter-iteration sleep. A batch in
    /// flight when shutdown arrives is still delivered.
    pub async fn run(mut self, mut shutdown: ShutdownSignal) -> Result<()> {
        info!("Fan-out loop starting");
        self.stats.set_status(RunnerStatus::Running).await;

        while !shutdown.is_signalled() {
            // Fresh snapshot so subscription changes apply within one
            // poll interval, without restart.
            let subscribers = match self.registry.list().await {
                Ok(set) => set,
                Err(e) => {
                    warn!(error = %e, "Failed to read subscriber registry");
                    BTreeSet::new()
                }
            };

            match self.source.poll().await {
                Ok(events) => self.deliver(events, &subscribers).await,
                Err(e) => {
                    warn!(error = %e, "Poll failed, reconnecting");
                    self.stats.set_status(RunnerStatus::Unhealthy).await;
                    self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
                    match self.source.reconnect().await {
                        Ok(()) => {
                            info!("Change source reconnected");
                            self.stats.set_status(RunnerStatus::Running).await;
                        }
                        Err(e) => {
                            warn!(error = %e, "Reconnect failed, backing off");
                            if shutdown
                                .sleep_unless_signalled(self.settings.reconnect_backoff())
                                .await
                            {
                                break;
                            }
                        }
                    }
                    continue;
                }
            }

            // Cooperative yield; also bounds shutdown latency.
            if shutdown
                .sleep_unless_signalled(self.settings.idle_sleep())
                .await
            {
                break;
            }
        }

        self.source.close().await;
        let snapshot = self.stats.snapshot();
        self.stats.set_status(RunnerStatus::Stopped).await;
        info!(
            events = snapshot.events_received,
            sent = snapshot.notifications_sent,
            failed = snapshot.delivery_failures,
            reconnects = snapshot.reconnects,
            "Fan-out loop stopped"
        );
        Ok(())
    }

    async fn deliver(
        &self,
        events: Vec<promorelay_core::ChangeEvent>,
        subscribers: &BTreeSet<i64>,
    ) {
        for event in events {
            self.stats.events_received.fetch_add(1, Ordering::Relaxed);
            let text = format_notification(&event);
            debug!(table = %event.table, action = %event.action, "Relaying change");

            for &chat_id in subscribers {
                match self.sender.send_text(chat_id, &text).await {
                    Ok(()) => {
                        self.stats.notifications_sent.fetch_add(1, Ordering::Relaxed);
                        debug!(chat_id, "Notification delivered");
                    }
                    Err(e) => {
                        // Per-recipient isolation: log, count, move on.
                        self.stats.delivery_failures.fetch_add(1, Ordering::Relaxed);
                        warn!(chat_id, error = %e, "Delivery failed");
                    }
                }
            }
        }
    }
}
