//! Graceful shutdown coordination
//!
//! A [`ShutdownController`] owns the broadcast side; each cooperative
//! task holds a [`ShutdownSignal`] and checks it at its suspension
//! points. Signalling is idempotent: the first call wins, later calls
//! are no-ops. Tasks finish their current step (bounded by the poll
//! timeout) rather than being interrupted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

/// Broadcast side of the shutdown channel.
pub struct ShutdownController {
    tx: broadcast::Sender<()>,
    fired: AtomicBool,
}

impl ShutdownController {
    /// Create a new controller.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(4);
        Self {
            tx,
            fired: AtomicBool::new(false),
        }
    }

    /// Hand out a signal receiver for one task.
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
            fired: false,
        }
    }

    /// Request shutdown. Idempotent: repeated calls are no-ops.
    pub fn signal(&self) {
        if self.fired.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already in progress");
            return;
        }
        // Send fails only when every receiver is already gone.
        let _ = self.tx.send(());
        debug!("Shutdown signalled");
    }

    /// Check whether shutdown has been requested.
    pub fn is_signalled(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver side held by one cooperative task.
pub struct ShutdownSignal {
    rx: broadcast::Receiver<()>,
    fired: bool,
}

impl ShutdownSignal {
    /// Non-blocking check, suitable at the top of a loop iteration.
    pub fn is_signalled(&mut self) -> bool {
        if self.fired {
            return true;
        }
        use broadcast::error::TryRecvError;
        match self.rx.try_recv() {
            Ok(()) | Err(TryRecvError::Closed) | Err(TryRecvError::Lagged(_)) => {
                self.fired = true;
                true
            }
            Err(TryRecvError::Empty) => false,
        }
    }

    /// Suspend until shutdown is requested.
    pub async fn recv(&mut self) {
        if self.fired {
            return;
        }
        // Any outcome (message, lag, closed channel) means stop.
        let _ = self.rx.recv().await;
        self.fired = true;
    }

    /// Sleep for `duration` unless shutdown fires first.
    /// Returns `true` when shutdown fired during the wait.
    pub async fn sleep_unless_signalled(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.recv() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }
}
