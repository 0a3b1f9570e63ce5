//! Concurrent-request probe façade.
//!
//! Routes threshold records from the kernel ring to the per-key monitor
//! that registered the key, mirroring the per-namespace signal channels of
//! the kernel-side accounting.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::{ConcReqBackend, ThresholdSignal};
use crate::error::ProbeResult;

/// Userspace façade over the concurrent-request kernel program.
pub struct ConcReqProbe {
    backend: Arc<dyn ConcReqBackend>,
    subscribers: DashMap<u32, mpsc::Sender<String>>,
}

impl ConcReqProbe {
    pub fn new(backend: Arc<dyn ConcReqBackend>) -> Self {
        Self {
            backend,
            subscribers: DashMap::new(),
        }
    }

    /// Start accounting for `key` and return the channel its threshold
    /// signals arrive on.
    pub fn add_key(&self, key: u32) -> ProbeResult<mpsc::Receiver<String>> {
        self.backend.add_key(key)?;
        let (tx, rx) = mpsc::channel(8);
        self.subscribers.insert(key, tx);
        debug!(key, "concurrent-request accounting started");
        Ok(rx)
    }

    /// Stop accounting for `key` and clear its kernel maps.
    pub fn remove_key(&self, key: u32) -> ProbeResult<()> {
        self.subscribers.remove(&key);
        self.backend.remove_key(key)?;
        debug!(key, "concurrent-request accounting stopped");
        Ok(())
    }

    /// Re-arm the scaling flag for `key` after its last event was handled.
    pub fn rearm(&self, key: u32) -> ProbeResult<()> {
        self.backend.rearm(key)
    }

    /// Route ring events to subscribers until cancelled or the ring closes.
    /// Signals for unregistered keys are dropped.
    pub async fn run_router(
        self: Arc<Self>,
        mut events: mpsc::Receiver<ThresholdSignal>,
        cancel: CancellationToken,
    ) {
        debug!("concurrent-request router started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("concurrent-request router stopped");
                    return;
                }
                event = events.recv() => {
                    let Some(signal) = event else {
                        debug!("concurrent-request ring closed");
                        return;
                    };
                    match self.subscribers.get(&signal.key) {
                        Some(tx) => {
                            if tx.try_send(signal.direction).is_err() {
                                warn!(key = signal.key, "threshold signal dropped, monitor lagging");
                            }
                        }
                        None => debug!(key = signal.key, "threshold signal for unknown key"),
                    }
                }
            }
        }
    }
}
