//! ServiceRegistry — per-service scaling state behind one short critical
//! section per operation.
//!
//! The registry is the single authority for the park lifecycle: pending
//! keep-alive entries and armed wake ports. Keeping both under one lock makes
//! the actuator's invariants locally checkable — in particular the
//! check-then-insert for a new keep-alive entry is atomic, so two `down`
//! intents racing at one replica cannot spawn duplicate timers.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::types::ServiceId;

/// Pending-park state for a service. The timer task owns the deadline;
/// the entry holds the signal that can still call it off.
struct KeepAlive {
    cancel: CancellationToken,
}

#[derive(Default)]
struct Entry {
    /// Last replica count observed by the actuator (for reporting).
    replicas: u64,
    /// Present iff a park decision is pending reversal.
    keep_alive: Option<KeepAlive>,
    /// Present iff the service is parked behind a wake port.
    armed_port: Option<u32>,
}

/// Read-only snapshot of one service's registry state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceView {
    pub replicas: u64,
    pub pending_park: bool,
    pub armed_port: Option<u32>,
}

/// Tracks the scaling state of every service the actuator has touched.
#[derive(Default)]
pub struct ServiceRegistry {
    inner: Mutex<HashMap<ServiceId, Entry>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a park: atomically create a keep-alive entry unless one already
    /// exists. Returns the cancellation token for the new timer, or `None`
    /// when the park is a duplicate and must be ignored.
    pub fn begin_park(&self, service_id: &str) -> Option<CancellationToken> {
        let mut inner = self.inner.lock();
        let entry = inner.entry(service_id.to_string()).or_default();
        if entry.keep_alive.is_some() {
            return None;
        }
        let cancel = CancellationToken::new();
        entry.keep_alive = Some(KeepAlive {
            cancel: cancel.clone(),
        });
        Some(cancel)
    }

    /// Cancel a pending park. The token is cancelled *before* the entry is
    /// removed, so "entry exists ⇒ timer may still fire" holds throughout.
    /// Returns true if an entry existed.
    pub fn cancel_park(&self, service_id: &str) -> bool {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.get_mut(service_id) else {
            return false;
        };
        match entry.keep_alive.take() {
            Some(ka) => {
                ka.cancel.cancel();
                debug!(service_id, "keep-alive entry cancelled");
                true
            }
            None => false,
        }
    }

    /// Called by the keep-alive timer once its deadline elapses. Claims the
    /// entry (removing it) unless a concurrent `up` intent cancelled it
    /// first — cancellation always wins.
    pub fn try_claim_park(&self, service_id: &str) -> bool {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.get_mut(service_id) else {
            return false;
        };
        match &entry.keep_alive {
            Some(ka) if !ka.cancel.is_cancelled() => {
                entry.keep_alive = None;
                true
            }
            _ => false,
        }
    }

    /// Whether a keep-alive entry currently exists for the service.
    pub fn has_pending_park(&self, service_id: &str) -> bool {
        self.inner
            .lock()
            .get(service_id)
            .is_some_and(|e| e.keep_alive.is_some())
    }

    /// Record that the service is parked behind the given wake port.
    pub fn set_armed_port(&self, service_id: &str, port: u32) {
        let mut inner = self.inner.lock();
        let entry = inner.entry(service_id.to_string()).or_default();
        entry.armed_port = Some(port);
        entry.replicas = 0;
    }

    /// Clear the armed-port record. Returns the port that was armed, if any.
    pub fn clear_armed_port(&self, service_id: &str) -> Option<u32> {
        self.inner
            .lock()
            .get_mut(service_id)
            .and_then(|e| e.armed_port.take())
    }

    /// All `(service, port)` pairs currently expected to be armed. This is
    /// the set the reconciliation sweep re-applies to peers.
    pub fn armed_ports(&self) -> Vec<(ServiceId, u32)> {
        self.inner
            .lock()
            .iter()
            .filter_map(|(id, e)| e.armed_port.map(|p| (id.clone(), p)))
            .collect()
    }

    /// Record the replica count last applied by the actuator.
    pub fn set_replicas(&self, service_id: &str, replicas: u64) {
        let mut inner = self.inner.lock();
        inner.entry(service_id.to_string()).or_default().replicas = replicas;
    }

    /// Snapshot one service's state.
    pub fn view(&self, service_id: &str) -> Option<ServiceView> {
        self.inner.lock().get(service_id).map(|e| ServiceView {
            replicas: e.replicas,
            pending_park: e.keep_alive.is_some(),
            armed_port: e.armed_port,
        })
    }
}
