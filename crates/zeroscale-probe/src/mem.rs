//! In-memory probe backends.
//!
//! Mirror the kernel programs' observable semantics — armed-set gating for
//! the port watch, and count/flag/tolerance accounting for concurrent
//! requests — so the façades and everything above them can be exercised
//! without loading a kernel object. These back the default (non-`bpf`)
//! build and the test suites.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::warn;

use crate::backend::{ConcReqBackend, PortWakeBackend, ThresholdSignal, Thresholds};
use crate::error::ProbeResult;

/// In-memory port-wake backend. A synthetic packet to an armed port emits a
/// ring event, exactly like the kernel program.
pub struct MemoryPortWake {
    armed: DashMap<u32, u32>,
    events: mpsc::Sender<u32>,
}

impl MemoryPortWake {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<u32>) {
        let (tx, rx) = mpsc::channel(64);
        (
            Arc::new(Self {
                armed: DashMap::new(),
                events: tx,
            }),
            rx,
        )
    }

    /// Simulate an ingress packet to `port`. Returns whether an event fired.
    pub fn packet(&self, port: u32) -> bool {
        if !self.armed.contains_key(&port) {
            return false;
        }
        if self.events.try_send(port).is_err() {
            warn!(port, "wake event ring full, sample lost");
            return false;
        }
        true
    }

    pub fn is_armed(&self, port: u32) -> bool {
        self.armed.contains_key(&port)
    }
}

impl PortWakeBackend for MemoryPortWake {
    fn arm(&self, port: u32) -> ProbeResult<()> {
        self.armed.insert(port, 1);
        Ok(())
    }

    fn disarm(&self, port: u32) -> ProbeResult<()> {
        self.armed.remove(&port);
        Ok(())
    }
}

/// In-memory concurrent-request backend with the full kernel accounting:
/// per-key connection count, scaling flag, and the consecutive-sample
/// tolerance buffer.
pub struct MemoryConcReq {
    active: DashMap<u32, u32>,
    scaling: DashMap<u32, u32>,
    buffer: DashMap<u32, u32>,
    thresholds: Thresholds,
    events: mpsc::Sender<ThresholdSignal>,
}

impl MemoryConcReq {
    pub fn new(thresholds: Thresholds) -> (Arc<Self>, mpsc::Receiver<ThresholdSignal>) {
        let (tx, rx) = mpsc::channel(64);
        (
            Arc::new(Self {
                active: DashMap::new(),
                scaling: DashMap::new(),
                buffer: DashMap::new(),
                thresholds,
                events: tx,
            }),
            rx,
        )
    }

    /// Simulate one established connection on `key`.
    pub fn connection_opened(&self, key: u32) {
        self.sample(key, 1);
    }

    /// Simulate one closed connection on `key`.
    pub fn connection_closed(&self, key: u32) {
        self.sample(key, -1);
    }

    pub fn count(&self, key: u32) -> Option<u32> {
        self.active.get(&key).map(|e| *e.value())
    }

    pub fn is_flag_armed(&self, key: u32) -> bool {
        self.scaling.get(&key).is_some_and(|e| *e.value() == 1)
    }

    /// One socket-event sample, following the kernel program: update the
    /// count, bail while quiesced, track consecutive out-of-band samples,
    /// and fire (clearing the flag) once the tolerance is reached.
    fn sample(&self, key: u32, delta: i32) {
        let Some(mut count) = self.active.get_mut(&key) else {
            return;
        };
        let value = if delta >= 0 {
            *count + delta as u32
        } else {
            count.saturating_sub(delta.unsigned_abs())
        };
        *count = value;
        drop(count);

        if !self.is_flag_armed(key) {
            return;
        }

        let out_of_band = value <= self.thresholds.lower || value >= self.thresholds.upper;
        let buffered = {
            let mut buffer = self.buffer.entry(key).or_insert(0);
            *buffer = if out_of_band { *buffer + 1 } else { 0 };
            *buffer
        };

        if buffered >= self.thresholds.buffer_length {
            self.scaling.insert(key, 0);
            self.buffer.insert(key, 0);
            let direction = if value <= self.thresholds.lower {
                "Lower"
            } else {
                "Upper"
            };
            if self
                .events
                .try_send(ThresholdSignal {
                    key,
                    direction: direction.to_string(),
                })
                .is_err()
            {
                warn!(key, "threshold event ring full, sample lost");
            }
        }
    }
}

impl ConcReqBackend for MemoryConcReq {
    fn add_key(&self, key: u32) -> ProbeResult<()> {
        self.active.insert(key, 0);
        self.scaling.insert(key, 1);
        self.buffer.insert(key, 0);
        Ok(())
    }

    fn remove_key(&self, key: u32) -> ProbeResult<()> {
        self.active.remove(&key);
        self.scaling.remove(&key);
        self.buffer.remove(&key);
        Ok(())
    }

    fn rearm(&self, key: u32) -> ProbeResult<()> {
        self.scaling.insert(key, 1);
        Ok(())
    }
}
