//! Backend traits — the userspace side of the kernel map contract.

use crate::error::ProbeResult;

/// Threshold constants written once into the concurrent-request probe's
/// `constants` map at init (`{0: lower, 1: upper, 2: buffer_length}`) and
/// never again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub lower: u32,
    pub upper: u32,
    /// Consecutive out-of-band samples required before an event fires
    /// (the request-threshold tolerance).
    pub buffer_length: u32,
}

/// One threshold-crossing record from the concurrent-request probe.
///
/// `direction` carries the raw kernel string (`"Upper"` / `"Lower"`);
/// translation to a scale direction happens in the monitor, which drops
/// anything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdSignal {
    pub key: u32,
    pub direction: String,
}

/// Port-wake kernel map operations. The armed set is a `port → u32` hash
/// map; arming is insert-if-absent and disarming an absent port succeeds,
/// which is what makes cluster-wide arm/disarm broadcasts idempotent.
pub trait PortWakeBackend: Send + Sync {
    fn arm(&self, port: u32) -> ProbeResult<()>;
    fn disarm(&self, port: u32) -> ProbeResult<()>;
}

/// Concurrent-request kernel map operations, keyed by published port or
/// netns inode (chosen once per agent at startup).
pub trait ConcReqBackend: Send + Sync {
    /// Initialize all per-key maps: count 0, scaling flag armed.
    fn add_key(&self, key: u32) -> ProbeResult<()>;
    /// Clear all per-key maps.
    fn remove_key(&self, key: u32) -> ProbeResult<()>;
    /// Re-arm the scaling flag after userspace processed an event.
    fn rearm(&self, key: u32) -> ProbeResult<()>;
}
