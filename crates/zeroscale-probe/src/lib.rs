//! zeroscale-probe — typed façades over the two kernel traffic probes.
//!
//! Both probes follow the same lifecycle: load → attach → open a ring
//! reader → deliver events on a channel → on close, detach and drain.
//!
//! - **Port-wake** watches the ingress path for packets to armed ports and
//!   fires the un-park sequence for the owning service.
//! - **Concurrent-request** counts established connections per key (port or
//!   network namespace) and signals threshold crossings, gated by a per-key
//!   scaling flag so each arm/fire cycle produces exactly one event.
//!
//! The kernel objects themselves are a fixed contract (map names and
//! layouts); userspace reaches them through the backend traits in
//! [`backend`]. The `bpf` feature enables the eBPF-backed implementation;
//! the in-memory backend mirrors the kernel semantics for tests and
//! probe-less development builds.

pub mod backend;
pub mod conc_req;
pub mod error;
pub mod mem;
pub mod port_wake;

#[cfg(feature = "bpf")]
pub mod bpf;

pub use backend::{ConcReqBackend, PortWakeBackend, ThresholdSignal, Thresholds};
pub use conc_req::ConcReqProbe;
pub use error::{ProbeError, ProbeResult};
pub use mem::{MemoryConcReq, MemoryPortWake};
pub use port_wake::{run_wake_reader, PortWakeProbe, WakeHandler};
