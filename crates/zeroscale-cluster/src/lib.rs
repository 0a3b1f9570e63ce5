//! zeroscale-cluster — node identity and the node-to-node control plane.
//!
//! Two small JSON-over-HTTP services on fixed ports:
//!
//! | Port | Path | Semantics |
//! |---|---|---|
//! | 4567 | `POST /scale`, `POST /` | Worker → manager scale intent |
//! | 4568 | `POST /listen` | Arm a wake port on this node |
//! | 4568 | `POST /remove` | Disarm a wake port on this node |
//!
//! Plus the client side: a peer client with bounded timeouts and the
//! sequential broadcast helpers the actuator uses when parking a service
//! cluster-wide. There is no authentication on the control plane.

pub mod client;
pub mod error;
pub mod node;
pub mod server;
pub mod sink;
pub mod wake;

pub use client::PeerClient;
pub use error::{ClusterError, ClusterResult};
pub use node::resolve_node_info;
pub use server::{probe_router, scale_router, serve};
pub use sink::RemoteSink;
pub use wake::WakeRouter;

/// Fixed port of the scale-intent service.
pub const SCALE_PORT: u16 = 4567;

/// Fixed port of the probe-arming service.
pub const PROBE_PORT: u16 = 4568;
