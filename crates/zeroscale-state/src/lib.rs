//! zeroscale-state — shared domain types and the per-service scaling registry.
//!
//! Every other crate in the workspace speaks these types: node identity,
//! scale intents, and the `ServiceRegistry` that tracks the park/unpark
//! lifecycle of each service behind short critical sections.

pub mod intent;
pub mod registry;
pub mod types;

pub use intent::{IntentSink, ScaleIntent};
pub use registry::{ServiceRegistry, ServiceView};
pub use types::*;
