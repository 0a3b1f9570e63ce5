//! zeroscale-scale — the scale actuator and keep-alive state machine.
//!
//! Runs on the manager only. Intents arrive (locally or via the control
//! plane), the actuator reads the service's current replica count and walks
//! the state chart:
//!
//! ```text
//!   up:   0 → cancel pending park, disarm everywhere, replicas 1 (unpark)
//!         1 → drop owner pin, replicas 2
//!         n → replicas n+1
//!   down: n ≥ 3 → replicas n-1
//!         2 → replicas 1, pin to owner host
//!         1 → start the keep-alive timer (duplicates ignored)
//!         0 → ignore, already parked
//! ```
//!
//! The keep-alive timer is the only asynchronous action: when it fires
//! uncancelled it arms the service's published port on every node, then
//! sets replicas to zero. A concurrent `up` intent always wins against the
//! timer.

pub mod actuator;
pub mod reconcile;

pub use actuator::ScaleActuator;
pub use reconcile::run_reconciler;
