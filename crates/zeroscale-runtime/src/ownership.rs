//! Ownership resolution — which containers this agent monitors.
//!
//! Two rules, applied to every lifecycle event and to the initial inventory
//! scan:
//!
//! 1. **Explicit**: the container carries the handler-node label and it
//!    names this host.
//! 2. **Implicit**: no handler-node label, and the task name marks the first
//!    task replica (`.1.`).
//!
//! The explicit label always wins — a container labeled for another host is
//! not owned here even if its task name matches the implicit rule. A
//! container matching neither rule is ignored.

use crate::types::ContainerInfo;

/// Marker in a swarm task name identifying the first task replica.
const FIRST_TASK_MARKER: &str = ".1.";

/// Whether this agent is responsible for monitoring `container`.
pub fn owned_by(container: &ContainerInfo, self_hostname: &str) -> bool {
    match container.owner_host_label.as_deref() {
        Some(owner) => owner == self_hostname,
        None => container
            .task_name
            .as_deref()
            .is_some_and(|task| task.contains(FIRST_TASK_MARKER)),
    }
}
