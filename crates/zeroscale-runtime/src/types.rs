//! Runtime-facing views of containers and services.

use std::collections::HashMap;

use zeroscale_state::{ContainerId, ServiceId};

use crate::{OWNER_LABEL, SERVICE_ID_LABEL, TASK_NAME_LABEL};

/// What the agent knows about a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: ContainerId,
    /// Owning service, from the service-id label. Absent on unmanaged
    /// containers.
    pub service_id: Option<ServiceId>,
    /// Explicit owner hostname, if the handler-node label is present.
    pub owner_host_label: Option<String>,
    /// Swarm task name, used by the implicit-ownership rule.
    pub task_name: Option<String>,
    /// Host PID of the container's init process, for namespace lookups.
    pub pid: Option<u32>,
}

impl ContainerInfo {
    /// Build a view from a container's label map.
    pub fn from_labels(id: impl Into<ContainerId>, labels: &HashMap<String, String>) -> Self {
        Self {
            id: id.into(),
            service_id: labels.get(SERVICE_ID_LABEL).cloned(),
            owner_host_label: labels.get(OWNER_LABEL).cloned(),
            task_name: labels.get(TASK_NAME_LABEL).cloned(),
            pid: None,
        }
    }
}

/// What the agent knows about a replicated service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub id: ServiceId,
    pub replicas: u64,
    /// First published endpoint port; 0 when the service publishes none.
    pub published_port: u32,
    pub placement_constraints: Vec<String>,
    /// Explicit owner hostname from the service's handler-node label.
    pub owner_host_label: Option<String>,
}

/// Container lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Start,
    Die,
}

/// One event from the runtime's lifecycle stream. Carries the container
/// attributes from the event itself, so die events don't require an inspect
/// of an already-gone container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEvent {
    pub kind: EventKind,
    pub container: ContainerInfo,
}
