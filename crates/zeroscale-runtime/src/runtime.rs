//! The container runtime contract.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use zeroscale_state::ServiceId;

use crate::error::{RuntimeError, RuntimeResult};
use crate::types::{ContainerEvent, ContainerInfo, ServiceInfo};

/// Stream of container lifecycle events. An `Err` item signals a transport
/// failure; the subscriber drops the stream and re-subscribes with backoff.
pub type EventStream = BoxStream<'static, RuntimeResult<ContainerEvent>>;

/// Contract with the container orchestrator.
///
/// Everything the autoscaler needs from the runtime: introspection, replica
/// updates, placement constraints, and lifecycle events. Backends:
/// [`crate::DockerRuntime`] in production, [`crate::MemoryRuntime`] in tests.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// All currently running containers on this node, with their labels.
    async fn list_containers(&self) -> RuntimeResult<Vec<ContainerInfo>>;

    /// Inspect one container, including its init PID.
    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerInfo>;

    /// Inspect a service: replicas, published port, constraints, owner label.
    async fn inspect_service(&self, id: &str) -> RuntimeResult<ServiceInfo>;

    /// Set the service's replica count.
    async fn set_replicas(&self, id: &str, replicas: u64) -> RuntimeResult<()>;

    /// Pin the service to its owner host (`pin = true`) or clear its
    /// placement constraints (`pin = false`). A no-op when pinning a service
    /// without an owner label (implicit ownership).
    async fn set_owner_constraint(&self, id: &str, pin: bool) -> RuntimeResult<()>;

    /// Subscribe to container start/die events from now on.
    async fn events(&self) -> RuntimeResult<EventStream>;

    /// Resolve the owning service of a container via its service-id label.
    async fn service_of_container(&self, id: &str) -> RuntimeResult<ServiceId> {
        let container = self.inspect_container(id).await?;
        container
            .service_id
            .ok_or_else(|| RuntimeError::MissingLabel {
                container: id.to_string(),
                label: crate::SERVICE_ID_LABEL.to_string(),
            })
    }
}
