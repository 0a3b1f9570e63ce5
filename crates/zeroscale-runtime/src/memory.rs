//! In-memory runtime backend for tests.
//!
//! Mimics the semantics the autoscaler relies on: replicated services with a
//! published port and an optional owner label, running containers with
//! labels, and a pushable lifecycle event stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use zeroscale_state::{ContainerId, ServiceId};

use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::{ContainerRuntime, EventStream};
use crate::types::{ContainerEvent, ContainerInfo, ServiceInfo};

#[derive(Default)]
struct MemoryService {
    replicas: u64,
    published_port: u32,
    constraints: Vec<String>,
    owner_host_label: Option<String>,
}

/// Ephemeral runtime holding services and containers in maps.
#[derive(Default)]
pub struct MemoryRuntime {
    services: DashMap<ServiceId, MemoryService>,
    containers: DashMap<ContainerId, ContainerInfo>,
    event_senders: Mutex<Vec<mpsc::UnboundedSender<RuntimeResult<ContainerEvent>>>>,
    fail_events: AtomicBool,
}

impl MemoryRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a replicated service.
    pub fn add_service(
        &self,
        id: &str,
        replicas: u64,
        published_port: u32,
        owner_host_label: Option<&str>,
    ) {
        self.services.insert(
            id.to_string(),
            MemoryService {
                replicas,
                published_port,
                constraints: Vec::new(),
                owner_host_label: owner_host_label.map(String::from),
            },
        );
    }

    /// Register a running container.
    pub fn add_container(&self, container: ContainerInfo) {
        self.containers.insert(container.id.clone(), container);
    }

    /// Push a lifecycle event to every open stream.
    pub fn push_event(&self, event: ContainerEvent) {
        self.event_senders
            .lock()
            .retain(|tx| tx.send(Ok(event.clone())).is_ok());
    }

    /// Inject a transport error into every open stream.
    pub fn push_stream_error(&self) {
        self.event_senders
            .lock()
            .retain(|tx| tx.send(Err(RuntimeError::Stream("injected".to_string()))).is_ok());
    }

    /// Make the next `events()` call fail (subscriber backoff paths).
    pub fn fail_next_subscribe(&self) {
        self.fail_events.store(true, Ordering::SeqCst);
    }

    pub fn replicas(&self, id: &str) -> Option<u64> {
        self.services.get(id).map(|s| s.replicas)
    }

    pub fn constraints(&self, id: &str) -> Vec<String> {
        self.services
            .get(id)
            .map(|s| s.constraints.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    async fn list_containers(&self) -> RuntimeResult<Vec<ContainerInfo>> {
        Ok(self.containers.iter().map(|e| e.value().clone()).collect())
    }

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerInfo> {
        self.containers
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| RuntimeError::ContainerNotFound(id.to_string()))
    }

    async fn inspect_service(&self, id: &str) -> RuntimeResult<ServiceInfo> {
        self.services
            .get(id)
            .map(|s| ServiceInfo {
                id: id.to_string(),
                replicas: s.replicas,
                published_port: s.published_port,
                placement_constraints: s.constraints.clone(),
                owner_host_label: s.owner_host_label.clone(),
            })
            .ok_or_else(|| RuntimeError::ServiceNotFound(id.to_string()))
    }

    async fn set_replicas(&self, id: &str, replicas: u64) -> RuntimeResult<()> {
        let mut service = self
            .services
            .get_mut(id)
            .ok_or_else(|| RuntimeError::ServiceNotFound(id.to_string()))?;
        service.replicas = replicas;
        Ok(())
    }

    async fn set_owner_constraint(&self, id: &str, pin: bool) -> RuntimeResult<()> {
        let mut service = self
            .services
            .get_mut(id)
            .ok_or_else(|| RuntimeError::ServiceNotFound(id.to_string()))?;

        let Some(owner) = service.owner_host_label.clone() else {
            return Ok(());
        };
        service.constraints = if pin {
            vec![format!("node.hostname=={owner}")]
        } else {
            Vec::new()
        };
        Ok(())
    }

    async fn events(&self) -> RuntimeResult<EventStream> {
        if self.fail_events.swap(false, Ordering::SeqCst) {
            return Err(RuntimeError::Stream("injected subscribe failure".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.event_senders.lock().push(tx);

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventKind;
    use futures_util::StreamExt;

    fn test_container(id: &str) -> ContainerInfo {
        ContainerInfo {
            id: id.to_string(),
            service_id: Some("svc".to_string()),
            owner_host_label: None,
            task_name: Some("svc.1.x".to_string()),
            pid: Some(100),
        }
    }

    #[tokio::test]
    async fn service_replica_updates() {
        let runtime = MemoryRuntime::new();
        runtime.add_service("svc", 2, 8080, None);

        runtime.set_replicas("svc", 3).await.unwrap();
        assert_eq!(runtime.inspect_service("svc").await.unwrap().replicas, 3);

        assert!(matches!(
            runtime.set_replicas("ghost", 1).await,
            Err(RuntimeError::ServiceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn owner_constraint_pin_and_clear() {
        let runtime = MemoryRuntime::new();
        runtime.add_service("svc", 1, 8080, Some("hostA"));

        runtime.set_owner_constraint("svc", true).await.unwrap();
        assert_eq!(runtime.constraints("svc"), vec!["node.hostname==hostA"]);

        runtime.set_owner_constraint("svc", false).await.unwrap();
        assert!(runtime.constraints("svc").is_empty());
    }

    #[tokio::test]
    async fn constraint_is_noop_without_owner_label() {
        let runtime = MemoryRuntime::new();
        runtime.add_service("svc", 1, 8080, None);

        runtime.set_owner_constraint("svc", true).await.unwrap();
        assert!(runtime.constraints("svc").is_empty());
    }

    #[tokio::test]
    async fn events_are_delivered() {
        let runtime = MemoryRuntime::new();
        let mut stream = runtime.events().await.unwrap();

        runtime.push_event(ContainerEvent {
            kind: EventKind::Start,
            container: test_container("c-1"),
        });

        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(event.kind, EventKind::Start);
        assert_eq!(event.container.id, "c-1");
    }

    #[tokio::test]
    async fn subscribe_failure_is_one_shot() {
        let runtime = MemoryRuntime::new();
        runtime.fail_next_subscribe();

        assert!(runtime.events().await.is_err());
        assert!(runtime.events().await.is_ok());
    }
}
