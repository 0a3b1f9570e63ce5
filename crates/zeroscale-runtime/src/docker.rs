//! Docker Engine backend for the runtime contract.
//!
//! Thin mapping between the trait and the Engine API via `bollard`. Swarm
//! services are expected to run in replicated mode; anything else is
//! rejected with `RuntimeError::NotReplicated`.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bollard::container::ListContainersOptions;
use bollard::service::UpdateServiceOptions;
use bollard::system::EventsOptions;
use bollard::Docker;
use futures_util::StreamExt;
use tracing::debug;

use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::{ContainerRuntime, EventStream};
use crate::types::{ContainerEvent, ContainerInfo, EventKind, ServiceInfo};
use crate::OWNER_LABEL;

/// Runtime backend over the local Docker daemon.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the standard environment (socket path, `DOCKER_HOST`).
    pub fn connect() -> RuntimeResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Api(e.to_string()))?;
        Ok(Self { docker })
    }

    async fn raw_service(&self, id: &str) -> RuntimeResult<bollard::models::Service> {
        self.docker
            .inspect_service(id, None)
            .await
            .map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                } => RuntimeError::ServiceNotFound(id.to_string()),
                other => RuntimeError::Api(other.to_string()),
            })
    }

    /// Apply a mutation to the service spec and push the update.
    async fn update_spec<F>(&self, id: &str, mutate: F) -> RuntimeResult<()>
    where
        F: FnOnce(&mut bollard::models::ServiceSpec),
    {
        let service = self.raw_service(id).await?;
        let version = service
            .version
            .and_then(|v| v.index)
            .ok_or_else(|| RuntimeError::Api(format!("service {id} has no version")))?;
        let mut spec = service
            .spec
            .ok_or_else(|| RuntimeError::Api(format!("service {id} has no spec")))?;

        mutate(&mut spec);

        self.docker
            .update_service(
                id,
                spec,
                UpdateServiceOptions {
                    version,
                    ..Default::default()
                },
                None,
            )
            .await
            .map_err(|e| RuntimeError::Api(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self) -> RuntimeResult<Vec<ContainerInfo>> {
        let mut filters = HashMap::new();
        filters.insert("status".to_string(), vec!["running".to_string()]);

        let summaries = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| RuntimeError::Api(e.to_string()))?;

        let containers = summaries
            .into_iter()
            .filter_map(|s| {
                let id = s.id?;
                let labels = s.labels.unwrap_or_default();
                Some(ContainerInfo::from_labels(id, &labels))
            })
            .collect();
        Ok(containers)
    }

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerInfo> {
        let response = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                } => RuntimeError::ContainerNotFound(id.to_string()),
                other => RuntimeError::Api(other.to_string()),
            })?;

        let labels = response
            .config
            .and_then(|c| c.labels)
            .unwrap_or_default();
        let mut info = ContainerInfo::from_labels(id, &labels);
        info.pid = response
            .state
            .and_then(|s| s.pid)
            .and_then(|pid| u32::try_from(pid).ok());
        Ok(info)
    }

    async fn inspect_service(&self, id: &str) -> RuntimeResult<ServiceInfo> {
        let service = self.raw_service(id).await?;
        let spec = service
            .spec
            .ok_or_else(|| RuntimeError::Api(format!("service {id} has no spec")))?;

        let replicas = spec
            .mode
            .as_ref()
            .and_then(|m| m.replicated.as_ref())
            .and_then(|r| r.replicas)
            .ok_or_else(|| RuntimeError::NotReplicated(id.to_string()))?;

        let published_port = service
            .endpoint
            .and_then(|e| e.ports)
            .and_then(|ports| ports.first().and_then(|p| p.published_port))
            .map(|p| p as u32)
            .unwrap_or(0);

        let placement_constraints = spec
            .task_template
            .as_ref()
            .and_then(|t| t.placement.as_ref())
            .and_then(|p| p.constraints.clone())
            .unwrap_or_default();

        let owner_host_label = spec
            .labels
            .as_ref()
            .and_then(|l| l.get(OWNER_LABEL))
            .cloned();

        Ok(ServiceInfo {
            id: id.to_string(),
            replicas: replicas as u64,
            published_port,
            placement_constraints,
            owner_host_label,
        })
    }

    async fn set_replicas(&self, id: &str, replicas: u64) -> RuntimeResult<()> {
        self.update_spec(id, |spec| {
            if let Some(mode) = spec.mode.as_mut() {
                if let Some(replicated) = mode.replicated.as_mut() {
                    replicated.replicas = Some(replicas as i64);
                }
            }
        })
        .await?;
        debug!(service_id = id, replicas, "replica count updated");
        Ok(())
    }

    async fn set_owner_constraint(&self, id: &str, pin: bool) -> RuntimeResult<()> {
        let service = self.raw_service(id).await?;
        let owner = service
            .spec
            .as_ref()
            .and_then(|s| s.labels.as_ref())
            .and_then(|l| l.get(OWNER_LABEL))
            .cloned();

        let Some(owner) = owner else {
            // Implicit ownership: nothing to pin to.
            return Ok(());
        };

        self.update_spec(id, |spec| {
            let template = spec.task_template.get_or_insert_with(Default::default);
            let placement = template.placement.get_or_insert_with(Default::default);
            placement.constraints = if pin {
                Some(vec![format!("node.hostname=={owner}")])
            } else {
                None
            };
        })
        .await?;
        debug!(service_id = id, pin, %owner, "placement constraint updated");
        Ok(())
    }

    async fn events(&self) -> RuntimeResult<EventStream> {
        let since = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            .to_string();

        let mut filters = HashMap::new();
        filters.insert("type".to_string(), vec!["container".to_string()]);
        filters.insert(
            "event".to_string(),
            vec!["start".to_string(), "die".to_string()],
        );

        let stream = self.docker.events(Some(EventsOptions {
            since: Some(since),
            until: None,
            filters,
        }));

        let stream = stream.filter_map(|item| async move {
            match item {
                Ok(message) => event_from_message(message).map(Ok),
                Err(e) => Some(Err(RuntimeError::Stream(e.to_string()))),
            }
        });

        Ok(Box::pin(stream))
    }
}

/// Map an Engine event to a lifecycle event. Container attributes on the
/// event carry the labels, so no inspect round-trip is needed — which also
/// makes die events resolvable after the container is gone.
fn event_from_message(message: bollard::models::EventMessage) -> Option<ContainerEvent> {
    let kind = match message.action.as_deref() {
        Some("start") => EventKind::Start,
        Some("die") => EventKind::Die,
        _ => return None,
    };

    let actor = message.actor?;
    let container_id = actor.id?;
    let attributes = actor.attributes.unwrap_or_default();

    Some(ContainerEvent {
        kind,
        container: ContainerInfo::from_labels(container_id, &attributes),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SERVICE_ID_LABEL, TASK_NAME_LABEL};

    fn message(action: &str, id: &str) -> bollard::models::EventMessage {
        let mut attributes = HashMap::new();
        attributes.insert(SERVICE_ID_LABEL.to_string(), "svc-1".to_string());
        attributes.insert(TASK_NAME_LABEL.to_string(), "web.1.abc".to_string());

        bollard::models::EventMessage {
            action: Some(action.to_string()),
            actor: Some(bollard::models::EventActor {
                id: Some(id.to_string()),
                attributes: Some(attributes),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn start_and_die_events_are_mapped() {
        let event = event_from_message(message("start", "c-1")).unwrap();
        assert_eq!(event.kind, EventKind::Start);
        assert_eq!(event.container.id, "c-1");
        assert_eq!(event.container.service_id.as_deref(), Some("svc-1"));

        let event = event_from_message(message("die", "c-1")).unwrap();
        assert_eq!(event.kind, EventKind::Die);
    }

    #[test]
    fn unrelated_actions_are_dropped() {
        assert!(event_from_message(message("create", "c-1")).is_none());
    }
}
