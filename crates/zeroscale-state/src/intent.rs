//! Scale intents and the sink abstraction that delivers them.

use async_trait::async_trait;

use crate::types::{ContainerId, ScaleDirection, ServiceId};

/// A desired scaling action for a service.
///
/// Intents are the only input to the scale actuator. Monitors produce them;
/// the actuator (directly on the manager, via the control plane from
/// workers) consumes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleIntent {
    pub service_id: ServiceId,
    pub direction: ScaleDirection,
    /// Container whose monitor produced the intent. `None` for intents that
    /// arrived over the control plane, which does not carry the origin.
    pub origin: Option<ContainerId>,
}

impl ScaleIntent {
    pub fn new(service_id: impl Into<ServiceId>, direction: ScaleDirection) -> Self {
        Self {
            service_id: service_id.into(),
            direction,
            origin: None,
        }
    }

    pub fn from_container(
        service_id: impl Into<ServiceId>,
        direction: ScaleDirection,
        origin: impl Into<ContainerId>,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            direction,
            origin: Some(origin.into()),
        }
    }
}

/// Destination for scale intents.
///
/// Two implementations exist: the local actuator (manager nodes) and the
/// control-plane client (worker nodes). Monitors hold a `dyn IntentSink` and
/// never branch on the node role.
#[async_trait]
pub trait IntentSink: Send + Sync {
    /// Deliver one intent. Errors are reported to the caller; callers log
    /// and drop — an intent lost to a transient error is re-emitted by the
    /// next monitor tick.
    async fn submit(&self, intent: ScaleIntent) -> anyhow::Result<()>;
}
