//! Port-wake probe façade and its event reader.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use zeroscale_metrics::LogTables;
use zeroscale_state::ServiceId;

use crate::backend::PortWakeBackend;
use crate::error::ProbeResult;

/// Reaction to a wake event, implemented by the scale side of the agent.
///
/// The reader only knows how to observe packets and disarm its own port;
/// broadcasting the disarm and routing the `up` intent to the manager is
/// the handler's business. This keeps the probe free of any dependency on
/// the actuator.
#[async_trait]
pub trait WakeHandler: Send + Sync {
    async fn on_wake(&self, port: u32, service_id: &str);
}

/// Userspace façade over the port-wake kernel program.
///
/// Owns the `port → service` table alongside the kernel's armed-port map
/// and keeps the two in sync.
pub struct PortWakeProbe {
    backend: Arc<dyn PortWakeBackend>,
    port_to_service: DashMap<u32, ServiceId>,
    tables: Arc<LogTables>,
}

impl PortWakeProbe {
    pub fn new(backend: Arc<dyn PortWakeBackend>, tables: Arc<LogTables>) -> Self {
        Self {
            backend,
            port_to_service: DashMap::new(),
            tables,
        }
    }

    /// Arm `port` so the first ingress packet wakes `service_id`.
    /// Arming an already-armed port is a no-op success.
    pub fn listen(&self, port: u32, service_id: &str) -> ProbeResult<()> {
        self.backend.arm(port)?;
        self.port_to_service.insert(port, service_id.to_string());
        self.tables.add_armed_port(port, service_id);
        info!(port, service_id, "listening for wake traffic");
        Ok(())
    }

    /// Disarm `port`. Succeeds when the port was not armed.
    pub fn remove(&self, port: u32) -> ProbeResult<()> {
        self.backend.disarm(port)?;
        if self.port_to_service.remove(&port).is_some() {
            info!(port, "wake port removed");
        }
        self.tables.remove_armed_port(port);
        Ok(())
    }

    /// Service owning an armed port.
    pub fn service_for(&self, port: u32) -> Option<ServiceId> {
        self.port_to_service.get(&port).map(|e| e.value().clone())
    }

    /// All armed `(port, service)` pairs on this node.
    pub fn armed(&self) -> Vec<(u32, ServiceId)> {
        self.port_to_service
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }
}

/// Drive wake events until cancelled or the ring closes.
///
/// For each event: disarm the port locally, then hand off to the wake
/// handler (peer broadcast + up intent). Events for ports that were already
/// removed are ignored — the service is awake and the packet went through.
pub async fn run_wake_reader(
    probe: Arc<PortWakeProbe>,
    mut events: mpsc::Receiver<u32>,
    handler: Arc<dyn WakeHandler>,
    cancel: CancellationToken,
) {
    debug!("port-wake reader started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("port-wake reader stopped");
                return;
            }
            event = events.recv() => {
                let Some(port) = event else {
                    debug!("port-wake ring closed");
                    return;
                };
                let Some(service_id) = probe.service_for(port) else {
                    debug!(port, "wake for unarmed port, ignoring");
                    continue;
                };

                info!(port, %service_id, "first packet detected on parked service");
                probe
                    .tables
                    .add_event(format!("wake on port {port} for service {service_id}"));

                if let Err(e) = probe.remove(port) {
                    warn!(port, error = %e, "failed to disarm woken port");
                }
                handler.on_wake(port, &service_id).await;
            }
        }
    }
}
