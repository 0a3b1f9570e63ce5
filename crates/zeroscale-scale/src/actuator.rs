//! The scale actuator.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use zeroscale_cluster::PeerClient;
use zeroscale_metrics::LogTables;
use zeroscale_probe::PortWakeProbe;
use zeroscale_runtime::{ContainerRuntime, ServiceInfo};
use zeroscale_state::{IntentSink, NodeInfo, ScaleDirection, ScaleIntent, ServiceRegistry};

/// Turns intents into replica updates and drives the park transition.
///
/// Cheap to clone; every field is shared. The keep-alive timers it spawns
/// hold clones.
#[derive(Clone)]
pub struct ScaleActuator {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<ServiceRegistry>,
    probe: Arc<PortWakeProbe>,
    client: PeerClient,
    node: Arc<NodeInfo>,
    tables: Arc<LogTables>,
}

impl ScaleActuator {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        registry: Arc<ServiceRegistry>,
        probe: Arc<PortWakeProbe>,
        client: PeerClient,
        node: Arc<NodeInfo>,
        tables: Arc<LogTables>,
    ) -> Self {
        Self {
            runtime,
            registry,
            probe,
            client,
            node,
            tables,
        }
    }

    /// Apply one step of the state chart to `service_id`.
    ///
    /// Runtime API errors are returned to the caller without retries; the
    /// next monitor tick re-emits the intent.
    pub async fn change_replicas(
        &self,
        service_id: &str,
        direction: ScaleDirection,
    ) -> anyhow::Result<()> {
        if !self.node.is_manager {
            anyhow::bail!("scale request on non-manager node {}", self.node.hostname);
        }

        let service = self.runtime.inspect_service(service_id).await?;
        debug!(
            service_id,
            replicas = service.replicas,
            %direction,
            "applying scale intent"
        );

        match (direction, service.replicas) {
            (ScaleDirection::Up, 0) => self.unpark(&service).await,
            (ScaleDirection::Up, 1) => {
                // A pending park is a decision still open to reversal: the
                // up intent cancels it and the replica count stays put.
                if self.registry.cancel_park(service_id) {
                    info!(service_id, "pending park cancelled by scale-up");
                    return Ok(());
                }
                // Growing past one replica: release the owner-host pin so
                // the orchestrator may place the new task anywhere.
                self.runtime
                    .set_owner_constraint(service_id, false)
                    .await
                    .context("failed to drop placement constraint")?;
                self.scale_to(service_id, 2).await
            }
            (ScaleDirection::Up, r) => self.scale_to(service_id, r + 1).await,
            (ScaleDirection::Down, 0) => {
                debug!(service_id, "already parked, ignoring");
                Ok(())
            }
            (ScaleDirection::Down, 1) => self.begin_park(&service),
            (ScaleDirection::Down, 2) => {
                // Shrinking to one replica: pin it to the owner host so the
                // wake probe watches the right node.
                self.runtime
                    .set_owner_constraint(service_id, true)
                    .await
                    .context("failed to add placement constraint")?;
                self.scale_to(service_id, 1).await
            }
            (ScaleDirection::Down, r) => self.scale_to(service_id, r - 1).await,
        }
    }

    async fn scale_to(&self, service_id: &str, replicas: u64) -> anyhow::Result<()> {
        self.runtime
            .set_replicas(service_id, replicas)
            .await
            .with_context(|| format!("failed to scale service {service_id}"))?;
        self.registry.set_replicas(service_id, replicas);
        self.tables.set_service_replicas(service_id, replicas);
        info!(service_id, replicas, "service scaled");
        Ok(())
    }

    /// `down` at one replica: create the keep-alive entry and start its
    /// timer. The check-then-insert is atomic in the registry, so a racing
    /// duplicate is simply ignored.
    fn begin_park(&self, service: &ServiceInfo) -> anyhow::Result<()> {
        let deadline = Instant::now() + self.node.keep_alive;
        let Some(cancel) = self.registry.begin_park(&service.id) else {
            info!(service_id = %service.id, "park already pending, ignoring duplicate");
            return Ok(());
        };

        info!(
            service_id = %service.id,
            keep_alive = ?self.node.keep_alive,
            "service idle at one replica, parking after keep-alive"
        );
        self.tables
            .add_event(format!("keep-alive started for service {}", service.id));

        let actuator = self.clone();
        let service_id = service.id.clone();
        tokio::spawn(async move {
            actuator.keep_alive_timer(service_id, deadline, cancel).await;
        });
        Ok(())
    }

    async fn keep_alive_timer(self, service_id: String, deadline: Instant, cancel: CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(%service_id, "keep-alive cancelled before parking");
                return;
            }
            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {}
        }

        // A concurrent up intent may have won between the deadline and here.
        if !self.registry.try_claim_park(&service_id) {
            debug!(%service_id, "keep-alive entry gone, not parking");
            return;
        }

        match self.park(&service_id).await {
            Ok(port) => {
                info!(%service_id, port, "service parked at zero replicas");
                self.tables
                    .add_event(format!("service {service_id} parked behind port {port}"));
            }
            Err(e) => {
                // Best-effort: the service stays at one replica and the
                // next down intent starts a fresh keep-alive.
                warn!(%service_id, error = %e, "failed to park service");
            }
        }
    }

    /// Execute the park: resolve the port, arm it locally and on every
    /// peer, then scale to zero. Arming everywhere completes *before* the
    /// replica update, otherwise the first packet could reach a live
    /// replica and the wake event would be lost.
    async fn park(&self, service_id: &str) -> anyhow::Result<u32> {
        let service = self.runtime.inspect_service(service_id).await?;
        if service.replicas != 1 {
            anyhow::bail!(
                "replicas moved to {} during keep-alive, not parking",
                service.replicas
            );
        }
        if service.published_port == 0 {
            anyhow::bail!("service {service_id} has no published port to watch");
        }
        let port = service.published_port;

        self.probe
            .listen(port, service_id)
            .context("failed to arm local wake port")?;

        if let Err(e) = self
            .client
            .broadcast_listen(&self.node.peers, port, service_id)
            .await
        {
            let _ = self.probe.remove(port);
            return Err(anyhow::Error::from(e).context("failed to arm wake port on peers"));
        }

        if let Err(e) = self.runtime.set_replicas(service_id, 0).await {
            let _ = self.probe.remove(port);
            let _ = self.client.broadcast_remove(&self.node.peers, port).await;
            return Err(anyhow::Error::from(e).context("failed to scale to zero"));
        }

        self.registry.set_armed_port(service_id, port);
        self.tables.set_service_replicas(service_id, 0);
        Ok(port)
    }

    /// `up` at zero replicas: disarm the wake port everywhere and bring one
    /// replica back.
    async fn unpark(&self, service: &ServiceInfo) -> anyhow::Result<()> {
        self.registry.cancel_park(&service.id);

        let port = self
            .registry
            .clear_armed_port(&service.id)
            .or((service.published_port > 0).then_some(service.published_port));

        if let Some(port) = port {
            // The waking node already disarmed itself; these are for the
            // manager's own map and any peer the wake broadcast missed.
            if let Err(e) = self.probe.remove(port) {
                warn!(service_id = %service.id, port, error = %e, "failed to disarm local wake port");
            }
            if let Err(e) = self.client.broadcast_remove(&self.node.peers, port).await {
                warn!(service_id = %service.id, port, error = %e, "failed to disarm wake port on peers");
            }
        }

        self.tables
            .add_event(format!("service {} woken, unparking", service.id));
        self.scale_to(&service.id, 1).await
    }
}

#[async_trait]
impl IntentSink for ScaleActuator {
    async fn submit(&self, intent: ScaleIntent) -> anyhow::Result<()> {
        self.change_replicas(&intent.service_id, intent.direction)
            .await
    }
}
