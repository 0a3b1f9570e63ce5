//! Armed-port reconciliation sweep.
//!
//! Broadcasts abort on the first failed peer, so a park can leave the
//! cluster split: some nodes armed, some not. Rather than retrying
//! broadcasts, armed-port state is treated as eventually consistent — the
//! manager periodically re-applies its expected set to itself and every
//! peer. Arming is idempotent, so converged nodes are no-ops.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use zeroscale_cluster::PeerClient;
use zeroscale_probe::PortWakeProbe;
use zeroscale_state::{NodeInfo, ServiceRegistry};

/// Default sweep interval.
pub const RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

/// Re-apply the manager's expected armed-port set until cancelled.
pub async fn run_reconciler(
    registry: Arc<ServiceRegistry>,
    probe: Arc<PortWakeProbe>,
    client: PeerClient,
    node: Arc<NodeInfo>,
    interval: Duration,
    cancel: CancellationToken,
) {
    debug!(interval = ?interval, "armed-port reconciler started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("armed-port reconciler stopped");
                return;
            }
            _ = tokio::time::sleep(interval) => {
                sweep(&registry, &probe, &client, &node).await;
            }
        }
    }
}

async fn sweep(
    registry: &ServiceRegistry,
    probe: &PortWakeProbe,
    client: &PeerClient,
    node: &NodeInfo,
) {
    let expected = registry.armed_ports();
    if expected.is_empty() {
        return;
    }
    debug!(ports = expected.len(), "reconciling armed ports");

    for (service_id, port) in expected {
        if let Err(e) = probe.listen(port, &service_id) {
            warn!(port, %service_id, error = %e, "local re-arm failed");
        }
        // Unlike a park broadcast, the sweep keeps going past failed peers;
        // whatever it cannot fix now it retries next round.
        for peer in &node.peers {
            if let Err(e) = client.send_listen(&peer.ip, port, &service_id).await {
                warn!(
                    peer = %peer.hostname,
                    port,
                    %service_id,
                    error = %e,
                    "peer re-arm failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zeroscale_metrics::LogTables;
    use zeroscale_probe::MemoryPortWake;

    #[tokio::test]
    async fn sweep_rearms_the_local_probe() {
        let registry = Arc::new(ServiceRegistry::new());
        let (backend, _events) = MemoryPortWake::new();
        let probe = Arc::new(PortWakeProbe::new(
            backend.clone(),
            Arc::new(LogTables::new()),
        ));
        let node = NodeInfo {
            hostname: "m1".to_string(),
            is_manager: true,
            peers: Vec::new(),
            keep_alive: Duration::from_secs(5),
        };

        // The registry says 8080 should be armed, but the local probe lost
        // it (say, the broadcast raced a restart).
        registry.set_armed_port("svc", 8080);
        assert!(!backend.is_armed(8080));

        sweep(&registry, &probe, &PeerClient::new(), &node).await;
        assert!(backend.is_armed(8080));
        assert_eq!(probe.service_for(8080).as_deref(), Some("svc"));
    }

    #[tokio::test]
    async fn empty_expected_set_is_a_noop() {
        let registry = Arc::new(ServiceRegistry::new());
        let (backend, _events) = MemoryPortWake::new();
        let probe = Arc::new(PortWakeProbe::new(
            backend.clone(),
            Arc::new(LogTables::new()),
        ));
        let node = NodeInfo {
            hostname: "m1".to_string(),
            is_manager: true,
            peers: Vec::new(),
            keep_alive: Duration::from_secs(5),
        };

        sweep(&registry, &probe, &PeerClient::new(), &node).await;
        assert!(probe.armed().is_empty());
    }
}
