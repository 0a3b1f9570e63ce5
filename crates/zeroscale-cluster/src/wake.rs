//! Wake routing — what happens after the first packet hits a parked port.
//!
//! The probe reader has already disarmed its local port when this handler
//! runs. The router finishes the job cluster-wide: disarm on every peer,
//! then route an `up` intent toward the manager. Both steps are best-effort
//! — a failed broadcast is repaired by the reconciliation sweep, and a lost
//! intent means the service stays parked until the next packet.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use zeroscale_probe::WakeHandler;
use zeroscale_state::{IntentSink, NodeInfo, ScaleDirection, ScaleIntent};

use crate::client::PeerClient;

/// `WakeHandler` wired into the port-wake reader on every node.
pub struct WakeRouter {
    client: PeerClient,
    node: Arc<NodeInfo>,
    sink: Arc<dyn IntentSink>,
}

impl WakeRouter {
    pub fn new(client: PeerClient, node: Arc<NodeInfo>, sink: Arc<dyn IntentSink>) -> Self {
        Self { client, node, sink }
    }
}

#[async_trait]
impl WakeHandler for WakeRouter {
    async fn on_wake(&self, port: u32, service_id: &str) {
        if let Err(e) = self.client.broadcast_remove(&self.node.peers, port).await {
            warn!(port, error = %e, "failed to disarm wake port on all peers");
        }

        let intent = ScaleIntent::new(service_id, ScaleDirection::Up);
        if let Err(e) = self.sink.submit(intent).await {
            warn!(service_id, error = %e, "failed to route wake intent to manager");
        }
    }
}
