//! Remote intent sink — the worker-side implementation of `IntentSink`.

use async_trait::async_trait;
use tracing::debug;

use zeroscale_state::{IntentSink, NodeInfo, ScaleIntent};

use crate::client::PeerClient;
use crate::error::ClusterError;

/// Delivers intents to the manager over the `/scale` endpoint.
pub struct RemoteSink {
    client: PeerClient,
    manager_ip: String,
}

impl RemoteSink {
    /// Resolve the manager from the node's peer list. Fails when the
    /// topology contains no manager — a worker without one cannot scale
    /// anything.
    pub fn new(client: PeerClient, node: &NodeInfo) -> Result<Self, ClusterError> {
        let manager = node.manager_peer().ok_or(ClusterError::NoManager)?;
        Ok(Self {
            client,
            manager_ip: manager.ip.clone(),
        })
    }
}

#[async_trait]
impl IntentSink for RemoteSink {
    async fn submit(&self, intent: ScaleIntent) -> anyhow::Result<()> {
        debug!(
            service_id = %intent.service_id,
            direction = %intent.direction,
            manager = %self.manager_ip,
            "forwarding intent to manager"
        );
        self.client
            .send_scale(&self.manager_ip, &intent.service_id, intent.direction)
            .await?;
        Ok(())
    }
}
