//! Peer client — the outgoing half of the control plane.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use zeroscale_state::{Peer, ScaleDirection, ServiceId};

use crate::error::{ClusterError, ClusterResult};
use crate::{PROBE_PORT, SCALE_PORT};

/// Requests must not hang on an unreachable peer.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// `/scale` request body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ScaleRequest {
    #[serde(rename = "serviceId")]
    pub service_id: ServiceId,
    pub direction: ScaleDirection,
}

/// `/listen` request body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListenRequest {
    pub port: u32,
    #[serde(rename = "serviceId")]
    pub service_id: ServiceId,
}

/// `/remove` request body.
#[derive(Debug, Serialize, Deserialize)]
pub struct RemoveRequest {
    pub port: u32,
}

/// HTTP client for the control-plane endpoints of peer nodes.
#[derive(Clone)]
pub struct PeerClient {
    http: reqwest::Client,
}

impl PeerClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self { http }
    }

    /// Forward a scale intent to the manager at `ip`.
    pub async fn send_scale(
        &self,
        ip: &str,
        service_id: &str,
        direction: ScaleDirection,
    ) -> ClusterResult<()> {
        self.post(
            ip,
            format!("http://{ip}:{SCALE_PORT}/scale"),
            &ScaleRequest {
                service_id: service_id.to_string(),
                direction,
            },
        )
        .await
    }

    /// Ask the node at `ip` to arm a wake port.
    pub async fn send_listen(&self, ip: &str, port: u32, service_id: &str) -> ClusterResult<()> {
        self.post(
            ip,
            format!("http://{ip}:{PROBE_PORT}/listen"),
            &ListenRequest {
                port,
                service_id: service_id.to_string(),
            },
        )
        .await
    }

    /// Ask the node at `ip` to disarm a wake port.
    pub async fn send_remove(&self, ip: &str, port: u32) -> ClusterResult<()> {
        self.post(
            ip,
            format!("http://{ip}:{PROBE_PORT}/remove"),
            &RemoveRequest { port },
        )
        .await
    }

    /// Arm a wake port on every peer, sequentially. The first failed peer
    /// aborts the broadcast; the reconciliation sweep repairs stragglers.
    pub async fn broadcast_listen(
        &self,
        peers: &[Peer],
        port: u32,
        service_id: &str,
    ) -> ClusterResult<()> {
        for peer in peers {
            self.send_listen(&peer.ip, port, service_id).await?;
            debug!(peer = %peer.hostname, port, "wake port armed on peer");
        }
        Ok(())
    }

    /// Disarm a wake port on every peer, sequentially, aborting on the
    /// first failure.
    pub async fn broadcast_remove(&self, peers: &[Peer], port: u32) -> ClusterResult<()> {
        for peer in peers {
            self.send_remove(&peer.ip, port).await?;
            debug!(peer = %peer.hostname, port, "wake port removed on peer");
        }
        Ok(())
    }

    async fn post<B: Serialize>(&self, peer: &str, url: String, body: &B) -> ClusterResult<()> {
        let response = self.http.post(url).json(body).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ClusterError::Rejected {
            peer: peer.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

impl Default for PeerClient {
    fn default() -> Self {
        Self::new()
    }
}
