//! Node identity resolution.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use zeroscale_state::{NodeInfo, NodeRole, Peer};

/// Build this node's identity from the configured cluster topology.
///
/// The node is a manager iff its hostname appears in `managers`; every
/// other configured node becomes a peer.
pub fn resolve_node_info(
    managers: &HashMap<String, String>,
    workers: &HashMap<String, String>,
    keep_alive: Duration,
) -> anyhow::Result<NodeInfo> {
    let hostname = nix::unistd::gethostname()
        .context("failed to resolve hostname")?
        .to_string_lossy()
        .into_owned();
    Ok(build_node_info(hostname, managers, workers, keep_alive))
}

fn build_node_info(
    hostname: String,
    managers: &HashMap<String, String>,
    workers: &HashMap<String, String>,
    keep_alive: Duration,
) -> NodeInfo {
    let is_manager = managers.contains_key(&hostname);

    let mut peers = Vec::new();
    for (name, ip) in managers {
        if *name != hostname {
            peers.push(Peer {
                hostname: name.clone(),
                ip: ip.clone(),
                role: NodeRole::Manager,
            });
        }
    }
    for (name, ip) in workers {
        if *name != hostname {
            peers.push(Peer {
                hostname: name.clone(),
                ip: ip.clone(),
                role: NodeRole::Worker,
            });
        }
    }

    info!(
        %hostname,
        is_manager,
        peers = peers.len(),
        keep_alive = ?keep_alive,
        "node identity resolved"
    );

    NodeInfo {
        hostname,
        is_manager,
        peers,
        keep_alive,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology() -> (HashMap<String, String>, HashMap<String, String>) {
        let managers = HashMap::from([("m1".to_string(), "10.0.0.1".to_string())]);
        let workers = HashMap::from([
            ("w1".to_string(), "10.0.0.2".to_string()),
            ("w2".to_string(), "10.0.0.3".to_string()),
        ]);
        (managers, workers)
    }

    #[test]
    fn manager_node() {
        let (managers, workers) = topology();
        let info = build_node_info(
            "m1".to_string(),
            &managers,
            &workers,
            Duration::from_secs(5),
        );

        assert!(info.is_manager);
        assert_eq!(info.peers.len(), 2);
        assert!(info.peers.iter().all(|p| p.role == NodeRole::Worker));
    }

    #[test]
    fn worker_node_sees_the_manager() {
        let (managers, workers) = topology();
        let info = build_node_info(
            "w1".to_string(),
            &managers,
            &workers,
            Duration::from_secs(5),
        );

        assert!(!info.is_manager);
        assert_eq!(info.peers.len(), 2);
        assert_eq!(info.manager_peer().unwrap().ip, "10.0.0.1");
    }
}
