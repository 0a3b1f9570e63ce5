//! Core identifiers and node identity types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Opaque identifier of a replicated service, as reported by the runtime.
pub type ServiceId = String;

/// Opaque identifier of a single container.
pub type ContainerId = String;

/// Desired scaling direction for a service.
///
/// The wire encoding (`"over"` / `"under"`) is fixed by the control-plane
/// protocol; see the `/scale` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScaleDirection {
    #[serde(rename = "over")]
    Up,
    #[serde(rename = "under")]
    Down,
}

impl std::fmt::Display for ScaleDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScaleDirection::Up => write!(f, "over"),
            ScaleDirection::Down => write!(f, "under"),
        }
    }
}

/// Role of a node in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Manager,
    Worker,
}

/// A peer node known from configuration.
#[derive(Debug, Clone)]
pub struct Peer {
    pub hostname: String,
    pub ip: String,
    pub role: NodeRole,
}

/// Identity of this agent plus its view of the cluster.
///
/// Built once at startup and shared as an immutable `Arc`.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    /// This node's hostname, used for ownership resolution.
    pub hostname: String,
    /// Whether this node executes scale decisions.
    pub is_manager: bool,
    /// All other nodes in the cluster.
    pub peers: Vec<Peer>,
    /// Delay between a park decision and the replica-to-zero update.
    pub keep_alive: Duration,
}

impl NodeInfo {
    /// First peer with the manager role, if any.
    pub fn manager_peer(&self) -> Option<&Peer> {
        self.peers.iter().find(|p| p.role == NodeRole::Manager)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_wire_encoding() {
        assert_eq!(serde_json::to_string(&ScaleDirection::Up).unwrap(), "\"over\"");
        assert_eq!(serde_json::to_string(&ScaleDirection::Down).unwrap(), "\"under\"");

        let up: ScaleDirection = serde_json::from_str("\"over\"").unwrap();
        assert_eq!(up, ScaleDirection::Up);
        assert!(serde_json::from_str::<ScaleDirection>("\"sideways\"").is_err());
    }

    #[test]
    fn manager_peer_lookup() {
        let info = NodeInfo {
            hostname: "w1".to_string(),
            is_manager: false,
            peers: vec![
                Peer {
                    hostname: "w2".to_string(),
                    ip: "10.0.0.3".to_string(),
                    role: NodeRole::Worker,
                },
                Peer {
                    hostname: "m1".to_string(),
                    ip: "10.0.0.1".to_string(),
                    role: NodeRole::Manager,
                },
            ],
            keep_alive: Duration::from_secs(5),
        };

        assert_eq!(info.manager_peer().unwrap().hostname, "m1");
    }

    #[test]
    fn manager_peer_absent() {
        let info = NodeInfo {
            hostname: "solo".to_string(),
            is_manager: true,
            peers: Vec::new(),
            keep_alive: Duration::from_secs(5),
        };
        assert!(info.manager_peer().is_none());
    }
}
