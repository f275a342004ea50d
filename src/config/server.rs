//! Identity of the server process hosting the broker.

use serde::Deserialize;

use crate::model::ClusterId;

/// Server identity.
///
/// Delivery owner records compare against this to decide whether a
/// delivery task runs in the current process.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerIdentity {
    /// Cluster this server belongs to.
    pub cluster_id: ClusterId,
    /// Server ID as stored in the durable store.
    pub server_id: i64,
    /// Server name, unique within the cluster.
    pub server_name: String,
    /// Process ID of this worker. Defaults to the current process.
    pub server_pid: u32,
}

impl Default for ServerIdentity {
    fn default() -> Self {
        Self {
            cluster_id: 1,
            server_id: 1,
            server_name: "server1".to_string(),
            server_pid: std::process::id(),
        }
    }
}

impl ServerIdentity {
    pub fn new(cluster_id: ClusterId, server_name: impl Into<String>, server_pid: u32) -> Self {
        Self {
            cluster_id,
            server_name: server_name.into(),
            server_pid,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_identity_default() {
        let server = ServerIdentity::default();
        assert_eq!(server.cluster_id, 1);
        assert_eq!(server.server_name, "server1");
        assert_eq!(server.server_pid, std::process::id());
    }
}
