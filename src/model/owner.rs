//! Delivery owner records: which server process runs a sub_key's delivery task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ClusterId, EndpointId, EndpointType};

/// Connection details of a WebSocket client owning a subscription.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WsxInfo {
    pub swc: String,
    pub name: String,
    pub pub_client_id: String,
    pub peer_fqdn: String,
    pub forwarded_for_fqdn: String,
}

impl WsxInfo {
    /// Name/value pairs in display order.
    pub fn fields(&self) -> [(&'static str, &str); 5] {
        [
            ("swc", self.swc.trim()),
            ("name", self.name.trim()),
            ("pub_client_id", self.pub_client_id.trim()),
            ("peer_fqdn", self.peer_fqdn.trim()),
            ("forwarded_for_fqdn", self.forwarded_for_fqdn.trim()),
        ]
    }
}

/// Ownership announcement, either local or received from another process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryOwnerConfig {
    pub sub_key: String,
    pub cluster_id: ClusterId,
    pub server_name: String,
    pub server_pid: u32,
    pub endpoint_type: EndpointType,
    #[serde(default)]
    pub channel_name: Option<String>,
    #[serde(default)]
    pub pub_client_id: Option<String>,
    #[serde(default)]
    pub wsx_info: Option<WsxInfo>,
}

/// The server/process pair currently delivering messages for a sub_key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryOwner {
    pub sub_key: String,
    pub cluster_id: ClusterId,
    pub server_name: String,
    pub server_pid: u32,
    pub endpoint_type: EndpointType,
    pub endpoint_id: EndpointId,
    pub endpoint_name: Option<String>,
    pub channel_name: Option<String>,
    pub pub_client_id: Option<String>,
    pub wsx_info: Option<WsxInfo>,
    pub creation_time: DateTime<Utc>,
}

impl DeliveryOwner {
    pub fn from_config(
        config: DeliveryOwnerConfig,
        endpoint_id: EndpointId,
        endpoint_name: Option<String>,
    ) -> Self {
        Self {
            sub_key: config.sub_key,
            cluster_id: config.cluster_id,
            server_name: config.server_name,
            server_pid: config.server_pid,
            endpoint_type: config.endpoint_type,
            endpoint_id,
            endpoint_name,
            channel_name: config.channel_name,
            pub_client_id: config.pub_client_id,
            wsx_info: config.wsx_info,
            creation_time: Utc::now(),
        }
    }

    /// Whether this record points at the given process.
    pub fn is_process(&self, cluster_id: ClusterId, server_name: &str, server_pid: u32) -> bool {
        self.cluster_id == cluster_id
            && self.server_name == server_name
            && self.server_pid == server_pid
    }

    pub fn is_wsx(&self) -> bool {
        self.endpoint_type == EndpointType::WebSockets
    }
}
