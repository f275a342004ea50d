//! Delivery ownership router.
//!
//! Maps each sub_key to the server/process pair running its delivery task.
//! Local lookups only; recovery of missing records goes through the durable
//! store and a remote call, driven by [`crate::pubsub::PubSub`] so that no
//! I/O happens under the broker lock.

mod table;

use std::collections::HashMap;

use crate::model::{DeliveryOwner, EndpointType};

pub use table::format_owner_table;

/// Placeholder shown for a sub_key whose subscription is already gone.
pub const DEFAULT_SUB_PATTERN_MATCHED: &str = "(no sub pattern)";

/// Grouping key for sub_keys served by the same delivery process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskServerKey {
    pub server_name: String,
    pub server_pid: u32,
    pub pub_client_id: Option<String>,
    pub channel_name: Option<String>,
    pub endpoint_type: EndpointType,
}

impl From<&DeliveryOwner> for TaskServerKey {
    fn from(owner: &DeliveryOwner) -> Self {
        Self {
            server_name: owner.server_name.clone(),
            server_pid: owner.server_pid,
            pub_client_id: owner.pub_client_id.clone(),
            channel_name: owner.channel_name.clone(),
            endpoint_type: owner.endpoint_type,
        }
    }
}

/// Sub keys grouped by delivery process, plus those without a live owner.
#[derive(Debug, Default, PartialEq)]
pub struct TaskServers {
    pub found: HashMap<TaskServerKey, Vec<String>>,
    pub not_found: Vec<String>,
}

/// Owner records keyed by sub_key. At most one owner per sub_key.
#[derive(Debug, Default)]
pub struct DeliveryRouter {
    owners: HashMap<String, DeliveryOwner>,
}

impl DeliveryRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, sub_key: &str) -> Option<&DeliveryOwner> {
        self.owners.get(sub_key)
    }

    pub fn contains(&self, sub_key: &str) -> bool {
        self.owners.contains_key(sub_key)
    }

    /// Set or replace the owner of a sub_key, returning the previous one.
    pub fn set(&mut self, owner: DeliveryOwner) -> Option<DeliveryOwner> {
        self.owners.insert(owner.sub_key.clone(), owner)
    }

    pub fn remove(&mut self, sub_key: &str) -> Option<DeliveryOwner> {
        self.owners.remove(sub_key)
    }

    /// Remove every listed sub_key, returning how many had an owner.
    pub fn remove_many(&mut self, sub_keys: &[String]) -> usize {
        sub_keys
            .iter()
            .filter(|sub_key| self.owners.remove(sub_key.as_str()).is_some())
            .count()
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn owners(&self) -> impl Iterator<Item = &DeliveryOwner> {
        self.owners.values()
    }

    /// Group sub_keys by the process delivering them.
    ///
    /// A sub_key counts as found only if its owner has a known pid.
    pub fn group_by_server<'a>(&self, sub_keys: impl IntoIterator<Item = &'a str>) -> TaskServers {
        let mut out = TaskServers::default();
        for sub_key in sub_keys {
            match self.owners.get(sub_key).filter(|owner| owner.server_pid > 0) {
                Some(owner) => out
                    .found
                    .entry(TaskServerKey::from(owner))
                    .or_default()
                    .push(sub_key.to_string()),
                None => out.not_found.push(sub_key.to_string()),
            }
        }
        out
    }
}
