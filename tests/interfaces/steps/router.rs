//! Delivery router interface step definitions.

use std::collections::HashMap;

use cucumber::{given, then, when, World};

use pubsub_core::model::EndpointType;
use pubsub_core::router::TaskServers;
use pubsub_core::test_utils::{make_owner_config, TestBroker};

const TOPIC_ID: i64 = 1;

/// Test context for delivery router scenarios.
#[derive(World)]
#[world(init = Self::new)]
pub struct RouterWorld {
    broker: TestBroker,
    topic_name: String,
    task_servers: Option<TaskServers>,
}

impl std::fmt::Debug for RouterWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterWorld")
            .field("topic_name", &self.topic_name)
            .field("task_servers", &self.task_servers)
            .finish_non_exhaustive()
    }
}

impl RouterWorld {
    fn new() -> Self {
        Self {
            broker: TestBroker::new(),
            topic_name: String::new(),
            task_servers: None,
        }
    }

    fn task_servers(&self) -> &TaskServers {
        self.task_servers
            .as_ref()
            .expect("Task servers not looked up")
    }
}

// --- Background ---

#[given(expr = "a broker with topic {string}")]
async fn given_broker_with_topic(world: &mut RouterWorld, topic_name: String) {
    world.broker.add_topic(TOPIC_ID, &topic_name).await;
    world.topic_name = topic_name;
}

// --- Given steps ---

#[given(expr = "a subscription {string} owned by {string} with PID {int}")]
async fn given_owned_subscription(world: &mut RouterWorld, sub_key: String, server: String, pid: u32) {
    world.broker.add_sub(&sub_key, TOPIC_ID, &world.topic_name).await;
    world
        .broker
        .pubsub
        .set_sub_key_server(make_owner_config(&sub_key, &server, pid))
        .await
        .expect("owner recorded");
}

#[given(expr = "a subscription {string} without an owner")]
async fn given_unowned_subscription(world: &mut RouterWorld, sub_key: String) {
    world.broker.add_sub(&sub_key, TOPIC_ID, &world.topic_name).await;
}

#[given(expr = "the durable store names {string} as the last server of {string}")]
async fn given_store_record(world: &mut RouterWorld, server: String, sub_key: String) {
    world
        .broker
        .store
        .set_delivery_server(&sub_key, &server, EndpointType::Rest)
        .await;
}

#[given(expr = "server {string} reports PID {int} for {string}")]
async fn given_remote_pid(world: &mut RouterWorld, server: String, pid: u32, sub_key: String) {
    world.broker.remote.set_pid(&server, &sub_key, pid).await;
}

#[given(expr = "server {string} is unreachable")]
async fn given_unreachable(world: &mut RouterWorld, server: String) {
    world.broker.remote.set_unreachable(&server).await;
}

// --- When steps ---

#[when(expr = "{string} unsubscribes")]
async fn when_unsubscribes(world: &mut RouterWorld, sub_key: String) {
    let request = HashMap::from([(world.topic_name.clone(), vec![sub_key])]);
    world
        .broker
        .pubsub
        .unsubscribe(&request)
        .await
        .expect("unsubscribed");
}

#[when(expr = "the owner of {string} is resolved")]
async fn when_owner_resolved(world: &mut RouterWorld, sub_key: String) {
    world.broker.pubsub.resolve_owner(&sub_key, false).await;
}

#[when(expr = "{string} with PID {int} announces it owns {string}")]
async fn when_owner_announced(world: &mut RouterWorld, server: String, pid: u32, sub_key: String) {
    world
        .broker
        .pubsub
        .set_sub_key_server(make_owner_config(&sub_key, &server, pid))
        .await
        .expect("owner recorded");
}

#[when(expr = "the task servers of {string} are looked up")]
async fn when_task_servers_looked_up(world: &mut RouterWorld, sub_keys: String) {
    let sub_keys: Vec<(String, bool)> = sub_keys
        .split(',')
        .map(|sub_key| (sub_key.trim().to_string(), false))
        .collect();
    world.task_servers = Some(world.broker.pubsub.get_task_servers_by_sub_keys(&sub_keys).await);
}

// --- Then steps ---

#[then(expr = "{string} has no delivery owner")]
async fn then_no_owner(world: &mut RouterWorld, sub_key: String) {
    assert!(world
        .broker
        .pubsub
        .get_delivery_server_by_sub_key(&sub_key)
        .await
        .is_none());
}

#[then(expr = "subscription {string} is gone")]
async fn then_subscription_gone(world: &mut RouterWorld, sub_key: String) {
    assert!(!world.broker.pubsub.has_sub_key(&sub_key).await);
}

#[then(expr = "the owner of {string} is {string} with PID {int}")]
async fn then_owner_is(world: &mut RouterWorld, sub_key: String, server: String, pid: u32) {
    let owner = world
        .broker
        .pubsub
        .get_delivery_server_by_sub_key(&sub_key)
        .await
        .expect("owner recorded");
    assert_eq!(owner.server_name, server);
    assert_eq!(owner.server_pid, pid);
}

#[then(expr = "{string} with PID {int} serves {int} sub_keys")]
async fn then_server_serves(world: &mut RouterWorld, server: String, pid: u32, count: usize) {
    let served: usize = world
        .task_servers()
        .found
        .iter()
        .filter(|(key, _)| key.server_name == server && key.server_pid == pid)
        .map(|(_, sub_keys)| sub_keys.len())
        .sum();
    assert_eq!(served, count);
}

#[then(expr = "{int} sub_keys have no owner")]
async fn then_not_found(world: &mut RouterWorld, count: usize) {
    assert_eq!(world.task_servers().not_found.len(), count);
}
