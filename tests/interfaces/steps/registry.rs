//! Registry interface step definitions.

use std::collections::HashMap;

use cucumber::{given, then, when, World};

use pubsub_core::model::TopicId;
use pubsub_core::test_utils::{make_sub_config, make_topic_config, TestBroker};

/// Test context for registry scenarios.
#[derive(World)]
#[world(init = Self::new)]
pub struct RegistryWorld {
    broker: TestBroker,
    topic_ids: HashMap<String, TopicId>,
    last_added: Option<bool>,
}

impl std::fmt::Debug for RegistryWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryWorld")
            .field("topic_ids", &self.topic_ids)
            .field("last_added", &self.last_added)
            .finish_non_exhaustive()
    }
}

impl RegistryWorld {
    fn new() -> Self {
        Self {
            broker: TestBroker::new(),
            topic_ids: HashMap::new(),
            last_added: None,
        }
    }

    fn topic_id(&self, topic_name: &str) -> TopicId {
        *self
            .topic_ids
            .get(topic_name)
            .unwrap_or_else(|| panic!("Unknown topic {topic_name}"))
    }
}

// --- Background ---

#[given("a broker")]
async fn given_broker(world: &mut RegistryWorld) {
    world.broker.add_default_endpoints().await;
}

// --- Given steps ---

#[given(expr = "a topic {string} with ID {int}")]
async fn given_topic(world: &mut RegistryWorld, topic_name: String, topic_id: TopicId) {
    world.broker.add_topic(topic_id, &topic_name).await;
    world.topic_ids.insert(topic_name, topic_id);
}

#[given(expr = "a subscription {string} to {string}")]
async fn given_subscription(world: &mut RegistryWorld, sub_key: String, topic_name: String) {
    let topic_id = world.topic_id(&topic_name);
    let added = world
        .broker
        .pubsub
        .add_subscription(make_sub_config(&sub_key, topic_id, &topic_name, 1))
        .await
        .expect("subscription added");
    assert!(added);
}

// --- When steps ---

#[when(expr = "subscription {string} to {string} is added again")]
async fn when_subscription_added_again(world: &mut RegistryWorld, sub_key: String, topic_name: String) {
    let topic_id = world.topic_id(&topic_name);
    let added = world
        .broker
        .pubsub
        .add_subscription(make_sub_config(&sub_key, topic_id, &topic_name, 1))
        .await
        .expect("second add must not fail");
    world.last_added = Some(added);
}

#[when(expr = "topic {string} is renamed to {string}")]
async fn when_topic_renamed(world: &mut RegistryWorld, old_name: String, new_name: String) {
    let topic_id = world.topic_id(&old_name);
    world
        .broker
        .pubsub
        .edit_topic(&old_name, make_topic_config(topic_id, &new_name))
        .await
        .expect("topic renamed");
    world.topic_ids.remove(&old_name);
    world.topic_ids.insert(new_name, topic_id);
}

#[when(expr = "topic {int} is deleted")]
async fn when_topic_deleted(world: &mut RegistryWorld, topic_id: TopicId) {
    world
        .broker
        .pubsub
        .delete_topic(topic_id)
        .await
        .expect("topic deleted");
}

#[when(expr = "{string} unsubscribes from {string}")]
async fn when_unsubscribes(world: &mut RegistryWorld, sub_key: String, topic_name: String) {
    let request = HashMap::from([(topic_name, vec![sub_key])]);
    world
        .broker
        .pubsub
        .unsubscribe(&request)
        .await
        .expect("unsubscribed");
}

// --- Then steps ---

#[then(expr = "topic {string} has {int} subscribers")]
async fn then_subscriber_count(world: &mut RegistryWorld, topic_name: String, count: usize) {
    assert_eq!(world.broker.pubsub.len_subscribers(&topic_name).await, count);
}

#[then("the second add succeeds without adding anything")]
async fn then_second_add_is_noop(world: &mut RegistryWorld) {
    assert_eq!(world.last_added, Some(false));
}

#[then(expr = "topic {string} does not exist")]
async fn then_topic_missing(world: &mut RegistryWorld, topic_name: String) {
    assert!(!world.broker.pubsub.has_topic_by_name(&topic_name).await);
}

#[then(expr = "subscription {string} does not exist")]
async fn then_subscription_missing(world: &mut RegistryWorld, sub_key: String) {
    assert!(!world.broker.pubsub.has_sub_key(&sub_key).await);
}

#[then(expr = "subscription {string} belongs to {string}")]
async fn then_subscription_belongs_to(world: &mut RegistryWorld, sub_key: String, topic_name: String) {
    let actual = world
        .broker
        .pubsub
        .topic_name_by_sub_key(&sub_key)
        .await
        .expect("subscription exists");
    assert_eq!(actual, topic_name);
}

#[then("every subscription is indexed under its topic")]
async fn then_indexes_agree(world: &mut RegistryWorld) {
    let pubsub = &world.broker.pubsub;
    for topic_name in world.topic_ids.keys() {
        if !pubsub.has_topic_by_name(topic_name).await {
            continue;
        }
        let topic = pubsub.topic_by_name(topic_name).await.expect("topic exists");
        for sub in pubsub.subscriptions_by_topic(topic_name, false).await {
            assert!(pubsub.has_sub_key(sub.sub_key()).await);
            assert_eq!(sub.topic_id(), topic.id());
            assert_eq!(
                pubsub.topic_name_by_sub_key(sub.sub_key()).await.expect("indexed"),
                *topic_name
            );
        }
    }
}
