//! End-to-end broker scenarios.
//!
//! Drives the public façade, the broker channel and the sync loop together
//! against mock collaborators, and against the standalone runtime.
//! Run with: cargo test --test broker --features test-utils

use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;

use pubsub_core::config::Config;
use pubsub_core::interfaces::BrokerMessage;
use pubsub_core::model::EndpointType;
use pubsub_core::pubsub::names;
use pubsub_core::sync::SyncLoop;
use pubsub_core::test_utils::{
    make_message, make_owner_config, make_sub_config, make_topic_config, TestBroker,
};

const WAIT: Duration = Duration::from_secs(3);

// ============================================================================
// Helpers
// ============================================================================

fn second_server() -> Config {
    let mut config = Config::for_test();
    config.server.server_name = "server2".to_string();
    config.server.server_id = 2;
    config.server.server_pid = 2000;
    config
}

/// Apply everything `from` broadcast so far to `to`.
async fn relay(from: &TestBroker, to: &TestBroker) -> usize {
    let published = from.broker.take_published().await;
    let count = published.len();
    for msg in published {
        to.pubsub.on_broker_msg(msg).await.unwrap();
    }
    count
}

async fn store(t: &TestBroker, topic_id: i64, topic_name: &str, sub_keys: &[&str], ids: &[&str]) {
    let sub_keys: Vec<String> = sub_keys.iter().map(|sk| sk.to_string()).collect();
    let messages = ids
        .iter()
        .enumerate()
        .map(|(i, id)| make_message(id, i as f64 + 1.0, topic_id, topic_name))
        .collect();
    t.pubsub
        .store_in_ram("cid", topic_id, topic_name, &sub_keys, messages, "test")
        .await
        .unwrap();
}

/// Check the topic and sub_key indexes agree with each other.
async fn assert_indexes_consistent(t: &TestBroker, topic_names: &[&str]) {
    for topic_name in topic_names {
        if !t.pubsub.has_topic_by_name(topic_name).await {
            assert!(t.pubsub.subscriptions_by_topic(topic_name, false).await.is_empty());
            continue;
        }
        let topic = t.pubsub.topic_by_name(topic_name).await.unwrap();
        for sub in t.pubsub.subscriptions_by_topic(topic_name, false).await {
            assert!(t.pubsub.has_sub_key(sub.sub_key()).await);
            assert_eq!(
                t.pubsub.topic_name_by_sub_key(sub.sub_key()).await.unwrap(),
                *topic_name
            );
            assert_eq!(sub.topic_id(), topic.id());
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

#[tokio::test]
async fn test_indexes_stay_consistent_across_topic_changes() {
    let t = TestBroker::new();
    let names = ["/a", "/b", "/c", "/a2"];

    t.add_topic(1, "/a").await;
    t.add_topic(2, "/b").await;
    t.add_topic(3, "/c").await;
    for i in 0..6 {
        let (topic_id, topic_name) = [(1, "/a"), (2, "/b"), (3, "/c")][i % 3];
        t.add_sub(&format!("S{i}"), topic_id, topic_name).await;
    }
    assert_indexes_consistent(&t, &names).await;

    t.pubsub
        .edit_topic("/a", make_topic_config(1, "/a2"))
        .await
        .unwrap();
    assert_indexes_consistent(&t, &names).await;
    assert_eq!(t.pubsub.len_subscribers("/a2").await, 2);
    assert_eq!(t.pubsub.len_subscribers("/a").await, 0);

    t.pubsub.delete_topic(2).await.unwrap();
    assert_indexes_consistent(&t, &names).await;
    assert!(!t.pubsub.has_sub_key("S1").await);
    assert!(!t.pubsub.has_sub_key("S4").await);

    let request = HashMap::from([("/c".to_string(), vec!["S2".to_string()])]);
    t.pubsub.unsubscribe(&request).await.unwrap();
    assert_indexes_consistent(&t, &names).await;
    assert_eq!(t.pubsub.len_subscribers("/c").await, 1);
}

#[tokio::test]
async fn test_repeated_subscription_is_idempotent() {
    let t = TestBroker::new();
    t.add_topic(1, "/orders").await;

    let config = make_sub_config("S1", 1, "/orders", 1);
    assert!(t.pubsub.add_subscription(config.clone()).await.unwrap());
    assert!(!t.pubsub.add_subscription(config).await.unwrap());

    assert_eq!(t.pubsub.len_subscribers("/orders").await, 1);
    assert!(t.pubsub.subscription_by_sub_key("S1").await.is_some());
}

#[tokio::test]
async fn test_cascading_delete() {
    let t = TestBroker::new();
    t.add_topic(1, "/orders").await;
    t.add_sub("S1", 1, "/orders").await;
    t.add_sub("S2", 1, "/orders").await;
    store(&t, 1, "/orders", &["S1", "S2"], &["m1"]).await;

    t.pubsub.on_broker_msg(BrokerMessage::TopicDelete { id: 1 }).await.unwrap();

    assert!(!t.pubsub.has_sub_key("S1").await);
    assert!(!t.pubsub.has_sub_key("S2").await);
    assert!(!t.pubsub.has_topic_by_name("/orders").await);
    assert!(t.pubsub.pending_messages(1, "S1").await.is_empty());
}

// ============================================================================
// Backlog
// ============================================================================

#[tokio::test]
async fn test_overflow_goes_to_sink() {
    let t = TestBroker::new();
    t.pubsub
        .create_topic_object(make_topic_config(1, "/orders").with_max_depth_non_gd(2))
        .await;
    t.add_sub("S", 1, "/orders").await;

    store(&t, 1, "/orders", &["S"], &["m1", "m2", "m3"]).await;

    let pending: Vec<String> = t
        .pubsub
        .pending_messages(1, "S")
        .await
        .iter()
        .map(|m| m.pub_msg_id.clone())
        .collect();
    assert_eq!(pending, vec!["m1", "m2"]);
    let overflowed: Vec<String> = t.overflow.overflowed().into_iter().map(|(_, _, id)| id).collect();
    assert_eq!(overflowed, vec!["m3"]);
}

#[tokio::test]
async fn test_queue_depth_never_exceeds_capacity() {
    let t = TestBroker::new();
    t.pubsub
        .create_topic_object(make_topic_config(1, "/orders").with_max_depth_non_gd(3))
        .await;
    t.add_sub("S1", 1, "/orders").await;
    t.add_sub("S2", 1, "/orders").await;

    for batch in 0..5 {
        let ids: Vec<String> = (0..2).map(|i| format!("m{batch}.{i}")).collect();
        let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
        store(&t, 1, "/orders", &["S1", "S2"], &ids).await;

        assert!(t.pubsub.pending_messages(1, "S1").await.len() <= 3);
        assert!(t.pubsub.pending_messages(1, "S2").await.len() <= 3);
    }

    // 10 messages each, 3 kept
    assert_eq!(t.overflow.overflowed().len(), 14);
}

// ============================================================================
// Delivery owners
// ============================================================================

#[tokio::test]
async fn test_unsubscribe_purges_owner() {
    let t = TestBroker::new();
    t.add_topic(1, "/orders").await;
    t.add_sub("S1", 1, "/orders").await;
    t.pubsub
        .set_sub_key_server(make_owner_config("S1", "server2", 55))
        .await
        .unwrap();

    let request = HashMap::from([("/orders".to_string(), vec!["S1".to_string()])]);
    t.pubsub
        .on_broker_msg(BrokerMessage::SubscriptionDelete { topic_sub_keys: request })
        .await
        .unwrap();

    assert!(t.pubsub.get_delivery_server_by_sub_key("S1").await.is_none());
    assert!(!t.pubsub.has_sub_key("S1").await);
}

#[tokio::test]
async fn test_get_messages_recovers_owner() {
    let t = TestBroker::new();
    t.add_topic(1, "/orders").await;
    t.add_sub("S", 1, "/orders").await;
    t.store.set_delivery_server("S", "srv-2", EndpointType::Rest).await;
    t.remote.set_pid("srv-2", "S", 417).await;
    t.invoker
        .set_response(
            names::GET_DELIVERY_MESSAGES,
            json!({"response": [{"pub_msg_id": "m1", "data": "hi"}]}),
        )
        .await;

    let messages = t.pubsub.get_messages("/orders", "S", false, true).await.unwrap();

    assert_eq!(messages.len(), 1);
    let owner = t.pubsub.get_delivery_server_by_sub_key("S").await.unwrap();
    assert_eq!(owner.server_name, "srv-2");
    assert_eq!(owner.server_pid, 417);

    let calls = t.invoker.invocations_of(names::GET_DELIVERY_MESSAGES).await;
    assert_eq!(calls[0]["server_name"], "srv-2");
    assert_eq!(calls[0]["server_pid"], 417);
}

#[tokio::test]
async fn test_owner_announced_to_other_servers() {
    let a = TestBroker::new();
    let b = TestBroker::with_config(second_server());
    for t in [&a, &b] {
        t.add_topic(1, "/orders").await;
    }

    let mut config = make_sub_config("S1", 1, "/orders", 1);
    config.server_id = Some(1);
    assert!(a.pubsub.create_subscription_object(config.clone()).await.unwrap());
    assert!(b
        .pubsub
        .on_broker_msg(BrokerMessage::SubscriptionCreate(config))
        .await
        .is_ok());
    assert!(b.pubsub.get_delivery_server_by_sub_key("S1").await.is_none());

    assert_eq!(relay(&a, &b).await, 1);

    let owner = b.pubsub.get_delivery_server_by_sub_key("S1").await.unwrap();
    assert_eq!(owner.server_name, "server1");
    assert_eq!(owner.server_pid, 1000);
    assert_eq!(b.invoker.invocation_count(names::CREATE_DELIVERY_TASK).await, 0);
}

// ============================================================================
// Sync loop
// ============================================================================

#[tokio::test]
async fn test_publish_between_passes_stays_flagged() {
    let t = TestBroker::new();
    t.add_topic(1, "/orders").await;
    t.add_sub("S1", 1, "/orders").await;
    t.pubsub
        .set_sub_key_server(make_owner_config("S1", "server2", 55))
        .await
        .unwrap();
    let sync = SyncLoop::new(t.pubsub.clone());

    store(&t, 1, "/orders", &["S1"], &["m1"]).await;
    assert!(t.pubsub.topic_by_id(1).await.unwrap().sync_has_non_gd_msg);

    assert_eq!(sync.run_once().await, 1);
    assert!(t.invoker.wait_for(names::AFTER_PUBLISH, 1, WAIT).await);
    assert!(!t.pubsub.topic_by_id(1).await.unwrap().sync_has_non_gd_msg);

    store(&t, 1, "/orders", &["S1"], &["m2"]).await;
    assert!(t.pubsub.topic_by_id(1).await.unwrap().sync_has_non_gd_msg);

    assert_eq!(sync.run_once().await, 1);
    assert!(t.invoker.wait_for(names::AFTER_PUBLISH, 2, WAIT).await);

    let calls = t.invoker.invocations_of(names::AFTER_PUBLISH).await;
    let mut delivered: Vec<String> = calls
        .iter()
        .flat_map(|call| call["non_gd_msg_list"].as_array().cloned().unwrap_or_default())
        .filter_map(|msg| msg["pub_msg_id"].as_str().map(str::to_string))
        .collect();
    delivered.sort();
    assert_eq!(delivered, vec!["m1", "m2"]);
}

#[tokio::test]
async fn test_bad_topic_does_not_starve_others() {
    let t = TestBroker::new();
    t.add_topic(1, "/orders").await;
    t.add_topic(2, "/invoices").await;
    t.add_sub("S1", 1, "/orders").await;
    t.add_sub("S2", 2, "/invoices").await;
    t.pubsub
        .set_sub_key_server(make_owner_config("S2", "server2", 55))
        .await
        .unwrap();

    // S1 has no owner anywhere
    store(&t, 1, "/orders", &["S1"], &["m1"]).await;
    store(&t, 2, "/invoices", &["S2"], &["m2"]).await;

    assert_eq!(SyncLoop::new(t.pubsub.clone()).run_once().await, 1);
    assert!(t.invoker.wait_for(names::AFTER_PUBLISH, 1, WAIT).await);
    let calls = t.invoker.invocations_of(names::AFTER_PUBLISH).await;
    assert_eq!(calls[0]["topic_name"], "/invoices");

    assert!(t.pubsub.topic_by_id(1).await.unwrap().sync_has_non_gd_msg);
}

// ============================================================================
// Standalone runtime
// ============================================================================

#[cfg(feature = "standalone")]
mod standalone {
    use super::*;

    use pubsub_core::pubsub::{PublishOptions, SubscribeOptions};
    use pubsub_core::standalone::StandaloneRuntime;
    use pubsub_core::test_utils::make_endpoint;
    use serde_json::Value;

    async fn poll_messages(runtime: &StandaloneRuntime, topic: &str, sub_key: &str) -> Vec<Value> {
        let poll = async {
            loop {
                let messages = runtime
                    .pubsub()
                    .get_messages(topic, sub_key, false, true)
                    .await
                    .unwrap();
                if !messages.is_empty() {
                    return messages;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(WAIT, poll).await.unwrap_or_default()
    }

    #[tokio::test]
    async fn test_fan_out_to_every_subscriber() {
        let runtime = StandaloneRuntime::start(&Config::for_test()).await;
        let pubsub = runtime.pubsub();
        pubsub
            .create_endpoint(make_endpoint(3, "crm", EndpointType::Rest))
            .await;
        pubsub
            .create_topic(pubsub.topic_config(0, "/customers"))
            .await
            .unwrap();
        pubsub.wait_for_topic("/customers").await.unwrap();

        let default_endpoint = pubsub.config().default_internal_endpoint_name.clone();
        let first = pubsub
            .subscribe("/customers", SubscribeOptions::for_endpoint(default_endpoint))
            .await
            .unwrap();
        let second = pubsub
            .subscribe("/customers", SubscribeOptions::for_endpoint("crm"))
            .await
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(pubsub.len_subscribers("/customers").await, 2);

        pubsub
            .publish("/customers", PublishOptions::new(json!({"name": "ACME"})))
            .await
            .unwrap();

        for sub_key in [&first, &second] {
            let messages = poll_messages(&runtime, "/customers", sub_key).await;
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0]["data"]["name"], "ACME");
        }

        runtime.shutdown().await;
    }
}
