use std::time::Duration;

use super::*;
use crate::config::Config;
use crate::model::EndpointType;
use crate::test_utils::{make_message, make_owner_config, make_topic_config, TestBroker};

const WAIT: Duration = Duration::from_secs(2);

async fn broker_with_owned_sub() -> TestBroker {
    let t = TestBroker::new();
    t.add_topic(1, "/orders").await;
    t.add_sub("S1", 1, "/orders").await;
    t.pubsub
        .set_sub_key_server(make_owner_config("S1", "srv-1", 10))
        .await
        .unwrap();
    t
}

async fn store(t: &TestBroker, messages: &[(&str, f64)]) {
    let messages = messages
        .iter()
        .map(|(id, pub_time)| make_message(id, *pub_time, 1, "/orders"))
        .collect();
    t.pubsub
        .store_in_ram("c1", 1, "/orders", &["S1".to_string()], messages, "test")
        .await
        .unwrap();
}

async fn pass(t: &TestBroker) -> SyncPass {
    let mut state = t.pubsub.lock().await;
    collect_pass(&mut state, Instant::now())
}

async fn flags(t: &TestBroker) -> (bool, bool) {
    let topic = t.pubsub.topic_by_id(1).await.unwrap();
    (topic.sync_has_gd_msg, topic.sync_has_non_gd_msg)
}

#[tokio::test]
async fn test_pass_drains_backlog_and_clears_flags() {
    let t = broker_with_owned_sub().await;
    store(&t, &[("m1", 10.0), ("m2", 20.0)]).await;

    let pass = pass(&t).await;

    assert_eq!(pass.notifications.len(), 1);
    assert!(pass.unresolved.is_empty());
    let notification = &pass.notifications[0];
    assert_eq!(notification.topic_name, "/orders");
    assert_eq!(notification.subscriptions.len(), 1);
    assert_eq!(notification.non_gd_msg_list.len(), 2);
    assert!(!notification.has_gd_msg_list);
    assert!(notification.is_bg_call);
    assert_eq!(notification.pub_time_max, 20.0);

    assert_eq!(flags(&t).await, (false, false));
    assert!(t.pubsub.pending_messages(1, "S1").await.is_empty());
}

#[tokio::test]
async fn test_pass_skips_clean_topics() {
    let t = broker_with_owned_sub().await;
    assert!(pass(&t).await.notifications.is_empty());
}

#[tokio::test]
async fn test_pass_waits_for_sync_interval() {
    let t = TestBroker::new();
    t.pubsub
        .create_topic_object(make_topic_config(1, "/orders").with_task_sync_interval_ms(60_000))
        .await;
    t.add_sub("S1", 1, "/orders").await;
    t.pubsub
        .set_sub_key_server(make_owner_config("S1", "srv-1", 10))
        .await
        .unwrap();
    store(&t, &[("m1", 1.0)]).await;

    assert!(pass(&t).await.notifications.is_empty());
    assert_eq!(flags(&t).await, (false, true));
}

#[tokio::test]
async fn test_pass_keeps_flags_without_owned_subscribers() {
    let t = TestBroker::new();
    t.add_topic(1, "/orders").await;
    t.add_sub("S1", 1, "/orders").await;
    store(&t, &[("m1", 1.0)]).await;

    let pass = pass(&t).await;

    assert!(pass.notifications.is_empty());
    assert_eq!(pass.unresolved, vec![("S1".to_string(), false)]);
    assert_eq!(flags(&t).await, (false, true));
    assert_eq!(t.pubsub.pending_messages(1, "S1").await.len(), 1);
}

#[tokio::test]
async fn test_pass_carries_gd_watermark() {
    let t = broker_with_owned_sub().await;
    t.pubsub.set_sync_has_msg(1, true, true, "test", 75.0).await.unwrap();
    store(&t, &[("m1", 30.0)]).await;

    let pass = pass(&t).await;

    let notification = &pass.notifications[0];
    assert!(notification.has_gd_msg_list);
    assert_eq!(notification.pub_time_max, 75.0);
    assert_eq!(notification.non_gd_msg_list.len(), 1);
}

#[tokio::test]
async fn test_publish_between_passes_is_not_lost() {
    let t = broker_with_owned_sub().await;
    store(&t, &[("m1", 1.0)]).await;
    assert_eq!(pass(&t).await.notifications.len(), 1);

    store(&t, &[("m2", 2.0)]).await;
    assert_eq!(flags(&t).await, (false, true));

    let second = pass(&t).await;
    let ids: Vec<&str> = second.notifications[0]
        .non_gd_msg_list
        .iter()
        .map(QueuedMessage::pub_msg_id)
        .collect();
    assert_eq!(ids, vec!["m2"]);
}

#[tokio::test]
async fn test_run_once_notifies_after_publish_service() {
    let t = broker_with_owned_sub().await;
    store(&t, &[("m1", 5.0)]).await;

    let sync = SyncLoop::new(t.pubsub.clone());
    assert_eq!(sync.run_once().await, 1);
    assert!(t.invoker.wait_for(AFTER_PUBLISH, 1, WAIT).await);

    let calls = t.invoker.invocations_of(AFTER_PUBLISH).await;
    assert_eq!(calls[0]["topic_name"], "/orders");
    assert_eq!(calls[0]["non_gd_msg_list"][0]["pub_msg_id"], "m1");
    assert_eq!(calls[0]["subscriptions"][0]["sub_key"], "S1");

    assert_eq!(sync.run_once().await, 0);
}

#[tokio::test]
async fn test_failed_notification_rearms_topic() {
    let t = broker_with_owned_sub().await;
    t.invoker.set_fail(AFTER_PUBLISH, true).await;
    store(&t, &[("m1", 5.0)]).await;

    SyncLoop::new(t.pubsub.clone()).run_once().await;
    assert!(t.invoker.wait_for(AFTER_PUBLISH, 1, WAIT).await);

    let rearmed = tokio::time::timeout(WAIT, async {
        while flags(&t).await != (true, true) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(rearmed.is_ok());
    assert_eq!(t.pubsub.topic_by_id(1).await.unwrap().gd_pub_time_max, 5.0);
}

#[tokio::test]
async fn test_run_once_recovers_unknown_owners() {
    let t = TestBroker::new();
    t.add_topic(1, "/orders").await;
    t.add_sub("S1", 1, "/orders").await;
    t.store.set_delivery_server("S1", "srv-2", EndpointType::Rest).await;
    t.remote.set_pid("srv-2", "S1", 417).await;
    store(&t, &[("m1", 1.0)]).await;

    let sync = SyncLoop::new(t.pubsub.clone());
    assert_eq!(sync.run_once().await, 0);

    let recovered = tokio::time::timeout(WAIT, async {
        while t.pubsub.get_delivery_server_by_sub_key("S1").await.is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(recovered.is_ok());

    // Flags were kept, so the next pass delivers
    assert_eq!(sync.run_once().await, 1);
}

#[tokio::test]
async fn test_run_stops_after_max_iterations() {
    let mut config = Config::for_test();
    config.pubsub.sync_max_iters = Some(3);
    let t = TestBroker::with_config(config);

    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let finished = tokio::time::timeout(WAIT, SyncLoop::new(t.pubsub.clone()).run(cancel_rx)).await;
    assert!(finished.is_ok());
}

#[tokio::test]
async fn test_run_stops_when_handle_dropped() {
    let mut config = Config::for_test();
    config.pubsub.sync_sleep_ms = 60_000;
    config.pubsub.sync_max_iters = None;
    let t = TestBroker::with_config(config);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    drop(cancel_tx);

    let finished = tokio::time::timeout(WAIT, SyncLoop::new(t.pubsub.clone()).run(cancel_rx)).await;
    assert!(finished.is_ok());

    // The lock is free for callers afterwards
    t.add_topic(1, "/orders").await;
    assert!(t.pubsub.has_topic_by_name("/orders").await);
}

#[tokio::test]
async fn test_sync_task_delivers_and_stops() {
    let t = broker_with_owned_sub().await;
    let handle = spawn_sync_task(t.pubsub.clone());

    store(&t, &[("m1", 1.0)]).await;
    assert!(t.invoker.wait_for(AFTER_PUBLISH, 1, WAIT).await);

    let stopped = tokio::time::timeout(WAIT, handle.shutdown(Duration::from_secs(1))).await;
    assert!(stopped.is_ok());
}
