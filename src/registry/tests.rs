use super::*;
use crate::hooks::HookBindings;
use crate::model::{EndpointType, SubscriptionConfig, TopicConfig};

fn topic(id: TopicId, name: &str) -> Topic {
    Topic::new(TopicConfig::new(id, name), HookBindings::none(), "server1", 1000)
}

fn sub(sub_key: &str, topic_id: TopicId, topic_name: &str, endpoint_id: EndpointId) -> Subscription {
    Subscription::new(SubscriptionConfig::new(
        sub_key,
        topic_id,
        topic_name,
        endpoint_id,
        EndpointType::Rest,
    ))
}

fn endpoint(id: EndpointId, name: &str, patterns: &[&str]) -> EndpointConfig {
    EndpointConfig {
        id,
        name: name.to_string(),
        endpoint_type: EndpointType::Rest,
        is_active: true,
        is_internal: false,
        security_id: Some(id * 10),
        ws_channel_id: None,
        service_id: None,
        pub_topic_patterns: patterns.iter().map(|p| p.to_string()).collect(),
        sub_topic_patterns: patterns.iter().map(|p| p.to_string()).collect(),
    }
}

/// Every sub_key index entry is listed under its topic and vice versa.
fn assert_consistent(registry: &Registry) {
    for sub in registry.subscriptions() {
        assert!(
            registry
                .sub_keys_by_topic(sub.topic_name())
                .contains(&sub.sub_key().to_string()),
            "{} missing from topic index",
            sub.sub_key()
        );
    }
    for topic in registry.topics() {
        for sub_key in registry.sub_keys_by_topic(topic.name()) {
            let sub = registry.subscription(sub_key).unwrap();
            assert_eq!(sub.topic_name(), topic.name());
        }
    }
}

#[test]
fn test_create_and_lookup_topic() {
    let mut registry = Registry::new();
    registry.create_topic(topic(1, "/orders"));

    assert!(registry.has_topic_by_name("/orders"));
    assert!(registry.has_topic_by_id(1));
    assert_eq!(registry.topic_id_by_name("/orders").unwrap(), 1);
    assert_eq!(registry.topic_by_id(1).unwrap().name(), "/orders");
    assert_eq!(
        registry.topic_by_name("/missing").unwrap_err(),
        RegistryError::TopicNotFound("/missing".to_string())
    );
}

#[test]
fn test_recreate_topic_under_new_name_drops_old_name() {
    let mut registry = Registry::new();
    registry.create_topic(topic(1, "/orders"));
    registry.add_subscription(sub("sk1", 1, "/orders", 3)).unwrap();

    registry.create_topic(topic(1, "/invoices"));

    assert!(!registry.has_topic_by_name("/orders"));
    assert_eq!(
        registry.topic_by_name("/orders").unwrap_err(),
        RegistryError::TopicNotFound("/orders".to_string())
    );
    assert_eq!(registry.topic_by_name("/invoices").unwrap().id(), 1);
    assert_eq!(registry.topic_name_by_sub_key("sk1").unwrap(), "/invoices");
    assert_eq!(registry.len_subscribers("/invoices"), 1);
    assert_eq!(registry.topic_count(), 1);
    assert_consistent(&registry);
}

#[test]
fn test_add_subscription_is_idempotent() {
    let mut registry = Registry::new();
    registry.create_topic(topic(1, "/orders"));

    assert!(registry.add_subscription(sub("sk1", 1, "/orders", 3)).unwrap());
    assert!(!registry.add_subscription(sub("sk1", 1, "/orders", 3)).unwrap());

    assert_eq!(registry.len_subscribers("/orders"), 1);
    assert_eq!(registry.subscriptions().count(), 1);
    assert_consistent(&registry);
}

#[test]
fn test_add_subscription_to_unknown_topic_fails() {
    let mut registry = Registry::new();
    let err = registry
        .add_subscription(sub("sk1", 1, "/orders", 3))
        .unwrap_err();
    assert_eq!(err, RegistryError::TopicNotFound("/orders".to_string()));
    assert!(!registry.has_sub_key("sk1"));
}

#[test]
fn test_remove_subscription_updates_both_indices() {
    let mut registry = Registry::new();
    registry.create_topic(topic(1, "/orders"));
    registry.add_subscription(sub("sk1", 1, "/orders", 3)).unwrap();
    registry.add_subscription(sub("sk2", 1, "/orders", 4)).unwrap();

    let removed = registry.remove_subscription("sk1").unwrap();

    assert_eq!(removed.sub_key(), "sk1");
    assert!(!registry.has_sub_key("sk1"));
    assert_eq!(registry.sub_keys_by_topic("/orders"), ["sk2".to_string()]);
    assert!(registry.remove_subscription("sk1").is_none());
    assert_consistent(&registry);
}

#[test]
fn test_delete_topic_cascades_to_subscriptions() {
    let mut registry = Registry::new();
    registry.create_topic(topic(1, "/orders"));
    registry.create_topic(topic(2, "/invoices"));
    registry.add_subscription(sub("sk1", 1, "/orders", 3)).unwrap();
    registry.add_subscription(sub("sk2", 1, "/orders", 4)).unwrap();
    registry.add_subscription(sub("sk3", 2, "/invoices", 4)).unwrap();

    let removed = registry.delete_topic(1).unwrap();

    let mut removed_keys: Vec<&str> = removed.iter().map(Subscription::sub_key).collect();
    removed_keys.sort();
    assert_eq!(removed_keys, ["sk1", "sk2"]);
    assert!(!registry.has_sub_key("sk1"));
    assert!(!registry.has_sub_key("sk2"));
    assert!(!registry.has_topic_by_name("/orders"));
    assert!(!registry.has_topic_by_id(1));
    assert!(registry.has_sub_key("sk3"));
    assert_consistent(&registry);
}

#[test]
fn test_delete_unknown_topic() {
    let mut registry = Registry::new();
    assert_eq!(
        registry.delete_topic(9).unwrap_err(),
        RegistryError::TopicIdNotFound(9)
    );
}

#[test]
fn test_edit_topic_moves_subscribers_and_keeps_sync_state() {
    let mut registry = Registry::new();
    registry.create_topic(topic(1, "/orders"));
    registry.add_subscription(sub("sk1", 1, "/orders", 3)).unwrap();
    {
        let t = registry.topic_by_id_mut(1).unwrap();
        t.sync_has_gd_msg = true;
        t.raise_gd_pub_time_max(42.5);
    }

    let renamed = topic(1, "/orders/v2");
    registry.edit_topic("/orders", renamed).unwrap();

    assert!(!registry.has_topic_by_name("/orders"));
    let edited = registry.topic_by_name("/orders/v2").unwrap();
    assert!(edited.sync_has_gd_msg);
    assert_eq!(edited.gd_pub_time_max, 42.5);
    assert_eq!(registry.topic_name_by_sub_key("sk1").unwrap(), "/orders/v2");
    assert_eq!(registry.len_subscribers("/orders/v2"), 1);
    assert_eq!(registry.len_subscribers("/orders"), 0);
    assert_consistent(&registry);
}

#[test]
fn test_edit_subscription() {
    let mut registry = Registry::new();
    registry.create_topic(topic(1, "/orders"));
    registry.add_subscription(sub("sk1", 1, "/orders", 3)).unwrap();

    registry
        .edit_subscription(
            "sk1",
            SubscriptionUpdate {
                ext_client_id: Some("client-1".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(
        registry.subscription_by_ext_client_id("client-1").unwrap().sub_key(),
        "sk1"
    );
    assert!(matches!(
        registry.edit_subscription("nope", SubscriptionUpdate::default()),
        Err(RegistryError::SubKeyNotFound(_))
    ));
}

#[test]
fn test_lookups_by_sub_key() {
    let mut registry = Registry::new();
    registry.create_topic(topic(1, "/orders"));
    registry.create_topic(topic(2, "/invoices"));
    registry.add_subscription(sub("sk1", 1, "/orders", 3)).unwrap();
    registry.add_subscription(sub("sk2", 2, "/invoices", 3)).unwrap();

    let names = registry.sub_key_to_topic_name(&["sk1".into(), "sk2".into(), "gone".into()]);
    assert_eq!(names.len(), 2);
    assert_eq!(names["sk2"], "/invoices");

    assert_eq!(registry.topic_by_sub_key("sk1").unwrap().id(), 1);
    let topics = registry
        .topics_by_sub_keys(&["sk1".into(), "sk2".into()])
        .unwrap();
    assert_eq!(topics["sk2"].name(), "/invoices");
    assert!(registry.topics_by_sub_keys(&["gone".into()]).is_err());

    let endpoint_topics: Vec<TopicId> = registry
        .sub_topics_for_endpoint(3)
        .iter()
        .map(|t| t.id())
        .collect();
    assert_eq!(endpoint_topics, [1, 2]);
    assert!(registry.is_subscribed_to(3, "/orders"));
    assert!(!registry.is_subscribed_to(4, "/orders"));
    assert_eq!(
        registry.subscription_by_endpoint_id("/orders", 3).unwrap().sub_key(),
        "sk1"
    );
}

#[test]
fn test_endpoint_catalog_and_patterns() {
    let mut registry = Registry::new();
    registry.create_endpoint(endpoint(1, "crm", &["/orders/*"]));

    assert_eq!(registry.endpoint_by_name("crm").unwrap().id(), 1);
    assert_eq!(registry.endpoint_id_by_sec_id(10).unwrap(), 1);
    assert_eq!(
        registry.is_allowed_pub_topic("/orders/eu", Some(10), None),
        Some("/orders/*".to_string())
    );
    assert_eq!(registry.is_allowed_sub_topic_by_endpoint_id("/invoices", 1), None);

    registry.delete_endpoint(1);
    assert!(registry.endpoint_by_id(1).is_err());
    assert_eq!(registry.is_allowed_pub_topic_by_endpoint_id("/orders/eu", 1), None);
}

#[test]
fn test_format_subscriptions() {
    let mut registry = Registry::new();
    registry.create_topic(topic(1, "/orders"));
    registry.add_subscription(sub("sk1", 1, "/orders", 3)).unwrap();

    let by_key = registry.format_subscriptions_by_sub_key("Subscriptions");
    assert!(by_key.starts_with("Subscriptions\n"));
    assert!(by_key.contains("sk1 -> /orders"));

    let by_topic = registry.format_subscriptions_by_topic("By topic");
    assert!(by_topic.contains("/orders:\n  sk1"));
}
