//! Names of the platform services the broker invokes.

pub const TOPIC_CREATE: &str = "pubsub.topic.create";
pub const PUBLISH: &str = "pubsub.publish.publish";
pub const AFTER_PUBLISH: &str = "pubsub.after-publish";

pub const CREATE_DELIVERY_TASK: &str = "pubsub.delivery.create-delivery-task";
pub const DELETE_DELIVERY_TASK: &str = "pubsub.delivery.delete-delivery-task";
pub const DELIVER_MESSAGE: &str = "pubsub.delivery.deliver-message";
pub const GET_SERVER_PID_FOR_SUB_KEY: &str = "pubsub.delivery.get-server-pid-for-sub-key";
pub const MIGRATE_DELIVERY_SERVER: &str = "pubsub.migrate.migrate-delivery-server";

pub const GET_DELIVERY_MESSAGES: &str = "pubsub.endpoint.get-delivery-messages";
pub const READ_MESSAGES_GD: &str = "pubsub.endpoint.get-endpoint-queue-messages-gd";
pub const READ_MESSAGES_NON_GD: &str = "pubsub.endpoint.get-endpoint-queue-messages-non-gd";
pub const READ_MESSAGE_GD: &str = "pubsub.message.get-from-queue-gd";
pub const READ_MESSAGE_NON_GD: &str = "pubsub.message.get-from-queue-non-gd";
pub const DELETE_MESSAGE_GD: &str = "pubsub.message.queue-delete-gd";
pub const DELETE_MESSAGE_NON_GD: &str = "pubsub.message.queue-delete-non-gd";

/// Prefix of topics created for messages published to services.
pub const SERVICE_TOPIC_PREFIX: &str = "zato.s.to.";

/// Topic receiving messages published to a service.
pub fn topic_for_service(service_name: &str) -> String {
    format!(
        "{SERVICE_TOPIC_PREFIX}{}",
        crate::utils::time::fs_safe_name(service_name)
    )
}
