//! Timestamps and identifiers.

use chrono::Utc;
use uuid::Uuid;

use crate::model::EndpointType;

/// Current time as seconds since the epoch, with millisecond precision.
pub fn utcnow_as_ms() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// New correlation ID.
pub fn new_cid() -> String {
    Uuid::new_v4().simple().to_string()
}

/// New published message ID.
pub fn new_msg_id() -> String {
    format!("zpsm{}", Uuid::new_v4().simple())
}

/// New subscription key, prefixed with the endpoint type.
pub fn new_sub_key(endpoint_type: EndpointType) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("zpsk.{}.{}", endpoint_type.as_str(), &id[..12])
}

/// Replace punctuation and whitespace so a name can be embedded in a topic name.
pub fn fs_safe_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_punctuation() || c.is_whitespace() {
                '_'
            } else {
                c
            }
        })
        .collect()
}
