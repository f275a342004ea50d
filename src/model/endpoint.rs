//! Pub/sub endpoints and topic pattern matching.

use serde::{Deserialize, Serialize};

use super::EndpointId;

/// Transport an endpoint uses to publish or receive messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointType {
    Amqp,
    Files,
    Ftp,
    Rest,
    Service,
    SmsTwilio,
    Smtp,
    Soap,
    Sql,
    #[serde(rename = "wsx")]
    WebSockets,
}

impl EndpointType {
    pub const ALL: [EndpointType; 10] = [
        EndpointType::Amqp,
        EndpointType::Files,
        EndpointType::Ftp,
        EndpointType::Rest,
        EndpointType::Service,
        EndpointType::SmsTwilio,
        EndpointType::Smtp,
        EndpointType::Soap,
        EndpointType::Sql,
        EndpointType::WebSockets,
    ];

    /// Short name used in service names and log output.
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointType::Amqp => "amqp",
            EndpointType::Files => "files",
            EndpointType::Ftp => "ftp",
            EndpointType::Rest => "rest",
            EndpointType::Service => "service",
            EndpointType::SmsTwilio => "sms_twilio",
            EndpointType::Smtp => "smtp",
            EndpointType::Soap => "soap",
            EndpointType::Sql => "sql",
            EndpointType::WebSockets => "wsx",
        }
    }

    /// Name of the service that creates subscriptions for this endpoint type.
    pub fn subscribe_service(&self) -> String {
        format!("pubsub.subscription.subscribe-{}", self.as_str())
    }
}

impl std::fmt::Display for EndpointType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Endpoint definition as delivered by the administrative layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub id: EndpointId,
    pub name: String,
    pub endpoint_type: EndpointType,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_internal: bool,
    #[serde(default)]
    pub security_id: Option<i64>,
    #[serde(default)]
    pub ws_channel_id: Option<i64>,
    #[serde(default)]
    pub service_id: Option<i64>,
    /// Patterns of topics this endpoint may publish to.
    #[serde(default)]
    pub pub_topic_patterns: Vec<String>,
    /// Patterns of topics this endpoint may subscribe to.
    #[serde(default)]
    pub sub_topic_patterns: Vec<String>,
}

/// An endpoint known to this process.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub config: EndpointConfig,
}

impl Endpoint {
    pub fn new(config: EndpointConfig) -> Self {
        Self { config }
    }

    pub fn id(&self) -> EndpointId {
        self.config.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn endpoint_type(&self) -> EndpointType {
        self.config.endpoint_type
    }

    /// Returns the first publish pattern matching `topic_name`.
    pub fn pub_pattern_for(&self, topic_name: &str) -> Option<&str> {
        first_match(&self.config.pub_topic_patterns, topic_name)
    }

    /// Returns the first subscribe pattern matching `topic_name`.
    pub fn sub_pattern_for(&self, topic_name: &str) -> Option<&str> {
        first_match(&self.config.sub_topic_patterns, topic_name)
    }
}

fn first_match<'a>(patterns: &'a [String], topic_name: &str) -> Option<&'a str> {
    patterns
        .iter()
        .find(|p| topic_matches(topic_name, p))
        .map(|p| p.as_str())
}

/// Check if a topic name matches a pattern.
///
/// Matching rules:
/// - "*" matches all topics
/// - Exact match: "/orders" matches "/orders"
/// - Trailing wildcard: "/orders/*" matches "/orders/eu" and "/orders/eu/de"
pub fn topic_matches(topic_name: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if topic_name == pattern {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => topic_name.starts_with(prefix) && topic_name.len() > prefix.len(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(pub_patterns: &[&str], sub_patterns: &[&str]) -> Endpoint {
        Endpoint::new(EndpointConfig {
            id: 1,
            name: "crm".to_string(),
            endpoint_type: EndpointType::Rest,
            is_active: true,
            is_internal: false,
            security_id: Some(10),
            ws_channel_id: None,
            service_id: None,
            pub_topic_patterns: pub_patterns.iter().map(|s| s.to_string()).collect(),
            sub_topic_patterns: sub_patterns.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[test]
    fn test_topic_matches_exact() {
        assert!(topic_matches("/orders", "/orders"));
        assert!(!topic_matches("/orders", "/inventory"));
    }

    #[test]
    fn test_topic_matches_wildcard() {
        assert!(topic_matches("/orders", "*"));
        assert!(topic_matches("/orders/eu", "/orders/*"));
        assert!(topic_matches("/orders/eu/de", "/orders/*"));
        assert!(!topic_matches("/orders/", "/orders/*"));
        assert!(!topic_matches("/ordersextra", "/orders/*"));
    }

    #[test]
    fn test_endpoint_patterns() {
        let ep = endpoint(&["/orders/*"], &["/invoices"]);
        assert_eq!(ep.pub_pattern_for("/orders/new"), Some("/orders/*"));
        assert_eq!(ep.pub_pattern_for("/invoices"), None);
        assert_eq!(ep.sub_pattern_for("/invoices"), Some("/invoices"));
    }

    #[test]
    fn test_endpoint_type_serde_names() {
        let json = serde_json::to_string(&EndpointType::WebSockets).unwrap();
        assert_eq!(json, "\"wsx\"");
        let parsed: EndpointType = serde_json::from_str("\"sms_twilio\"").unwrap();
        assert_eq!(parsed, EndpointType::SmsTwilio);
        assert_eq!(
            EndpointType::Rest.subscribe_service(),
            "pubsub.subscription.subscribe-rest"
        );
    }
}
