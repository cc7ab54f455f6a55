//! Resource Descriptor
//!
//! One immutable value per managed resource, produced by discovery and
//! consumed by the orchestrator. Never persisted.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Priority used when a resource carries no priority tag
pub const DEFAULT_PRIORITY: i32 = 50;

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Registry key of the handler (e.g. `ecs-service`)
    pub resource_kind: String,
    /// Provider identifier, normally an ARN
    pub provider_id: String,
    /// Human-readable identifier, unique per kind within a batch
    pub resource_id: String,
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Schedule/environment grouping
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl ResourceDescriptor {
    pub fn new(resource_kind: &str, provider_id: &str, resource_id: &str) -> Self {
        Self {
            resource_kind: resource_kind.to_string(),
            provider_id: provider_id.to_string(),
            resource_id: resource_id.to_string(),
            priority: DEFAULT_PRIORITY,
            group: String::new(),
            tags: HashMap::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.group = group.to_string();
        self
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Batch-unique key
    pub fn key(&self) -> (&str, &str) {
        (&self.resource_kind, &self.resource_id)
    }

    /// String metadata value
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_defaults_when_absent() {
        let desc: ResourceDescriptor = serde_json::from_value(json!({
            "resource_kind": "ecs-service",
            "provider_id": "arn:aws:ecs:us-east-1:123456789012:service/dev/api",
            "resource_id": "api"
        }))
        .unwrap();
        assert_eq!(desc.priority, DEFAULT_PRIORITY);
        assert!(desc.tags.is_empty());
    }

    #[test]
    fn test_builder_and_metadata() {
        let desc = ResourceDescriptor::new("rds-db", "arn:aws:rds:us-east-1:1:db:orders", "orders")
            .with_priority(10)
            .with_metadata("engine", json!("postgres"));
        assert_eq!(desc.priority, 10);
        assert_eq!(desc.metadata_str("engine"), Some("postgres"));
        assert_eq!(desc.key(), ("rds-db", "orders"));
    }
}
