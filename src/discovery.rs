//! Discovery adapter
//!
//! Turns tagged resource records (ARN + tags, the shape a tag query
//! returns) into [`ResourceDescriptor`]s. Only resources carrying every
//! required tag are kept; the query itself happens elsewhere.

use crate::aws::arn::{ecs_service_parts, rds_instance_id, Arn};
use crate::resource::{ecs_service, rds_instance, ResourceDescriptor, DEFAULT_PRIORITY};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

pub const TAG_MANAGED: &str = "lights-out:managed";
pub const TAG_ENVIRONMENT: &str = "lights-out:env";
pub const TAG_PRIORITY: &str = "lights-out:priority";
pub const TAG_GROUP: &str = "lights-out:group";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Tag {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value", default)]
    pub value: String,
}

/// One record of a tag query result
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TaggedResource {
    #[serde(rename = "ResourceARN")]
    pub resource_arn: String,
    #[serde(rename = "Tags", default)]
    pub tags: Vec<Tag>,
}

impl TaggedResource {
    fn tag_map(&self) -> BTreeMap<&str, &str> {
        self.tags
            .iter()
            .map(|t| (t.key.as_str(), t.value.as_str()))
            .collect()
    }
}

/// Tags a resource must carry to be managed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryFilter {
    required: BTreeMap<String, String>,
}

impl DiscoveryFilter {
    /// `managed=true`, the environment tag when given, plus any extra tags
    pub fn new(environment: Option<&str>, extra: &BTreeMap<String, String>) -> Self {
        let mut required = BTreeMap::new();
        required.insert(TAG_MANAGED.to_string(), "true".to_string());
        if let Some(env) = environment {
            required.insert(TAG_ENVIRONMENT.to_string(), env.to_string());
        }
        required.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self { required }
    }

    pub fn matches(&self, resource: &TaggedResource) -> bool {
        let tags = resource.tag_map();
        self.required.iter().all(|(key, expected)| {
            tags.get(key.as_str())
                .is_some_and(|actual| actual.eq_ignore_ascii_case(expected))
        })
    }
}

/// Parse the `lights-out:priority` tag, defaulting when absent or invalid
pub fn parse_priority(value: Option<&str>, resource_id: &str) -> i32 {
    match value.map(str::trim) {
        None | Some("") => DEFAULT_PRIORITY,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(
                resource_id,
                "Invalid priority tag '{}', using {}",
                raw,
                DEFAULT_PRIORITY
            );
            DEFAULT_PRIORITY
        }),
    }
}

/// Descriptor for one tagged resource, `None` when its type is unsupported
pub fn to_descriptor(resource: &TaggedResource) -> Option<ResourceDescriptor> {
    let arn = Arn::parse(&resource.resource_arn)?;
    let tags = resource.tag_map();

    let mut descriptor = match arn.service.as_str() {
        "ecs" => {
            let (cluster, service) = ecs_service_parts(&resource.resource_arn)?;
            let desc = ResourceDescriptor::new(ecs_service::KIND, &resource.resource_arn, &service);
            match cluster {
                Some(cluster) => desc.with_metadata("cluster_name", Value::String(cluster)),
                None => desc,
            }
        }
        "rds" => {
            let id = rds_instance_id(&resource.resource_arn)?;
            ResourceDescriptor::new(rds_instance::KIND, &resource.resource_arn, &id)
        }
        _ => return None,
    };

    descriptor.priority = parse_priority(tags.get(TAG_PRIORITY).copied(), &descriptor.resource_id);
    if let Some(group) = tags.get(TAG_GROUP) {
        descriptor.group = group.to_string();
    }
    descriptor.tags = resource
        .tags
        .iter()
        .map(|t| (t.key.clone(), t.value.clone()))
        .collect();
    Some(descriptor)
}

/// Filter and convert a tag query result
pub fn discover(resources: &[TaggedResource], filter: &DiscoveryFilter) -> Vec<ResourceDescriptor> {
    resources
        .iter()
        .filter(|r| filter.matches(r))
        .filter_map(|r| {
            let descriptor = to_descriptor(r);
            if descriptor.is_none() {
                tracing::debug!("Skipping unsupported resource {}", r.resource_arn);
            }
            descriptor
        })
        .collect()
}

/// Parse a resources document.
///
/// Accepts a tag query result (`{"ResourceTagMappingList": [...]}` or a bare
/// list of `{ResourceARN, Tags}` records), which is filtered, or a list of
/// descriptors, which is taken as-is.
pub fn parse_resources(content: &str, filter: &DiscoveryFilter) -> Result<Vec<ResourceDescriptor>> {
    let value: Value = serde_json::from_str(content).context("Failed to parse resources JSON")?;

    let records = match &value {
        Value::Object(obj) => obj
            .get("ResourceTagMappingList")
            .cloned()
            .context("Expected ResourceTagMappingList or a JSON array")?,
        Value::Array(items) if items.first().is_some_and(|i| i.get("ResourceARN").is_some()) => {
            value.clone()
        }
        Value::Array(_) => {
            return serde_json::from_value(value.clone())
                .context("Failed to parse resource descriptors");
        }
        _ => anyhow::bail!("Expected ResourceTagMappingList or a JSON array"),
    };

    let tagged: Vec<TaggedResource> =
        serde_json::from_value(records).context("Failed to parse tagged resources")?;
    Ok(discover(&tagged, filter))
}

pub fn load_resources(path: &Path, filter: &DiscoveryFilter) -> Result<Vec<ResourceDescriptor>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read resources file {}", path.display()))?;
    parse_resources(&content, filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged(arn: &str, tags: &[(&str, &str)]) -> TaggedResource {
        TaggedResource {
            resource_arn: arn.to_string(),
            tags: tags
                .iter()
                .map(|(k, v)| Tag {
                    key: k.to_string(),
                    value: v.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_filter_requires_managed_and_env() {
        let filter = DiscoveryFilter::new(Some("dev"), &BTreeMap::new());
        let arn = "arn:aws:ecs:us-east-1:123456789012:service/dev/api";
        assert!(filter.matches(&tagged(arn, &[(TAG_MANAGED, "TRUE"), (TAG_ENVIRONMENT, "dev")])));
        assert!(!filter.matches(&tagged(arn, &[(TAG_MANAGED, "true"), (TAG_ENVIRONMENT, "prod")])));
        assert!(!filter.matches(&tagged(arn, &[(TAG_ENVIRONMENT, "dev")])));
    }

    #[test]
    fn test_ecs_descriptor() {
        let desc = to_descriptor(&tagged(
            "arn:aws:ecs:us-east-1:123456789012:service/dev-cluster/api",
            &[(TAG_PRIORITY, "10"), (TAG_GROUP, "office-hours")],
        ))
        .unwrap();
        assert_eq!(desc.resource_kind, "ecs-service");
        assert_eq!(desc.resource_id, "api");
        assert_eq!(desc.priority, 10);
        assert_eq!(desc.group, "office-hours");
        assert_eq!(desc.metadata_str("cluster_name"), Some("dev-cluster"));
    }

    #[test]
    fn test_invalid_priority_defaults() {
        assert_eq!(parse_priority(Some("high"), "db"), DEFAULT_PRIORITY);
        assert_eq!(parse_priority(None, "db"), DEFAULT_PRIORITY);
        assert_eq!(parse_priority(Some(" 90 "), "db"), 90);
    }

    #[test]
    fn test_unsupported_resources_are_dropped() {
        let filter = DiscoveryFilter::new(None, &BTreeMap::new());
        let resources = vec![
            tagged("arn:aws:lambda:us-east-1:1:function:x", &[(TAG_MANAGED, "true")]),
            tagged("arn:aws:rds:us-east-1:1:db:orders", &[(TAG_MANAGED, "true")]),
            tagged("arn:aws:rds:us-east-1:1:cluster:aurora", &[(TAG_MANAGED, "true")]),
        ];
        let found = discover(&resources, &filter);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].resource_kind, "rds-db");
        assert_eq!(found[0].resource_id, "orders");
    }

    #[test]
    fn test_parse_tag_mapping_document() {
        let json = r#"{"ResourceTagMappingList": [
            {"ResourceARN": "arn:aws:rds:us-east-1:1:db:orders",
             "Tags": [{"Key": "lights-out:managed", "Value": "true"},
                      {"Key": "lights-out:env", "Value": "dev"},
                      {"Key": "lights-out:priority", "Value": "100"}]},
            {"ResourceARN": "arn:aws:rds:us-east-1:1:db:other",
             "Tags": [{"Key": "lights-out:managed", "Value": "false"}]}
        ]}"#;
        let filter = DiscoveryFilter::new(Some("dev"), &BTreeMap::new());
        let found = parse_resources(json, &filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].priority, 100);
    }

    #[test]
    fn test_parse_descriptor_list() {
        let json = r#"[{"resource_kind": "ecs-service",
                        "provider_id": "arn:aws:ecs:us-east-1:1:service/dev/api",
                        "resource_id": "api"}]"#;
        let filter = DiscoveryFilter::new(Some("dev"), &BTreeMap::new());
        let found = parse_resources(json, &filter).unwrap();
        assert_eq!(found[0].priority, DEFAULT_PRIORITY);
        assert!(parse_resources("42", &filter).is_err());
    }
}
