//! Amazon Resource Name parsing

/// Parsed `arn:partition:service:region:account:resource`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arn {
    pub partition: String,
    pub service: String,
    pub region: String,
    pub account: String,
    pub resource: String,
}

impl Arn {
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.splitn(6, ':');
        if parts.next()? != "arn" {
            return None;
        }
        let partition = parts.next()?.to_string();
        let service = parts.next()?.to_string();
        let region = parts.next()?.to_string();
        let account = parts.next()?.to_string();
        let resource = parts.next()?.to_string();
        if partition.is_empty() || service.is_empty() || resource.is_empty() {
            return None;
        }

        Some(Self {
            partition,
            service,
            region,
            account,
            resource,
        })
    }

    /// Region, or `None` for global resources
    pub fn region(&self) -> Option<&str> {
        (!self.region.is_empty()).then_some(self.region.as_str())
    }

    /// Resource path segments (`service/cluster/name` -> `["service", "cluster", "name"]`)
    pub fn resource_segments(&self) -> Vec<&str> {
        self.resource.split(['/', ':']).collect()
    }
}

/// Extract the region from an ARN-like provider id
pub fn region_from_arn(value: &str) -> Option<String> {
    Arn::parse(value).and_then(|arn| arn.region().map(str::to_string))
}

/// Cluster and service names from an ECS service ARN.
///
/// Handles the long format `service/cluster/name`; the legacy short format
/// `service/name` yields no cluster.
pub fn ecs_service_parts(value: &str) -> Option<(Option<String>, String)> {
    let arn = Arn::parse(value)?;
    if arn.service != "ecs" {
        return None;
    }
    match arn.resource_segments().as_slice() {
        ["service", cluster, name] => Some((Some(cluster.to_string()), name.to_string())),
        ["service", name] => Some((None, name.to_string())),
        _ => None,
    }
}

/// Instance identifier from an RDS instance ARN (`db:identifier`)
pub fn rds_instance_id(value: &str) -> Option<String> {
    let arn = Arn::parse(value)?;
    if arn.service != "rds" {
        return None;
    }
    match arn.resource_segments().as_slice() {
        ["db", id] => Some(id.to_string()),
        _ => None,
    }
}
