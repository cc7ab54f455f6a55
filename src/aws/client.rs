//! AWS Client
//!
//! Regional client combining credentials and HTTP, plus the provider factory
//! that hands regional clients to resource handlers.

use super::auth::{self, AwsCredentials};
use super::http::{is_not_found, xml_text, AwsHttpClient, Endpoint};
use crate::provider::{
    CloudProvider, ContainerServiceApi, DatabaseApi, DbInstanceDescription, ParameterStore,
    ScalableTarget, ScalingApi, ServiceDescription,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Environment variable overriding every service endpoint
pub const ENDPOINT_OVERRIDE_VAR: &str = "LIGHTS_OUT_ENDPOINT_URL";

const ECS_TARGET_PREFIX: &str = "AmazonEC2ContainerServiceV20141113";
const SCALING_TARGET_PREFIX: &str = "AnyScaleFrontendService";
const SSM_TARGET_PREFIX: &str = "AmazonSSM";
const RDS_API_VERSION: &str = "2014-10-31";
const ECS_SCALABLE_DIMENSION: &str = "ecs:service:DesiredCount";

/// Main AWS client, bound to one region
#[derive(Clone)]
pub struct AwsClient {
    pub credentials: Arc<AwsCredentials>,
    pub http: AwsHttpClient,
    pub region: String,
    endpoint_override: Option<String>,
}

impl AwsClient {
    /// Create a client from the default credential and region chains.
    ///
    /// An explicit `region` wins over the ambient one.
    pub async fn from_env(region: Option<&str>) -> Result<Self> {
        let ambient = auth::load_ambient()
            .await
            .context("Failed to initialize AWS credentials")?;
        let region = region
            .map(str::to_string)
            .or(ambient.region)
            .unwrap_or_else(|| auth::FALLBACK_REGION.to_string());
        let endpoint_override = std::env::var(ENDPOINT_OVERRIDE_VAR).ok();
        Self::new(ambient.credentials, &region, endpoint_override.as_deref())
    }

    pub fn new(
        credentials: AwsCredentials,
        region: &str,
        endpoint_override: Option<&str>,
    ) -> Result<Self> {
        Ok(Self {
            credentials: Arc::new(credentials),
            http: AwsHttpClient::new()?,
            region: region.to_string(),
            endpoint_override: endpoint_override.map(str::to_string),
        })
    }

    /// Same credentials and HTTP pool, different region
    pub fn with_region(&self, region: &str) -> Self {
        Self {
            region: region.to_string(),
            ..self.clone()
        }
    }

    fn endpoint(&self, service: &str) -> Result<Endpoint> {
        Endpoint::new(service, &self.region, self.endpoint_override.as_deref())
    }

    async fn call_json(&self, service: &str, target: &str, body: Value) -> Result<Value> {
        let endpoint = self.endpoint(service)?;
        self.http
            .post_json(&endpoint, &self.credentials, target, &body)
            .await
    }

    async fn call_query(&self, params: &[(&str, &str)]) -> Result<String> {
        let endpoint = self.endpoint("rds")?;
        self.http.post_query(&endpoint, &self.credentials, params).await
    }
}

/// Application Auto Scaling resource id of an ECS service
fn scaling_resource_id(cluster: &str, service: &str) -> String {
    format!("service/{}/{}", cluster, service)
}

fn json_u32(value: &Value, field: &str) -> u32 {
    value
        .get(field)
        .and_then(|v| v.as_u64())
        .map(|v| v.min(u32::MAX as u64) as u32)
        .unwrap_or(0)
}

// =============================================================================
// ECS
// =============================================================================

#[async_trait]
impl ContainerServiceApi for AwsClient {
    async fn describe_service(
        &self,
        cluster: &str,
        service: &str,
    ) -> Result<Option<ServiceDescription>> {
        let response = match self
            .call_json(
                "ecs",
                &format!("{}.DescribeServices", ECS_TARGET_PREFIX),
                json!({ "cluster": cluster, "services": [service] }),
            )
            .await
        {
            Ok(response) => response,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(e),
        };

        let Some(svc) = response
            .get("services")
            .and_then(|v| v.as_array())
            .and_then(|services| services.first())
        else {
            // Missing services are reported under `failures` with reason MISSING
            return Ok(None);
        };

        let status = svc
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("UNKNOWN")
            .to_string();
        if status == "INACTIVE" {
            return Ok(None);
        }

        Ok(Some(ServiceDescription {
            service_name: svc
                .get("serviceName")
                .and_then(|v| v.as_str())
                .unwrap_or(service)
                .to_string(),
            status,
            desired_count: json_u32(svc, "desiredCount"),
            running_count: json_u32(svc, "runningCount"),
            pending_count: json_u32(svc, "pendingCount"),
        }))
    }

    async fn update_desired_count(
        &self,
        cluster: &str,
        service: &str,
        desired_count: u32,
    ) -> Result<()> {
        tracing::info!(
            "UpdateService: cluster={}, service={}, desiredCount={}",
            cluster,
            service,
            desired_count
        );
        self.call_json(
            "ecs",
            &format!("{}.UpdateService", ECS_TARGET_PREFIX),
            json!({ "cluster": cluster, "service": service, "desiredCount": desired_count }),
        )
        .await?;
        Ok(())
    }
}

// =============================================================================
// Application Auto Scaling
// =============================================================================

#[async_trait]
impl ScalingApi for AwsClient {
    async fn describe_scalable_target(
        &self,
        cluster: &str,
        service: &str,
    ) -> Result<Option<ScalableTarget>> {
        let response = self
            .call_json(
                "application-autoscaling",
                &format!("{}.DescribeScalableTargets", SCALING_TARGET_PREFIX),
                json!({
                    "ServiceNamespace": "ecs",
                    "ResourceIds": [scaling_resource_id(cluster, service)],
                    "ScalableDimension": ECS_SCALABLE_DIMENSION,
                }),
            )
            .await?;

        Ok(response
            .get("ScalableTargets")
            .and_then(|v| v.as_array())
            .and_then(|targets| targets.first())
            .map(|t| ScalableTarget {
                min_capacity: json_u32(t, "MinCapacity"),
                max_capacity: json_u32(t, "MaxCapacity"),
            }))
    }

    async fn register_scalable_target(
        &self,
        cluster: &str,
        service: &str,
        min_capacity: u32,
        max_capacity: u32,
    ) -> Result<()> {
        tracing::info!(
            "RegisterScalableTarget: service/{}/{} min={} max={}",
            cluster,
            service,
            min_capacity,
            max_capacity
        );
        self.call_json(
            "application-autoscaling",
            &format!("{}.RegisterScalableTarget", SCALING_TARGET_PREFIX),
            json!({
                "ServiceNamespace": "ecs",
                "ResourceId": scaling_resource_id(cluster, service),
                "ScalableDimension": ECS_SCALABLE_DIMENSION,
                "MinCapacity": min_capacity,
                "MaxCapacity": max_capacity,
            }),
        )
        .await?;
        Ok(())
    }
}

// =============================================================================
// RDS
// =============================================================================

#[async_trait]
impl DatabaseApi for AwsClient {
    async fn describe_instance(&self, identifier: &str) -> Result<Option<DbInstanceDescription>> {
        let body = match self
            .call_query(&[
                ("Action", "DescribeDBInstances"),
                ("Version", RDS_API_VERSION),
                ("DBInstanceIdentifier", identifier),
            ])
            .await
        {
            Ok(body) => body,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(e),
        };

        let Some(status) = xml_text(&body, "DBInstanceStatus") else {
            return Ok(None);
        };

        Ok(Some(DbInstanceDescription {
            identifier: xml_text(&body, "DBInstanceIdentifier")
                .unwrap_or_else(|| identifier.to_string()),
            status,
            instance_class: xml_text(&body, "DBInstanceClass"),
        }))
    }

    async fn start_instance(&self, identifier: &str) -> Result<()> {
        tracing::info!("StartDBInstance: {}", identifier);
        self.call_query(&[
            ("Action", "StartDBInstance"),
            ("Version", RDS_API_VERSION),
            ("DBInstanceIdentifier", identifier),
        ])
        .await?;
        Ok(())
    }

    async fn stop_instance(&self, identifier: &str, snapshot_identifier: Option<&str>) -> Result<()> {
        tracing::info!(
            "StopDBInstance: {} (snapshot: {})",
            identifier,
            snapshot_identifier.unwrap_or("none")
        );
        let mut params = vec![
            ("Action", "StopDBInstance"),
            ("Version", RDS_API_VERSION),
            ("DBInstanceIdentifier", identifier),
        ];
        if let Some(snapshot) = snapshot_identifier {
            params.push(("DBSnapshotIdentifier", snapshot));
        }
        self.call_query(&params).await?;
        Ok(())
    }
}

// =============================================================================
// SSM Parameter Store
// =============================================================================

#[async_trait]
impl ParameterStore for AwsClient {
    async fn get_parameter(&self, name: &str) -> Result<String> {
        let response = self
            .call_json(
                "ssm",
                &format!("{}.GetParameter", SSM_TARGET_PREFIX),
                json!({ "Name": name, "WithDecryption": true }),
            )
            .await?;

        response
            .get("Parameter")
            .and_then(|p| p.get("Value"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Parameter {} has no value", name))
    }
}

// =============================================================================
// Provider factory
// =============================================================================

/// Hands out regional [`AwsClient`]s sharing credentials and connection pool
pub struct AwsProvider {
    base: AwsClient,
}

impl AwsProvider {
    pub fn new(base: AwsClient) -> Self {
        Self { base }
    }

    /// Build from the default credential chain and the ambient default region
    pub async fn from_env(region: Option<&str>) -> Result<Self> {
        let base = AwsClient::from_env(region).await?;
        tracing::info!("Using default region: {}", base.region);
        Ok(Self::new(base))
    }

    pub fn client(&self, region: &str) -> AwsClient {
        self.base.with_region(region)
    }
}

impl CloudProvider for AwsProvider {
    fn default_region(&self) -> &str {
        &self.base.region
    }

    fn container_service(&self, region: &str) -> Arc<dyn ContainerServiceApi> {
        Arc::new(self.client(region))
    }

    fn scaling(&self, region: &str) -> Arc<dyn ScalingApi> {
        Arc::new(self.client(region))
    }

    fn database(&self, region: &str) -> Arc<dyn DatabaseApi> {
        Arc::new(self.client(region))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> AwsClient {
        AwsClient::new(
            AwsCredentials::new("AKID", "secret", None),
            "eu-west-1",
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_with_region_keeps_credentials() {
        let client = test_client();
        let other = client.with_region("us-west-2");
        assert_eq!(other.region, "us-west-2");
        assert!(Arc::ptr_eq(&client.credentials, &other.credentials));
        assert_eq!(client.region, "eu-west-1");
    }

    #[test]
    fn test_provider_default_region() {
        let provider = AwsProvider::new(test_client());
        assert_eq!(provider.default_region(), "eu-west-1");
    }

    #[test]
    fn test_scaling_resource_id() {
        assert_eq!(scaling_resource_id("dev", "api"), "service/dev/api");
    }
}
