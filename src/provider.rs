//! Provider capabilities used by resource handlers
//!
//! Handlers only talk to these traits. The AWS implementation lives in
//! [`crate::aws`]; tests substitute in-memory doubles.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Current state of a container service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescription {
    pub service_name: String,
    pub status: String,
    pub desired_count: u32,
    pub running_count: u32,
    pub pending_count: u32,
}

/// Capacity bounds of an auto-scaling target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalableTarget {
    pub min_capacity: u32,
    pub max_capacity: u32,
}

/// Current state of a database instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbInstanceDescription {
    pub identifier: String,
    pub status: String,
    #[serde(default)]
    pub instance_class: Option<String>,
}

#[async_trait]
pub trait ContainerServiceApi: Send + Sync {
    /// `Ok(None)` when the service or cluster does not exist
    async fn describe_service(&self, cluster: &str, service: &str)
        -> Result<Option<ServiceDescription>>;

    async fn update_desired_count(&self, cluster: &str, service: &str, desired_count: u32)
        -> Result<()>;
}

#[async_trait]
pub trait ScalingApi: Send + Sync {
    /// `Ok(None)` when no scalable target is registered for the service
    async fn describe_scalable_target(&self, cluster: &str, service: &str)
        -> Result<Option<ScalableTarget>>;

    async fn register_scalable_target(
        &self,
        cluster: &str,
        service: &str,
        min_capacity: u32,
        max_capacity: u32,
    ) -> Result<()>;
}

#[async_trait]
pub trait DatabaseApi: Send + Sync {
    /// `Ok(None)` when the instance does not exist
    async fn describe_instance(&self, identifier: &str) -> Result<Option<DbInstanceDescription>>;

    async fn start_instance(&self, identifier: &str) -> Result<()>;

    /// Stop, optionally taking a snapshot with the given identifier first
    async fn stop_instance(&self, identifier: &str, snapshot_identifier: Option<&str>)
        -> Result<()>;
}

/// Remote parameter store holding the configuration document
#[async_trait]
pub trait ParameterStore: Send + Sync {
    async fn get_parameter(&self, name: &str) -> Result<String>;
}

/// Regional client factory handed to handler constructors
pub trait CloudProvider: Send + Sync {
    /// Region used when a provider id carries none
    fn default_region(&self) -> &str;

    fn container_service(&self, region: &str) -> Arc<dyn ContainerServiceApi>;

    fn scaling(&self, region: &str) -> Arc<dyn ScalingApi>;

    fn database(&self, region: &str) -> Arc<dyn DatabaseApi>;
}
