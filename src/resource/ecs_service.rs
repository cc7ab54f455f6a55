//! Compute-service handler (ECS service)
//!
//! Synchronous-converging shape: mutate the desired count, then optionally
//! poll until running == desired within the configured timeout.

use super::descriptor::ResourceDescriptor;
use super::handler::{Action, HandlerResult, MutationMarker, ResourceHandler, ResourceStatus};
use super::policy::{self, CurrentState, ScalingMode, TargetState};
use super::waiter::{StabilityWaiter, DEFAULT_POLL_INTERVAL};
use crate::aws::arn::{ecs_service_parts, region_from_arn};
use crate::config::ActionConfig;
use crate::error::{LightsOutError, Result};
use crate::provider::{CloudProvider, ContainerServiceApi, ScalingApi, ServiceDescription};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub const KIND: &str = "ecs-service";

/// Cluster used when neither the ARN nor metadata names one
const DEFAULT_CLUSTER: &str = "default";

pub struct EcsServiceHandler {
    descriptor: ResourceDescriptor,
    config: ActionConfig,
    cluster: String,
    service: String,
    ecs: Arc<dyn ContainerServiceApi>,
    scaling: Arc<dyn ScalingApi>,
    poll_interval: Duration,
    mutated: MutationMarker,
}

/// Compute-service kinds need both a start and a stop spec
pub fn validate_config(config: &ActionConfig) -> Result<()> {
    if config.start.is_none() {
        return Err(LightsOutError::config("start spec is required"));
    }
    if config.stop.is_none() {
        return Err(LightsOutError::config("stop spec is required"));
    }
    Ok(())
}

/// Registry constructor
pub fn create(
    descriptor: &ResourceDescriptor,
    config: &ActionConfig,
    provider: &dyn CloudProvider,
) -> Result<Box<dyn ResourceHandler>> {
    let region = region_from_arn(&descriptor.provider_id)
        .unwrap_or_else(|| provider.default_region().to_string());
    Ok(Box::new(EcsServiceHandler::new(
        descriptor.clone(),
        config.clone(),
        provider.container_service(&region),
        provider.scaling(&region),
    )))
}

impl EcsServiceHandler {
    pub fn new(
        descriptor: ResourceDescriptor,
        config: ActionConfig,
        ecs: Arc<dyn ContainerServiceApi>,
        scaling: Arc<dyn ScalingApi>,
    ) -> Self {
        let (arn_cluster, arn_service) = ecs_service_parts(&descriptor.provider_id)
            .map(|(c, s)| (c, Some(s)))
            .unwrap_or((None, None));

        let cluster = descriptor
            .metadata_str("cluster_name")
            .map(str::to_string)
            .or(arn_cluster)
            .unwrap_or_else(|| DEFAULT_CLUSTER.to_string());
        let service = arn_service
            .or_else(|| descriptor.metadata_str("service_name").map(str::to_string))
            .unwrap_or_else(|| descriptor.resource_id.clone());

        Self {
            descriptor,
            config,
            cluster,
            service,
            ecs,
            scaling,
            poll_interval: DEFAULT_POLL_INTERVAL,
            mutated: MutationMarker::default(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    async fn describe(&self) -> Result<ServiceDescription> {
        self.ecs
            .describe_service(&self.cluster, &self.service)
            .await
            .map_err(|e| LightsOutError::provider(&self.descriptor.resource_id, e))?
            .ok_or_else(|| LightsOutError::NotFound {
                resource_id: self.descriptor.resource_id.clone(),
            })
    }

    fn resolve(&self, action: Action, current: &ServiceDescription) -> Result<(u32, ScalingMode)> {
        let target = policy::resolve(
            action,
            &self.config,
            &CurrentState::ServiceCount {
                desired_count: current.desired_count,
            },
        )?;
        match target {
            TargetState::ServiceCount {
                desired_count,
                scaling,
            } => Ok((desired_count, scaling)),
            TargetState::Database { .. } => Err(LightsOutError::config(
                "database target resolved for a compute service",
            )),
        }
    }

    fn warn_on_rejected_bounds(&self, action: Action, target: u32) {
        let rejected = match action {
            Action::Start => self.config.start.as_ref().is_some_and(|s| {
                policy::has_invalid_bounds(s.min_capacity, s.desired_count, s.max_capacity)
            }),
            Action::Stop => self.config.stop.as_ref().is_some_and(|s| {
                policy::has_invalid_bounds(s.min_capacity, target, s.max_capacity)
            }),
        };
        if rejected {
            tracing::warn!(
                resource_id = %self.descriptor.resource_id,
                "Capacity bounds invalid for {}, falling back to direct mode",
                action
            );
        }
    }

    /// Update capacity bounds when the service has a scalable target attached
    async fn apply_scaling_bounds(&self, min_capacity: u32, max_capacity: u32) -> Result<bool> {
        let id = &self.descriptor.resource_id;
        let attached = self
            .scaling
            .describe_scalable_target(&self.cluster, &self.service)
            .await
            .map_err(|e| LightsOutError::provider(id, e))?;

        if attached.is_none() {
            tracing::debug!(resource_id = %id, "No scalable target attached, updating count only");
            return Ok(false);
        }

        self.mutated.mark();
        self.scaling
            .register_scalable_target(&self.cluster, &self.service, min_capacity, max_capacity)
            .await
            .map_err(|e| LightsOutError::provider(id, e))?;
        Ok(true)
    }

    async fn wait_for_stable(&self, target: u32) -> bool {
        let waiter = StabilityWaiter::new(Duration::from_secs(self.config.stable_timeout_seconds))
            .with_interval(self.poll_interval);
        let ecs = &self.ecs;
        let (cluster, service) = (&self.cluster, &self.service);

        waiter
            .wait(&self.descriptor.resource_id, move || async move {
                let svc = ecs
                    .describe_service(cluster, service)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("service disappeared"))?;
                Ok(svc.desired_count == target && svc.running_count == target)
            })
            .await
    }

    async fn transition(&self, action: Action) -> Result<HandlerResult> {
        let id = &self.descriptor.resource_id;
        let current = self.describe().await?;
        let previous = ResourceStatus::Service(current.clone());
        let (target, scaling) = self.resolve(action, &current)?;

        if current.desired_count == target {
            tracing::info!(resource_id = %id, "Already at desired count {}", target);
            return Ok(HandlerResult::success(
                &self.descriptor,
                action,
                format!("{} already at desired count {}", id, target),
            )
            .as_no_op()
            .with_previous_state(&previous));
        }

        self.warn_on_rejected_bounds(action, target);

        let mut bounds_note = String::new();
        if let ScalingMode::AutoScaling {
            min_capacity,
            max_capacity,
        } = scaling
        {
            if self.apply_scaling_bounds(min_capacity, max_capacity).await? {
                bounds_note = format!(", capacity {}-{}", min_capacity, max_capacity);
            }
        }

        tracing::info!(
            resource_id = %id,
            cluster = %self.cluster,
            "{} service: desired count {} -> {}",
            action.present_participle(),
            current.desired_count,
            target
        );
        self.mutated.mark();
        self.ecs
            .update_desired_count(&self.cluster, &self.service, target)
            .await
            .map_err(|e| LightsOutError::provider(id, e))?;

        let summary = format!(
            "desired count {} -> {}{}",
            current.desired_count, target, bounds_note
        );

        if !self.config.wait_for_stable {
            return Ok(HandlerResult::success(
                &self.descriptor,
                action,
                format!("{} {} ({})", action.past_tense(), id, summary),
            )
            .with_previous_state(&previous));
        }

        if self.wait_for_stable(target).await {
            Ok(HandlerResult::success(
                &self.descriptor,
                action,
                format!("{} {} ({}, stable)", action.past_tense(), id, summary),
            )
            .with_previous_state(&previous))
        } else {
            let err = LightsOutError::Timeout {
                resource_id: id.clone(),
                timeout_seconds: self.config.stable_timeout_seconds,
            };
            let mut result = HandlerResult::failure(&self.descriptor, action, &err)
                .initiated()
                .with_previous_state(&previous);
            result.message = format!(
                "{} {} was requested ({}) but did not stabilize",
                action.present_participle(),
                id,
                summary
            );
            Ok(result)
        }
    }
}

#[async_trait]
impl ResourceHandler for EcsServiceHandler {
    fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    fn mutation_requested(&self) -> bool {
        self.mutated.is_marked()
    }

    async fn query_status(&self) -> Result<ResourceStatus> {
        Ok(ResourceStatus::Service(self.describe().await?))
    }

    async fn start(&self) -> Result<HandlerResult> {
        self.transition(Action::Start).await
    }

    async fn stop(&self) -> Result<HandlerResult> {
        self.transition(Action::Stop).await
    }

    async fn preview(&self, action: Action) -> Result<HandlerResult> {
        let current = self.describe().await?;
        let previous = ResourceStatus::Service(current.clone());
        let (target, scaling) = self.resolve(action, &current)?;

        let mode = match scaling {
            ScalingMode::Direct => "direct".to_string(),
            ScalingMode::AutoScaling {
                min_capacity,
                max_capacity,
            } => format!("auto-scaling {}-{}", min_capacity, max_capacity),
        };
        let message = if current.desired_count == target {
            format!("[dry-run] {} already at desired count {}", self.descriptor.resource_id, target)
        } else {
            format!(
                "[dry-run] would {} {}: desired count {} -> {} ({})",
                action, self.descriptor.resource_id, current.desired_count, target, mode
            )
        };

        Ok(HandlerResult::success(&self.descriptor, action, message)
            .as_dry_run()
            .with_previous_state(&previous))
    }
}
