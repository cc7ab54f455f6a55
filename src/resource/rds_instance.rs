//! Managed-database handler (RDS instance)
//!
//! Fire-and-forget shape: a real start or stop takes 5-10 minutes, longer
//! than one invocation may block. The handler issues the command, waits a
//! short fixed delay, checks the instance has left its source state, and
//! returns with `completion_kind = initiated`. Convergence is only visible
//! to a later `query_status`.

use super::descriptor::ResourceDescriptor;
use super::handler::{Action, HandlerResult, MutationMarker, ResourceHandler, ResourceStatus};
use super::policy::{self, CurrentState, DbTransition, TargetState};
use crate::aws::arn::{rds_instance_id, region_from_arn};
use crate::config::ActionConfig;
use crate::error::{LightsOutError, Result};
use crate::provider::{CloudProvider, DatabaseApi, DbInstanceDescription};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

pub const KIND: &str = "rds-db";

/// Deterministic snapshot identifier: `lights-out-{instance-id}-{timestamp}`
pub fn snapshot_identifier(instance_id: &str, at: DateTime<Utc>) -> String {
    format!("lights-out-{}-{}", instance_id, at.format("%Y%m%d%H%M%S"))
}

/// No kind-specific requirements beyond the defaults
pub fn validate_config(_config: &ActionConfig) -> Result<()> {
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
    Ok(Box::new(RdsInstanceHandler::new(
        descriptor.clone(),
        config.clone(),
        provider.database(&region),
    )))
}

pub struct RdsInstanceHandler {
    descriptor: ResourceDescriptor,
    config: ActionConfig,
    instance_id: String,
    rds: Arc<dyn DatabaseApi>,
    mutated: MutationMarker,
}

impl RdsInstanceHandler {
    pub fn new(
        descriptor: ResourceDescriptor,
        config: ActionConfig,
        rds: Arc<dyn DatabaseApi>,
    ) -> Self {
        let instance_id = rds_instance_id(&descriptor.provider_id)
            .unwrap_or_else(|| descriptor.resource_id.clone());
        Self {
            descriptor,
            config,
            instance_id,
            rds,
            mutated: MutationMarker::default(),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn wait_after_command(&self) -> Duration {
        Duration::from_secs(self.config.wait_after_command)
    }

    async fn describe(&self) -> Result<DbInstanceDescription> {
        self.rds
            .describe_instance(&self.instance_id)
            .await
            .map_err(|e| LightsOutError::provider(&self.descriptor.resource_id, e))?
            .ok_or_else(|| LightsOutError::NotFound {
                resource_id: self.descriptor.resource_id.clone(),
            })
    }

    fn resolve(&self, action: Action, status: &str) -> Result<(DbTransition, bool)> {
        match policy::resolve(
            action,
            &self.config,
            &CurrentState::DatabaseStatus(status.to_string()),
        )? {
            TargetState::Database {
                transition,
                take_snapshot,
                ..
            } => Ok((transition, take_snapshot)),
            TargetState::ServiceCount { .. } => Err(LightsOutError::config(
                "service target resolved for a database instance",
            )),
        }
    }

    async fn issue(&self, action: Action, take_snapshot: bool) -> Result<Option<String>> {
        let id = &self.descriptor.resource_id;
        let snapshot = take_snapshot.then(|| snapshot_identifier(&self.instance_id, Utc::now()));

        self.mutated.mark();
        let outcome = match action {
            Action::Start => self.rds.start_instance(&self.instance_id).await,
            Action::Stop => {
                self.rds
                    .stop_instance(&self.instance_id, snapshot.as_deref())
                    .await
            }
        };
        outcome.map_err(|e| LightsOutError::provider(id, e))?;
        Ok(snapshot)
    }

    async fn transition(&self, action: Action) -> Result<HandlerResult> {
        let id = &self.descriptor.resource_id;
        let current = self.describe().await?;
        let previous = ResourceStatus::Database(current.clone());
        let (transition, take_snapshot) = self.resolve(action, &current.status)?;

        match transition {
            DbTransition::AlreadyAtTarget => {
                tracing::info!(resource_id = %id, "Database already {}", current.status);
                return Ok(HandlerResult::success(
                    &self.descriptor,
                    action,
                    format!("{} is already {}", id, current.status),
                )
                .as_no_op()
                .with_previous_state(&previous));
            }
            DbTransition::InProgress => {
                tracing::info!(resource_id = %id, "Database already {}", current.status);
                return Ok(HandlerResult::success(
                    &self.descriptor,
                    action,
                    format!("{} is already {}; operation in progress", id, current.status),
                )
                .as_no_op()
                .initiated()
                .with_previous_state(&previous));
            }
            DbTransition::Incompatible => {
                let err = LightsOutError::Provider {
                    resource_id: id.clone(),
                    message: format!("cannot {} from status '{}'", action, current.status),
                };
                return Ok(HandlerResult::failure(&self.descriptor, action, &err)
                    .with_previous_state(&previous));
            }
            DbTransition::Issue => {}
        }

        tracing::info!(resource_id = %id, "{} database instance", action.present_participle());
        let snapshot = self.issue(action, take_snapshot).await?;

        // Confirm the transition began, never wait for it to finish
        tokio::time::sleep(self.wait_after_command()).await;
        let observed = match self.describe().await {
            Ok(db) => Some(db.status),
            Err(e) => {
                tracing::warn!(resource_id = %id, "Could not confirm transition: {}", e);
                None
            }
        };

        let progress = match observed.as_deref() {
            Some(status) if status != current.status => format!("status now '{}'", status),
            Some(status) => format!("status still '{}', transition not yet observed", status),
            None => "status unconfirmed".to_string(),
        };
        let snapshot_note = snapshot
            .map(|s| format!(", snapshot {}", s))
            .unwrap_or_default();

        Ok(HandlerResult::success(
            &self.descriptor,
            action,
            format!(
                "{} initiated for {} ({}{}); in progress, not complete. Typically takes 5-10 minutes",
                action.present_participle(),
                id,
                progress,
                snapshot_note
            ),
        )
        .initiated()
        .with_previous_state(&previous))
    }
}

#[async_trait]
impl ResourceHandler for RdsInstanceHandler {
    fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    fn mutation_requested(&self) -> bool {
        self.mutated.is_marked()
    }

    async fn query_status(&self) -> Result<ResourceStatus> {
        Ok(ResourceStatus::Database(self.describe().await?))
    }

    async fn start(&self) -> Result<HandlerResult> {
        self.transition(Action::Start).await
    }

    async fn stop(&self) -> Result<HandlerResult> {
        self.transition(Action::Stop).await
    }

    async fn preview(&self, action: Action) -> Result<HandlerResult> {
        let current = self.describe().await?;
        let previous = ResourceStatus::Database(current.clone());
        let (transition, take_snapshot) = self.resolve(action, &current.status)?;

        let message = match transition {
            DbTransition::Issue if take_snapshot => format!(
                "[dry-run] would {} {} with a final snapshot",
                action, self.descriptor.resource_id
            ),
            DbTransition::Issue => {
                format!("[dry-run] would {} {}", action, self.descriptor.resource_id)
            }
            DbTransition::Incompatible => format!(
                "[dry-run] cannot {} {} from status '{}'",
                action, self.descriptor.resource_id, current.status
            ),
            DbTransition::AlreadyAtTarget | DbTransition::InProgress => format!(
                "[dry-run] {} is already {}",
                self.descriptor.resource_id, current.status
            ),
        };

        Ok(HandlerResult::success(&self.descriptor, action, message)
            .as_dry_run()
            .with_previous_state(&previous))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_snapshot_identifier_pattern() {
        let at = Utc.with_ymd_and_hms(2026, 1, 15, 19, 30, 5).unwrap();
        assert_eq!(
            snapshot_identifier("orders-db", at),
            "lights-out-orders-db-20260115193005"
        );
    }
}
