//! Handler Registry - map resource kinds to handler constructors
//!
//! Handlers are looked up by the `resource_kind` string carried on each
//! descriptor. Adding a kind means registering one constructor and one
//! config validator; nothing else in the engine changes.

use super::descriptor::ResourceDescriptor;
use super::handler::ResourceHandler;
use super::{ecs_service, rds_instance};
use crate::config::ActionConfig;
use crate::error::{LightsOutError, Result};
use crate::provider::CloudProvider;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a handler for one descriptor
pub type HandlerConstructor =
    Arc<dyn Fn(&ResourceDescriptor, &ActionConfig) -> Result<Box<dyn ResourceHandler>> + Send + Sync>;

/// Kind-specific config check, run before any handler is built
pub type ConfigValidator = fn(&ActionConfig) -> Result<()>;

/// Alias keys accepted alongside the canonical ones
pub const COMPUTE_SERVICE_ALIAS: &str = "compute-service";
pub const MANAGED_DATABASE_ALIAS: &str = "managed-database";

/// Config validator of a built-in kind; needs no provider
pub fn builtin_validator(kind: &str) -> Option<ConfigValidator> {
    match kind {
        ecs_service::KIND | COMPUTE_SERVICE_ALIAS => Some(ecs_service::validate_config as ConfigValidator),
        rds_instance::KIND | MANAGED_DATABASE_ALIAS => Some(rds_instance::validate_config as ConfigValidator),
        _ => None,
    }
}

#[derive(Clone)]
struct Registration {
    constructor: HandlerConstructor,
    validator: ConfigValidator,
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    entries: HashMap<String, Registration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in kinds bound to `provider`
    pub fn with_defaults(provider: Arc<dyn CloudProvider>) -> Self {
        let mut registry = Self::new();

        let compute: HandlerConstructor = {
            let provider = provider.clone();
            Arc::new(move |desc: &ResourceDescriptor, config: &ActionConfig| {
                ecs_service::create(desc, config, provider.as_ref())
            })
        };
        let database: HandlerConstructor = {
            let provider = provider.clone();
            Arc::new(move |desc: &ResourceDescriptor, config: &ActionConfig| {
                rds_instance::create(desc, config, provider.as_ref())
            })
        };

        for key in [ecs_service::KIND, COMPUTE_SERVICE_ALIAS] {
            registry.register_shared(key, compute.clone(), ecs_service::validate_config);
        }
        for key in [rds_instance::KIND, MANAGED_DATABASE_ALIAS] {
            registry.register_shared(key, database.clone(), rds_instance::validate_config);
        }
        registry
    }

    /// Register (or replace) the handler for `kind`
    pub fn register<F>(&mut self, kind: &str, constructor: F, validator: ConfigValidator)
    where
        F: Fn(&ResourceDescriptor, &ActionConfig) -> Result<Box<dyn ResourceHandler>>
            + Send
            + Sync
            + 'static,
    {
        self.register_shared(kind, Arc::new(constructor), validator);
    }

    fn register_shared(&mut self, kind: &str, constructor: HandlerConstructor, validator: ConfigValidator) {
        if self.entries.contains_key(kind) {
            tracing::debug!(kind, "Replacing registered handler");
        }
        self.entries.insert(
            kind.to_string(),
            Registration {
                constructor,
                validator,
            },
        );
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.entries.contains_key(kind)
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Run the kind's config validator. Unknown kinds pass; they fail per
    /// resource at construction instead.
    pub fn validate(&self, kind: &str, config: &ActionConfig) -> Result<()> {
        match self.entries.get(kind) {
            Some(entry) => (entry.validator)(config).map_err(|e| match e {
                LightsOutError::Config(message) => {
                    LightsOutError::config(format!("{}: {}", kind, message))
                }
                other => other,
            }),
            None => Ok(()),
        }
    }

    /// Build the handler for `descriptor`
    pub fn create(
        &self,
        descriptor: &ResourceDescriptor,
        config: &ActionConfig,
    ) -> Result<Box<dyn ResourceHandler>> {
        let entry = self
            .entries
            .get(&descriptor.resource_kind)
            .ok_or_else(|| LightsOutError::Provider {
                resource_id: descriptor.resource_id.clone(),
                message: format!("no handler registered for kind '{}'", descriptor.resource_kind),
            })?;
        (entry.constructor)(descriptor, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{
        ContainerServiceApi, DatabaseApi, DbInstanceDescription, ScalableTarget, ScalingApi,
        ServiceDescription,
    };
    use async_trait::async_trait;

    struct NullApi;

    #[async_trait]
    impl ContainerServiceApi for NullApi {
        async fn describe_service(&self, _: &str, _: &str) -> anyhow::Result<Option<ServiceDescription>> {
            Ok(None)
        }
        async fn update_desired_count(&self, _: &str, _: &str, _: u32) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl ScalingApi for NullApi {
        async fn describe_scalable_target(&self, _: &str, _: &str) -> anyhow::Result<Option<ScalableTarget>> {
            Ok(None)
        }
        async fn register_scalable_target(&self, _: &str, _: &str, _: u32, _: u32) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl DatabaseApi for NullApi {
        async fn describe_instance(&self, _: &str) -> anyhow::Result<Option<DbInstanceDescription>> {
            Ok(None)
        }
        async fn start_instance(&self, _: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn stop_instance(&self, _: &str, _: Option<&str>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct NullProvider;

    impl CloudProvider for NullProvider {
        fn default_region(&self) -> &str {
            "us-east-1"
        }
        fn container_service(&self, _: &str) -> Arc<dyn ContainerServiceApi> {
            Arc::new(NullApi)
        }
        fn scaling(&self, _: &str) -> Arc<dyn ScalingApi> {
            Arc::new(NullApi)
        }
        fn database(&self, _: &str) -> Arc<dyn DatabaseApi> {
            Arc::new(NullApi)
        }
    }

    fn registry() -> HandlerRegistry {
        HandlerRegistry::with_defaults(Arc::new(NullProvider))
    }

    #[test]
    fn test_default_kinds_and_aliases() {
        assert_eq!(
            registry().kinds(),
            vec!["compute-service", "ecs-service", "managed-database", "rds-db"]
        );
    }

    #[test]
    fn test_create_dispatches_on_kind() {
        let desc = ResourceDescriptor::new(
            "rds-db",
            "arn:aws:rds:eu-west-1:123456789012:db:orders",
            "orders",
        );
        let handler = registry().create(&desc, &ActionConfig::default()).unwrap();
        assert_eq!(handler.descriptor().resource_id, "orders");
    }

    #[test]
    fn test_unknown_kind_is_resource_scoped() {
        let desc = ResourceDescriptor::new("lambda-fn", "arn:aws:lambda:::function:x", "x");
        let err = registry().create(&desc, &ActionConfig::default()).err().unwrap();
        assert!(!err.is_batch_fatal());
        assert!(err.to_string().contains("lambda-fn"));
    }

    #[test]
    fn test_compute_validation_requires_specs() {
        let registry = registry();
        let err = registry
            .validate(COMPUTE_SERVICE_ALIAS, &ActionConfig::default())
            .unwrap_err();
        assert!(err.is_batch_fatal());
        assert!(registry.validate("rds-db", &ActionConfig::default()).is_ok());
        assert!(registry.validate("unknown", &ActionConfig::default()).is_ok());
    }

    #[test]
    fn test_builtin_validators() {
        assert!(builtin_validator("managed-database").is_some());
        let validate = builtin_validator("ecs-service").unwrap();
        assert!(validate(&ActionConfig::default()).is_err());
        assert!(builtin_validator("lambda-fn").is_none());
    }
}
