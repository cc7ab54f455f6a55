//! Shared in-memory provider doubles for integration tests
//!
//! `FakeAws` implements every provider capability against a small state
//! table and records each call in order, so tests can assert both outcomes
//! and sequencing.

#![allow(dead_code)]

use async_trait::async_trait;
use lights_out::config::LightsOutConfig;
use lights_out::provider::{
    CloudProvider, ContainerServiceApi, DatabaseApi, DbInstanceDescription, ScalableTarget,
    ScalingApi, ServiceDescription,
};
use lights_out::resource::ResourceDescriptor;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct State {
    services: HashMap<String, ServiceDescription>,
    scalable: HashMap<String, ScalableTarget>,
    databases: HashMap<String, DbInstanceDescription>,
    calls: Vec<String>,
    failing: HashSet<String>,
    panicking: HashSet<String>,
    delays: HashMap<String, Duration>,
    /// Services whose running count never follows the desired count
    lagging: HashSet<String>,
}

#[derive(Default)]
pub struct FakeAws {
    state: Mutex<State>,
}

impl FakeAws {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    pub fn add_service(&self, name: &str, desired: u32, running: u32) {
        self.with_state(|s| {
            s.services.insert(
                name.to_string(),
                ServiceDescription {
                    service_name: name.to_string(),
                    status: "ACTIVE".to_string(),
                    desired_count: desired,
                    running_count: running,
                    pending_count: 0,
                },
            );
        });
    }

    pub fn add_scalable_target(&self, name: &str, min: u32, max: u32) {
        self.with_state(|s| {
            s.scalable.insert(
                name.to_string(),
                ScalableTarget {
                    min_capacity: min,
                    max_capacity: max,
                },
            );
        });
    }

    pub fn add_database(&self, id: &str, status: &str) {
        self.with_state(|s| {
            s.databases.insert(
                id.to_string(),
                DbInstanceDescription {
                    identifier: id.to_string(),
                    status: status.to_string(),
                    instance_class: Some("db.t3.micro".to_string()),
                },
            );
        });
    }

    /// Mutating calls on `name` return an error
    pub fn fail_on(&self, name: &str) {
        self.with_state(|s| s.failing.insert(name.to_string()));
    }

    /// Mutating calls on `name` panic
    pub fn panic_on(&self, name: &str) {
        self.with_state(|s| s.panicking.insert(name.to_string()));
    }

    /// Mutating calls on `name` take `delay` before applying
    pub fn delay_on(&self, name: &str, delay: Duration) {
        self.with_state(|s| s.delays.insert(name.to_string(), delay));
    }

    pub fn lagging(&self, name: &str) {
        self.with_state(|s| s.lagging.insert(name.to_string()));
    }

    pub fn calls(&self) -> Vec<String> {
        self.with_state(|s| s.calls.clone())
    }

    /// Calls that change provider state
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("describe"))
            .collect()
    }

    pub fn service(&self, name: &str) -> Option<ServiceDescription> {
        self.with_state(|s| s.services.get(name).cloned())
    }

    pub fn database(&self, id: &str) -> Option<DbInstanceDescription> {
        self.with_state(|s| s.databases.get(id).cloned())
    }

    pub fn scalable_target(&self, name: &str) -> Option<ScalableTarget> {
        self.with_state(|s| s.scalable.get(name).copied())
    }

    async fn before_mutation(&self, name: &str, call: String) -> anyhow::Result<()> {
        let (delay, panics, fails) = self.with_state(|s| {
            (
                s.delays.get(name).copied(),
                s.panicking.contains(name),
                s.failing.contains(name),
            )
        });
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if panics {
            panic!("simulated provider panic on {}", name);
        }
        self.with_state(|s| s.calls.push(call));
        if fails {
            anyhow::bail!("simulated provider failure on {}", name);
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerServiceApi for FakeAws {
    async fn describe_service(
        &self,
        _cluster: &str,
        service: &str,
    ) -> anyhow::Result<Option<ServiceDescription>> {
        Ok(self.with_state(|s| {
            s.calls.push(format!("describe_service:{}", service));
            s.services.get(service).cloned()
        }))
    }

    async fn update_desired_count(
        &self,
        _cluster: &str,
        service: &str,
        desired_count: u32,
    ) -> anyhow::Result<()> {
        self.before_mutation(service, format!("update_service:{}:{}", service, desired_count))
            .await?;
        self.with_state(|s| {
            let lagging = s.lagging.contains(service);
            if let Some(svc) = s.services.get_mut(service) {
                svc.desired_count = desired_count;
                if !lagging {
                    svc.running_count = desired_count;
                }
            }
        });
        Ok(())
    }
}

#[async_trait]
impl ScalingApi for FakeAws {
    async fn describe_scalable_target(
        &self,
        _cluster: &str,
        service: &str,
    ) -> anyhow::Result<Option<ScalableTarget>> {
        Ok(self.with_state(|s| {
            s.calls.push(format!("describe_scalable_target:{}", service));
            s.scalable.get(service).copied()
        }))
    }

    async fn register_scalable_target(
        &self,
        _cluster: &str,
        service: &str,
        min_capacity: u32,
        max_capacity: u32,
    ) -> anyhow::Result<()> {
        self.before_mutation(
            service,
            format!("register_scalable_target:{}:{}-{}", service, min_capacity, max_capacity),
        )
        .await?;
        self.add_scalable_target(service, min_capacity, max_capacity);
        Ok(())
    }
}

#[async_trait]
impl DatabaseApi for FakeAws {
    async fn describe_instance(&self, identifier: &str) -> anyhow::Result<Option<DbInstanceDescription>> {
        Ok(self.with_state(|s| {
            s.calls.push(format!("describe_instance:{}", identifier));
            s.databases.get(identifier).cloned()
        }))
    }

    async fn start_instance(&self, identifier: &str) -> anyhow::Result<()> {
        self.before_mutation(identifier, format!("start_instance:{}", identifier))
            .await?;
        self.set_db_status(identifier, "starting");
        Ok(())
    }

    async fn stop_instance(
        &self,
        identifier: &str,
        snapshot_identifier: Option<&str>,
    ) -> anyhow::Result<()> {
        let call = match snapshot_identifier {
            Some(snapshot) => format!("stop_instance:{}:{}", identifier, snapshot),
            None => format!("stop_instance:{}", identifier),
        };
        self.before_mutation(identifier, call).await?;
        self.set_db_status(identifier, "stopping");
        Ok(())
    }
}

impl FakeAws {
    fn set_db_status(&self, id: &str, status: &str) {
        self.with_state(|s| {
            if let Some(db) = s.databases.get_mut(id) {
                db.status = status.to_string();
            }
        });
    }
}

/// Hands the same fake to every region
pub struct FakeProvider(pub Arc<FakeAws>);

impl CloudProvider for FakeProvider {
    fn default_region(&self) -> &str {
        "us-east-1"
    }

    fn container_service(&self, _region: &str) -> Arc<dyn ContainerServiceApi> {
        self.0.clone()
    }

    fn scaling(&self, _region: &str) -> Arc<dyn ScalingApi> {
        self.0.clone()
    }

    fn database(&self, _region: &str) -> Arc<dyn DatabaseApi> {
        self.0.clone()
    }
}

pub fn ecs_descriptor(name: &str, priority: i32) -> ResourceDescriptor {
    ResourceDescriptor::new(
        "ecs-service",
        &format!("arn:aws:ecs:us-east-1:123456789012:service/dev-cluster/{}", name),
        name,
    )
    .with_priority(priority)
}

pub fn rds_descriptor(id: &str, priority: i32) -> ResourceDescriptor {
    ResourceDescriptor::new(
        "rds-db",
        &format!("arn:aws:rds:us-east-1:123456789012:db:{}", id),
        id,
    )
    .with_priority(priority)
}

/// Configuration with both built-in kinds; no stability waits
pub fn test_config() -> LightsOutConfig {
    LightsOutConfig::from_yaml(
        r#"
version: "1.0"
environment: dev
resource_defaults:
  ecs-service:
    wait_for_stable: false
    start:
      desired_count: 2
    stop:
      desired_count: 0
  rds-db:
    wait_after_command: 5
"#,
        "test",
    )
    .expect("test config should parse")
}
