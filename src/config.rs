//! Configuration Management
//!
//! The configuration document is YAML, read from a local file or from SSM
//! Parameter Store. [`ConfigCache`] keeps the parsed document for a bounded
//! time so warm invocations skip the remote read.

use crate::aws::http::is_not_found;
use crate::error::LightsOutError;
use crate::provider::ParameterStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Schema versions this build understands
const SUPPORTED_VERSIONS: &[&str] = &["1.0"];

/// How long a loaded configuration stays fresh
pub const DEFAULT_CONFIG_TTL: Duration = Duration::from_secs(5 * 60);

fn default_version() -> String {
    "1.0".to_string()
}

fn default_true() -> bool {
    true
}

fn default_stable_timeout() -> u64 {
    300
}

fn default_wait_after_command() -> u64 {
    60
}

/// How a stop computes its target count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StopBehavior {
    #[default]
    ScaleToZero,
    /// Lower the current count by `count`, floored at zero
    ReduceByCount { count: u32 },
    /// Set the count to exactly `count`
    ReduceToCount { count: u32 },
}

/// Start target. Capacity bounds select Auto-Scaling mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartSpec {
    pub desired_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_capacity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_capacity: Option<u32>,
}

/// Stop target. Capacity bounds select Auto-Scaling mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StopSpec {
    #[serde(default)]
    pub desired_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_capacity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_capacity: Option<u32>,
    /// When absent, the stop sets the count to `desired_count`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior: Option<StopBehavior>,
}

/// Per-kind action configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionConfig {
    #[serde(default = "default_true")]
    pub wait_for_stable: bool,
    #[serde(default = "default_stable_timeout")]
    pub stable_timeout_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<StartSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopSpec>,
    /// Seconds a fire-and-forget handler waits before confirming the transition began
    #[serde(default = "default_wait_after_command")]
    pub wait_after_command: u64,
    #[serde(default = "default_true")]
    pub skip_snapshot: bool,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            wait_for_stable: true,
            stable_timeout_seconds: default_stable_timeout(),
            start: None,
            stop: None,
            wait_after_command: default_wait_after_command(),
            skip_snapshot: true,
        }
    }
}

/// Tag filter handed to discovery
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DiscoverySettings {
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub webhooks: Vec<String>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            webhooks: Vec::new(),
        }
    }
}

/// Root of the configuration document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightsOutConfig {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub discovery: DiscoverySettings,
    /// Keyed by resource kind
    #[serde(default)]
    pub resource_defaults: HashMap<String, ActionConfig>,
    #[serde(default)]
    pub notifications: NotificationSettings,
}

impl Default for LightsOutConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            environment: None,
            region: None,
            discovery: DiscoverySettings::default(),
            resource_defaults: HashMap::new(),
            notifications: NotificationSettings::default(),
        }
    }
}

/// Configuration loading failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Could not find SSM parameter: {0}")]
    ParameterNotFound(String),

    #[error("Failed to retrieve SSM parameter {name}: {message}")]
    Retrieval { name: String, message: String },

    #[error("Failed to read configuration file {path}: {message}")]
    Io { path: String, message: String },

    #[error("Failed to parse YAML configuration from {source_name}: {message}")]
    Parse { source_name: String, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigLoadError> for LightsOutError {
    fn from(err: ConfigLoadError) -> Self {
        LightsOutError::Config(err.to_string())
    }
}

impl LightsOutConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml(content: &str, source_name: &str) -> Result<Self, ConfigLoadError> {
        let config: Self =
            serde_yaml::from_str(content).map_err(|e| ConfigLoadError::Parse {
                source_name: source_name.to_string(),
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Structural validation independent of which kinds a batch contains
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if !SUPPORTED_VERSIONS.contains(&self.version.as_str()) {
            return Err(ConfigLoadError::Invalid(format!(
                "unsupported version '{}' (supported: {})",
                self.version,
                SUPPORTED_VERSIONS.join(", ")
            )));
        }

        for (kind, action) in &self.resource_defaults {
            if action.wait_for_stable && action.stable_timeout_seconds == 0 {
                return Err(ConfigLoadError::Invalid(format!(
                    "{}: stable_timeout_seconds must be positive when wait_for_stable is set",
                    kind
                )));
            }
            if let Some(StopBehavior::ReduceByCount { count: 0 }) =
                action.stop.as_ref().and_then(|s| s.behavior)
            {
                return Err(ConfigLoadError::Invalid(format!(
                    "{}: reduce_by_count requires a positive count",
                    kind
                )));
            }
        }

        for url in &self.notifications.webhooks {
            url::Url::parse(url).map_err(|e| {
                ConfigLoadError::Invalid(format!("invalid webhook URL '{}': {}", url, e))
            })?;
        }

        Ok(())
    }

    /// Action configuration for a resource kind
    pub fn action_config(&self, kind: &str) -> Option<&ActionConfig> {
        self.resource_defaults.get(kind)
    }
}

/// Default config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("lights-out").join("config.yaml"))
}

/// Load configuration from a local YAML file
pub fn load_from_file(path: &Path) -> Result<LightsOutConfig, ConfigLoadError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigLoadError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    LightsOutConfig::from_yaml(&content, &path.display().to_string())
}

/// Load configuration from an SSM parameter holding YAML
pub async fn load_from_parameter_store(
    store: &dyn ParameterStore,
    name: &str,
) -> Result<LightsOutConfig, ConfigLoadError> {
    let content = store.get_parameter(name).await.map_err(|e| {
        if is_not_found(&e) {
            ConfigLoadError::ParameterNotFound(name.to_string())
        } else {
            ConfigLoadError::Retrieval {
                name: name.to_string(),
                message: format!("{:#}", e),
            }
        }
    })?;

    LightsOutConfig::from_yaml(&content, &format!("parameter {}", name))
}

// =============================================================================
// TTL cache
// =============================================================================

/// Time source for cache expiry
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct CachedConfig {
    source: String,
    config: Arc<LightsOutConfig>,
    expires_at: Instant,
}

/// TTL-bounded configuration cache.
///
/// Read-only during a batch; a stale entry is replaced by the next
/// `get_or_load` call.
pub struct ConfigCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entry: RwLock<Option<CachedConfig>>,
}

impl ConfigCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entry: RwLock::new(None),
        }
    }

    pub fn with_system_clock(ttl: Duration) -> Self {
        Self::new(ttl, Arc::new(SystemClock))
    }

    /// Return the cached config for `source`, or load it when missing or expired
    pub async fn get_or_load<F, Fut>(
        &self,
        source: &str,
        load: F,
    ) -> Result<Arc<LightsOutConfig>, ConfigLoadError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<LightsOutConfig, ConfigLoadError>>,
    {
        {
            let cache = self.entry.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.source == source && self.clock.now() < cached.expires_at {
                    return Ok(Arc::clone(&cached.config));
                }
                tracing::debug!("Cached configuration expired, reloading from {}", source);
            }
        }

        let config = Arc::new(load().await?);

        {
            let mut cache = self.entry.write().await;
            *cache = Some(CachedConfig {
                source: source.to_string(),
                config: Arc::clone(&config),
                expires_at: self.clock.now() + self.ttl,
            });
        }

        tracing::debug!(
            "Configuration cached for {}s from {}",
            self.ttl.as_secs(),
            source
        );
        Ok(config)
    }

    /// Drop the cached entry
    pub async fn invalidate(&self) {
        *self.entry.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::http::AwsApiError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const VALID_CONFIG_YAML: &str = r#"
version: "1.0"
environment: dev
region: us-east-1
discovery:
  tags:
    lights-out:managed: "true"
    lights-out:env: dev
resource_defaults:
  ecs-service:
    wait_for_stable: true
    stable_timeout_seconds: 300
    start:
      desired_count: 2
      min_capacity: 1
      max_capacity: 4
    stop:
      behavior:
        mode: reduce_by_count
        count: 1
  rds-db:
    wait_after_command: 30
    skip_snapshot: false
"#;

    struct StaticStore(Result<String, AwsApiError>);

    #[async_trait]
    impl ParameterStore for StaticStore {
        async fn get_parameter(&self, _name: &str) -> anyhow::Result<String> {
            self.0.clone().map_err(Into::into)
        }
    }

    #[test]
    fn test_parse_valid_config() {
        let config = LightsOutConfig::from_yaml(VALID_CONFIG_YAML, "test").unwrap();
        assert_eq!(config.environment.as_deref(), Some("dev"));

        let ecs = config.action_config("ecs-service").unwrap();
        assert_eq!(ecs.start.as_ref().unwrap().max_capacity, Some(4));
        assert_eq!(
            ecs.stop.as_ref().unwrap().behavior,
            Some(StopBehavior::ReduceByCount { count: 1 })
        );

        let rds = config.action_config("rds-db").unwrap();
        assert_eq!(rds.wait_after_command, 30);
        assert!(!rds.skip_snapshot);
        assert!(rds.wait_for_stable);
    }

    #[test]
    fn test_defaults_applied() {
        let config = LightsOutConfig::from_yaml("resource_defaults:\n  rds-db: {}\n", "test")
            .unwrap();
        let rds = config.action_config("rds-db").unwrap();
        assert_eq!(rds.wait_after_command, 60);
        assert!(rds.skip_snapshot);
        assert_eq!(config.version, "1.0");
        assert!(config.notifications.enabled);
    }

    #[test]
    fn test_invalid_yaml_reports_source() {
        let err = LightsOutConfig::from_yaml("resource_defaults: [ecs, rds", "parameter /x")
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("Failed to parse YAML configuration from parameter /x"));
    }

    #[test]
    fn test_rejects_unsupported_version() {
        let err = LightsOutConfig::from_yaml("version: \"9.9\"\n", "test").unwrap_err();
        assert!(matches!(err, ConfigLoadError::Invalid(_)));
    }

    #[test]
    fn test_rejects_zero_reduce_count() {
        let yaml = "resource_defaults:\n  ecs-service:\n    stop:\n      behavior:\n        mode: reduce_by_count\n        count: 0\n";
        assert!(LightsOutConfig::from_yaml(yaml, "test").is_err());
    }

    #[tokio::test]
    async fn test_load_from_parameter_store_success() {
        let store = StaticStore(Ok(VALID_CONFIG_YAML.to_string()));
        let config = load_from_parameter_store(&store, "/test/app/config")
            .await
            .unwrap();
        assert!(config.action_config("ecs-service").is_some());
    }

    #[tokio::test]
    async fn test_load_from_parameter_store_not_found() {
        let store = StaticStore(Err(AwsApiError {
            status: 400,
            code: "ParameterNotFound".to_string(),
            message: String::new(),
        }));
        let err = load_from_parameter_store(&store, "non-existent-parameter")
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigLoadError::ParameterNotFound(_)));
        assert!(err.to_string().contains("Could not find SSM parameter"));
    }

    #[tokio::test]
    async fn test_load_from_parameter_store_invalid_yaml() {
        let store = StaticStore(Ok("services: [ecs, rds".to_string()));
        let err = load_from_parameter_store(&store, "/test/app/config")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to parse YAML configuration"));
    }

    #[tokio::test]
    async fn test_cache_reloads_after_ttl() {
        let clock = Arc::new(ManualClock::new());
        let cache = ConfigCache::new(Duration::from_secs(60), clock.clone());
        let counter = AtomicUsize::new(0);
        let loads = &counter;

        let load = move || async move {
            loads.fetch_add(1, Ordering::SeqCst);
            LightsOutConfig::from_yaml(VALID_CONFIG_YAML, "test")
        };

        cache.get_or_load("/p", load).await.unwrap();
        cache.get_or_load("/p", load).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(61));
        cache.get_or_load("/p", load).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cache_keyed_by_source() {
        let cache = ConfigCache::new(Duration::from_secs(60), Arc::new(ManualClock::new()));
        let counter = AtomicUsize::new(0);
        let loads = &counter;
        let load = move || async move {
            loads.fetch_add(1, Ordering::SeqCst);
            LightsOutConfig::from_yaml(VALID_CONFIG_YAML, "test")
        };

        cache.get_or_load("/a", load).await.unwrap();
        cache.get_or_load("/b", load).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);

        cache.invalidate().await;
        cache.get_or_load("/b", load).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 3);
    }
}
