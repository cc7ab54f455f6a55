//! Orchestrator
//!
//! Runs one stateless batch: validate configuration, build handlers, walk
//! priority groups in order (start ascending, stop descending), run each
//! group concurrently, and aggregate one result per input resource.
//!
//! A handler error or panic only fails its own resource. Configuration
//! errors abort the batch before anything is mutated. When the time budget
//! runs out, unfinished resources are reported as not attempted and the
//! batch is flagged as truncated.

use crate::config::{ActionConfig, ConfigCache, ConfigLoadError, LightsOutConfig};
use crate::error::{LightsOutError, Result};
use crate::notification::{NotificationEvent, Notifier};
use crate::resource::{
    Action, CompletionKind, HandlerRegistry, HandlerResult, OutcomeStatus, ResourceDescriptor,
    ResourceHandler, ResourceStatus,
};
use crate::trigger::TriggerSource;
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

const TRUNCATED_MESSAGE: &str = "Not attempted: time budget exhausted";
const INTERRUPTED_MESSAGE: &str =
    "Interrupted by time budget after the change was requested; final state unknown";

/// Input of one batch
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub resources: Vec<ResourceDescriptor>,
    pub action: Action,
    pub dry_run: bool,
    pub trigger: TriggerSource,
    /// Overrides the environment named in the configuration
    pub environment: Option<String>,
}

impl BatchRequest {
    pub fn new(resources: Vec<ResourceDescriptor>, action: Action, trigger: TriggerSource) -> Self {
        Self {
            resources,
            action,
            dry_run: false,
            trigger,
            environment: None,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub not_attempted: usize,
}

impl BatchSummary {
    fn from_results(results: &[HandlerResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };
        for result in results {
            match result.status() {
                OutcomeStatus::Succeeded => summary.succeeded += 1,
                OutcomeStatus::Failed => summary.failed += 1,
                OutcomeStatus::Skipped => summary.skipped += 1,
                OutcomeStatus::NotAttempted => summary.not_attempted += 1,
            }
        }
        summary
    }
}

/// Aggregated outcome of one batch, in input order
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub run_id: Uuid,
    pub action: Action,
    pub dry_run: bool,
    pub environment: Option<String>,
    pub trigger: TriggerSource,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub truncated: bool,
    pub summary: BatchSummary,
    pub per_resource: Vec<HandlerResult>,
}

impl BatchResult {
    /// No failures and nothing left behind
    pub fn success(&self) -> bool {
        self.summary.failed == 0 && !self.truncated
    }

    pub fn truncation_error(&self) -> Option<LightsOutError> {
        self.truncated.then(|| LightsOutError::Truncated {
            completed: self.summary.total - self.summary.not_attempted,
            remaining: self.summary.not_attempted,
        })
    }

    /// Response handed back to the caller
    pub fn to_report(&self) -> CallerReport {
        CallerReport {
            success: self.success(),
            action: self.action,
            dry_run: self.dry_run,
            timestamp: self.finished_at,
            environment: self.environment.clone(),
            run_id: self.run_id,
            trigger: self.trigger.clone(),
            truncated: self.truncated,
            summary: self.summary,
            resources: self
                .per_resource
                .iter()
                .map(|r| ResourceReport {
                    resource_kind: r.resource_kind.clone(),
                    resource_id: r.resource_id.clone(),
                    status: r.status().as_str(),
                    message: r.message.clone(),
                    completion_kind: r.completion_kind,
                    error: r.error.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerReport {
    pub success: bool,
    pub action: Action,
    pub dry_run: bool,
    pub timestamp: DateTime<Utc>,
    pub environment: Option<String>,
    pub run_id: Uuid,
    pub trigger: TriggerSource,
    pub truncated: bool,
    #[serde(serialize_with = "serialize_summary")]
    pub summary: BatchSummary,
    pub resources: Vec<ResourceReport>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceReport {
    pub resource_kind: String,
    pub resource_id: String,
    pub status: &'static str,
    pub message: String,
    pub completion_kind: CompletionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn serialize_summary<S: serde::Serializer>(
    summary: &BatchSummary,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    use serde::ser::SerializeStruct;
    let mut s = serializer.serialize_struct("Summary", 5)?;
    s.serialize_field("total", &summary.total)?;
    s.serialize_field("succeeded", &summary.succeeded)?;
    s.serialize_field("failed", &summary.failed)?;
    s.serialize_field("skipped", &summary.skipped)?;
    s.serialize_field("notAttempted", &summary.not_attempted)?;
    s.end()
}

/// Read-only status of one resource
#[derive(Debug, Clone, Serialize)]
pub struct StatusEntry {
    pub resource_kind: String,
    pub resource_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ResourceStatus>,
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct Orchestrator {
    registry: Arc<HandlerRegistry>,
    notifiers: Vec<Arc<dyn Notifier>>,
    time_budget: Option<Duration>,
}

impl Orchestrator {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            notifiers: Vec::new(),
            time_budget: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Overall wall-clock budget for a batch
    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    /// Check the request and configuration before anything is mutated
    pub fn preflight(&self, request: &BatchRequest, config: &LightsOutConfig) -> Result<()> {
        let mut seen = HashSet::new();
        for desc in &request.resources {
            if !seen.insert(desc.key()) {
                return Err(LightsOutError::config(format!(
                    "duplicate resource {} ({})",
                    desc.resource_id, desc.resource_kind
                )));
            }
        }

        config.validate()?;

        let kinds: BTreeSet<&str> = request
            .resources
            .iter()
            .map(|d| d.resource_kind.as_str())
            .filter(|kind| self.registry.contains(kind))
            .collect();
        for kind in kinds {
            let action_config = config.action_config(kind).ok_or_else(|| {
                LightsOutError::config(format!("no configuration for resource kind '{}'", kind))
            })?;
            self.registry.validate(kind, action_config)?;
        }
        Ok(())
    }

    pub async fn run(&self, request: BatchRequest, config: &LightsOutConfig) -> Result<BatchResult> {
        self.preflight(&request, config)?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        // A budget too large to represent is no deadline at all
        let deadline = self
            .time_budget
            .and_then(|budget| Instant::now().checked_add(budget));
        let environment = request.environment.clone().or_else(|| config.environment.clone());
        let action = request.action;

        tracing::info!(
            run_id = %run_id,
            action = %action,
            dry_run = request.dry_run,
            trigger = %request.trigger,
            "Starting batch of {} resource(s)",
            request.resources.len()
        );

        let ctx = RunContext {
            run_id,
            environment: environment.clone(),
            trigger: request.trigger.clone(),
        };

        let mut results: Vec<Option<HandlerResult>> = vec![None; request.resources.len()];
        let mut handlers: Vec<Option<Box<dyn ResourceHandler>>> = Vec::new();
        for (idx, desc) in request.resources.iter().enumerate() {
            match self.build_handler(desc, config) {
                Ok(handler) => handlers.push(Some(handler)),
                Err(e) => {
                    tracing::warn!(resource_id = %desc.resource_id, kind = %desc.resource_kind, "{}", e);
                    let result = HandlerResult::failure(desc, action, &e);
                    self.notify(&ctx, &result, Duration::ZERO).await;
                    results[idx] = Some(result);
                    handlers.push(None);
                }
            }
        }

        let mut truncated = false;
        for (priority, group) in priority_groups(&request.resources, action) {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                truncated = true;
                break;
            }

            let runnable: Vec<usize> = group
                .into_iter()
                .filter(|idx| handlers[*idx].is_some())
                .collect();
            if runnable.is_empty() {
                continue;
            }
            tracing::debug!(priority, "Processing priority group of {}", runnable.len());

            let mut pending: FuturesUnordered<_> = runnable
                .iter()
                .filter_map(|&idx| {
                    handlers[idx]
                        .as_deref()
                        .map(|handler| execute(idx, handler, action, request.dry_run))
                })
                .collect();

            loop {
                let next = match deadline {
                    Some(deadline) => tokio::select! {
                        biased;
                        item = pending.next() => item,
                        _ = tokio::time::sleep_until(deadline) => {
                            truncated = true;
                            None
                        }
                    },
                    None => pending.next().await,
                };
                let Some((idx, result, elapsed)) = next else {
                    break;
                };
                self.notify(&ctx, &result, elapsed).await;
                results[idx] = Some(result);
            }

            // Dropping the set cancels anything still in flight
            drop(pending);
            if truncated {
                break;
            }
        }

        let mut per_resource = Vec::with_capacity(results.len());
        for ((desc, result), handler) in request.resources.iter().zip(results).zip(&handlers) {
            let result = match result {
                Some(result) => result,
                None => {
                    let mutated = handler.as_ref().is_some_and(|h| h.mutation_requested());
                    let result = if mutated {
                        tracing::warn!(resource_id = %desc.resource_id, "{}", INTERRUPTED_MESSAGE);
                        HandlerResult::interrupted(desc, action, INTERRUPTED_MESSAGE)
                    } else {
                        HandlerResult::not_attempted(desc, action, TRUNCATED_MESSAGE)
                    };
                    self.notify(&ctx, &result, Duration::ZERO).await;
                    result
                }
            };
            per_resource.push(result);
        }

        let summary = BatchSummary::from_results(&per_resource);
        let batch = BatchResult {
            run_id,
            action,
            dry_run: request.dry_run,
            environment,
            trigger: request.trigger,
            started_at,
            finished_at: Utc::now(),
            truncated,
            summary,
            per_resource,
        };

        if let Some(err) = batch.truncation_error() {
            tracing::warn!(run_id = %run_id, "{}", err);
        }
        tracing::info!(
            run_id = %run_id,
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            not_attempted = summary.not_attempted,
            "Batch {} finished",
            action
        );
        Ok(batch)
    }

    /// Run with configuration read through a long-lived cache.
    ///
    /// Callers that run many batches keep one [`ConfigCache`] and pass it
    /// here; the document is reloaded only once its TTL has passed.
    pub async fn run_cached<F, Fut>(
        &self,
        request: BatchRequest,
        cache: &ConfigCache,
        source: &str,
        load: F,
    ) -> Result<BatchResult>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<LightsOutConfig, ConfigLoadError>>,
    {
        let config = cache.get_or_load(source, load).await?;
        self.run(request, &config).await
    }

    /// Query every resource without mutating anything
    pub async fn status(
        &self,
        resources: &[ResourceDescriptor],
        config: &LightsOutConfig,
    ) -> Vec<StatusEntry> {
        let queries = resources.iter().map(|desc| async move {
            let entry = |status: Option<ResourceStatus>, error: Option<String>| StatusEntry {
                resource_kind: desc.resource_kind.clone(),
                resource_id: desc.resource_id.clone(),
                ready: status.as_ref().is_some_and(ResourceStatus::is_stable),
                status,
                error,
            };
            let handler = match self.build_handler(desc, config) {
                Ok(handler) => handler,
                Err(e) => return entry(None, Some(e.short_message())),
            };
            match handler.query_status().await {
                Ok(status) => entry(Some(status), None),
                Err(e) => entry(None, Some(e.short_message())),
            }
        });
        futures::future::join_all(queries).await
    }

    fn build_handler(
        &self,
        desc: &ResourceDescriptor,
        config: &LightsOutConfig,
    ) -> Result<Box<dyn ResourceHandler>> {
        let fallback = ActionConfig::default();
        let action_config = config.action_config(&desc.resource_kind).unwrap_or(&fallback);
        self.registry.create(desc, action_config)
    }

    async fn notify(&self, ctx: &RunContext, result: &HandlerResult, elapsed: Duration) {
        if self.notifiers.is_empty() {
            return;
        }
        let event = NotificationEvent::new(
            ctx.run_id,
            ctx.environment.clone(),
            ctx.trigger.clone(),
            result.clone(),
            elapsed,
        );
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(&event).await {
                tracing::warn!(
                    notifier = notifier.name(),
                    resource_id = %result.resource_id,
                    "Notification delivery failed: {:#}",
                    e
                );
            }
        }
    }
}

struct RunContext {
    run_id: Uuid,
    environment: Option<String>,
    trigger: TriggerSource,
}

/// Input indices grouped by priority, in execution order
fn priority_groups(resources: &[ResourceDescriptor], action: Action) -> Vec<(i32, Vec<usize>)> {
    let mut groups: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
    for (idx, desc) in resources.iter().enumerate() {
        groups.entry(desc.priority).or_default().push(idx);
    }
    let groups = groups.into_iter();
    match action {
        Action::Start => groups.collect(),
        Action::Stop => groups.rev().collect(),
    }
}

async fn execute(
    idx: usize,
    handler: &dyn ResourceHandler,
    action: Action,
    dry_run: bool,
) -> (usize, HandlerResult, Duration) {
    let started = Instant::now();
    let desc = handler.descriptor();

    let invocation = async {
        if dry_run {
            handler.preview(action).await
        } else {
            match action {
                Action::Start => handler.start().await,
                Action::Stop => handler.stop().await,
            }
        }
    };

    let result = match AssertUnwindSafe(invocation).catch_unwind().await {
        Ok(Ok(mut result)) => {
            result.dry_run |= dry_run;
            result
        }
        Ok(Err(e)) => {
            tracing::warn!(resource_id = %desc.resource_id, kind = %desc.resource_kind, "{}", e);
            HandlerResult::failure(desc, action, &e)
        }
        Err(panic) => {
            let err = LightsOutError::Provider {
                resource_id: desc.resource_id.clone(),
                message: format!("handler panicked: {}", panic_message(panic.as_ref())),
            };
            tracing::error!(resource_id = %desc.resource_id, kind = %desc.resource_kind, "{}", err);
            HandlerResult::failure(desc, action, &err)
        }
    };
    (idx, result, started.elapsed())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(id: &str, priority: i32) -> ResourceDescriptor {
        ResourceDescriptor::new("ecs-service", "", id).with_priority(priority)
    }

    #[test]
    fn test_priority_groups_order() {
        let resources = vec![desc("a", 50), desc("b", 10), desc("c", 50), desc("d", 90)];
        let start: Vec<i32> = priority_groups(&resources, Action::Start)
            .into_iter()
            .map(|(p, _)| p)
            .collect();
        assert_eq!(start, vec![10, 50, 90]);

        let stop = priority_groups(&resources, Action::Stop);
        assert_eq!(stop[0], (90, vec![3]));
        assert_eq!(stop[1], (50, vec![0, 2]));
        assert_eq!(stop[2], (10, vec![1]));
    }

    #[test]
    fn test_summary_counts() {
        let d = desc("a", 50);
        let err = LightsOutError::config("x");
        let results = vec![
            HandlerResult::success(&d, Action::Stop, "ok"),
            HandlerResult::success(&d, Action::Stop, "ok").as_no_op(),
            HandlerResult::failure(&d, Action::Stop, &err),
            HandlerResult::not_attempted(&d, Action::Stop, TRUNCATED_MESSAGE),
        ];
        assert_eq!(
            BatchSummary::from_results(&results),
            BatchSummary {
                total: 4,
                succeeded: 1,
                failed: 1,
                skipped: 1,
                not_attempted: 1
            }
        );
    }

    #[test]
    fn test_panic_message_extraction() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }

    #[test]
    fn test_report_shape() {
        let d = desc("api", 50);
        let per_resource = vec![HandlerResult::success(&d, Action::Stop, "Stopped api")];
        let batch = BatchResult {
            run_id: Uuid::nil(),
            action: Action::Stop,
            dry_run: false,
            environment: Some("dev".to_string()),
            trigger: TriggerSource::manual("ops"),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            truncated: false,
            summary: BatchSummary::from_results(&per_resource),
            per_resource,
        };
        let report = serde_json::to_value(batch.to_report()).unwrap();
        assert_eq!(report["success"], true);
        assert_eq!(report["dryRun"], false);
        assert_eq!(report["summary"]["succeeded"], 1);
        assert_eq!(report["summary"]["notAttempted"], 0);
        assert_eq!(report["resources"][0]["resourceKind"], "ecs-service");
        assert_eq!(report["resources"][0]["status"], "succeeded");
        assert_eq!(report["resources"][0]["completionKind"], "converged");
        assert!(batch.truncation_error().is_none());
    }
}
