//! Resource Handler contract
//!
//! Every resource kind implements [`ResourceHandler`]. Handlers report
//! outcomes as [`HandlerResult`] values; the orchestrator converts any
//! `Err` into a failed result for that resource only.

use super::descriptor::ResourceDescriptor;
use crate::error::{LightsOutError, Result};
use crate::provider::{DbInstanceDescription, ServiceDescription};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Lifecycle action applied to a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Start,
    Stop,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }

    pub fn past_tense(&self) -> &'static str {
        match self {
            Self::Start => "Started",
            Self::Stop => "Stopped",
        }
    }

    pub fn present_participle(&self) -> &'static str {
        match self {
            Self::Start => "Starting",
            Self::Stop => "Stopping",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            other => Err(format!("unknown action: {}", other)),
        }
    }
}

/// Whether the handler observed the final state or only its beginning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompletionKind {
    #[default]
    Converged,
    Initiated,
}

/// Kind-specific status snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceStatus {
    Service(ServiceDescription),
    Database(DbInstanceDescription),
}

/// Database statuses with no transition in flight
const DATABASE_SETTLED_STATUSES: &[&str] = &["available", "stopped"];

impl ResourceStatus {
    /// Provider-confirmed convergence
    pub fn is_stable(&self) -> bool {
        match self {
            Self::Service(svc) => svc.desired_count == svc.running_count,
            Self::Database(db) => DATABASE_SETTLED_STATUSES.contains(&db.status.as_str()),
        }
    }

    pub fn summary(&self) -> String {
        match self {
            Self::Service(svc) => format!(
                "desired={} running={} pending={}",
                svc.desired_count, svc.running_count, svc.pending_count
            ),
            Self::Database(db) => format!("status={}", db.status),
        }
    }

    fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Classification used for batch summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded,
    Skipped,
    Failed,
    NotAttempted,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::NotAttempted => "not_attempted",
        }
    }
}

/// Outcome of one (resource, action) invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerResult {
    pub success: bool,
    pub action: Action,
    pub resource_kind: String,
    pub resource_id: String,
    pub message: String,
    /// Snapshot taken before any mutation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completion_kind: CompletionKind,
    /// Resource was already at (or moving toward) its target; nothing was mutated
    #[serde(default)]
    pub no_op: bool,
    #[serde(default)]
    pub dry_run: bool,
    /// False when the batch ended before this resource was processed
    #[serde(default = "default_attempted")]
    pub attempted: bool,
}

fn default_attempted() -> bool {
    true
}

impl HandlerResult {
    /// Successful, converged outcome
    pub fn success(descriptor: &ResourceDescriptor, action: Action, message: impl Into<String>) -> Self {
        Self {
            success: true,
            action,
            resource_kind: descriptor.resource_kind.clone(),
            resource_id: descriptor.resource_id.clone(),
            message: message.into(),
            previous_state: None,
            error: None,
            completion_kind: CompletionKind::Converged,
            no_op: false,
            dry_run: false,
            attempted: true,
        }
    }

    /// Failed outcome carrying the error
    pub fn failure(descriptor: &ResourceDescriptor, action: Action, error: &LightsOutError) -> Self {
        Self {
            success: false,
            message: format!("Failed to {} {}", action, descriptor.resource_id),
            error: Some(error.short_message()),
            ..Self::success(descriptor, action, "")
        }
    }

    /// Resource skipped because the batch ran out of time
    pub fn not_attempted(descriptor: &ResourceDescriptor, action: Action, reason: &str) -> Self {
        Self {
            success: false,
            message: reason.to_string(),
            attempted: false,
            ..Self::success(descriptor, action, "")
        }
    }

    /// Batch ended after a state-changing request went out; the change may still land
    pub fn interrupted(descriptor: &ResourceDescriptor, action: Action, reason: &str) -> Self {
        Self {
            success: false,
            message: reason.to_string(),
            error: Some(reason.to_string()),
            completion_kind: CompletionKind::Initiated,
            ..Self::success(descriptor, action, "")
        }
    }

    pub fn initiated(mut self) -> Self {
        self.completion_kind = CompletionKind::Initiated;
        self
    }

    pub fn as_no_op(mut self) -> Self {
        self.no_op = true;
        self
    }

    pub fn as_dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn with_previous_state(mut self, status: &ResourceStatus) -> Self {
        self.previous_state = Some(status.to_value());
        self
    }

    pub fn status(&self) -> OutcomeStatus {
        if !self.attempted {
            OutcomeStatus::NotAttempted
        } else if !self.success {
            OutcomeStatus::Failed
        } else if self.no_op || self.dry_run {
            OutcomeStatus::Skipped
        } else {
            OutcomeStatus::Succeeded
        }
    }
}

/// Set once a handler sends a state-changing request, never cleared
#[derive(Debug, Default)]
pub struct MutationMarker(AtomicBool);

impl MutationMarker {
    pub fn mark(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_marked(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Uniform lifecycle contract over every resource kind
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    fn descriptor(&self) -> &ResourceDescriptor;

    /// Whether a state-changing request has been sent for this resource
    fn mutation_requested(&self) -> bool;

    /// Current provider state, normalized
    async fn query_status(&self) -> Result<ResourceStatus>;

    async fn start(&self) -> Result<HandlerResult>;

    async fn stop(&self) -> Result<HandlerResult>;

    /// Whether the resource has no transition in flight
    async fn is_ready(&self) -> Result<bool> {
        Ok(self.query_status().await?.is_stable())
    }

    /// Compute what `action` would do without mutating anything
    async fn preview(&self, action: Action) -> Result<HandlerResult>;
}
