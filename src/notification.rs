//! Notification System
//!
//! One event per resource outcome, fanned out to every configured
//! [`Notifier`]. Delivery failures are logged by the caller and never change
//! the batch outcome.

use crate::resource::{CompletionKind, HandlerResult};
use crate::trigger::TriggerSource;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

/// Level of detail for notification headlines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetailLevel {
    /// Minimal: icon + verb + resource
    Minimal,
    /// Detailed: adds duration
    #[default]
    Detailed,
    /// Verbose: adds kind and error details
    Verbose,
}

impl DetailLevel {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "minimal" => Self::Minimal,
            "verbose" => Self::Verbose,
            _ => Self::Detailed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Detailed => "detailed",
            Self::Verbose => "verbose",
        }
    }
}

/// A single resource outcome ready for delivery
#[derive(Debug, Clone, Serialize)]
pub struct NotificationEvent {
    pub id: Uuid,
    pub run_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    pub trigger: TriggerSource,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub result: HandlerResult,
}

impl NotificationEvent {
    pub fn new(
        run_id: Uuid,
        environment: Option<String>,
        trigger: TriggerSource,
        result: HandlerResult,
        duration: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            environment,
            trigger,
            timestamp: Utc::now(),
            duration_ms: duration.as_millis().min(u64::MAX as u128) as u64,
            result,
        }
    }

    pub fn icon(&self) -> &'static str {
        let r = &self.result;
        if !r.success {
            "✗"
        } else if r.completion_kind == CompletionKind::Initiated {
            "↻"
        } else {
            "✓"
        }
    }

    /// Format duration for display
    pub fn duration_display(&self) -> String {
        let d = Duration::from_millis(self.duration_ms);
        if d.as_secs() < 1 {
            format!("{}ms", d.as_millis())
        } else if d.as_secs() < 60 {
            format!("{}s", d.as_secs())
        } else {
            format!("{}m{}s", d.as_secs() / 60, d.as_secs() % 60)
        }
    }

    /// Headline text; converged and initiated outcomes read differently
    pub fn headline(&self, detail_level: DetailLevel) -> String {
        let r = &self.result;
        let icon = self.icon();
        let (verb, suffix) = if !r.attempted {
            ("Skipped", " (not attempted)")
        } else if !r.success {
            ("Failed to", "")
        } else if r.dry_run {
            ("Would", "")
        } else if r.completion_kind == CompletionKind::Initiated {
            (r.action.present_participle(), " (in progress)")
        } else {
            (r.action.past_tense(), "")
        };
        let subject = if r.dry_run || (!r.success && r.attempted) {
            format!("{} {}", r.action, r.resource_id)
        } else {
            r.resource_id.clone()
        };

        match detail_level {
            DetailLevel::Minimal => format!("{} {} {}{}", icon, verb, subject, suffix),
            DetailLevel::Detailed => format!(
                "{} {} {}{} ({})",
                icon,
                verb,
                subject,
                suffix,
                self.duration_display()
            ),
            DetailLevel::Verbose => {
                let base = format!("{} {} {}{} [{}]", icon, verb, subject, suffix, r.resource_kind);
                match &r.error {
                    Some(err) => format!("{} - {}", base, err),
                    None => format!("{} ({}) - {}", base, self.duration_display(), r.message),
                }
            }
        }
    }
}

/// Outbound notification channel
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, event: &NotificationEvent) -> Result<()>;
}

/// Writes every event through `tracing`
#[derive(Debug, Default)]
pub struct LogNotifier {
    pub detail_level: DetailLevel,
}

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, event: &NotificationEvent) -> Result<()> {
        let headline = event.headline(self.detail_level);
        if event.result.success {
            tracing::info!(
                run_id = %event.run_id,
                resource_id = %event.result.resource_id,
                kind = %event.result.resource_kind,
                "{}",
                headline
            );
        } else {
            tracing::warn!(
                run_id = %event.run_id,
                resource_id = %event.result.resource_id,
                kind = %event.result.resource_kind,
                "{}",
                headline
            );
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    text: String,
    event: &'a NotificationEvent,
}

/// Posts each event as JSON to an HTTP endpoint
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    detail_level: DetailLevel,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self> {
        let parsed = url::Url::parse(url).with_context(|| format!("Invalid webhook URL: {}", url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("Webhook URL must be http(s): {}", url);
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!("lights-out/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            url: url.to_string(),
            detail_level: DetailLevel::Verbose,
        })
    }

    pub fn with_detail_level(mut self, detail_level: DetailLevel) -> Self {
        self.detail_level = detail_level;
        self
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, event: &NotificationEvent) -> Result<()> {
        let payload = WebhookPayload {
            text: event.headline(self.detail_level),
            event,
        };
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .context("Failed to send webhook notification")?;

        let status = response.status();
        if !status.is_success() {
            // Don't echo the receiver's body, it may contain tokens
            anyhow::bail!("Webhook returned HTTP {}", status.as_u16());
        }
        Ok(())
    }
}

/// Keeps recent events in memory (most recent first)
pub struct NotificationHistory {
    events: Mutex<VecDeque<NotificationEvent>>,
    max_history: usize,
}

impl Default for NotificationHistory {
    fn default() -> Self {
        Self::new(50)
    }
}

impl NotificationHistory {
    pub fn new(max_history: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            max_history,
        }
    }

    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events
            .lock()
            .map(|events| events.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Notifier for NotificationHistory {
    fn name(&self) -> &str {
        "history"
    }

    async fn notify(&self, event: &NotificationEvent) -> Result<()> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| anyhow::anyhow!("notification history lock poisoned"))?;
        events.push_front(event.clone());
        events.truncate(self.max_history);
        Ok(())
    }
}
