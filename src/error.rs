//! Error taxonomy
//!
//! Resource-scoped errors are recovered into a [`HandlerResult`] by the
//! orchestrator. Batch-scoped errors stop remaining work but never discard
//! results that were already obtained.
//!
//! [`HandlerResult`]: crate::resource::HandlerResult

use thiserror::Error;

/// Maximum length of an error message carried into results and notifications
const MAX_MESSAGE_LENGTH: usize = 300;

#[derive(Debug, Error)]
pub enum LightsOutError {
    /// Underlying provider API call failed
    #[error("provider error for {resource_id}: {message}")]
    Provider {
        resource_id: String,
        message: String,
    },

    /// Resource vanished between discovery and execution
    #[error("resource not found: {resource_id}")]
    NotFound { resource_id: String },

    /// Stability wait exceeded its budget
    #[error("{resource_id} did not stabilize within {timeout_seconds}s")]
    Timeout {
        resource_id: String,
        timeout_seconds: u64,
    },

    /// Missing or invalid configuration for a kind present in the batch
    #[error("configuration error: {0}")]
    Config(String),

    /// Overall time budget exhausted mid-batch
    #[error("time budget exhausted: {completed} resource(s) processed, {remaining} left untouched")]
    Truncated { completed: usize, remaining: usize },
}

pub type Result<T> = std::result::Result<T, LightsOutError>;

impl LightsOutError {
    /// Wrap a provider failure, classifying not-found responses
    pub fn provider(resource_id: &str, error: anyhow::Error) -> Self {
        if crate::aws::http::is_not_found(&error) {
            return Self::NotFound {
                resource_id: resource_id.to_string(),
            };
        }
        Self::Provider {
            resource_id: resource_id.to_string(),
            message: crate::aws::http::format_aws_error(&error),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this error aborts the remaining batch
    pub fn is_batch_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Truncated { .. })
    }

    /// Short message suitable for results and notifications
    pub fn short_message(&self) -> String {
        let message = self.to_string();
        if message.len() > MAX_MESSAGE_LENGTH {
            let mut end = MAX_MESSAGE_LENGTH;
            while !message.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &message[..end])
        } else {
            message
        }
    }
}
