//! lights-out
//!
//! Moves a tagged fleet of cloud resources between running and stopped
//! states in dependency order, tolerating partial failure.
//!
//! # Modules
//!
//! - [`orchestrator`] - Priority-ordered batch execution and aggregation
//! - [`resource`] - Handler contract, policy resolver, waiter, built-in kinds
//! - [`discovery`] - Tagged resource records to descriptors
//! - [`config`] - YAML configuration, loaders and the TTL cache
//! - [`notification`] - Outbound per-resource notifications
//! - [`provider`] - Capability traits the handlers depend on
//! - [`aws`] - SigV4-signed AWS implementation of those traits

pub mod aws;
pub mod config;
pub mod discovery;
pub mod error;
pub mod notification;
pub mod orchestrator;
pub mod provider;
pub mod resource;
pub mod trigger;

pub use error::{LightsOutError, Result};
pub use orchestrator::{BatchRequest, BatchResult, Orchestrator};
