//! Resource abstraction layer
//!
//! Every managed resource kind sits behind one uniform lifecycle contract,
//! selected by the descriptor's `resource_kind` string.
//!
//! # Architecture
//!
//! - [`descriptor`] - Immutable per-resource value produced by discovery
//! - [`handler`] - The [`ResourceHandler`] contract and [`HandlerResult`]
//! - [`policy`] - Pure stop/start target resolution
//! - [`waiter`] - Bounded stability polling
//! - [`registry`] - Kind string to handler constructor table
//! - [`ecs_service`] / [`rds_instance`] - The built-in kinds
//!
//! # Example
//!
//! ```ignore
//! use lights_out::resource::{HandlerRegistry, ResourceDescriptor};
//!
//! let registry = HandlerRegistry::with_defaults(provider);
//! let handler = registry.create(&descriptor, &config)?;
//! let result = handler.stop().await?;
//! ```

pub mod descriptor;
pub mod ecs_service;
pub mod handler;
pub mod policy;
pub mod rds_instance;
pub mod registry;
pub mod waiter;

pub use descriptor::{ResourceDescriptor, DEFAULT_PRIORITY};
pub use handler::{
    Action, CompletionKind, HandlerResult, MutationMarker, OutcomeStatus, ResourceHandler,
    ResourceStatus,
};
pub use policy::{ScalingMode, TargetState};
pub use registry::HandlerRegistry;
pub use waiter::StabilityWaiter;
