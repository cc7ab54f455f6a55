//! AWS API interaction module
//!
//! Provides the concrete provider behind the handler capability traits:
//! request signing, the HTTP transport, and regional clients for ECS,
//! Application Auto Scaling, RDS and SSM Parameter Store.
//!
//! # Module Structure
//!
//! - [`arn`] - Amazon Resource Name parsing
//! - [`auth`] - Credential chain, caching and SigV4 signing
//! - [`client`] - Regional client and the provider factory
//! - [`http`] - HTTP utilities for JSON 1.1 and Query protocol calls
//!
//! # Example
//!
//! ```ignore
//! use lights_out::aws::client::AwsProvider;
//! use lights_out::provider::CloudProvider;
//!
//! async fn example() -> anyhow::Result<()> {
//!     let provider = AwsProvider::from_env(None).await?;
//!     let ecs = provider.container_service("eu-west-1");
//!     let svc = ecs.describe_service("dev-cluster", "api").await?;
//!     Ok(())
//! }
//! ```

pub mod arn;
pub mod auth;
pub mod client;
pub mod http;
