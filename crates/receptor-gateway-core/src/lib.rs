//! Core abstractions for the receptor gateway control plane.
//!
//! This crate provides the fundamental building blocks:
//! - `Message` / `Job` - Correlated work items pushed to an agent
//! - `Payload` - Opaque, schema-tagged data carried by jobs and metadata
//! - `GatewayError` - Error taxonomy shared by every layer
//! - `Receptor` and `ConnectionLocator` traits
//! - `GatewayConfig` - Queue bounds, deadlines and listener settings

pub mod config;
pub mod error;
pub mod ids;
pub mod message;
pub mod traits;

pub use config::{ConfigError, GatewayConfig, QueueConfig, ServerConfig, TimeoutConfig};
pub use error::GatewayError;
pub use ids::{IdSource, OsRandomIds};
pub use message::{
    ControlMessage, Job, JobResponse, Message, MessageId, Payload, ResponseCode, RoutingFacts,
};
pub use traits::{ConnectionLocator, Receptor};
