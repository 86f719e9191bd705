//! # Metadata Change-Propagation Engine
//!
//! Ingests metadata entities, persists them, records which downstream sinks
//! each entity impacts, and fans change events out to those sinks.
//!
//! Backends sit behind object-safe traits so the same pipeline runs against
//! Postgres/Redis in production and against the in-memory collaborators in
//! tests. Backend adapters are gated per folder:
//!
//! - `postgres`: `store::postgres`, `graph::postgres`
//! - `redis`: `cache::redis`, `broker::redis_streams`

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod broker;
pub mod cache;
pub mod core;
pub mod error;
pub mod graph;
pub mod model;
pub mod store;

// Re-export the types callers touch on every request.
pub use crate::core::{DispatchReport, IngestPipeline, LiveChannelRegistry, NotificationDispatcher};
pub use error::{PropagationError, Result};
pub use model::{ChangeEvent, DownstreamNode, IngestReceipt, MetadataEntity, Sink};
