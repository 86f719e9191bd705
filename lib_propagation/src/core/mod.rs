//! # Core Engine Module
//!
//! The request-scoped propagation engine. It composes the collaborators from
//! `store`, `graph`, `cache` and `broker` into one ingestion workflow.
//!
//! ## Core Components:
//!
//! - **`registry`**: Tracks the live push connections of this process and
//!   broadcasts change events to them. Every connection owns its own channel,
//!   so a dead connection is pruned without affecting the others.
//!
//! - **`dispatcher`**: Fans one change event out to every impacted sink,
//!   choosing the delivery path per sink type (queue publish vs. live broadcast).
//!
//! - **`pipeline`**: The ingestion orchestrator. Upsert, materialize on first
//!   sight, cache, query the graph, dispatch, in that order and nothing in parallel.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Concurrency-safe registry of live push connections.
pub mod registry;
/// Per-sink-type delivery of change events.
pub mod dispatcher;
/// The ingestion state machine.
pub mod pipeline;

// --- Public API Re-exports ---
pub use dispatcher::{DispatchReport, NotificationDispatcher};
pub use pipeline::{IngestPipeline, IngestStage};
pub use registry::{ConnectionId, LiveChannelRegistry};
