//! Refresh runs.
//!
//! - [`model`] - Run, batch and trigger types
//! - [`registry`] - In-process run registry with coalescing and cancellation
//! - [`orchestrator`] - Mode resolution, batching, persistence and recompute
//! - [`recompute`] - Downstream recompute hook

pub mod model;
pub mod orchestrator;
pub mod recompute;
pub mod registry;


pub use model::{
    BatchResult, BatchStatus, RefreshMode, RefreshRun, RunError, RunStatus, RunTotals,
    StartRefreshRequest, StartRefreshResponse,
};
pub use orchestrator::{RefreshConfig, RefreshOrchestrator};
pub use recompute::{LogRecompute, RecomputeTrigger};
pub use registry::RunRegistry;
