//! Tote Master photo service.
//!
//! Stores tote photos in a pluggable object store, runs them through an
//! external detection service and consolidates the detected items across
//! photos. The HTTP surface lives in [`server`].

pub mod config;
pub mod consolidate;
pub mod detection;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod pipeline;
pub mod server;
pub mod storage;
pub mod totes;

use crate::config::Config;
use crate::pipeline::PhotoPipeline;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Photo operations, holding the object store, detector and tote repository.
    pub pipeline: PhotoPipeline,
}
