//! Cueflow Ingest Service
//!
//! Reconciles externally-sourced rundown updates (NRCS/MOS-style feeds)
//! into a live, play-out-able document model while a broadcast may be
//! on-air reading and mutating derived PartInstances.
//!
//! Core pieces:
//! - `cache`: optimistic-diff persistence caches (unit-of-work pattern)
//! - `reconcile`: rank reconciliation and the segment structural diff
//! - `locks`: rundown/playlist scoped mutual exclusion
//! - `ingest`: the lock-and-commit pipeline and job handlers
//! - `playout`: the playout-side view (selected instances, next repair)

pub mod api;
pub mod cache;
pub mod db;
pub mod error;
pub mod ingest;
pub mod jobs;
pub mod locks;
pub mod model;
pub mod playout;
pub mod reconcile;

pub use error::{Error, Result};

use axum::Router;
use chrono::{DateTime, Utc};
use cueflow_common::events::CueflowEvent;
use tokio::sync::broadcast;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: db::DocStore,
    /// Event fan-out for SSE clients
    pub events: broadcast::Sender<CueflowEvent>,
    pub jobs: jobs::JobQueue,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        store: db::DocStore,
        events: broadcast::Sender<CueflowEvent>,
        jobs: jobs::JobQueue,
    ) -> Self {
        Self {
            store,
            events,
            jobs,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::health_routes())
        .merge(api::job_routes())
        .route("/events", get(api::event_stream))
        .with_state(state)
}
