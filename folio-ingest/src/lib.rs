//! folio-ingest library interface
//!
//! Manuscript segmentation and the unit analysis orchestration core, plus the
//! HTTP surface that exposes them. Exposed as a library for integration
//! testing.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod types;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use std::sync::Arc;

use axum::Router;
use chrono::{DateTime, Utc};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::OrchestratorConfig;
use crate::services::{
    CallbackProcessor, CompletionBarrier, DispatchOrchestrator, ManuscriptIngestor,
    ProgressNotifier, ReconciliationScheduler, UnitLifecycle,
};
use crate::types::{ProjectStore, UnitStore, WorkQueue};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub units: Arc<dyn UnitStore>,
    pub projects: Arc<dyn ProjectStore>,
    pub lifecycle: Arc<UnitLifecycle>,
    pub ingestor: Arc<ManuscriptIngestor>,
    pub dispatcher: Arc<DispatchOrchestrator>,
    pub barrier: Arc<CompletionBarrier>,
    pub callbacks: Arc<CallbackProcessor>,
    pub reconciler: Arc<ReconciliationScheduler>,
    pub notifier: Arc<ProgressNotifier>,
    pub config: Arc<OrchestratorConfig>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Wire every service over the given stores and queue
    pub fn new(
        units: Arc<dyn UnitStore>,
        projects: Arc<dyn ProjectStore>,
        queue: Arc<dyn WorkQueue>,
        config: OrchestratorConfig,
    ) -> Self {
        let notifier = Arc::new(ProgressNotifier::from_config(&config));
        let lifecycle = Arc::new(UnitLifecycle::new(
            Arc::clone(&units),
            Arc::clone(&notifier),
            config.max_retry_count,
        ));
        let ingestor = Arc::new(ManuscriptIngestor::new(
            Arc::clone(&units),
            Arc::clone(&projects),
            Arc::clone(&lifecycle),
        ));
        let dispatcher = Arc::new(DispatchOrchestrator::new(
            Arc::clone(&units),
            Arc::clone(&projects),
            Arc::clone(&queue),
            Arc::clone(&lifecycle),
            Arc::clone(&notifier),
            config.callback_address.clone(),
        ));
        let barrier = Arc::new(CompletionBarrier::new(
            Arc::clone(&units),
            Arc::clone(&projects),
            queue,
            Arc::clone(&notifier),
            config.callback_address.clone(),
            config.max_retry_count,
        ));
        let callbacks = Arc::new(CallbackProcessor::new(
            Arc::clone(&units),
            Arc::clone(&projects),
            Arc::clone(&lifecycle),
            Arc::clone(&barrier),
            Arc::clone(&notifier),
        ));
        let reconciler = Arc::new(ReconciliationScheduler::new(
            Arc::clone(&units),
            Arc::clone(&projects),
            Arc::clone(&dispatcher),
            Arc::clone(&barrier),
            config.max_retry_count,
        ));

        Self {
            units,
            projects,
            lifecycle,
            ingestor,
            dispatcher,
            barrier,
            callbacks,
            reconciler,
            notifier,
            config: Arc::new(config),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::project_routes())
        .merge(api::callback_routes())
        .merge(api::event_routes())
        .merge(api::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        // Observers may be browser dashboards on another origin
        .layer(CorsLayer::permissive())
}
