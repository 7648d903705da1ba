//! cxr-review library - chest X-ray review service
//!
//! Serves the Médecin review workflow (review queue, validation, treatment
//! follow-up, finalization and export) and the Préparateur classification
//! endpoint over a JSON API, plus a static web UI.

use axum::Router;
use cxr_common::config::RootFolderInitializer;
use cxr_common::Store;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod check;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Review store; writes are serialized by the lock
    pub store: Arc<RwLock<Store>>,
    /// Folder layout (store, training export, export bundles)
    pub layout: RootFolderInitializer,
    /// Default seed for dataset splits when a request gives none
    pub export_seed: u64,
}

impl AppState {
    pub fn new(store: Store, layout: RootFolderInitializer, export_seed: u64) -> Self {
        Self {
            store: Arc::new(RwLock::new(store)),
            layout,
            export_seed,
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, post};

    let api = Router::new()
        .route("/api/buildinfo", get(api::get_build_info))
        .route("/api/images", post(api::import_image))
        .route("/api/images/:id/file", get(api::serve_image_file))
        .route("/api/images/:id/classification", post(api::classify_image))
        .route("/api/review", get(api::review_queue))
        .route("/api/review/:id", get(api::patient_detail))
        .route("/api/review/:id/validation", post(api::validate_diagnosis))
        .route("/api/review/:id/audit", get(api::audit_log))
        .route("/api/treatments", get(api::patients_in_treatment))
        .route("/api/treatments/candidates", get(api::treatment_candidates))
        .route("/api/treatments/:id", post(api::start_treatment))
        .route("/api/treatments/:id/status", post(api::update_treatment_status))
        .route("/api/results", get(api::results))
        .route("/api/results/finalize", post(api::finalize_batch))
        .route("/api/results/training-export", post(api::training_export))
        .route("/api/results/export", post(api::export_bundle));

    let public = Router::new()
        .route("/", get(api::serve_index))
        .route("/static/app.js", get(api::serve_app_js))
        .merge(api::health_routes());

    Router::new()
        .merge(api)
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
