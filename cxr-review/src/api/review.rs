//! Médecin review queue, patient detail and diagnosis validation

use axum::{
    extract::{Path, Query, State},
    Json,
};
use cxr_common::annotation::NewAnnotation;
use cxr_common::model::{AdditionalInfo, Annotation, AuditLogEntry, Label};
use cxr_common::review::{PatientDetail, QueueStats, ReviewFilter, ReviewRow};
use cxr_common::{time, Role};
use serde::{Deserialize, Serialize};

use super::ApiError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ReviewQueueResponse {
    pub stats: QueueStats,
    pub rows: Vec<ReviewRow>,
}

/// GET /api/review?classification=malade&priority=haute
///
/// Stats cover the whole queue; rows honour the filters.
pub async fn review_queue(
    State(state): State<AppState>,
    Query(filter): Query<ReviewFilter>,
) -> Json<ReviewQueueResponse> {
    let store = state.store.read().await;
    let stats = QueueStats::from_rows(&store.review_queue(ReviewFilter::default()));
    Json(ReviewQueueResponse {
        stats,
        rows: store.review_queue(filter),
    })
}

/// GET /api/review/:id
pub async fn patient_detail(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
) -> Result<Json<PatientDetail>, ApiError> {
    let store = state.store.read().await;
    Ok(Json(store.patient_detail(&image_id)?))
}

fn default_medical_confidence() -> f64 {
    0.9
}

#[derive(Debug, Deserialize)]
pub struct ValidationRequest {
    pub user_name: String,
    pub label: Label,
    #[serde(default = "default_medical_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub notes: String,
    /// Confirmed outcome; omitted or null when not yet determined
    pub ground_truth: Option<Label>,
    pub ground_truth_notes: Option<String>,
}

/// POST /api/review/:id/validation
///
/// Creates the Médecin annotation on first validation, adds a version after.
pub async fn validate_diagnosis(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
    Json(request): Json<ValidationRequest>,
) -> Result<Json<Annotation>, ApiError> {
    let mut store = state.store.write().await;
    let annotation = store.submit_annotation(NewAnnotation {
        image_id,
        user_role: Role::Medecin,
        user_name: request.user_name,
        label: request.label,
        confidence: request.confidence,
        notes: request.notes,
        additional_info: AdditionalInfo {
            ground_truth: request.ground_truth,
            ground_truth_notes: request.ground_truth_notes.filter(|n| !n.trim().is_empty()),
            validated_at: Some(time::now()),
            ..Default::default()
        },
    })?;
    Ok(Json(annotation))
}

/// GET /api/review/:id/audit
///
/// Full audit trail for one image, newest first.
pub async fn audit_log(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
) -> Result<Json<Vec<AuditLogEntry>>, ApiError> {
    let store = state.store.read().await;
    if store.get_image(&image_id).is_none() {
        return Err(ApiError::NotFound(format!("image {}", image_id)));
    }
    Ok(Json(store.get_audit_log(&image_id).into_iter().cloned().collect()))
}
