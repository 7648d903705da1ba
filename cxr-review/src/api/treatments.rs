//! Treatment start and follow-up

use axum::{
    extract::{Path, State},
    Json,
};
use cxr_common::model::{ActionType, Treatment, TreatmentDetails, TreatmentStatus};
use cxr_common::treatment::{PatientInTreatment, TreatmentCandidate, TreatmentCounts};
use serde::{Deserialize, Serialize};

use super::ApiError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct TreatmentListResponse {
    pub counts: TreatmentCounts,
    pub patients: Vec<PatientInTreatment>,
}

/// GET /api/treatments
pub async fn patients_in_treatment(State(state): State<AppState>) -> Json<TreatmentListResponse> {
    let store = state.store.read().await;
    let patients = store.get_patients_in_treatment();
    Json(TreatmentListResponse {
        counts: TreatmentCounts::tally(patients.iter().map(|p| &p.treatment)),
        patients,
    })
}

/// GET /api/treatments/candidates
///
/// Validated patients with no treatment started yet.
pub async fn treatment_candidates(State(state): State<AppState>) -> Json<Vec<TreatmentCandidate>> {
    let store = state.store.read().await;
    Json(store.validated_without_treatment())
}

#[derive(Debug, Deserialize)]
pub struct StartTreatmentRequest {
    pub user_name: String,
    pub action_type: ActionType,
    #[serde(default)]
    pub details: TreatmentDetails,
}

/// POST /api/treatments/:id
pub async fn start_treatment(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
    Json(request): Json<StartTreatmentRequest>,
) -> Result<Json<Treatment>, ApiError> {
    let mut store = state.store.write().await;
    let treatment = store.start_treatment(
        &image_id,
        &request.user_name,
        request.action_type,
        request.details,
    )?;
    Ok(Json(treatment))
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub user_name: String,
    pub status: TreatmentStatus,
    pub notes: Option<String>,
}

/// POST /api/treatments/:id/status
pub async fn update_treatment_status(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
    Json(request): Json<StatusUpdateRequest>,
) -> Result<Json<Treatment>, ApiError> {
    let mut store = state.store.write().await;
    let treatment = store.update_treatment_status(
        &image_id,
        &request.user_name,
        request.status,
        request.notes,
    )?;
    Ok(Json(treatment))
}
