//! Image import, file serving and Préparateur classification

use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cxr_common::annotation::NewAnnotation;
use cxr_common::model::{AdditionalInfo, Annotation, Image, Label, Patient, Prediction};
use cxr_common::Role;
use serde::Deserialize;
use tower::util::ServiceExt;
use tower_http::services::ServeFile;
use tracing::warn;

use super::ApiError;
use crate::AppState;

/// Model output supplied with an imported image
#[derive(Debug, Deserialize)]
pub struct PredictionInput {
    pub label: Label,
    pub confidence: f64,
    pub model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ImportImageRequest {
    pub image: Image,
    pub patient: Option<Patient>,
    pub prediction: Option<PredictionInput>,
}

/// POST /api/images
///
/// Registers an image, upserting its patient and recording the model
/// prediction when given. A rejected request stores nothing.
pub async fn import_image(
    State(state): State<AppState>,
    Json(request): Json<ImportImageRequest>,
) -> Result<(StatusCode, Json<Image>), ApiError> {
    let image = request.image;
    let prediction = request.prediction.map(|p| Prediction {
        image_id: image.id.clone(),
        label: p.label,
        confidence: p.confidence,
        model_version: p.model_version,
    });

    let mut store = state.store.write().await;
    store.import_image(image.clone(), request.patient, prediction)?;
    Ok((StatusCode::CREATED, Json(image)))
}

/// GET /api/images/:id/file
///
/// Streams the X-ray file; 404 when the image or its file is missing.
pub async fn serve_image_file(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let image_path = {
        let store = state.store.read().await;
        store
            .get_image(&image_id)
            .map(|i| i.image_path.clone())
            .ok_or_else(|| ApiError::NotFound(format!("image {}", image_id)))?
    };

    if !std::path::Path::new(&image_path).is_file() {
        warn!("Image file not available: {}", image_path);
        return Err(ApiError::NotFound(format!("file for image {}", image_id)));
    }

    let response = ServeFile::new(image_path)
        .oneshot(request)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(response.into_response())
}

#[derive(Debug, Deserialize)]
pub struct ClassificationRequest {
    pub user_name: String,
    pub label: Label,
    pub confidence: f64,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub additional_info: AdditionalInfo,
}

/// POST /api/images/:id/classification
///
/// Préparateur classification; each submission adds a version.
pub async fn classify_image(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
    Json(request): Json<ClassificationRequest>,
) -> Result<Json<Annotation>, ApiError> {
    let mut store = state.store.write().await;
    let annotation = store.submit_annotation(NewAnnotation {
        image_id,
        user_role: Role::Preparateur,
        user_name: request.user_name,
        label: request.label,
        confidence: request.confidence,
        notes: request.notes,
        additional_info: request.additional_info,
    })?;
    Ok(Json(annotation))
}
