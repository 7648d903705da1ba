//! Validated results, batch finalization and exports

use axum::{extract::State, Json};
use cxr_common::export::{write_training_export, ExportGenerator, ExportOptions, ExportReport};
use cxr_common::results::{ExportSummary, FinalizeOutcome, ResultStats, ValidatedImage};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::ApiError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ResultsResponse {
    pub stats: ResultStats,
    pub validated: Vec<ValidatedImage>,
    pub finalized_count: usize,
    pub export_summary: ExportSummary,
}

/// GET /api/results
pub async fn results(State(state): State<AppState>) -> Json<ResultsResponse> {
    let store = state.store.read().await;
    let validated = store.validated_images();
    Json(ResultsResponse {
        stats: ResultStats::from_validated(&validated),
        finalized_count: validated.iter().filter(|v| v.image.is_finalized()).count(),
        validated,
        export_summary: store.export_summary(),
    })
}

#[derive(Debug, Deserialize)]
pub struct FinalizeRequest {
    pub user_name: String,
    /// Defaults to every validated image
    pub image_ids: Option<Vec<String>>,
}

/// POST /api/results/finalize
pub async fn finalize_batch(
    State(state): State<AppState>,
    Json(request): Json<FinalizeRequest>,
) -> Result<Json<FinalizeOutcome>, ApiError> {
    let mut store = state.store.write().await;
    let image_ids = match request.image_ids {
        Some(ids) => ids,
        None => store
            .validated_images()
            .into_iter()
            .map(|v| v.image.id)
            .collect(),
    };
    Ok(Json(store.mark_batch_finalized(&image_ids, &request.user_name)?))
}

#[derive(Debug, Serialize)]
pub struct TrainingExportResponse {
    pub path: PathBuf,
    pub records: usize,
}

/// POST /api/results/training-export
///
/// Writes `data/export_training_data.json` from the finalized images.
pub async fn training_export(
    State(state): State<AppState>,
) -> Result<Json<TrainingExportResponse>, ApiError> {
    let store = state.store.read().await;
    let records = store.training_records();
    if records.is_empty() {
        return Err(ApiError::Conflict("no finalized image to export".to_string()));
    }
    let path = state.layout.training_export_path();
    write_training_export(&records, &path)?;
    Ok(Json(TrainingExportResponse {
        path,
        records: records.len(),
    }))
}

/// Which images feed an export bundle
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportScope {
    #[default]
    Finalized,
    Validated,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportRequest {
    #[serde(default)]
    pub scope: ExportScope,
    pub csv: Option<bool>,
    pub json: Option<bool>,
    pub zip: Option<bool>,
    pub split_dataset: Option<bool>,
    pub seed: Option<u64>,
}

impl ExportRequest {
    fn options(&self, default_seed: u64) -> ExportOptions {
        let defaults = ExportOptions::default();
        ExportOptions {
            csv: self.csv.unwrap_or(defaults.csv),
            json: self.json.unwrap_or(defaults.json),
            zip: self.zip.unwrap_or(defaults.zip),
            split_dataset: self.split_dataset.unwrap_or(defaults.split_dataset),
            seed: self.seed.unwrap_or(default_seed),
            ratios: defaults.ratios,
        }
    }
}

/// POST /api/results/export
///
/// Writes an `export_<timestamp>` bundle. Missing image files show up as
/// warnings in the report.
pub async fn export_bundle(
    State(state): State<AppState>,
    Json(request): Json<ExportRequest>,
) -> Result<Json<ExportReport>, ApiError> {
    let store = state.store.read().await;
    let selected = match request.scope {
        ExportScope::Finalized => store.finalized_images(),
        ExportScope::Validated => store.validated_images(),
    };
    if selected.is_empty() {
        return Err(ApiError::Conflict("no image to export".to_string()));
    }

    let records = store.export_records(&selected);
    let generator = ExportGenerator::new(state.layout.exports_dir());
    let report = generator.run(&records, &request.options(state.export_seed))?;
    Ok(Json(report))
}
