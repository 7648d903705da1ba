//! Validation results and batch finalization

use serde::Serialize;
use std::collections::HashSet;
use tracing::info;

use crate::model::{
    Annotation, AuditAction, AuditDetails, AuditLogEntry, Image, ImageStatus, Label, Role,
};
use crate::store::Store;
use crate::{time, Error, Result};

/// An image together with its current Médecin annotation
#[derive(Debug, Clone, Serialize)]
pub struct ValidatedImage {
    pub image: Image,
    pub annotation: Annotation,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResultStats {
    pub validated: usize,
    pub confirmed_sick: usize,
    pub confirmed_healthy: usize,
}

impl ResultStats {
    pub fn from_validated(validated: &[ValidatedImage]) -> Self {
        let confirmed_sick = validated
            .iter()
            .filter(|v| v.annotation.label == Label::Malade)
            .count();
        Self {
            validated: validated.len(),
            confirmed_sick,
            confirmed_healthy: validated.len() - confirmed_sick,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FinalizeOutcome {
    pub finalized: Vec<String>,
    /// Requested ids that were not in the validated set
    pub skipped: Vec<String>,
}

/// What a training export of the finalized images would contain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub cases: usize,
    /// Final label differs from the model prediction
    pub labels_changed: usize,
    pub confirmed_sick: usize,
    pub confirmed_healthy: usize,
}

impl Store {
    /// Every image carrying a Médecin annotation, in store order
    pub fn validated_images(&self) -> Vec<ValidatedImage> {
        self.get_all_images()
            .iter()
            .filter_map(|image| {
                self.current_annotation(&image.id, Role::Medecin)
                    .map(|annotation| ValidatedImage {
                        image: image.clone(),
                        annotation: annotation.clone(),
                    })
            })
            .collect()
    }

    /// Finalized images with their current Médecin annotation
    pub fn finalized_images(&self) -> Vec<ValidatedImage> {
        self.validated_images()
            .into_iter()
            .filter(|v| v.image.is_finalized())
            .collect()
    }

    /// Mark the requested images as finalized.
    ///
    /// Only images in the validated set are touched; any other id is
    /// reported back as skipped. Re-finalizing an image refreshes its
    /// finalization stamp.
    pub fn mark_batch_finalized(
        &mut self,
        image_ids: &[String],
        user_name: &str,
    ) -> Result<FinalizeOutcome> {
        if user_name.trim().is_empty() {
            return Err(Error::InvalidInput("user_name must not be empty".to_string()));
        }

        let validated: HashSet<String> = self
            .validated_images()
            .into_iter()
            .map(|v| v.image.id)
            .collect();

        let mut outcome = FinalizeOutcome::default();
        let mut seen = HashSet::new();
        for image_id in image_ids {
            if !seen.insert(image_id.as_str()) {
                continue;
            }
            if validated.contains(image_id) {
                outcome.finalized.push(image_id.clone());
            } else {
                outcome.skipped.push(image_id.clone());
            }
        }

        if !outcome.finalized.is_empty() {
            let now = time::now();
            self.commit(|store| {
                for image_id in &outcome.finalized {
                    if let Some(image) = store.image_mut(image_id) {
                        image.status = ImageStatus::Finalized;
                        image.finalized_at = Some(now);
                        image.finalized_by = Some(user_name.to_string());
                    }
                    store.push_audit(AuditLogEntry::new(
                        image_id,
                        user_name,
                        AuditAction::Finalized,
                        AuditDetails::default(),
                    ));
                }
                Ok(())
            })?;
        }
        info!(
            "{} finalized {} image(s), skipped {}",
            user_name,
            outcome.finalized.len(),
            outcome.skipped.len()
        );
        Ok(outcome)
    }

    pub fn export_summary(&self) -> ExportSummary {
        let finalized = self.finalized_images();
        let labels_changed = finalized
            .iter()
            .filter(|v| {
                self.get_prediction_by_image(&v.image.id)
                    .is_some_and(|p| p.label != v.annotation.label)
            })
            .count();
        let stats = ResultStats::from_validated(&finalized);
        ExportSummary {
            cases: finalized.len(),
            labels_changed,
            confirmed_sick: stats.confirmed_sick,
            confirmed_healthy: stats.confirmed_healthy,
        }
    }
}
