//! Treatment lifecycle
//!
//! A treatment lives inside the current Médecin annotation of an image. It
//! can only be started once that annotation exists. Its status is then
//! reassigned freely: any status may follow any other, including a return
//! from `termine`. Every reassignment is kept in the treatment history and in
//! the audit log.

use serde::Serialize;
use tracing::info;

use crate::model::{
    ActionType, Annotation, AuditAction, AuditDetails, AuditLogEntry, Image, Role, StatusChange,
    Treatment, TreatmentDetails, TreatmentStatus,
};
use crate::store::Store;
use crate::{time, Error, Result};

/// An image under treatment, with the annotation carrying it
#[derive(Debug, Clone, Serialize)]
pub struct PatientInTreatment {
    pub image: Image,
    pub annotation: Annotation,
    pub treatment: Treatment,
}

/// Number of treatments per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TreatmentCounts {
    pub en_traitement: usize,
    pub en_attente_examens: usize,
    pub hospitalise: usize,
    pub termine: usize,
}

impl TreatmentCounts {
    pub fn tally<'a>(treatments: impl IntoIterator<Item = &'a Treatment>) -> Self {
        let mut counts = Self::default();
        for treatment in treatments {
            match treatment.status {
                TreatmentStatus::EnTraitement => counts.en_traitement += 1,
                TreatmentStatus::EnAttenteExamens => counts.en_attente_examens += 1,
                TreatmentStatus::Hospitalise => counts.hospitalise += 1,
                TreatmentStatus::Termine => counts.termine += 1,
            }
        }
        counts
    }
}

/// A validated image that has no treatment yet
#[derive(Debug, Clone, Serialize)]
pub struct TreatmentCandidate {
    pub image: Image,
    pub annotation: Annotation,
}

impl Store {
    /// Start a treatment on the image's current Médecin annotation
    pub fn start_treatment(
        &mut self,
        image_id: &str,
        user_name: &str,
        action_type: ActionType,
        details: TreatmentDetails,
    ) -> Result<Treatment> {
        if user_name.trim().is_empty() {
            return Err(Error::InvalidInput("user_name must not be empty".to_string()));
        }
        self.require_image(image_id)?;

        let treatment = self.commit(|store| {
            let annotation = store
                .current_annotation_mut(image_id, Role::Medecin)
                .ok_or_else(|| {
                    Error::InvalidState(format!(
                        "image {} has no Médecin validation, cannot start a treatment",
                        image_id
                    ))
                })?;

            if let Some(existing) = &annotation.additional_info.treatment {
                return Err(Error::InvalidState(format!(
                    "image {} already has a {} treatment ({})",
                    image_id, existing.action_type, existing.status
                )));
            }

            let treatment = Treatment {
                action_type,
                status: TreatmentStatus::EnTraitement,
                started_at: time::now(),
                started_by: user_name.to_string(),
                details,
                updated_at: None,
                updated_by: None,
                history: Vec::new(),
            };
            annotation.additional_info.treatment = Some(treatment.clone());

            store.push_audit(AuditLogEntry::new(
                image_id,
                user_name,
                AuditAction::TreatmentStarted,
                AuditDetails {
                    action_type: Some(action_type),
                    new_status: Some(treatment.status),
                    notes: treatment.details.notes.clone(),
                    ..Default::default()
                },
            ));
            Ok(treatment)
        })?;

        info!("{} started {} treatment for image {}", user_name, action_type, image_id);
        Ok(treatment)
    }

    /// Reassign the treatment status. No transition is forbidden.
    pub fn update_treatment_status(
        &mut self,
        image_id: &str,
        user_name: &str,
        new_status: TreatmentStatus,
        notes: Option<String>,
    ) -> Result<Treatment> {
        if user_name.trim().is_empty() {
            return Err(Error::InvalidInput("user_name must not be empty".to_string()));
        }
        let notes = notes.filter(|n| !n.trim().is_empty());

        let (old_status, updated) = self.commit(|store| {
            let treatment = store
                .current_annotation_mut(image_id, Role::Medecin)
                .and_then(|a| a.additional_info.treatment.as_mut())
                .ok_or_else(|| Error::NotFound(format!("treatment for image {}", image_id)))?;

            let old_status = treatment.status;
            let now = time::now();
            treatment.status = new_status;
            treatment.updated_at = Some(now);
            treatment.updated_by = Some(user_name.to_string());
            treatment.history.push(StatusChange {
                from: old_status,
                to: new_status,
                at: now,
                by: user_name.to_string(),
                notes: notes.clone(),
            });
            let updated = treatment.clone();

            store.push_audit(AuditLogEntry::new(
                image_id,
                user_name,
                AuditAction::TreatmentStatusUpdated,
                AuditDetails {
                    action_type: Some(updated.action_type),
                    old_status: Some(old_status),
                    new_status: Some(new_status),
                    notes,
                    ..Default::default()
                },
            ));
            Ok((old_status, updated))
        })?;

        info!(
            "{} moved treatment of image {} from {} to {}",
            user_name, image_id, old_status, new_status
        );
        Ok(updated)
    }

    /// Images whose current Médecin annotation carries a treatment
    pub fn get_patients_in_treatment(&self) -> Vec<PatientInTreatment> {
        self.get_all_images()
            .iter()
            .filter_map(|image| {
                let annotation = self.current_annotation(&image.id, Role::Medecin)?;
                let treatment = annotation.treatment()?;
                Some(PatientInTreatment {
                    image: image.clone(),
                    annotation: annotation.clone(),
                    treatment: treatment.clone(),
                })
            })
            .collect()
    }

    /// Médecin-validated images with no treatment started
    pub fn validated_without_treatment(&self) -> Vec<TreatmentCandidate> {
        self.get_all_images()
            .iter()
            .filter_map(|image| {
                let annotation = self.current_annotation(&image.id, Role::Medecin)?;
                if annotation.treatment().is_some() {
                    return None;
                }
                Some(TreatmentCandidate {
                    image: image.clone(),
                    annotation: annotation.clone(),
                })
            })
            .collect()
    }
}
