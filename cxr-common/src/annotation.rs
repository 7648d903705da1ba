//! Versioned annotation lifecycle
//!
//! Annotations are append-only: every submission by a role adds a new
//! version for (image, role) instead of overwriting the previous one. The
//! current value for a role is its highest version.

use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::model::{AdditionalInfo, Annotation, AuditAction, AuditDetails, AuditLogEntry, Label, Role};
use crate::store::{check_confidence, Store};
use crate::{time, Error, Result};

/// First submission by a role for an image
#[derive(Debug, Clone, Deserialize)]
pub struct NewAnnotation {
    pub image_id: String,
    pub user_role: Role,
    pub user_name: String,
    pub label: Label,
    pub confidence: f64,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub additional_info: AdditionalInfo,
}

/// Follow-up submission by a role that already annotated the image
#[derive(Debug, Clone, Deserialize)]
pub struct AnnotationUpdate {
    pub user_role: Role,
    pub label: Label,
    pub confidence: f64,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub additional_info: AdditionalInfo,
}

impl Store {
    /// Append a new annotation version for (image, role)
    pub fn add_annotation(&mut self, new: NewAnnotation) -> Result<Annotation> {
        check_user(&new.user_name)?;
        check_confidence(new.confidence)?;
        let patient_id = self.require_image(&new.image_id)?.patient_id.clone();

        let version = self.next_version(&new.image_id, new.user_role);
        let annotation = Annotation {
            id: Uuid::new_v4(),
            image_id: new.image_id,
            patient_id,
            user_role: new.user_role,
            user_name: new.user_name,
            label: new.label,
            confidence: new.confidence,
            notes: new.notes,
            version,
            created_at: time::now(),
            additional_info: new.additional_info,
        };

        let audit = AuditLogEntry::new(
            &annotation.image_id,
            &annotation.user_name,
            AuditAction::AnnotationCreated,
            AuditDetails {
                role: Some(annotation.user_role),
                version: Some(version),
                new_label: Some(annotation.label),
                ..Default::default()
            },
        );
        self.commit(|store| {
            store.push_audit(audit);
            store.data.annotations.push(annotation.clone());
            Ok(())
        })?;

        info!(
            "{} {} classified image {} as {} (v{})",
            annotation.user_role, annotation.user_name, annotation.image_id, annotation.label, version
        );
        Ok(annotation)
    }

    /// Append a new version on top of the role's current annotation.
    ///
    /// A treatment attached to the previous version is carried forward unless
    /// the update brings its own.
    pub fn update_annotation(
        &mut self,
        image_id: &str,
        user_name: &str,
        update: AnnotationUpdate,
    ) -> Result<Annotation> {
        check_user(user_name)?;
        check_confidence(update.confidence)?;
        self.require_image(image_id)?;

        let previous = self
            .current_annotation(image_id, update.user_role)
            .cloned()
            .ok_or_else(|| {
                Error::NotFound(format!("{} annotation for image {}", update.user_role, image_id))
            })?;

        let mut additional_info = update.additional_info;
        if additional_info.treatment.is_none() {
            additional_info.treatment = previous.additional_info.treatment.clone();
        }

        let annotation = Annotation {
            id: Uuid::new_v4(),
            image_id: image_id.to_string(),
            patient_id: previous.patient_id.clone(),
            user_role: update.user_role,
            user_name: user_name.to_string(),
            label: update.label,
            confidence: update.confidence,
            notes: update.notes,
            version: previous.version + 1,
            created_at: time::now(),
            additional_info,
        };

        let audit = AuditLogEntry::new(
            image_id,
            user_name,
            AuditAction::AnnotationUpdated,
            AuditDetails {
                role: Some(annotation.user_role),
                version: Some(annotation.version),
                old_label: Some(previous.label),
                new_label: Some(annotation.label),
                ..Default::default()
            },
        );
        self.commit(|store| {
            store.push_audit(audit);
            store.data.annotations.push(annotation.clone());
            Ok(())
        })?;

        if previous.label != annotation.label {
            info!(
                "{} {} changed image {} from {} to {} (v{})",
                annotation.user_role,
                user_name,
                image_id,
                previous.label,
                annotation.label,
                annotation.version
            );
        }
        Ok(annotation)
    }

    /// Add when the role has not annotated the image yet, update otherwise
    pub fn submit_annotation(&mut self, new: NewAnnotation) -> Result<Annotation> {
        if self.current_annotation(&new.image_id, new.user_role).is_none() {
            return self.add_annotation(new);
        }

        let image_id = new.image_id.clone();
        let user_name = new.user_name.clone();
        self.update_annotation(
            &image_id,
            &user_name,
            AnnotationUpdate {
                user_role: new.user_role,
                label: new.label,
                confidence: new.confidence,
                notes: new.notes,
                additional_info: new.additional_info,
            },
        )
    }

    fn next_version(&self, image_id: &str, role: Role) -> u32 {
        self.current_annotation(image_id, role)
            .map(|a| a.version + 1)
            .unwrap_or(1)
    }
}

fn check_user(user_name: &str) -> Result<()> {
    if user_name.trim().is_empty() {
        Err(Error::InvalidInput("user_name must not be empty".to_string()))
    } else {
        Ok(())
    }
}
