//! Médecin review queue and patient detail

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::model::{Annotation, AuditLogEntry, Image, Label, Patient, Prediction, Role, Urgency};
use crate::store::Store;
use crate::{Error, Result};

/// Number of audit entries shown with a patient detail
pub const DETAIL_AUDIT_LIMIT: usize = 10;

/// Review priority: images classified `malade` come first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Basse,
    Haute,
}

impl Priority {
    pub fn for_label(label: Label) -> Self {
        match label {
            Label::Malade => Priority::Haute,
            Label::Sain => Priority::Basse,
        }
    }

    /// Numeric rank displayed in the queue (2 = high, 1 = low)
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Haute => 2,
            Priority::Basse => 1,
        }
    }
}

/// Optional queue filters; `None` means "all"
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ReviewFilter {
    pub classification: Option<Label>,
    pub priority: Option<Priority>,
}

/// One row of the review queue
#[derive(Debug, Clone, Serialize)]
pub struct ReviewRow {
    pub image_id: String,
    pub patient_id: String,
    pub exam_date: Option<String>,
    pub preparer_label: Label,
    pub preparer_confidence: f64,
    pub preparer_name: String,
    pub model_label: Option<Label>,
    pub model_confidence: Option<f64>,
    pub urgency: Option<Urgency>,
    pub priority: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub malade: usize,
    pub sain: usize,
}

impl QueueStats {
    pub fn from_rows(rows: &[ReviewRow]) -> Self {
        let malade = rows
            .iter()
            .filter(|r| r.preparer_label == Label::Malade)
            .count();
        Self {
            total: rows.len(),
            malade,
            sain: rows.len() - malade,
        }
    }
}

/// Everything the Médecin sees when opening one image
#[derive(Debug, Clone, Serialize)]
pub struct PatientDetail {
    pub image: Image,
    pub patient: Option<Patient>,
    pub prediction: Option<Prediction>,
    pub preparer_annotation: Option<Annotation>,
    pub medical_annotation: Option<Annotation>,
    /// Pre-selected label of the validation form
    pub current_label: Label,
    pub image_available: bool,
    pub audit_log: Vec<AuditLogEntry>,
}

impl Store {
    /// Open images classified by a Préparateur and not yet reviewed,
    /// highest priority first
    pub fn review_queue(&self, filter: ReviewFilter) -> Vec<ReviewRow> {
        let mut rows: Vec<ReviewRow> = self
            .get_all_images()
            .iter()
            .filter(|image| !image.is_finalized())
            .filter(|image| self.current_annotation(&image.id, Role::Medecin).is_none())
            .filter_map(|image| {
                let annotation = self.current_annotation(&image.id, Role::Preparateur)?;
                let prediction = self.get_prediction_by_image(&image.id);
                Some(ReviewRow {
                    image_id: image.id.clone(),
                    patient_id: image.patient_id.clone(),
                    exam_date: image.exam_date.clone(),
                    preparer_label: annotation.label,
                    preparer_confidence: annotation.confidence,
                    preparer_name: annotation.user_name.clone(),
                    model_label: prediction.map(|p| p.label),
                    model_confidence: prediction.map(|p| p.confidence),
                    urgency: annotation.additional_info.urgency,
                    priority: Priority::for_label(annotation.label).rank(),
                })
            })
            .filter(|row| {
                filter
                    .classification
                    .map_or(true, |label| row.preparer_label == label)
            })
            .filter(|row| filter.priority.map_or(true, |p| row.priority == p.rank()))
            .collect();

        rows.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.urgency.cmp(&a.urgency))
                .then_with(|| a.exam_date.cmp(&b.exam_date))
                .then_with(|| a.image_id.cmp(&b.image_id))
        });
        rows
    }

    pub fn patient_detail(&self, image_id: &str) -> Result<PatientDetail> {
        let image = self
            .get_image(image_id)
            .ok_or_else(|| Error::NotFound(format!("image {}", image_id)))?;

        let preparer_annotation = self.current_annotation(image_id, Role::Preparateur).cloned();
        let medical_annotation = self.current_annotation(image_id, Role::Medecin).cloned();
        let current_label = medical_annotation
            .as_ref()
            .or(preparer_annotation.as_ref())
            .map(|a| a.label)
            .unwrap_or(Label::Sain);

        let image_available = Path::new(&image.image_path).exists();
        if !image_available {
            warn!("Image file not available: {}", image.image_path);
        }

        Ok(PatientDetail {
            image: image.clone(),
            patient: self.get_patient_by_id(&image.patient_id).cloned(),
            prediction: self.get_prediction_by_image(image_id).cloned(),
            preparer_annotation,
            medical_annotation,
            current_label,
            image_available,
            audit_log: self
                .get_audit_log(image_id)
                .into_iter()
                .take(DETAIL_AUDIT_LIMIT)
                .cloned()
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::NewAnnotation;
    use crate::model::AdditionalInfo;
    use crate::store::StoreData;

    fn image(id: &str, exam_date: &str) -> Image {
        Image {
            id: id.to_string(),
            patient_id: format!("p-{}", id),
            exam_date: Some(exam_date.to_string()),
            image_path: format!("/nonexistent/{}.png", id),
            modality: None,
            body_part: None,
            patient_position: None,
            view_position: None,
            status: Default::default(),
            finalized_at: None,
            finalized_by: None,
        }
    }

    fn classify(store: &mut Store, id: &str, role: Role, label: Label, urgency: Option<Urgency>) {
        store
            .add_annotation(NewAnnotation {
                image_id: id.to_string(),
                user_role: role,
                user_name: "tech".to_string(),
                label,
                confidence: 0.7,
                notes: String::new(),
                additional_info: AdditionalInfo {
                    urgency,
                    ..Default::default()
                },
            })
            .unwrap();
    }

    fn seeded() -> Store {
        let mut store = Store::in_memory(StoreData::default());
        store.add_image(image("a", "2024-05-03")).unwrap();
        store.add_image(image("b", "2024-05-01")).unwrap();
        store.add_image(image("c", "2024-05-02")).unwrap();
        store.add_image(image("d", "2024-05-01")).unwrap();
        store.add_image(image("e", "2024-05-01")).unwrap();
        classify(&mut store, "a", Role::Preparateur, Label::Sain, None);
        classify(&mut store, "b", Role::Preparateur, Label::Malade, None);
        classify(&mut store, "c", Role::Preparateur, Label::Malade, Some(Urgency::Critique));
        classify(&mut store, "d", Role::Preparateur, Label::Malade, None);
        classify(&mut store, "d", Role::Medecin, Label::Malade, None);
        // "e" has no Préparateur classification yet
        store
    }

    #[test]
    fn test_queue_excludes_reviewed_and_unclassified() {
        let store = seeded();
        let ids: Vec<_> = store
            .review_queue(ReviewFilter::default())
            .into_iter()
            .map(|r| r.image_id)
            .collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_queue_priority_and_stats() {
        let store = seeded();
        let rows = store.review_queue(ReviewFilter::default());
        assert_eq!(rows[0].priority, 2);
        assert_eq!(rows[2].priority, 1);
        assert_eq!(
            QueueStats::from_rows(&rows),
            QueueStats {
                total: 3,
                malade: 2,
                sain: 1
            }
        );
    }

    #[test]
    fn test_queue_filters() {
        let store = seeded();
        let sain = store.review_queue(ReviewFilter {
            classification: Some(Label::Sain),
            priority: None,
        });
        assert_eq!(sain.len(), 1);
        assert_eq!(sain[0].image_id, "a");

        let high = store.review_queue(ReviewFilter {
            classification: None,
            priority: Some(Priority::Haute),
        });
        assert_eq!(high.len(), 2);

        let none = store.review_queue(ReviewFilter {
            classification: Some(Label::Sain),
            priority: Some(Priority::Haute),
        });
        assert!(none.is_empty());
    }

    #[test]
    fn test_detail_current_label_prefers_medecin() {
        let mut store = seeded();
        let detail = store.patient_detail("b").unwrap();
        assert_eq!(detail.current_label, Label::Malade);
        assert!(detail.medical_annotation.is_none());
        assert!(!detail.image_available);

        classify(&mut store, "b", Role::Medecin, Label::Sain, None);
        let detail = store.patient_detail("b").unwrap();
        assert_eq!(detail.current_label, Label::Sain);
        assert_eq!(detail.audit_log.len(), 2);
    }

    #[test]
    fn test_detail_defaults_to_sain_and_unknown_image_errors() {
        let store = seeded();
        assert_eq!(store.patient_detail("e").unwrap().current_label, Label::Sain);
        assert!(matches!(store.patient_detail("zzz"), Err(Error::NotFound(_))));
    }
}
