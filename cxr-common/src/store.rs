//! JSON-backed review store
//!
//! All records live in one JSON document that is loaded at startup and
//! rewritten after every mutation. Writes go to a sibling temp file which is
//! then renamed over the store, so a crash mid-write leaves the previous
//! document intact. There is no locking across processes: last writer wins.

use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

use crate::model::{Annotation, AuditLogEntry, Image, Patient, Prediction, Role};
use crate::{Error, Result};

/// On-disk document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    pub patients: Vec<Patient>,
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub predictions: Vec<Prediction>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub audit_log: Vec<AuditLogEntry>,
}

pub struct Store {
    /// `None` keeps the store in memory only
    path: Option<PathBuf>,
    pub(crate) data: StoreData,
}

impl Store {
    /// Open the store file at `path`. A missing file yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = if path.exists() {
            let bytes = std::fs::read(&path)?;
            let data: StoreData = serde_json::from_slice(&bytes)?;
            info!(
                "Loaded store {} ({} images, {} annotations)",
                path.display(),
                data.images.len(),
                data.annotations.len()
            );
            data
        } else {
            warn!("Store {} not found, starting empty", path.display());
            StoreData::default()
        };

        Ok(Self {
            path: Some(path),
            data,
        })
    }

    /// Store that is never written to disk
    pub fn in_memory(data: StoreData) -> Self {
        Self { path: None, data }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn data(&self) -> &StoreData {
        &self.data
    }

    /// Persist the whole document (temp file + rename)
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(&self.data)?;
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        debug!("Saved store {}", path.display());
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    pub fn get_image(&self, image_id: &str) -> Option<&Image> {
        self.data.images.iter().find(|i| i.id == image_id)
    }

    pub fn get_patient_by_id(&self, patient_id: &str) -> Option<&Patient> {
        self.data.patients.iter().find(|p| p.id == patient_id)
    }

    pub fn get_prediction_by_image(&self, image_id: &str) -> Option<&Prediction> {
        self.data.predictions.iter().find(|p| p.image_id == image_id)
    }

    pub fn get_all_images(&self) -> &[Image] {
        &self.data.images
    }

    pub fn get_all_annotations(&self) -> &[Annotation] {
        &self.data.annotations
    }

    /// Every version for (image, role), oldest first
    pub fn annotation_history(&self, image_id: &str, role: Role) -> Vec<&Annotation> {
        let mut versions: Vec<&Annotation> = self
            .data
            .annotations
            .iter()
            .filter(|a| a.image_id == image_id && a.user_role == role)
            .collect();
        versions.sort_by_key(|a| a.version);
        versions
    }

    /// Highest version for (image, role)
    pub fn current_annotation(&self, image_id: &str, role: Role) -> Option<&Annotation> {
        self.data
            .annotations
            .iter()
            .filter(|a| a.image_id == image_id && a.user_role == role)
            .max_by_key(|a| a.version)
    }

    /// Current Médecin annotation if the image was reviewed, else the current
    /// Préparateur annotation
    pub fn get_annotation_by_image(&self, image_id: &str) -> Option<&Annotation> {
        self.current_annotation(image_id, Role::Medecin)
            .or_else(|| self.current_annotation(image_id, Role::Preparateur))
    }

    /// Audit entries for one image, newest first
    pub fn get_audit_log(&self, image_id: &str) -> Vec<&AuditLogEntry> {
        let mut entries: Vec<&AuditLogEntry> = self
            .data
            .audit_log
            .iter()
            .rev()
            .filter(|e| e.image_id == image_id)
            .collect();
        // stable sort: same-timestamp entries stay newest first
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries
    }

    // ------------------------------------------------------------------------
    // Ingestion
    // ------------------------------------------------------------------------

    /// Insert or replace a patient
    pub fn add_patient(&mut self, patient: Patient) -> Result<()> {
        self.commit(|store| store.upsert_patient(patient))
    }

    /// Register a new image; ids are unique
    pub fn add_image(&mut self, image: Image) -> Result<()> {
        self.commit(|store| store.insert_image(image))
    }

    /// Record the model prediction for an image, replacing any previous run
    pub fn set_prediction(&mut self, prediction: Prediction) -> Result<()> {
        self.commit(|store| store.upsert_prediction(prediction))
    }

    /// Register an image together with its patient and model prediction.
    /// Nothing is stored when any part is rejected.
    pub fn import_image(
        &mut self,
        image: Image,
        patient: Option<Patient>,
        prediction: Option<Prediction>,
    ) -> Result<()> {
        check_image_id(&image.id)?;
        if let Some(patient) = &patient {
            if patient.id != image.patient_id {
                return Err(Error::InvalidInput(format!(
                    "patient {} does not match image patient_id {}",
                    patient.id, image.patient_id
                )));
            }
        }
        if let Some(prediction) = &prediction {
            if prediction.image_id != image.id {
                return Err(Error::InvalidInput(format!(
                    "prediction for {} does not match image {}",
                    prediction.image_id, image.id
                )));
            }
            check_confidence(prediction.confidence)?;
        }

        self.commit(|store| {
            if let Some(patient) = patient {
                store.upsert_patient(patient)?;
            }
            store.insert_image(image)?;
            if let Some(prediction) = prediction {
                store.upsert_prediction(prediction)?;
            }
            Ok(())
        })
    }

    fn upsert_patient(&mut self, patient: Patient) -> Result<()> {
        if patient.id.trim().is_empty() {
            return Err(Error::InvalidInput("patient id must not be empty".to_string()));
        }
        match self.data.patients.iter_mut().find(|p| p.id == patient.id) {
            Some(existing) => *existing = patient,
            None => self.data.patients.push(patient),
        }
        Ok(())
    }

    fn insert_image(&mut self, image: Image) -> Result<()> {
        check_image_id(&image.id)?;
        if self.get_image(&image.id).is_some() {
            return Err(Error::InvalidInput(format!("image {} already exists", image.id)));
        }
        info!("Registered image {} for patient {}", image.id, image.patient_id);
        self.data.images.push(image);
        Ok(())
    }

    fn upsert_prediction(&mut self, prediction: Prediction) -> Result<()> {
        if self.get_image(&prediction.image_id).is_none() {
            return Err(Error::NotFound(format!("image {}", prediction.image_id)));
        }
        check_confidence(prediction.confidence)?;
        match self
            .data
            .predictions
            .iter_mut()
            .find(|p| p.image_id == prediction.image_id)
        {
            Some(existing) => *existing = prediction,
            None => self.data.predictions.push(prediction),
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Crate-internal mutation helpers
    // ------------------------------------------------------------------------

    /// Apply `change` and persist the document. If the change or the write
    /// fails, the in-memory document is restored so it matches the file.
    pub(crate) fn commit<T>(&mut self, change: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let snapshot = self.data.clone();
        let outcome = change(self).and_then(|value| self.save().map(|()| value));
        if outcome.is_err() {
            self.data = snapshot;
        }
        outcome
    }

    pub(crate) fn require_image(&self, image_id: &str) -> Result<&Image> {
        self.get_image(image_id)
            .ok_or_else(|| Error::NotFound(format!("image {}", image_id)))
    }

    pub(crate) fn image_mut(&mut self, image_id: &str) -> Option<&mut Image> {
        self.data.images.iter_mut().find(|i| i.id == image_id)
    }

    pub(crate) fn current_annotation_mut(
        &mut self,
        image_id: &str,
        role: Role,
    ) -> Option<&mut Annotation> {
        self.data
            .annotations
            .iter_mut()
            .filter(|a| a.image_id == image_id && a.user_role == role)
            .max_by_key(|a| a.version)
    }

    pub(crate) fn push_audit(&mut self, entry: AuditLogEntry) {
        self.data.audit_log.push(entry);
    }
}

/// Image ids name files in export bundles: one plain file name, no separators
pub(crate) fn check_image_id(image_id: &str) -> Result<()> {
    let mut components = Path::new(image_id).components();
    let single_name = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(name)), None) if name == OsStr::new(image_id)
    );
    if image_id.trim().is_empty() {
        Err(Error::InvalidInput("image id must not be empty".to_string()))
    } else if !single_name || image_id.contains(['/', '\\']) || image_id.contains("..") {
        Err(Error::InvalidInput(format!(
            "image id {:?} must be a plain file name",
            image_id
        )))
    } else {
        Ok(())
    }
}

/// Confidences are probabilities
pub(crate) fn check_confidence(confidence: f64) -> Result<()> {
    if confidence.is_finite() && (0.0..=1.0).contains(&confidence) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "confidence must be within 0.0..=1.0, got {}",
            confidence
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::NewAnnotation;
    use crate::model::{AdditionalInfo, Label, PatientMetadata};

    fn image(id: &str) -> Image {
        Image {
            id: id.to_string(),
            patient_id: "p-1".to_string(),
            exam_date: Some("2024-11-02".to_string()),
            image_path: format!("/nonexistent/{}.png", id),
            modality: Some("CR".to_string()),
            body_part: Some("CHEST".to_string()),
            patient_position: None,
            view_position: Some("PA".to_string()),
            status: Default::default(),
            finalized_at: None,
            finalized_by: None,
        }
    }

    #[test]
    fn test_open_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("store.json")).unwrap();
        assert!(store.get_all_images().is_empty());
        assert!(store.get_all_annotations().is_empty());
    }

    #[test]
    fn test_open_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Store::open(&path), Err(Error::Json(_))));
    }

    #[test]
    fn test_save_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let mut store = Store::open(&path).unwrap();
        store
            .add_patient(Patient {
                id: "p-1".to_string(),
                metadata: PatientMetadata {
                    sex: Some("F".to_string()),
                    age: Some("067Y".to_string()),
                    ..Default::default()
                },
            })
            .unwrap();
        store.add_image(image("img-1")).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());

        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.get_all_images().len(), 1);
        let patient = reopened.get_patient_by_id("p-1").unwrap();
        assert_eq!(patient.metadata.sex.as_deref(), Some("F"));
    }

    #[test]
    fn test_add_image_rejects_duplicate() {
        let mut store = Store::in_memory(StoreData::default());
        store.add_image(image("img-1")).unwrap();
        let err = store.add_image(image("img-1")).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_set_prediction_replaces_previous_run() {
        let mut store = Store::in_memory(StoreData::default());
        store.add_image(image("img-1")).unwrap();
        store
            .set_prediction(Prediction {
                image_id: "img-1".to_string(),
                label: Label::Sain,
                confidence: 0.6,
                model_version: None,
            })
            .unwrap();
        store
            .set_prediction(Prediction {
                image_id: "img-1".to_string(),
                label: Label::Malade,
                confidence: 0.8,
                model_version: Some("v2".to_string()),
            })
            .unwrap();

        assert_eq!(store.data().predictions.len(), 1);
        assert_eq!(store.get_prediction_by_image("img-1").unwrap().label, Label::Malade);
    }

    #[test]
    fn test_set_prediction_unknown_image() {
        let mut store = Store::in_memory(StoreData::default());
        let err = store
            .set_prediction(Prediction {
                image_id: "ghost".to_string(),
                label: Label::Sain,
                confidence: 0.5,
                model_version: None,
            })
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_check_confidence_bounds() {
        assert!(check_confidence(0.0).is_ok());
        assert!(check_confidence(1.0).is_ok());
        assert!(check_confidence(1.01).is_err());
        assert!(check_confidence(-0.1).is_err());
        assert!(check_confidence(f64::NAN).is_err());
    }

    #[test]
    fn test_annotation_by_image_prefers_medecin() {
        let mut store = Store::in_memory(StoreData::default());
        store.add_image(image("img-1")).unwrap();
        assert!(store.get_annotation_by_image("img-1").is_none());

        let mut annotate = |role: Role, label: Label| {
            store
                .add_annotation(NewAnnotation {
                    image_id: "img-1".to_string(),
                    user_role: role,
                    user_name: "alice".to_string(),
                    label,
                    confidence: 0.8,
                    notes: String::new(),
                    additional_info: AdditionalInfo::default(),
                })
                .unwrap();
        };
        annotate(Role::Preparateur, Label::Malade);
        annotate(Role::Preparateur, Label::Sain);
        annotate(Role::Medecin, Label::Malade);
        annotate(Role::Preparateur, Label::Malade);

        let current = store.get_annotation_by_image("img-1").unwrap();
        assert_eq!(current.user_role, Role::Medecin);
        assert_eq!(current.label, Label::Malade);
        assert_eq!(store.annotation_history("img-1", Role::Preparateur).len(), 3);
    }

    #[test]
    fn test_audit_log_newest_first() {
        let mut store = Store::in_memory(StoreData::default());
        store.add_image(image("img-1")).unwrap();
        for label in [Label::Sain, Label::Malade, Label::Sain] {
            store
                .submit_annotation(NewAnnotation {
                    image_id: "img-1".to_string(),
                    user_role: Role::Medecin,
                    user_name: "bob".to_string(),
                    label,
                    confidence: 0.9,
                    notes: String::new(),
                    additional_info: AdditionalInfo::default(),
                })
                .unwrap();
        }
        let versions: Vec<_> = store
            .get_audit_log("img-1")
            .iter()
            .map(|e| e.details.version)
            .collect();
        assert_eq!(versions, vec![Some(3), Some(2), Some(1)]);
    }

    #[test]
    fn test_add_image_rejects_path_like_ids() {
        let mut store = Store::in_memory(StoreData::default());
        for id in ["../escaped", "../../../../escaped", "a/b", "a\\b", "..", ".", "/abs", "x..y"] {
            let err = store.add_image(image(id)).unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "{:?} accepted", id);
        }
        assert!(store.get_all_images().is_empty());

        store.add_image(image("1.2.840.113619.2.55")).unwrap();
        assert_eq!(store.get_all_images().len(), 1);
    }

    #[test]
    fn test_import_image_rejected_leaves_nothing() {
        let mut store = Store::in_memory(StoreData::default());
        let patient = Patient {
            id: "p-1".to_string(),
            metadata: PatientMetadata::default(),
        };
        let prediction = |confidence: f64| Prediction {
            image_id: "img-1".to_string(),
            label: Label::Malade,
            confidence,
            model_version: None,
        };

        let err = store
            .import_image(image("img-1"), Some(patient.clone()), Some(prediction(1.5)))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(store.get_image("img-1").is_none());
        assert!(store.get_patient_by_id("p-1").is_none());

        store
            .import_image(image("img-1"), Some(patient), Some(prediction(0.8)))
            .unwrap();
        assert!(store.get_image("img-1").is_some());
        assert_eq!(store.get_prediction_by_image("img-1").unwrap().confidence, 0.8);
    }

    #[test]
    fn test_import_image_patient_mismatch() {
        let mut store = Store::in_memory(StoreData::default());
        let other = Patient {
            id: "p-2".to_string(),
            metadata: PatientMetadata::default(),
        };
        let err = store.import_image(image("img-1"), Some(other), None).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(store.data().patients.is_empty());
    }

    #[test]
    fn test_failed_save_restores_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let mut store = Store::open(&path).unwrap();
        store.add_image(image("img-1")).unwrap();

        // a directory squatting on the temp file makes every write fail
        std::fs::create_dir(path.with_extension("json.tmp")).unwrap();

        assert!(matches!(store.add_image(image("img-2")), Err(Error::Io(_))));
        assert!(store.get_image("img-2").is_none());

        let err = store
            .add_annotation(NewAnnotation {
                image_id: "img-1".to_string(),
                user_role: Role::Medecin,
                user_name: "bob".to_string(),
                label: Label::Malade,
                confidence: 0.9,
                notes: String::new(),
                additional_info: AdditionalInfo::default(),
            })
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(store.get_all_annotations().is_empty());
        assert!(store.get_audit_log("img-1").is_empty());

        std::fs::remove_dir(path.with_extension("json.tmp")).unwrap();
        store.add_image(image("img-2")).unwrap();
        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.get_all_images().len(), 2);
        assert!(reopened.get_all_annotations().is_empty());
    }
}
