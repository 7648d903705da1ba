//! Shared fixtures for cxr-common integration tests

#![allow(dead_code)]

use cxr_common::annotation::NewAnnotation;
use cxr_common::model::{AdditionalInfo, Image, Patient, PatientMetadata, Prediction, Urgency};
use cxr_common::{Label, Role, Store};
use std::path::Path;

/// Register an image (and its patient) whose file lives under `dir`.
/// When `with_file` is false the image path points at a missing file.
pub fn add_image(store: &mut Store, dir: &Path, id: &str, with_file: bool) {
    let image_path = dir.join(format!("{}.png", id));
    if with_file {
        std::fs::write(&image_path, format!("fake png bytes for {}", id)).unwrap();
    }
    let patient_id = format!("P{}", id);
    store
        .add_patient(Patient {
            id: patient_id.clone(),
            metadata: PatientMetadata {
                sex: Some("M".to_string()),
                age: Some("054Y".to_string()),
                ..Default::default()
            },
        })
        .unwrap();
    store
        .add_image(Image {
            id: id.to_string(),
            patient_id,
            exam_date: Some("2024-10-01".to_string()),
            image_path: image_path.to_string_lossy().into_owned(),
            modality: Some("DX".to_string()),
            body_part: Some("CHEST".to_string()),
            patient_position: Some("PA".to_string()),
            view_position: Some("PA".to_string()),
            status: Default::default(),
            finalized_at: None,
            finalized_by: None,
        })
        .unwrap();
    store
        .set_prediction(Prediction {
            image_id: id.to_string(),
            label: Label::Malade,
            confidence: 0.81,
            model_version: Some("densenet-v1".to_string()),
        })
        .unwrap();
}

pub fn classify(store: &mut Store, id: &str, role: Role, label: Label) {
    let user_name = match role {
        Role::Preparateur => "tech-lea",
        Role::Medecin => "dr-martin",
    };
    store
        .submit_annotation(NewAnnotation {
            image_id: id.to_string(),
            user_role: role,
            user_name: user_name.to_string(),
            label,
            confidence: 0.9,
            notes: format!("{} notes", role),
            additional_info: AdditionalInfo {
                spo2: (role == Role::Preparateur).then_some(93.0),
                urgency: (role == Role::Preparateur).then_some(Urgency::Elevee),
                ..Default::default()
            },
        })
        .unwrap();
}
