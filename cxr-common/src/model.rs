//! Typed records persisted in the review store
//!
//! Wire values keep the French vocabulary used by the clinical staff
//! (`malade`, `Médecin`, `en_traitement`, ...) so existing store files and
//! exports stay readable by the downstream training tooling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Free-form key/value pairs kept alongside typed fields
pub type Extra = BTreeMap<String, serde_json::Value>;

// ============================================================================
// Vocabulary
// ============================================================================

/// Who produced an annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Technician making the first-pass classification
    #[serde(rename = "Préparateur")]
    Preparateur,
    /// Physician validating or correcting the classification
    #[serde(rename = "Médecin")]
    Medecin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Preparateur => "Préparateur",
            Role::Medecin => "Médecin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Malade,
    Sain,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Malade => "malade",
            Label::Sain => "sain",
        }
    }

    /// Numeric training target: 1 for `malade`, 0 otherwise
    pub fn numeric(&self) -> u8 {
        match self {
            Label::Malade => 1,
            Label::Sain => 0,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Review status of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    #[default]
    Open,
    Finalized,
}

/// Clinical urgency noted by the Préparateur
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Urgency {
    Normale,
    #[serde(rename = "Élevée")]
    Elevee,
    Critique,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Normale => "Normale",
            Urgency::Elevee => "Élevée",
            Urgency::Critique => "Critique",
        }
    }
}

// ============================================================================
// Patients, images, predictions
// ============================================================================

/// Demographic and acquisition metadata extracted at import time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub station_name: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: String,
    #[serde(default)]
    pub metadata: PatientMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub patient_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exam_date: Option<String>,
    pub image_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_part: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_position: Option<String>,
    #[serde(default)]
    pub status: ImageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_by: Option<String>,
}

impl Image {
    pub fn is_finalized(&self) -> bool {
        self.status == ImageStatus::Finalized
    }
}

/// Model output for one image; produced outside this tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub image_id: String,
    pub label: Label,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

// ============================================================================
// Treatments
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Prescription,
    Examens,
    Hospitalisation,
    Orientation,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Prescription => "prescription",
            ActionType::Examens => "examens",
            ActionType::Hospitalisation => "hospitalisation",
            ActionType::Orientation => "orientation",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Treatment follow-up status. Any status may be reassigned to any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreatmentStatus {
    #[default]
    EnTraitement,
    EnAttenteExamens,
    Hospitalise,
    Termine,
}

impl TreatmentStatus {
    pub const ALL: [TreatmentStatus; 4] = [
        TreatmentStatus::EnTraitement,
        TreatmentStatus::EnAttenteExamens,
        TreatmentStatus::Hospitalise,
        TreatmentStatus::Termine,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TreatmentStatus::EnTraitement => "en_traitement",
            TreatmentStatus::EnAttenteExamens => "en_attente_examens",
            TreatmentStatus::Hospitalise => "hospitalise",
            TreatmentStatus::Termine => "termine",
        }
    }
}

impl fmt::Display for TreatmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Urgency of complementary exams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExamUrgency {
    Normale,
    Urgente,
    #[serde(rename = "Très urgente")]
    TresUrgente,
}

/// Action-specific treatment fields. Which fields are meaningful depends on
/// the treatment's [`ActionType`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreatmentDetails {
    // prescription
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medication: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dosage: Option<String>,
    /// Prescription length in days
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,

    // examens
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exam_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_exam: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urgency: Option<ExamUrgency>,

    // hospitalisation / orientation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Estimated stay in days
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// One reassignment of a treatment's status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: TreatmentStatus,
    pub to: TreatmentStatus,
    pub at: DateTime<Utc>,
    pub by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Treatment {
    pub action_type: ActionType,
    #[serde(default)]
    pub status: TreatmentStatus,
    pub started_at: DateTime<Utc>,
    pub started_by: String,
    #[serde(default)]
    pub details: TreatmentDetails,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<StatusChange>,
}

// ============================================================================
// Annotations
// ============================================================================

/// Clinical context attached to an annotation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdditionalInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symptoms: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comorbidities: Option<String>,
    /// Oxygen saturation, percent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spo2: Option<f64>,
    /// Body temperature, °C
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// C-reactive protein, mg/L
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_quality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urgency: Option<Urgency>,
    /// Confirmed outcome after treatment or follow-up; `None` = not determined
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth: Option<Label>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub treatment: Option<Treatment>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// One version of a role's classification of an image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: Uuid,
    pub image_id: String,
    pub patient_id: String,
    pub user_role: Role,
    pub user_name: String,
    pub label: Label,
    pub confidence: f64,
    #[serde(default)]
    pub notes: String,
    /// Monotonic per (image, role), starting at 1
    pub version: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub additional_info: AdditionalInfo,
}

impl Annotation {
    pub fn treatment(&self) -> Option<&Treatment> {
        self.additional_info.treatment.as_ref()
    }
}

// ============================================================================
// Audit log
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    AnnotationCreated,
    AnnotationUpdated,
    TreatmentStarted,
    TreatmentStatusUpdated,
    Finalized,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_label: Option<Label>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_label: Option<Label>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<ActionType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_status: Option<TreatmentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_status: Option<TreatmentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub image_id: String,
    pub timestamp: DateTime<Utc>,
    pub user_name: String,
    pub action: AuditAction,
    #[serde(default)]
    pub details: AuditDetails,
}

impl AuditLogEntry {
    pub fn new(image_id: &str, user_name: &str, action: AuditAction, details: AuditDetails) -> Self {
        Self {
            id: Uuid::new_v4(),
            image_id: image_id.to_string(),
            timestamp: crate::time::now(),
            user_name: user_name.to_string(),
            action,
            details,
        }
    }

    /// `old → new` label change, when the entry records one
    pub fn label_change(&self) -> Option<(Label, Label)> {
        match (self.details.old_label, self.details.new_label) {
            (Some(old), Some(new)) => Some((old, new)),
            _ => None,
        }
    }
}
