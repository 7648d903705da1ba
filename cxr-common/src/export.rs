//! Export generator
//!
//! Two kinds of export leave the review store:
//! - the training hand-off file `data/export_training_data.json`, one
//!   [`TrainingRecord`] per finalized image;
//! - timestamped bundles under `data/exports/export_<stamp>/` holding any of
//!   a flat CSV, a full JSON snapshot and a zipped image folder tree split
//!   into train/validation/test.
//!
//! Missing or unreadable image files never abort a bundle: they are logged,
//! listed in the report's warnings, and the rest of the export completes.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::config::DEFAULT_EXPORT_SEED;
use crate::model::{Annotation, Image, Label, Patient, Prediction, Role};
use crate::results::ValidatedImage;
use crate::store::Store;
use crate::{time, Error, Result};

/// Folder (and zip root) holding the image tree
pub const TRAINING_DIR: &str = "training_data";
pub const CSV_FILE: &str = "dataset.csv";
pub const JSON_FILE: &str = "dataset.json";
pub const ZIP_FILE: &str = "training_data.zip";
pub const LABELS_FILE: &str = "labels.csv";

// ============================================================================
// Training hand-off
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub image_id: String,
    pub image_path: String,
    pub patient_id: String,
    pub final_label: Label,
    pub ground_truth: Option<Label>,
    pub confidence: f64,
    pub notes: String,
    pub validated_by: String,
    pub validated_at: DateTime<Utc>,
}

impl From<&ValidatedImage> for TrainingRecord {
    fn from(v: &ValidatedImage) -> Self {
        Self {
            image_id: v.image.id.clone(),
            image_path: v.image.image_path.clone(),
            patient_id: v.image.patient_id.clone(),
            final_label: v.annotation.label,
            ground_truth: v.annotation.additional_info.ground_truth,
            confidence: v.annotation.confidence,
            notes: v.annotation.notes.clone(),
            validated_by: v.annotation.user_name.clone(),
            validated_at: v.annotation.created_at,
        }
    }
}

impl Store {
    /// One record per finalized image with a Médecin annotation
    pub fn training_records(&self) -> Vec<TrainingRecord> {
        self.finalized_images().iter().map(TrainingRecord::from).collect()
    }
}

/// Write the training hand-off file (pretty JSON, UTF-8)
pub fn write_training_export(records: &[TrainingRecord], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec_pretty(records)?;
    std::fs::write(path, bytes)?;
    info!("Wrote {} training record(s) to {}", records.len(), path.display());
    Ok(())
}

// ============================================================================
// Bundle input
// ============================================================================

/// Snapshot of one validated image and everything known about it
#[derive(Debug, Clone, Serialize)]
pub struct ExportRecord {
    pub image: Image,
    pub patient: Option<Patient>,
    pub prediction: Option<Prediction>,
    pub preparer_annotation: Option<Annotation>,
    pub annotation: Annotation,
}

impl ExportRecord {
    pub fn final_label(&self) -> Label {
        self.annotation.label
    }

    pub fn label_changed(&self) -> Option<bool> {
        self.prediction.as_ref().map(|p| p.label != self.annotation.label)
    }
}

impl Store {
    pub fn export_records(&self, validated: &[ValidatedImage]) -> Vec<ExportRecord> {
        validated
            .iter()
            .map(|v| ExportRecord {
                image: v.image.clone(),
                patient: self.get_patient_by_id(&v.image.patient_id).cloned(),
                prediction: self.get_prediction_by_image(&v.image.id).cloned(),
                preparer_annotation: self
                    .current_annotation(&v.image.id, Role::Preparateur)
                    .cloned(),
                annotation: v.annotation.clone(),
            })
            .collect()
    }
}

// ============================================================================
// Options and report
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitRatios {
    pub train: f64,
    pub validation: f64,
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self {
            train: 0.70,
            validation: 0.15,
        }
    }
}

impl SplitRatios {
    fn check(&self) -> Result<()> {
        let valid = |r: f64| r.is_finite() && (0.0..=1.0).contains(&r);
        if valid(self.train) && valid(self.validation) && self.train + self.validation <= 1.0 {
            Ok(())
        } else {
            Err(Error::InvalidInput(format!(
                "split ratios must be within 0..=1 and sum to at most 1 (train {}, validation {})",
                self.train, self.validation
            )))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    pub csv: bool,
    pub json: bool,
    pub zip: bool,
    pub split_dataset: bool,
    pub seed: u64,
    pub ratios: SplitRatios,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            csv: true,
            json: true,
            zip: true,
            split_dataset: false,
            seed: DEFAULT_EXPORT_SEED,
            ratios: SplitRatios::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportReport {
    pub export_dir: PathBuf,
    pub csv_path: Option<PathBuf>,
    pub json_path: Option<PathBuf>,
    pub zip_path: Option<PathBuf>,
    pub rows: usize,
    pub images_copied: usize,
    pub warnings: Vec<String>,
}

// ============================================================================
// Dataset split
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Validation,
    Test,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Validation => "validation",
            Split::Test => "test",
        }
    }
}

/// Assign every image id to a split.
///
/// Ids are sorted before the seeded shuffle, so the assignment depends only
/// on the set of ids, the seed and the ratios.
pub fn assign_splits(image_ids: &[String], seed: u64, ratios: SplitRatios) -> BTreeMap<String, Split> {
    let mut ids: Vec<&String> = image_ids.iter().collect();
    ids.sort();
    ids.dedup();

    let mut rng = StdRng::seed_from_u64(seed);
    ids.shuffle(&mut rng);

    let n = ids.len();
    let n_train = ((n as f64 * ratios.train).round() as usize).min(n);
    let n_validation = ((n as f64 * ratios.validation).round() as usize).min(n - n_train);

    ids.into_iter()
        .enumerate()
        .map(|(i, id)| {
            let split = if i < n_train {
                Split::Train
            } else if i < n_train + n_validation {
                Split::Validation
            } else {
                Split::Test
            };
            (id.clone(), split)
        })
        .collect()
}

// ============================================================================
// Generator
// ============================================================================

/// Flat statistical row of `dataset.csv`
#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    image_id: &'a str,
    patient_id: &'a str,
    exam_date: Option<&'a str>,
    sex: Option<&'a str>,
    age: Option<&'a str>,
    modality: Option<&'a str>,
    body_part: Option<&'a str>,
    view_position: Option<&'a str>,
    model_label: Option<&'static str>,
    model_confidence: Option<f64>,
    preparer_label: Option<&'static str>,
    final_label: &'static str,
    label_numeric: u8,
    confidence: f64,
    ground_truth: Option<&'static str>,
    label_changed: Option<bool>,
    urgency: Option<&'static str>,
    spo2: Option<f64>,
    temperature: Option<f64>,
    crp: Option<f64>,
    treatment_action: Option<&'static str>,
    treatment_status: Option<&'static str>,
    validated_by: &'a str,
}

impl<'a> From<&'a ExportRecord> for CsvRow<'a> {
    fn from(r: &'a ExportRecord) -> Self {
        let info = &r.annotation.additional_info;
        let metadata = r.patient.as_ref().map(|p| &p.metadata);
        let treatment = info.treatment.as_ref();
        Self {
            image_id: &r.image.id,
            patient_id: &r.image.patient_id,
            exam_date: r.image.exam_date.as_deref(),
            sex: metadata.and_then(|m| m.sex.as_deref()),
            age: metadata.and_then(|m| m.age.as_deref()),
            modality: r.image.modality.as_deref(),
            body_part: r.image.body_part.as_deref(),
            view_position: r.image.view_position.as_deref(),
            model_label: r.prediction.as_ref().map(|p| p.label.as_str()),
            model_confidence: r.prediction.as_ref().map(|p| p.confidence),
            preparer_label: r.preparer_annotation.as_ref().map(|a| a.label.as_str()),
            final_label: r.final_label().as_str(),
            label_numeric: r.final_label().numeric(),
            confidence: r.annotation.confidence,
            ground_truth: info.ground_truth.map(|l| l.as_str()),
            label_changed: r.label_changed(),
            urgency: r
                .preparer_annotation
                .as_ref()
                .and_then(|a| a.additional_info.urgency)
                .or(info.urgency)
                .map(|u| u.as_str()),
            spo2: info.spo2.or_else(|| preparer_info(r, |i| i.spo2)),
            temperature: info.temperature.or_else(|| preparer_info(r, |i| i.temperature)),
            crp: info.crp.or_else(|| preparer_info(r, |i| i.crp)),
            treatment_action: treatment.map(|t| t.action_type.as_str()),
            treatment_status: treatment.map(|t| t.status.as_str()),
            validated_by: &r.annotation.user_name,
        }
    }
}

/// Vital signs are usually entered by the Préparateur
fn preparer_info(
    r: &ExportRecord,
    field: impl Fn(&crate::model::AdditionalInfo) -> Option<f64>,
) -> Option<f64> {
    r.preparer_annotation
        .as_ref()
        .and_then(|a| field(&a.additional_info))
}

#[derive(Debug, Serialize)]
struct LabelsRow<'a> {
    filename: String,
    image_id: &'a str,
    label: &'static str,
    label_numeric: u8,
    split: Option<&'static str>,
}

#[derive(Serialize)]
struct JsonSnapshot<'a> {
    exported_at: DateTime<Utc>,
    count: usize,
    records: &'a [ExportRecord],
}

/// Writes export bundles under one exports folder
#[derive(Debug, Clone)]
pub struct ExportGenerator {
    exports_dir: PathBuf,
}

impl ExportGenerator {
    pub fn new(exports_dir: impl Into<PathBuf>) -> Self {
        Self {
            exports_dir: exports_dir.into(),
        }
    }

    pub fn run(&self, records: &[ExportRecord], options: &ExportOptions) -> Result<ExportReport> {
        self.run_at(records, options, time::now())
    }

    pub fn run_at(
        &self,
        records: &[ExportRecord],
        options: &ExportOptions,
        at: DateTime<Utc>,
    ) -> Result<ExportReport> {
        if !(options.csv || options.json || options.zip) {
            return Err(Error::InvalidInput("no export format selected".to_string()));
        }
        if options.split_dataset {
            options.ratios.check()?;
        }

        let export_dir = self.create_export_dir(at)?;
        let mut report = ExportReport {
            export_dir: export_dir.clone(),
            rows: records.len(),
            ..Default::default()
        };

        if options.csv {
            let path = export_dir.join(CSV_FILE);
            write_csv(records, &path)?;
            report.csv_path = Some(path);
        }

        if options.json {
            let path = export_dir.join(JSON_FILE);
            let snapshot = JsonSnapshot {
                exported_at: at,
                count: records.len(),
                records,
            };
            std::fs::write(&path, serde_json::to_vec_pretty(&snapshot)?)?;
            report.json_path = Some(path);
        }

        if options.zip {
            let splits = options.split_dataset.then(|| {
                let ids: Vec<String> = records.iter().map(|r| r.image.id.clone()).collect();
                assign_splits(&ids, options.seed, options.ratios)
            });
            report.images_copied =
                build_image_tree(records, splits.as_ref(), &export_dir, &mut report.warnings)?;

            let path = export_dir.join(ZIP_FILE);
            zip_directory(&export_dir, TRAINING_DIR, &path)?;
            report.zip_path = Some(path);
        }

        info!(
            "Export {} complete: {} row(s), {} image(s) copied, {} warning(s)",
            export_dir.display(),
            report.rows,
            report.images_copied,
            report.warnings.len()
        );
        Ok(report)
    }

    /// `export_<stamp>`, suffixed when an export already used that second
    fn create_export_dir(&self, at: DateTime<Utc>) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.exports_dir)?;
        let base = format!("export_{}", time::export_stamp(at));
        let mut candidate = self.exports_dir.join(&base);
        let mut n = 1;
        while candidate.exists() {
            candidate = self.exports_dir.join(format!("{}_{}", base, n));
            n += 1;
        }
        std::fs::create_dir(&candidate)?;
        Ok(candidate)
    }
}

fn write_csv(records: &[ExportRecord], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(CsvRow::from(record))?;
    }
    writer.flush()?;
    Ok(())
}

/// Copy images into `training_data/[split/]<label>/<image_id><ext>` and
/// write `labels.csv`. Returns the number of images copied.
fn build_image_tree(
    records: &[ExportRecord],
    splits: Option<&BTreeMap<String, Split>>,
    export_dir: &Path,
    warnings: &mut Vec<String>,
) -> Result<usize> {
    let root = export_dir.join(TRAINING_DIR);
    std::fs::create_dir_all(&root)?;

    let mut labels = csv::Writer::from_path(root.join(LABELS_FILE))?;
    let mut copied = 0;

    for record in records {
        let label = record.final_label();
        let split = splits.and_then(|s| s.get(&record.image.id)).copied();

        let mut relative = PathBuf::new();
        if let Some(split) = split {
            relative.push(split.as_str());
        }
        relative.push(label.as_str());

        let source = Path::new(&record.image.image_path);
        let file_name = match source.extension() {
            Some(ext) => format!("{}.{}", record.image.id, ext.to_string_lossy()),
            None => record.image.id.clone(),
        };
        relative.push(&file_name);

        if !source.is_file() {
            let message = format!(
                "image {}: source file not found ({})",
                record.image.id,
                source.display()
            );
            warn!("{}", message);
            warnings.push(message);
            continue;
        }

        let destination = root.join(&relative);
        let contained = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
            && destination.starts_with(&root);
        if !contained {
            let message = format!(
                "image {}: destination {} escapes the export folder, skipped",
                record.image.id,
                relative.display()
            );
            warn!("{}", message);
            warnings.push(message);
            continue;
        }

        let copy = destination
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|_| std::fs::copy(source, &destination));
        if let Err(e) = copy {
            let message = format!("image {}: copy failed ({})", record.image.id, e);
            warn!("{}", message);
            warnings.push(message);
            continue;
        }
        copied += 1;

        labels.serialize(LabelsRow {
            filename: zip_entry_name(&relative),
            image_id: &record.image.id,
            label: label.as_str(),
            label_numeric: label.numeric(),
            split: split.map(|s| s.as_str()),
        })?;
    }

    labels.flush()?;
    Ok(copied)
}

/// Zip `<base>/<dir_name>` into `zip_path`, entries rooted at `dir_name/`
fn zip_directory(base: &Path, dir_name: &str, zip_path: &Path) -> Result<()> {
    let mut zip = ZipWriter::new(File::create(zip_path)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(base.join(dir_name)).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(base)
            .map_err(|e| Error::Internal(format!("zip entry outside export folder: {}", e)))?;
        let name = zip_entry_name(relative);

        if entry.file_type().is_dir() {
            zip.add_directory(name, options)?;
        } else {
            zip.start_file(name, options)?;
            let mut file = File::open(entry.path())?;
            std::io::copy(&mut file, &mut zip)?;
        }
    }

    zip.finish()?;
    Ok(())
}

/// Forward-slash path regardless of platform
fn zip_entry_name(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
