//! Export bundle tests: CSV rows, JSON snapshot, zipped image tree and
//! degraded paths for missing images.

mod common;

use common::{add_image, classify};
use cxr_common::export::{
    assign_splits, write_training_export, ExportGenerator, ExportOptions, SplitRatios,
    TrainingRecord, LABELS_FILE, TRAINING_DIR,
};
use cxr_common::{Label, Role, Store};
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

fn validated_store(dir: &Path, ids: &[(&str, Label, bool)]) -> Store {
    let mut store = Store::open(dir.join("store.json")).unwrap();
    let images = dir.join("images");
    std::fs::create_dir_all(&images).unwrap();
    for (id, label, with_file) in ids {
        add_image(&mut store, &images, id, *with_file);
        classify(&mut store, id, Role::Preparateur, Label::Malade);
        classify(&mut store, id, Role::Medecin, *label);
    }
    store
}

fn read_csv(path: &Path) -> Vec<HashMap<String, String>> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader.deserialize().map(|r| r.unwrap()).collect()
}

fn zip_names(path: &Path) -> Vec<String> {
    let archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
    archive.file_names().map(|s| s.to_string()).collect()
}

#[test]
fn test_csv_rows_match_validated_images() {
    let dir = tempfile::tempdir().unwrap();
    let store = validated_store(
        dir.path(),
        &[
            ("a", Label::Malade, true),
            ("b", Label::Sain, true),
            ("c", Label::Sain, false),
        ],
    );
    let validated = store.validated_images();
    let records = store.export_records(&validated);

    let generator = ExportGenerator::new(dir.path().join("exports"));
    let report = generator
        .run(
            &records,
            &ExportOptions {
                json: false,
                zip: false,
                ..Default::default()
            },
        )
        .unwrap();

    let rows = read_csv(report.csv_path.as_ref().unwrap());
    assert_eq!(rows.len(), validated.len());
    assert_eq!(report.rows, validated.len());
    for row in &rows {
        let expected = if row["final_label"] == "malade" { "1" } else { "0" };
        assert_eq!(row["label_numeric"], expected);
    }

    let b = rows.iter().find(|r| r["image_id"] == "b").unwrap();
    assert_eq!(b["preparer_label"], "malade");
    assert_eq!(b["model_label"], "malade");
    assert_eq!(b["label_changed"], "true");
    assert_eq!(b["urgency"], "Élevée");
    assert_eq!(b["sex"], "M");
    assert!(report.json_path.is_none());
    assert!(report.zip_path.is_none());
}

#[test]
fn test_json_snapshot_has_nested_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let store = validated_store(dir.path(), &[("a", Label::Malade, true)]);
    let records = store.export_records(&store.validated_images());

    let report = ExportGenerator::new(dir.path().join("exports"))
        .run(
            &records,
            &ExportOptions {
                csv: false,
                zip: false,
                ..Default::default()
            },
        )
        .unwrap();

    let bytes = std::fs::read(report.json_path.unwrap()).unwrap();
    let snapshot: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(snapshot["count"], 1);
    let record = &snapshot["records"][0];
    assert_eq!(record["patient"]["metadata"]["age"], "054Y");
    assert_eq!(record["preparer_annotation"]["additional_info"]["spo2"], 93.0);
    assert_eq!(record["annotation"]["user_role"], "Médecin");
}

#[test]
fn test_zip_tree_without_split_and_missing_image_warning() {
    let dir = tempfile::tempdir().unwrap();
    let store = validated_store(
        dir.path(),
        &[("a", Label::Malade, true), ("b", Label::Sain, false)],
    );
    let records = store.export_records(&store.validated_images());

    let report = ExportGenerator::new(dir.path().join("exports"))
        .run(&records, &ExportOptions::default())
        .unwrap();

    assert_eq!(report.images_copied, 1);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("image b"));

    let names = zip_names(report.zip_path.as_ref().unwrap());
    assert!(names.contains(&"training_data/malade/a.png".to_string()));
    assert!(names.contains(&format!("{}/{}", TRAINING_DIR, LABELS_FILE)));
    assert!(!names.iter().any(|n| n.contains("/sain/b")));

    let labels = read_csv(&report.export_dir.join(TRAINING_DIR).join(LABELS_FILE));
    assert_eq!(labels.len(), 1);
    assert_eq!(labels[0]["filename"], "malade/a.png");
    assert_eq!(labels[0]["split"], "");
}

#[test]
fn test_zip_tree_with_seeded_split_is_reproducible() {
    let dir = tempfile::tempdir().unwrap();
    let ids: Vec<String> = (0..12).map(|i| format!("img{:02}", i)).collect();
    let cases: Vec<(&str, Label, bool)> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let label = if i % 3 == 0 { Label::Sain } else { Label::Malade };
            (id.as_str(), label, true)
        })
        .collect();
    let store = validated_store(dir.path(), &cases);
    let records = store.export_records(&store.validated_images());

    let options = ExportOptions {
        split_dataset: true,
        seed: 1234,
        ..Default::default()
    };
    let generator = ExportGenerator::new(dir.path().join("exports"));
    let first = generator.run(&records, &options).unwrap();
    let second = generator.run(&records, &options).unwrap();
    assert_ne!(first.export_dir, second.export_dir);

    let first_labels = read_csv(&first.export_dir.join(TRAINING_DIR).join(LABELS_FILE));
    let second_labels = read_csv(&second.export_dir.join(TRAINING_DIR).join(LABELS_FILE));
    assert_eq!(first_labels, second_labels);

    let expected = assign_splits(&ids, 1234, SplitRatios::default());
    for row in &first_labels {
        let split = expected[&row["image_id"]].as_str();
        assert_eq!(row["split"], split);
        assert!(row["filename"].starts_with(&format!("{}/{}/", split, row["label"])));
    }

    let names = zip_names(first.zip_path.as_ref().unwrap());
    let copied = names
        .iter()
        .filter(|n| n.ends_with(".png"))
        .count();
    assert_eq!(copied, 12);
}

#[test]
fn test_no_format_selected_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let err = ExportGenerator::new(dir.path())
        .run(
            &[],
            &ExportOptions {
                csv: false,
                json: false,
                zip: false,
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, cxr_common::Error::InvalidInput(_)));
}

#[test]
fn test_training_export_only_contains_finalized() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = validated_store(
        dir.path(),
        &[("a", Label::Malade, true), ("b", Label::Sain, true)],
    );
    store
        .mark_batch_finalized(&["a".to_string()], "dr-martin")
        .unwrap();

    let records = store.training_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].image_id, "a");
    assert_eq!(records[0].validated_by, "dr-martin");

    let path = dir.path().join("data").join("export_training_data.json");
    write_training_export(&records, &path).unwrap();
    let back: Vec<TrainingRecord> =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(back, records);
}
