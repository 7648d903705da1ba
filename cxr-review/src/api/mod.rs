//! HTTP API handlers for cxr-review

pub mod buildinfo;
pub mod error;
pub mod health;
pub mod images;
pub mod results;
pub mod review;
pub mod treatments;
pub mod ui;

pub use buildinfo::get_build_info;
pub use error::ApiError;
pub use health::health_routes;
pub use images::{classify_image, import_image, serve_image_file};
pub use results::{export_bundle, finalize_batch, results, training_export};
pub use review::{audit_log, patient_detail, review_queue, validate_diagnosis};
pub use treatments::{
    patients_in_treatment, start_treatment, treatment_candidates, update_treatment_status,
};
pub use ui::{serve_app_js, serve_index};
