//! # CXR Review Common Library
//!
//! Shared code for the chest X-ray review service:
//! - Typed records (images, patients, predictions, annotations, treatments, audit log)
//! - JSON-backed store
//! - Annotation versioning and treatment lifecycle
//! - Review queue, batch finalization and export generation
//! - Configuration loading

pub mod annotation;
pub mod config;
pub mod error;
pub mod export;
pub mod model;
pub mod results;
pub mod review;
pub mod store;
pub mod time;
pub mod treatment;

pub use error::{Error, Result};
pub use model::{Label, Role};
pub use store::Store;
