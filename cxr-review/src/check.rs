//! Installation check (`cxr-review check`)
//!
//! Verifies that the folder layout can be created, the store loads, every
//! registered image file is present and the exports folder is writable.

use cxr_common::config::RootFolderInitializer;
use cxr_common::Store;
use std::path::Path;

/// Missing files listed individually before summarizing
const MAX_LISTED_MISSING: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: &'static str,
    pub ok: bool,
    pub detail: String,
}

impl CheckResult {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            ok: true,
            detail: detail.into(),
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            ok: false,
            detail: detail.into(),
        }
    }

    /// One report line, e.g. `✅ store: 12 image(s), 30 annotation(s)`
    pub fn line(&self) -> String {
        let mark = if self.ok { "✅" } else { "❌" };
        format!("{} {}: {}", mark, self.name, self.detail)
    }
}

pub fn run_checks(layout: &RootFolderInitializer) -> Vec<CheckResult> {
    let mut results = Vec::new();

    match layout.ensure_directory_exists() {
        Ok(()) => results.push(CheckResult::pass(
            "root folder",
            layout.root_folder().display().to_string(),
        )),
        Err(e) => {
            results.push(CheckResult::fail("root folder", e.to_string()));
            return results;
        }
    }

    match Store::open(layout.store_path()) {
        Ok(store) => {
            results.push(CheckResult::pass(
                "store",
                format!(
                    "{} image(s), {} annotation(s)",
                    store.get_all_images().len(),
                    store.get_all_annotations().len()
                ),
            ));
            results.push(check_image_files(&store));
        }
        Err(e) => results.push(CheckResult::fail("store", e.to_string())),
    }

    results.push(check_writable(&layout.exports_dir()));
    results
}

fn check_image_files(store: &Store) -> CheckResult {
    let missing: Vec<&str> = store
        .get_all_images()
        .iter()
        .filter(|i| !Path::new(&i.image_path).is_file())
        .map(|i| i.id.as_str())
        .collect();

    if missing.is_empty() {
        return CheckResult::pass(
            "image files",
            format!("{} present", store.get_all_images().len()),
        );
    }

    let mut listed = missing
        .iter()
        .take(MAX_LISTED_MISSING)
        .copied()
        .collect::<Vec<_>>()
        .join(", ");
    if missing.len() > MAX_LISTED_MISSING {
        listed.push_str(&format!(" and {} more", missing.len() - MAX_LISTED_MISSING));
    }
    CheckResult::fail("image files", format!("{} missing: {}", missing.len(), listed))
}

fn check_writable(dir: &Path) -> CheckResult {
    let marker = dir.join(".write_check");
    match std::fs::write(&marker, b"ok").and_then(|_| std::fs::remove_file(&marker)) {
        Ok(()) => CheckResult::pass("exports folder", dir.display().to_string()),
        Err(e) => CheckResult::fail("exports folder", format!("{}: {}", dir.display(), e)),
    }
}
