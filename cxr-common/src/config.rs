//! Configuration loading and root folder resolution
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. `CXR_ROOT_FOLDER` environment variable
//! 3. `root_folder` key of the TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing or malformed config file never stops startup: a warning is
//! logged and the compiled defaults are used.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "CXR_ROOT_FOLDER";

/// Default HTTP port of the review service
pub const DEFAULT_PORT: u16 = 5760;

/// Default seed for the train/validation/test split
pub const DEFAULT_EXPORT_SEED: u64 = 42;

/// Optional keys read from `config.toml`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub port: Option<u16>,
    pub log_level: Option<String>,
    pub export_seed: Option<u64>,
}

impl TomlConfig {
    /// Parse config text; malformed content is an error for the caller to degrade on
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load the platform config file, falling back to defaults with a warning
    pub fn load_or_default() -> Self {
        let Some(path) = config_file_path() else {
            debug!("No config file found, using compiled defaults");
            return Self::default();
        };
        Self::load_from(&path)
    }

    /// Load a specific config file, falling back to defaults with a warning
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match Self::parse(&content) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Ignoring malformed config file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Could not read config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

/// Fallback values compiled into the binary
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub port: u16,
    pub log_level: String,
    pub export_seed: u64,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: default_root_folder(),
            port: DEFAULT_PORT,
            log_level: "info".to_string(),
            export_seed: DEFAULT_EXPORT_SEED,
        }
    }
}

/// Resolves the root folder following the priority order above
#[derive(Debug, Clone)]
pub struct RootFolderResolver {
    cli_arg: Option<PathBuf>,
    toml: TomlConfig,
}

impl RootFolderResolver {
    pub fn new(cli_arg: Option<PathBuf>, toml: TomlConfig) -> Self {
        Self { cli_arg, toml }
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.toml.root_folder {
            return path.clone();
        }

        CompiledDefaults::for_current_platform().root_folder
    }
}

/// Folder layout under the resolved root
#[derive(Debug, Clone)]
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    /// `<root>/data`
    pub fn data_dir(&self) -> PathBuf {
        self.root_folder.join("data")
    }

    /// `<root>/data/store.json`
    pub fn store_path(&self) -> PathBuf {
        self.data_dir().join("store.json")
    }

    /// `<root>/data/export_training_data.json`
    pub fn training_export_path(&self) -> PathBuf {
        self.data_dir().join("export_training_data.json")
    }

    /// `<root>/data/exports`
    pub fn exports_dir(&self) -> PathBuf {
        self.data_dir().join("exports")
    }

    /// Create the root, data and exports folders if missing
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(self.exports_dir()).map_err(|e| {
            Error::Config(format!(
                "Cannot create data folders under {}: {}",
                self.root_folder.display(),
                e
            ))
        })
    }
}

/// Platform config file location: `<config_dir>/cxr-review/config.toml`,
/// plus `/etc/cxr-review/config.toml` on Linux
fn config_file_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("cxr-review").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/cxr-review/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("cxr-review"))
        .unwrap_or_else(|| PathBuf::from("./cxr_review_data"))
}
