//! Root folder resolution and graceful degradation of the config file
//!
//! Tests that manipulate CXR_ROOT_FOLDER are marked with #[serial] so they
//! never run in parallel with each other.

use cxr_common::config::{
    CompiledDefaults, RootFolderInitializer, RootFolderResolver, TomlConfig, DEFAULT_PORT,
    ROOT_FOLDER_ENV,
};
use serial_test::serial;
use std::env;
use std::path::PathBuf;

#[test]
fn test_compiled_defaults_for_current_platform() {
    let defaults = CompiledDefaults::for_current_platform();
    assert!(!defaults.root_folder.as_os_str().is_empty());
    assert!(defaults.root_folder.ends_with("cxr-review") || defaults.root_folder.ends_with("cxr_review_data"));
    assert_eq!(defaults.port, DEFAULT_PORT);
    assert_eq!(defaults.log_level, "info");
}

#[test]
#[serial]
fn test_cli_argument_wins() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/cxr-from-env");
    let toml = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/cxr-from-toml")),
        ..Default::default()
    };
    let resolver = RootFolderResolver::new(Some(PathBuf::from("/tmp/cxr-from-cli")), toml);
    assert_eq!(resolver.resolve(), PathBuf::from("/tmp/cxr-from-cli"));
    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_env_beats_toml() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/cxr-from-env");
    let toml = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/cxr-from-toml")),
        ..Default::default()
    };
    let resolver = RootFolderResolver::new(None, toml);
    assert_eq!(resolver.resolve(), PathBuf::from("/tmp/cxr-from-env"));
    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_toml_then_default() {
    env::remove_var(ROOT_FOLDER_ENV);
    let toml = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/cxr-from-toml")),
        ..Default::default()
    };
    assert_eq!(
        RootFolderResolver::new(None, toml).resolve(),
        PathBuf::from("/tmp/cxr-from-toml")
    );
    assert_eq!(
        RootFolderResolver::new(None, TomlConfig::default()).resolve(),
        CompiledDefaults::for_current_platform().root_folder
    );
}

#[test]
fn test_malformed_config_file_degrades_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "root_folder = [unterminated").unwrap();
    let config = TomlConfig::load_from(&path);
    assert!(config.root_folder.is_none());

    let missing = TomlConfig::load_from(&dir.path().join("absent.toml"));
    assert!(missing.port.is_none());
}

#[test]
fn test_initializer_creates_layout() {
    let dir = tempfile::tempdir().unwrap();
    let init = RootFolderInitializer::new(dir.path().join("root"));
    init.ensure_directory_exists().unwrap();
    assert!(init.data_dir().is_dir());
    assert!(init.exports_dir().is_dir());
    // Idempotent
    init.ensure_directory_exists().unwrap();
}
