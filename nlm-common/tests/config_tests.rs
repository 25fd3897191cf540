//! Tests for TOML configuration loading

use nlm_common::config::TomlConfig;
use nlm_common::Error;
use std::io::Write;
use std::path::PathBuf;

#[test]
fn test_load_full_config() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
root_folder = "/srv/nlm"
host = "0.0.0.0"
port = 5810
batch_size = 250
processing_interval_ms = 2000
shutdown_timeout_ms = 3000
forms = ["footer", "popup"]
"#
    )
    .unwrap();

    let config = TomlConfig::load(file.path()).unwrap();
    assert_eq!(config.root_folder, Some(PathBuf::from("/srv/nlm")));
    assert_eq!(config.host.as_deref(), Some("0.0.0.0"));
    assert_eq!(config.port, Some(5810));
    assert_eq!(config.batch_size, Some(250));
    assert_eq!(config.processing_interval_ms, Some(2000));
    assert_eq!(config.shutdown_timeout_ms, Some(3000));
    assert_eq!(config.forms, vec!["footer".to_string(), "popup".to_string()]);
}

#[test]
fn test_partial_config_leaves_rest_unset() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "batch_size = 10").unwrap();

    let config = TomlConfig::load(file.path()).unwrap();
    assert_eq!(config.batch_size, Some(10));
    assert_eq!(config.port, None);
    assert_eq!(config.root_folder, None);
    assert!(config.forms.is_empty());
}

#[test]
fn test_invalid_toml_is_config_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "batch_size = [not toml").unwrap();

    let result = TomlConfig::load(file.path());
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_missing_file_is_io_error() {
    let result = TomlConfig::load(std::path::Path::new("/nonexistent/nlm-fv.toml"));
    assert!(matches!(result, Err(Error::Io(_))));
}
