//! Tool configuration tests
//!
//! Environment variables are process-global, so every test that touches
//! them runs serially.

use eksform::config::Config;
use eksform::engine::EngineConfig;
use serial_test::serial;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::{Builder, NamedTempFile};

const ENV_VARS: &[&str] = &[
    "EKSFORM_STACK",
    "EKSFORM_STATE",
    "EKSFORM_PARALLELISM",
    "EKSFORM_MAX_RETRIES",
    "EKSFORM_NO_COLOR",
    "EKSFORM_LOG_FORMAT",
    "EKSFORM_LOG_PATH",
    "EKSFORM_CONFIG",
];

fn clear_env() {
    for var in ENV_VARS {
        std::env::remove_var(var);
    }
}

fn config_file(extension: &str, content: &str) -> NamedTempFile {
    let mut file = Builder::new().suffix(extension).tempfile().unwrap();
    write!(file, "{}", content).unwrap();
    file
}

#[test]
fn test_toml_file() {
    let file = config_file(
        ".toml",
        r#"
[defaults]
state_path = "states/prod.json"
parallelism = 8

[timeouts]
create = 900

[retry]
max_retries = 5
"#,
    );

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.defaults.state_path, PathBuf::from("states/prod.json"));
    assert_eq!(config.defaults.parallelism, 8);
    assert_eq!(config.timeouts.create, 900);
    // Unset fields keep their defaults
    assert_eq!(config.timeouts.delete, 1800);
    assert_eq!(config.retry.max_retries, 5);

    let engine = EngineConfig::from_config(&config);
    assert_eq!(engine.parallelism, 8);
    assert_eq!(engine.timeouts.create, Duration::from_secs(900));
}

#[test]
fn test_yaml_file() {
    let file = config_file(
        ".yml",
        r#"
logging:
  log_format: json
colors:
  enabled: false
"#,
    );

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.logging.log_format, "json");
    assert!(!config.colors.enabled);
}

#[test]
fn test_malformed_file_is_an_error() {
    let file = config_file(".toml", "[defaults\nparallelism = ");
    assert!(Config::from_file(file.path()).is_err());
}

#[test]
#[serial]
fn test_env_overrides() {
    clear_env();
    std::env::set_var("EKSFORM_STATE", "/tmp/eksform-env.json");
    std::env::set_var("EKSFORM_PARALLELISM", "2");
    std::env::set_var("EKSFORM_MAX_RETRIES", "0");
    std::env::set_var("EKSFORM_LOG_FORMAT", "json");

    let config = Config::load(None).unwrap();
    clear_env();

    assert_eq!(config.defaults.state_path, PathBuf::from("/tmp/eksform-env.json"));
    assert_eq!(config.defaults.parallelism, 2);
    assert_eq!(config.retry.max_retries, 0);
    assert_eq!(config.logging.log_format, "json");
}

#[test]
#[serial]
fn test_zero_parallelism_is_ignored() {
    clear_env();
    std::env::set_var("EKSFORM_PARALLELISM", "0");

    let config = Config::load(None).unwrap();
    clear_env();

    assert!(config.defaults.parallelism >= 1);
}

#[test]
#[serial]
fn test_explicit_file_wins_over_environment_file() {
    clear_env();
    let env_file = config_file(".toml", "[defaults]\nparallelism = 6\n");
    let explicit = config_file(".toml", "[defaults]\nparallelism = 12\n");
    std::env::set_var("EKSFORM_CONFIG", env_file.path());

    let config = Config::load(Some(&explicit.path().to_path_buf())).unwrap();
    clear_env();

    assert_eq!(config.defaults.parallelism, 12);
}
