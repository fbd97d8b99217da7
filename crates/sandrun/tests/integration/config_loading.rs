use sandrun::config::{Config, ConfigError};
use sandrun::{EXAMPLE_CONFIG, Stage};

use super::FIXTURES_PATH;

#[test]
fn test_load_minimal_config() {
    let path = format!("{FIXTURES_PATH}/configs/valid_minimal.toml");
    let config = Config::from_file(&path).expect("Failed to load config");

    let shell = config.get_language("sh").expect("sh not found");
    assert!(!shell.is_compiled());
    assert!(!shell.toolchain);
    assert_eq!(config.cache.ttl, 60);
    assert_eq!(config.cache.max_parallel, 5);
    assert_eq!(
        config.stage_defaults(Stage::Run),
        sandrun::ResourceLimits::run_defaults()
    );
}

#[test]
fn test_example_config_on_disk_matches_embedded() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/sandrun.example.toml");
    let from_disk = Config::from_file(path).expect("Failed to load config");
    let embedded = Config::parse_toml(EXAMPLE_CONFIG).expect("Failed to parse config");

    assert_eq!(from_disk.languages.len(), embedded.languages.len());
    assert!(from_disk.languages.contains_key("go"));
    assert!(from_disk.languages.contains_key("python"));
}

#[test]
fn test_load_invalid_empty_run_command() {
    let path = format!("{FIXTURES_PATH}/configs/invalid_empty_run_command.toml");
    let result = Config::from_file(&path);
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
fn test_load_invalid_zero_parallel() {
    let path = format!("{FIXTURES_PATH}/configs/invalid_zero_parallel.toml");
    let result = Config::from_file(&path);
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
fn test_load_invalid_output_name() {
    let path = format!("{FIXTURES_PATH}/configs/invalid_output_name.toml");
    let result = Config::from_file(&path);
    assert!(matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("output name")));
}

#[test]
fn test_load_missing_file() {
    let result = Config::from_file(format!("{FIXTURES_PATH}/configs/does_not_exist.toml"));
    assert!(matches!(result, Err(ConfigError::NotFound(_))));
}
