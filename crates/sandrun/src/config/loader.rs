//! Configuration file loading for Sandrun
//!
//! Handles loading and parsing configuration files using the config crate.

use std::path::{Path, PathBuf};

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use tracing::debug;

use crate::config::{Config, ConfigError, EXAMPLE_CONFIG, is_plain_file_name};

/// Environment variable naming the config file when no path is given explicitly
pub const CONFIG_PATH_ENV: &str = "SANDRUN_CONFIG";

/// Prefix of environment variables overriding individual keys (`SANDRUN__CACHE__TTL=30`)
const ENV_PREFIX: &str = "SANDRUN";

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load the process configuration
    ///
    /// The file is `path` if given, else the file named by `SANDRUN_CONFIG`,
    /// else the embedded example config. `SANDRUN__*` environment variables
    /// override individual keys on top of the file.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));
        Self::load_with_env(path.as_deref(), env_source())
    }

    fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let builder = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path.to_path_buf()));
                }
                debug!(?path, "loading configuration file");
                ConfigBuilder::builder().add_source(File::from(path))
            }
            None => {
                debug!("using embedded default configuration");
                ConfigBuilder::builder()
                    .add_source(File::from_str(EXAMPLE_CONFIG, FileFormat::Toml))
            }
        };

        let config: Config = builder.add_source(env).build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.max_parallel == 0 {
            return Err(ConfigError::Invalid(
                "cache.max_parallel must be at least 1".to_string(),
            ));
        }

        for (id, lang) in &self.languages {
            if lang.name.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty name"
                )));
            }
            if !is_plain_file_name(&lang.source_name) {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has invalid source name '{}'",
                    lang.source_name
                )));
            }
            if lang.run.command.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty run command"
                )));
            }
            if let Some(ref compile) = lang.compile {
                if compile.command.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "language '{id}' has empty compile command"
                    )));
                }
                if !is_plain_file_name(&compile.output_name) {
                    return Err(ConfigError::Invalid(format!(
                        "language '{id}' has invalid output name '{}'",
                        compile.output_name
                    )));
                }
            }
        }

        Ok(())
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::types::Stage;

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
[languages.test]
name = "Test Language"
source_name = "main.test"

[languages.test.run]
command = ["./test"]
"#;

        let config = Config::parse_toml(toml).unwrap();
        assert!(config.languages.contains_key("test"));
        assert_eq!(config.languages["test"].name, "Test Language");
        assert_eq!(config.cache.ttl, 60);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
bwrap_path = "/usr/bin/bwrap"
toolchain_root = "/opt/toolchains"

[cache]
ttl = 30
max_parallel = 2
acquire_timeout = 10

[limits.compile]
wall_time = 20
memory = 2097152

[limits.run]
wall_time = 1

[languages.go]
name = "Go"
source_name = "main.go"

[languages.go.compile]
command = ["{toolchain}/bin/go", "build", "-o", "{output}", "{source}"]
output_name = "main.exe"

[languages.go.run]
command = ["./{binary}"]
"#;

        let config = Config::parse_toml(toml).unwrap();
        assert_eq!(config.bwrap_path, Some(PathBuf::from("/usr/bin/bwrap")));
        assert_eq!(config.toolchain_root, PathBuf::from("/opt/toolchains"));
        assert_eq!(config.cache.max_parallel, 2);
        assert_eq!(config.cache.acquire_timeout, Some(10));
        assert_eq!(config.limits.compile.wall_time, Some(20));
        assert_eq!(config.stage_defaults(Stage::Run).wall_time, Some(1));
        assert!(config.languages["go"].compile.is_some());
    }

    #[test]
    fn test_default_languages_included() {
        let config = Config::default();
        assert!(config.languages.contains_key("go"));
        assert!(config.languages.contains_key("c"));
        assert!(config.languages.contains_key("python"));
    }

    #[test]
    fn test_partial_limits_dont_override_unspecified_fields() {
        let toml = r#"
[languages.go]
name = "Go"
source_name = "main.go"

[languages.go.compile]
command = ["go", "build", "-o", "{output}", "{source}"]
output_name = "main"

[languages.go.compile.limits]
wall_time = 50

[languages.go.run]
command = ["./{binary}"]
"#;

        let config = Config::parse_toml(toml).unwrap();
        let compile_limits = config.languages["go"]
            .compile
            .as_ref()
            .unwrap()
            .limits
            .unwrap();

        assert_eq!(compile_limits.wall_time, Some(50));
        assert_eq!(compile_limits.cpu_time, None);
        assert_eq!(compile_limits.memory, None);
    }

    #[test]
    fn test_invalid_empty_name() {
        let toml = r#"
[languages.test]
name = ""
source_name = "main.test"

[languages.test.run]
command = ["./test"]
"#;

        assert!(Config::parse_toml(toml).is_err());
    }

    #[test]
    fn test_invalid_source_name() {
        let toml = r#"
[languages.test]
name = "Test"
source_name = "../main.test"

[languages.test.run]
command = ["./test"]
"#;

        assert!(matches!(
            Config::parse_toml(toml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let toml = r#"
[cache]
max_parallel = 0
"#;

        assert!(matches!(
            Config::parse_toml(toml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = Config::from_file("/nonexistent/sandrun.toml");
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_environment_overrides_file_values() {
        let vars = HashMap::from([
            ("SANDRUN__CACHE__TTL".to_string(), "5".to_string()),
            ("SANDRUN__CACHE__MAX_PARALLEL".to_string(), "3".to_string()),
        ]);
        let env = env_source().source(Some(vars));

        let config = Config::load_with_env(None, env).unwrap();
        assert_eq!(config.cache.ttl, 5);
        assert_eq!(config.cache.max_parallel, 3);
        assert!(config.languages.contains_key("go"));
    }
}
