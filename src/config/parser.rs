//! Stack file parser.
//!
//! This module handles loading the stack configuration from YAML files and
//! environment variables, with proper precedence and error handling.

use crate::error::{ConfigError, KorralError, Result};
use std::path::Path;
use tracing::{debug, info};

use super::spec::DeployConfig;

/// Parser for loading stack configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<std::path::PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<DeployConfig> {
        let path = path.as_ref();
        info!("Loading stack from: {}", path.display());

        if !path.exists() {
            return Err(KorralError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            KorralError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<DeployConfig> {
        debug!("Parsing YAML stack configuration");

        let config: DeployConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            KorralError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Successfully parsed stack for project: {} ({} resource(s))",
            config.project.name,
            config.resources.len()
        );
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Environment variables are checked in the format:
    /// `KORRAL_<SECTION>_<KEY>` (e.g. `KORRAL_PROJECT_REGION`)
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<DeployConfig> {
        let mut config = self.load_file(path)?;

        // Apply environment overrides
        Self::apply_env_overrides(&mut config);

        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(config: &mut DeployConfig) {
        // Project overrides
        if let Ok(name) = std::env::var("KORRAL_PROJECT_NAME") {
            debug!("Overriding project.name from environment");
            config.project.name = name;
        }

        if let Ok(env) = std::env::var("KORRAL_PROJECT_ENVIRONMENT") {
            debug!("Overriding project.environment from environment");
            config.project.environment = env;
        }

        if let Ok(account) = std::env::var("KORRAL_PROJECT_ACCOUNT") {
            debug!("Overriding project.account from environment");
            config.project.account = Some(account);
        }

        if let Ok(region) = std::env::var("KORRAL_PROJECT_REGION") {
            debug!("Overriding project.region from environment");
            config.project.region = Some(region);
        }

        // State overrides
        if let Ok(bucket) = std::env::var("KORRAL_STATE_BUCKET") {
            debug!("Overriding state.bucket from environment");
            config.state.bucket = Some(bucket);
        }

        if let Ok(prefix) = std::env::var("KORRAL_STATE_PREFIX") {
            debug!("Overriding state.prefix from environment");
            config.state.prefix = Some(prefix);
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| std::path::PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                KorralError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Validates that required environment variables are set.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing.
    pub fn validate_required_env(&self) -> Result<()> {
        const REQUIRED_VARS: &[&str] = &["KORRAL_API_URL", "KORRAL_API_TOKEN"];

        for var in REQUIRED_VARS {
            if std::env::var(var).is_err() {
                return Err(KorralError::Config(ConfigError::MissingEnvVar {
                    name: (*var).to_string(),
                }));
            }
        }

        Ok(())
    }

    /// Gets the control-plane API endpoint from environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not set.
    pub fn get_api_url() -> Result<String> {
        std::env::var("KORRAL_API_URL").map_err(|_| {
            KorralError::Config(ConfigError::MissingEnvVar {
                name: String::from("KORRAL_API_URL"),
            })
        })
    }

    /// Gets the control-plane API token from environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not set.
    pub fn get_api_token() -> Result<String> {
        std::env::var("KORRAL_API_TOKEN").map_err(|_| {
            KorralError::Config(ConfigError::MissingEnvVar {
                name: String::from("KORRAL_API_TOKEN"),
            })
        })
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &[
    "korral.stack.yaml",
    "korral.stack.yml",
    "stack.yaml",
    "stack.yml",
];

/// Finds the stack file in the current directory or parent directories.
///
/// # Errors
///
/// Returns an error if no stack file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<std::path::PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found stack file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(KorralError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_stack() {
        let yaml = r"
project:
  name: elk-telemetry
state:
  backend: local
resources: []
";
        let parser = ConfigParser::new();
        let result = parser.parse_yaml(yaml, None);
        assert!(result.is_ok());

        let config = result.unwrap();
        assert_eq!(config.project.name, "elk-telemetry");
        assert_eq!(config.project.environment, "dev");
    }

    #[test]
    fn test_parse_full_stack() {
        let yaml = r#"
project:
  name: elk-telemetry
  environment: prod
  account: "123456789012"
  region: us-west-2

state:
  backend: s3
  bucket: elk-telemetry-state
  prefix: elk-telemetry/prod

resources:
  - id: device-policy
    kind: policy
    config:
      policy_name: device-policy
      policy_document:
        Version: "2012-10-17"
        Statement:
          - Effect: Allow
            Action: ["iot:Connect", "iot:Publish", "iot:Subscribe", "iot:Receive"]
            Resource: "arn:aws:iot:us-west-2:123456789012:topic/telemetry/*"

  - id: collar
    kind: thing
    config:
      thing_name: elk-collar

  - id: device-cert
    kind: custom
    on_create:
      service: iot
      action: CreateKeysAndCertificate
      parameters:
        setAsActive: true
      physical_resource_id_field: certificateId
    on_delete:
      service: iot
      action: DeleteCertificate

  - id: cert-to-thing
    kind: attachment
    config:
      principal: ${device-cert.certificateArn}
      thing: ${collar.thingName}

exports:
  certificate_arn: ${device-cert.certificateArn}
"#;
        let parser = ConfigParser::new();
        let config = parser.parse_yaml(yaml, None).expect("parse");

        assert_eq!(config.project.name, "elk-telemetry");
        assert_eq!(config.resources.len(), 4);
        assert_eq!(config.resources[2].id, "device-cert");
        assert!(config.resources[2].on_create.is_some());
        assert!(config.resources[2].on_update.is_none());
        assert_eq!(config.exports.len(), 1);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let parser = ConfigParser::new();
        let result = parser.load_file("/nonexistent/korral.stack.yaml");
        assert!(result.is_err());
    }
}
