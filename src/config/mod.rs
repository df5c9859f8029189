//! Stack configuration module.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `korral.stack.yaml`
//! - Validation of the declared resource set
//! - Computing configuration hashes for change detection

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::ConfigHasher;
pub use parser::{find_config_file, ConfigParser, DEFAULT_CONFIG_FILES};
pub use spec::{DeployConfig, ProjectConfig, ResourceSpec, StateBackend, StateConfig};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
