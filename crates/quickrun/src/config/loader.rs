//! Configuration file loading for quickrun
//!
//! Handles loading and parsing configuration files using the config crate.

use std::path::Path;

use config::{Config as ConfigBuilder, File, FileFormat};

use crate::config::{Config, ConfigError};

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    ///
    /// The file is layered over [`Config::default`]: anything it leaves out
    /// keeps its default, and out-of-range tunables are then raised to their
    /// floors. A toolchain that cannot run anything is rejected.
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let overrides = Self::parse_layer(content)?;
        let mut config = Self::default().merge(&overrides);
        config.validate();
        Ok(config)
    }

    /// Deserialize one TOML document without applying defaults or floors
    pub(crate) fn parse_layer(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.check_toolchain()?;
        Ok(config)
    }

    fn check_toolchain(&self) -> Result<(), ConfigError> {
        let toolchain = &self.toolchain;
        if toolchain.run_command.is_empty() {
            return Err(ConfigError::Invalid(
                "toolchain has empty run command".to_string(),
            ));
        }
        if toolchain.entry_file.is_empty() {
            return Err(ConfigError::Invalid(
                "toolchain has empty entry file".to_string(),
            ));
        }
        if toolchain.entry_file.contains('/') || toolchain.entry_file.contains("..") {
            return Err(ConfigError::Invalid(format!(
                "toolchain entry file '{}' must be a plain file name",
                toolchain.entry_file
            )));
        }
        if let Some(ref build) = toolchain.build_command
            && build.is_empty()
        {
            return Err(ConfigError::Invalid(
                "toolchain has empty build command".to_string(),
            ));
        }
        Ok(())
    }
}
