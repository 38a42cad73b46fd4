//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Default image name filter.
pub const DEFAULT_IMAGE_NAME: &str = "amzn-ami-hvm-2018.03.0.20180811-x86_64-gp2";
/// Default key pair name.
pub const DEFAULT_KEY_NAME: &str = "netfleet-key";
/// Default execution profile name.
pub const DEFAULT_INSTANCE_PROFILE_NAME: &str = "netfleet-ssm-role";
/// Default policy bound to the execution profile.
pub const DEFAULT_INSTANCE_PROFILE_POLICY_ARN: &str =
    "arn:aws:iam::aws:policy/service-role/AmazonEC2RoleforSSM";
/// Default remote command output channel.
pub const DEFAULT_COMMAND_OUTPUT_CHANNEL: &str = "command-log";
/// Default document key extension.
pub const DEFAULT_DOCUMENT_EXTENSION: &str = ".json";
/// Default root directory of the file-backed store.
pub const DEFAULT_STORE_ROOT: &str = ".netfleet";

/// Fleet configuration derived from defaults, configuration files, and
/// environment variables (`NETFLEET_*`).
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "NETFLEET",
    discovery(
        app_name = "netfleet",
        env_var = "NETFLEET_CONFIG_PATH",
        config_file_name = "netfleet.toml",
        dotfile_name = ".netfleet.toml",
        project_file_name = "netfleet.toml"
    )
)]
pub struct FleetConfig {
    /// Image name filter used when a host has no pinned image.
    #[ortho_config(default = DEFAULT_IMAGE_NAME.to_owned())]
    pub image_name: String,
    /// Key pair installed on every launched instance.
    #[ortho_config(default = DEFAULT_KEY_NAME.to_owned())]
    pub key_name: String,
    /// Execution profile attached after launch.
    #[ortho_config(default = DEFAULT_INSTANCE_PROFILE_NAME.to_owned())]
    pub instance_profile_name: String,
    /// Policy bound to the execution profile during account bootstrap.
    #[ortho_config(default = DEFAULT_INSTANCE_PROFILE_POLICY_ARN.to_owned())]
    pub instance_profile_policy_arn: String,
    /// Output channel remote commands log to.
    #[ortho_config(default = DEFAULT_COMMAND_OUTPUT_CHANNEL.to_owned())]
    pub command_output_channel: String,
    /// Status polls before a remote command is declared timed out.
    #[ortho_config(default = 10)]
    pub command_max_attempts: u32,
    /// Delay between command status polls, in milliseconds.
    #[ortho_config(default = 2000)]
    pub command_poll_interval_ms: u64,
    /// Extension appended to persisted document keys.
    #[ortho_config(default = DEFAULT_DOCUMENT_EXTENSION.to_owned())]
    pub document_extension: String,
    /// Root directory of the file-backed document store.
    #[ortho_config(default = DEFAULT_STORE_ROOT.to_owned())]
    pub store_root: String,
}

impl FleetConfig {
    /// Configuration made only of built-in defaults, ignoring every
    /// external source.
    #[must_use]
    pub fn builtin_defaults() -> Self {
        Self {
            image_name: DEFAULT_IMAGE_NAME.to_owned(),
            key_name: DEFAULT_KEY_NAME.to_owned(),
            instance_profile_name: DEFAULT_INSTANCE_PROFILE_NAME.to_owned(),
            instance_profile_policy_arn: DEFAULT_INSTANCE_PROFILE_POLICY_ARN.to_owned(),
            command_output_channel: DEFAULT_COMMAND_OUTPUT_CHANNEL.to_owned(),
            command_max_attempts: 10,
            command_poll_interval_ms: 2000,
            document_extension: DEFAULT_DOCUMENT_EXTENSION.to_owned(),
            store_root: DEFAULT_STORE_ROOT.to_owned(),
        }
    }
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn hint(&self) -> String {
        format!(
            "set {} or add {} to netfleet.toml",
            self.env_var, self.toml_key
        )
    }
}

impl FleetConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: {}",
                metadata.description,
                metadata.hint()
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("netfleet")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Delay between command status polls.
    #[must_use]
    pub const fn command_poll_interval(&self) -> Duration {
        Duration::from_millis(self.command_poll_interval_ms)
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and TOML key that supply the offending value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required string is blank
    /// and [`ConfigError::Invalid`] when the attempt ceiling is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (
                &self.image_name,
                FieldMetadata::new("image name filter", "NETFLEET_IMAGE_NAME", "image_name"),
            ),
            (
                &self.key_name,
                FieldMetadata::new("key pair name", "NETFLEET_KEY_NAME", "key_name"),
            ),
            (
                &self.instance_profile_name,
                FieldMetadata::new(
                    "instance profile name",
                    "NETFLEET_INSTANCE_PROFILE_NAME",
                    "instance_profile_name",
                ),
            ),
            (
                &self.instance_profile_policy_arn,
                FieldMetadata::new(
                    "instance profile policy",
                    "NETFLEET_INSTANCE_PROFILE_POLICY_ARN",
                    "instance_profile_policy_arn",
                ),
            ),
            (
                &self.command_output_channel,
                FieldMetadata::new(
                    "command output channel",
                    "NETFLEET_COMMAND_OUTPUT_CHANNEL",
                    "command_output_channel",
                ),
            ),
            (
                &self.store_root,
                FieldMetadata::new("store root", "NETFLEET_STORE_ROOT", "store_root"),
            ),
        ];
        for (value, metadata) in &required {
            Self::require_field(value, metadata)?;
        }
        if self.command_max_attempts == 0 {
            let metadata = FieldMetadata::new(
                "command attempt ceiling",
                "NETFLEET_COMMAND_MAX_ATTEMPTS",
                "command_max_attempts",
            );
            return Err(ConfigError::Invalid(format!(
                "{} must be at least 1: {}",
                metadata.description,
                metadata.hint()
            )));
        }
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds an unusable value.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn defaults_validate() {
        assert_eq!(FleetConfig::builtin_defaults().validate(), Ok(()));
    }

    #[rstest]
    fn blank_key_name_names_its_sources() {
        let config = FleetConfig {
            key_name: String::from("  "),
            ..FleetConfig::builtin_defaults()
        };
        let Err(ConfigError::MissingField(message)) = config.validate() else {
            panic!("blank key name should be rejected");
        };
        assert!(message.contains("NETFLEET_KEY_NAME"));
        assert!(message.contains("key_name"));
    }

    #[rstest]
    fn zero_attempts_are_invalid() {
        let config = FleetConfig {
            command_max_attempts: 0,
            ..FleetConfig::builtin_defaults()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[rstest]
    fn poll_interval_is_in_milliseconds() {
        let config = FleetConfig {
            command_poll_interval_ms: 250,
            ..FleetConfig::builtin_defaults()
        };
        assert_eq!(config.command_poll_interval(), Duration::from_millis(250));
    }
}
