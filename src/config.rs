//! Configuration loading via `ortho-config`.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::backend::Provider;
use crate::component::MachineSpec;
use crate::driver::DEFAULT_DOCKER_MACHINE_BIN;

/// Machine provisioning settings derived from environment variables and
/// configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SORTIE_MACHINE",
    discovery(
        app_name = "sortie",
        env_var = "SORTIE_CONFIG_PATH",
        config_file_name = "sortie.toml",
        dotfile_name = ".sortie.toml",
        project_file_name = "sortie.toml"
    )
)]
pub struct MachineConfig {
    /// `docker-machine` binary used for every provider call.
    #[ortho_config(default = DEFAULT_DOCKER_MACHINE_BIN.to_owned())]
    pub docker_machine_bin: String,
    /// `docker-machine` driver name: `amazonec2` or `google`.
    #[ortho_config(default = "amazonec2".to_owned())]
    pub provider: String,
    /// Region (EC2) or zone (Google). Defaults to `ap-northeast-1`.
    #[ortho_config(default = "ap-northeast-1".to_owned())]
    pub region: String,
    /// Instance type for job machines. Defaults to `t2.2xlarge`.
    #[ortho_config(default = "t2.2xlarge".to_owned())]
    pub instance_type: String,
    /// Root disk size in gigabytes.
    #[ortho_config(default = 48)]
    pub root_size_gb: u32,
    /// Instance profile granting machines access to remote storage.
    pub iam_instance_profile: Option<String>,
    /// Prefix for machine names; derived from the task file when unset.
    pub name_prefix: Option<String>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            docker_machine_bin: DEFAULT_DOCKER_MACHINE_BIN.to_owned(),
            provider: String::from("amazonec2"),
            region: String::from("ap-northeast-1"),
            instance_type: String::from("t2.2xlarge"),
            root_size_gb: 48,
            iam_instance_profile: None,
            name_prefix: None,
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

    fn guidance(&self) -> String {
        format!(
            "{}: set {} or add {} to [machine] in sortie.toml",
            self.description, self.env_var, self.toml_key
        )
    }
}

const BIN_FIELD: FieldMetadata = FieldMetadata::new(
    "docker-machine binary",
    "SORTIE_MACHINE_DOCKER_MACHINE_BIN",
    "docker_machine_bin",
);
const PROVIDER_FIELD: FieldMetadata =
    FieldMetadata::new("machine provider", "SORTIE_MACHINE_PROVIDER", "provider");
const REGION_FIELD: FieldMetadata =
    FieldMetadata::new("region or zone", "SORTIE_MACHINE_REGION", "region");
const INSTANCE_TYPE_FIELD: FieldMetadata = FieldMetadata::new(
    "instance type",
    "SORTIE_MACHINE_INSTANCE_TYPE",
    "instance_type",
);
const ROOT_SIZE_FIELD: FieldMetadata = FieldMetadata::new(
    "root disk size",
    "SORTIE_MACHINE_ROOT_SIZE_GB",
    "root_size_gb",
);
const PROFILE_FIELD: FieldMetadata = FieldMetadata::new(
    "IAM instance profile",
    "SORTIE_MACHINE_IAM_INSTANCE_PROFILE",
    "iam_instance_profile",
);

impl MachineConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}",
                metadata.guidance()
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("sortie")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Parses the configured provider.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] for an unknown driver name.
    pub fn provider(&self) -> Result<Provider, ConfigError> {
        Provider::from_driver(&self.provider).ok_or_else(|| {
            ConfigError::InvalidField(format!(
                "unsupported {} `{}` (expected amazonec2 or google)",
                PROVIDER_FIELD.guidance(),
                self.provider.trim()
            ))
        })
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via environment variables or
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::InvalidField`] when a value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(&self.docker_machine_bin, &BIN_FIELD)?;
        Self::require_field(&self.provider, &PROVIDER_FIELD)?;
        self.provider()?;
        Self::require_field(&self.region, &REGION_FIELD)?;
        Self::require_field(&self.instance_type, &INSTANCE_TYPE_FIELD)?;
        if self.root_size_gb == 0 {
            return Err(ConfigError::InvalidField(format!(
                "zero {}",
                ROOT_SIZE_FIELD.guidance()
            )));
        }
        if let Some(profile) = self.iam_instance_profile.as_deref() {
            Self::require_field(profile, &PROFILE_FIELD)?;
        }
        Ok(())
    }

    /// Builds the machine template for a component called `component`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn machine_spec(&self, component: &str) -> Result<MachineSpec, ConfigError> {
        self.validate()?;
        let name_prefix = self
            .name_prefix
            .as_deref()
            .map(str::trim)
            .filter(|prefix| !prefix.is_empty())
            .map_or_else(|| MachineSpec::default_prefix(component), str::to_owned);
        Ok(MachineSpec {
            provider: self.provider()?,
            region: self.region.trim().to_owned(),
            instance_type: self.instance_type.trim().to_owned(),
            root_size_gb: self.root_size_gb,
            iam_instance_profile: self
                .iam_instance_profile
                .as_deref()
                .map(|profile| profile.trim().to_owned()),
            name_prefix,
        })
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value that cannot be used.
    #[error("invalid configuration field: {0}")]
    InvalidField(String),
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
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn defaults_validate_and_produce_spec() {
        let spec = MachineConfig::default()
            .machine_spec("tasks.tsv")
            .expect("defaults should validate");
        assert_eq!(spec.provider, Provider::AmazonEc2);
        assert_eq!(spec.root_size_gb, 48);
        assert!(spec.name_prefix.starts_with("tasks-tsv-"));
        assert!(spec.name_prefix.ends_with('-'));
    }

    #[rstest]
    fn explicit_prefix_is_trimmed() {
        let config = MachineConfig {
            name_prefix: Some(String::from(" nightly- ")),
            ..MachineConfig::default()
        };
        let spec = config.machine_spec("tasks.csv").expect("valid config");
        assert_eq!(spec.name_prefix, "nightly-");
    }

    #[rstest]
    #[case(MachineConfig { region: String::from(" "), ..MachineConfig::default() }, "SORTIE_MACHINE_REGION")]
    #[case(MachineConfig { instance_type: String::new(), ..MachineConfig::default() }, "SORTIE_MACHINE_INSTANCE_TYPE")]
    #[case(MachineConfig { provider: String::from("azure"), ..MachineConfig::default() }, "SORTIE_MACHINE_PROVIDER")]
    #[case(MachineConfig { root_size_gb: 0, ..MachineConfig::default() }, "SORTIE_MACHINE_ROOT_SIZE_GB")]
    #[case(MachineConfig { iam_instance_profile: Some(String::new()), ..MachineConfig::default() }, "iam_instance_profile")]
    fn validation_names_env_var_and_key(#[case] config: MachineConfig, #[case] hint: &str) {
        let err = config.validate().expect_err("config should be rejected");
        let message = err.to_string();
        assert!(message.contains(hint), "{message}");
        assert!(message.contains("sortie.toml"), "{message}");
    }
}
