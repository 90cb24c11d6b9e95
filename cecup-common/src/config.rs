//! Configuration types and loading for the CEC update daemon

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default configuration file location
pub const DEFAULT_CONFIG_FILE: &str = "/etc/cecupd/cecupd.conf";

/// Default I2C bus number for the CEC link
pub const DEFAULT_I2C_BUS: u8 = 3;

/// Default I2C address of the CEC
pub const DEFAULT_I2C_ADDR: u8 = 0x55;

/// Default directory watched for incoming firmware images
pub const DEFAULT_IMAGE_DIR: &str = "/tmp/cec_images";

/// Default attestation scratch directory
pub const DEFAULT_ATTEST_DIR: &str = "/tmp/cec_attest";

/// Progress file name inside the image directory
pub const PROGRESS_FILE_NAME: &str = "progress.txt";

/// Default GPIO pin wired to the CEC interrupt line
pub const DEFAULT_GPIO_PIN: u8 = 17;

/// Default reboot-guard supervisor period in seconds
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 60;

/// Default os-release file used to identify the running BMC version
pub const DEFAULT_OS_RELEASE: &str = "/etc/os-release";

/// Configuration for the CEC update daemon
///
/// Options can be set via a YAML configuration file, command-line
/// arguments, or defaults. Field names with underscores map to
/// dash-separated keys in YAML (e.g. `i2c_bus` <-> `i2c-bus`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// I2C bus number
    #[serde(default = "default_i2c_bus")]
    pub i2c_bus: u8,

    /// I2C device address (in hex, e.g. 0x55)
    #[serde(default = "default_i2c_addr")]
    pub i2c_addr: u8,

    /// Directory watched for incoming firmware images
    ///
    /// The progress file is written into the same directory
    #[serde(default = "default_image_dir")]
    pub image_dir: PathBuf,

    /// Attestation scratch directory
    #[serde(default = "default_attest_dir")]
    pub attest_dir: PathBuf,

    /// BCM pin number of the CEC interrupt line
    #[serde(default = "default_gpio_pin")]
    pub gpio_pin: u8,

    /// Reboot-guard supervisor period in seconds
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Path of the os-release file naming the running BMC version
    #[serde(default = "default_os_release")]
    pub os_release: PathBuf,
}

// Default value functions for serde
fn default_i2c_bus() -> u8 {
    DEFAULT_I2C_BUS
}

fn default_i2c_addr() -> u8 {
    DEFAULT_I2C_ADDR
}

fn default_image_dir() -> PathBuf {
    PathBuf::from(DEFAULT_IMAGE_DIR)
}

fn default_attest_dir() -> PathBuf {
    PathBuf::from(DEFAULT_ATTEST_DIR)
}

fn default_gpio_pin() -> u8 {
    DEFAULT_GPIO_PIN
}

fn default_check_interval_secs() -> u64 {
    DEFAULT_CHECK_INTERVAL_SECS
}

fn default_os_release() -> PathBuf {
    PathBuf::from(DEFAULT_OS_RELEASE)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            i2c_bus: DEFAULT_I2C_BUS,
            i2c_addr: DEFAULT_I2C_ADDR,
            image_dir: PathBuf::from(DEFAULT_IMAGE_DIR),
            attest_dir: PathBuf::from(DEFAULT_ATTEST_DIR),
            gpio_pin: DEFAULT_GPIO_PIN,
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
            os_release: PathBuf::from(DEFAULT_OS_RELEASE),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead(path.into(), e))?;

        serde_yaml::from_str(&contents)
            .map_err(|e| ConfigError::YamlParse(path.into(), e.to_string()))
    }

    /// Load configuration from a file if it exists, otherwise return defaults
    pub fn from_file_or_default(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Path of the progress file inside the image directory
    pub fn progress_file(&self) -> PathBuf {
        self.image_dir.join(PROGRESS_FILE_NAME)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.i2c_bus > 16 {
            return Err(ConfigError::InvalidValue(format!(
                "i2c-bus {} is unusually high (expected 0-16)",
                self.i2c_bus
            )));
        }

        if self.check_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "check-interval-secs must be positive".to_string(),
            ));
        }
        if self.check_interval_secs > 3600 {
            return Err(ConfigError::InvalidValue(
                "check-interval-secs must be <= 3600 seconds".to_string(),
            ));
        }

        if self.image_dir == self.attest_dir {
            return Err(ConfigError::InvalidValue(
                "image-dir and attest-dir must differ".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("failed to parse YAML config file {0}: {1}")]
    YamlParse(PathBuf, String),

    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.i2c_bus, 3);
        assert_eq!(config.i2c_addr, 0x55);
        assert_eq!(config.image_dir, PathBuf::from("/tmp/cec_images"));
        assert_eq!(config.attest_dir, PathBuf::from("/tmp/cec_attest"));
        assert_eq!(config.check_interval_secs, 60);
    }

    #[test]
    fn test_progress_file_lives_in_image_dir() {
        let config = Config::default();
        assert_eq!(
            config.progress_file(),
            PathBuf::from("/tmp/cec_images/progress.txt")
        );
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_invalid_check_interval() {
        let config = Config {
            check_interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            check_interval_secs: 7200,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_shared_directories() {
        let config = Config {
            attest_dir: PathBuf::from("/tmp/cec_images"),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_deserialization_with_dashes() {
        let yaml = r#"
i2c-bus: 5
i2c-addr: 0x42
image-dir: /var/lib/cec/images
gpio-pin: 27
check-interval-secs: 120
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.i2c_bus, 5);
        assert_eq!(config.i2c_addr, 0x42);
        assert_eq!(config.image_dir, PathBuf::from("/var/lib/cec/images"));
        assert_eq!(config.gpio_pin, 27);
        assert_eq!(config.check_interval_secs, 120);
    }

    #[test]
    fn test_yaml_deserialization_partial() {
        let yaml = r#"
check-interval-secs: 30
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.i2c_bus, 3); // default
        assert_eq!(config.check_interval_secs, 30); // overridden
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let yaml = r#"
i2c-buss: 4
"#;
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }
}
