//! Configuration file support for picflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (PICFLASH_*)
//! 3. Local config file (./picflash.toml)
//! 4. Global config file (~/.config/picflash/config.toml)

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the local configuration file.
pub const LOCAL_CONFIG: &str = "picflash.toml";

/// Default baud rate of the bootloader link.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Flash configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Default device name.
    pub device: Option<String>,
    /// Allow writes into boot flash (default true).
    pub allow_boot_flash: Option<bool>,
    /// Allow writes into the configuration page (default false).
    pub allow_configuration: Option<bool>,
    /// Reject malformed hex records (default true).
    pub strict_hex: Option<bool>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Flash configuration.
    #[serde(default)]
    pub flash: FlashConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        Self::load_layers(
            Self::global_config_path().as_deref(),
            Path::new(LOCAL_CONFIG),
        )
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Merge `local` over `global`; either may be missing.
    fn load_layers(global: Option<&Path>, local: &Path) -> Self {
        let mut config = Self::default();

        if let Some(global_config) = global.and_then(Self::load_from_file) {
            debug!("Loaded global config");
            config.merge(global_config);
        }

        if let Some(local_config) = Self::load_from_file(local) {
            debug!("Loaded local config from {}", local.display());
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "picflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.connection.port.is_some() {
            self.connection.port = other.connection.port;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }

        if other.flash.device.is_some() {
            self.flash.device = other.flash.device;
        }
        if other.flash.allow_boot_flash.is_some() {
            self.flash.allow_boot_flash = other.flash.allow_boot_flash;
        }
        if other.flash.allow_configuration.is_some() {
            self.flash.allow_configuration = other.flash.allow_configuration;
        }
        if other.flash.strict_hex.is_some() {
            self.flash.strict_hex = other.flash.strict_hex;
        }
    }

    /// Baud rate from the command line/environment, then the files.
    pub fn baud(&self, cli: Option<u32>) -> u32 {
        cli.or(self.connection.baud).unwrap_or(DEFAULT_BAUD)
    }

    /// Port from the command line/environment, then the files.
    pub fn port(&self, cli: Option<&str>) -> Option<String> {
        cli.map(str::to_string).or_else(|| self.connection.port.clone())
    }

    /// Device name from the command line/environment, then the files.
    pub fn device(&self, cli: Option<&str>) -> Option<String> {
        cli.map(str::to_string).or_else(|| self.flash.device.clone())
    }

    /// Whether boot flash may be written.
    pub fn allow_boot_flash(&self) -> bool {
        self.flash.allow_boot_flash.unwrap_or(true)
    }

    /// Whether the configuration page may be written.
    pub fn allow_configuration(&self) -> bool {
        self.flash.allow_configuration.unwrap_or(false)
    }

    /// Whether malformed hex records are rejected.
    pub fn strict_hex(&self) -> bool {
        self.flash.strict_hex.unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.baud(None), DEFAULT_BAUD);
        assert!(config.port(None).is_none());
        assert!(config.allow_boot_flash());
        assert!(!config.allow_configuration());
        assert!(config.strict_hex());
    }

    #[test]
    fn test_parse_full_file() {
        let config: Config = toml::from_str(
            r#"
            [connection]
            port = "/dev/ttyUSB1"
            baud = 57600

            [flash]
            device = "PIC32MX250F128B"
            allow_boot_flash = false
            allow_configuration = true
            strict_hex = false
            "#,
        )
        .unwrap();
        assert_eq!(config.port(None).as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(config.baud(None), 57600);
        assert_eq!(config.device(None).as_deref(), Some("PIC32MX250F128B"));
        assert!(!config.allow_boot_flash());
        assert!(config.allow_configuration());
        assert!(!config.strict_hex());
    }

    #[test]
    fn test_cli_values_win() {
        let config: Config = toml::from_str("[connection]\nport = \"COM3\"\nbaud = 9600\n").unwrap();
        assert_eq!(config.port(Some("COM7")).as_deref(), Some("COM7"));
        assert_eq!(config.baud(Some(230_400)), 230_400);
    }

    #[test]
    fn test_local_overrides_global() {
        let dir = tempdir().unwrap();
        let global = dir.path().join("global.toml");
        let local = dir.path().join("picflash.toml");
        fs::write(
            &global,
            "[connection]\nport = \"/dev/ttyACM0\"\nbaud = 9600\n[flash]\nstrict_hex = false\n",
        )
        .unwrap();
        fs::write(&local, "[connection]\nbaud = 57600\n").unwrap();

        let config = Config::load_layers(Some(&global), &local);
        assert_eq!(config.port(None).as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.baud(None), 57600);
        assert!(!config.strict_hex());
    }

    #[test]
    fn test_missing_and_invalid_files_use_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_layers(None, &dir.path().join("absent.toml"));
        assert_eq!(config.baud(None), DEFAULT_BAUD);

        let broken = dir.path().join("broken.toml");
        fs::write(&broken, "[connection\nbaud = ").unwrap();
        let config = Config::load_from_path(&broken);
        assert_eq!(config.baud(None), DEFAULT_BAUD);
    }
}
