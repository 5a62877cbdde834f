//! SBMS CLI Configuration Management
//!
//! Configuration is layered with figment, lowest priority first:
//! - built-in defaults
//! - `sbms.toml` in the working directory
//! - `~/.sbms/config.toml`
//! - `SBMS_*` environment variables (`__` separates sections, e.g.
//!   `SBMS_LINK__PEER=10.0.0.2:6501`)
//! - command line arguments
//!
//! An explicit `--config` file replaces both file layers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use sbms_core::SbmsConfig;

pub const LOCAL_CONFIG_FILE: &str = "sbms.toml";
pub const ENV_PREFIX: &str = "SBMS_";

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the `sbms` binary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Protocol, tracker, validation and relay settings
    pub core: SbmsConfig,
    /// OBEX-over-TCP endpoints
    pub link: LinkConfig,
    /// How messages reach the cellular network
    pub gateway: GatewayConfig,
    /// Files and folders
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Where the OBEX listener binds
    pub listen: String,
    /// Where pushes to the peer go
    pub peer: String,
    pub connect_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:6500".to_string(),
            peer: "127.0.0.1:6501".to_string(),
            connect_timeout_ms: 5_000,
        }
    }
}

impl LinkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Program and arguments run once per message; `{to}` and `{text}` are
    /// substituted in every argument
    pub send_command: Vec<String>,
    /// Log messages instead of running `send_command`
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Message history file, kept in memory when unset
    pub history_file: Option<PathBuf>,
    /// Folder scanned for pushed `message_*.vcf` objects
    pub inbox_dir: Option<PathBuf>,
    pub inbox_poll_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            history_file: None,
            inbox_dir: None,
            inbox_poll_interval_ms: 2_000,
        }
    }
}

impl StorageConfig {
    pub fn inbox_poll_interval(&self) -> Duration {
        Duration::from_millis(self.inbox_poll_interval_ms)
    }
}

// ----------------------------------------------------------------------------
// Command Line Overrides
// ----------------------------------------------------------------------------

/// Values given on the command line; `None` leaves the lower layers alone
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub listen: Option<String>,
    pub peer: Option<String>,
    pub inbox_dir: Option<PathBuf>,
    pub dry_run: bool,
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load with the standard layering
    pub fn load(config_file: Option<&Path>, overrides: &Overrides) -> Result<Self, ConfigError> {
        let figment = match config_file {
            Some(path) => Self::base().merge(Toml::file(path)),
            None => {
                let mut figment = Self::base().merge(Toml::file(LOCAL_CONFIG_FILE));
                if let Some(user_file) = Self::default_config_path() {
                    figment = figment.merge(Toml::file(user_file));
                }
                figment
            }
        };
        Self::extract(Self::apply(figment.merge(Env::prefixed(ENV_PREFIX).split("__")), overrides))
    }

    /// Load from a single file on top of the defaults, ignoring the environment
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::extract(Self::base().merge(Toml::file(path.as_ref())))
    }

    fn base() -> Figment {
        Figment::new().merge(Serialized::defaults(Self::default()))
    }

    fn apply(mut figment: Figment, overrides: &Overrides) -> Figment {
        if let Some(listen) = &overrides.listen {
            figment = figment.merge(("link.listen", listen));
        }
        if let Some(peer) = &overrides.peer {
            figment = figment.merge(("link.peer", peer));
        }
        if let Some(dir) = &overrides.inbox_dir {
            figment = figment.merge(("storage.inbox_dir", dir));
        }
        if overrides.dry_run {
            figment = figment.merge(("gateway.dry_run", true));
        }
        figment
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment
            .extract()
            .map_err(|e| ConfigError::Loading(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// `~/.sbms/config.toml`, if a home directory is known
    pub fn default_config_path() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(|home| PathBuf::from(home).join(".sbms").join("config.toml"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.core.validate().map_err(ConfigError::Validation)?;

        if self.link.listen.trim().is_empty() {
            return Err(ConfigError::Validation("link.listen must not be empty".to_string()));
        }
        if self.link.peer.trim().is_empty() {
            return Err(ConfigError::Validation("link.peer must not be empty".to_string()));
        }
        if self.link.connect_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "link.connect_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.storage.inbox_poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "storage.inbox_poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if let Some(program) = self.gateway.send_command.first() {
            if program.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "gateway.send_command program must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Example configuration file content
    pub fn example_config() -> String {
        let example = AppConfig {
            gateway: GatewayConfig {
                send_command: vec![
                    "gammu-smsd-inject".to_string(),
                    "TEXT".to_string(),
                    "{to}".to_string(),
                    "-text".to_string(),
                    "{text}".to_string(),
                ],
                dry_run: false,
            },
            storage: StorageConfig {
                history_file: Some(PathBuf::from("messages.json")),
                inbox_dir: Some(PathBuf::from("/var/spool/obex")),
                ..StorageConfig::default()
            },
            ..AppConfig::default()
        };

        toml::to_string_pretty(&example).unwrap_or_else(|_| "# Failed to generate example config".to_string())
    }
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {0}")]
    Loading(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.link.peer, "127.0.0.1:6501");
        assert!(config.gateway.send_command.is_empty());
        assert_eq!(config.core, SbmsConfig::default());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.link.connect_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = AppConfig::default();
        config.gateway.send_command = vec![" ".to_string()];
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.core.relay.max_push_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides_win() {
        let overrides = Overrides {
            peer: Some("10.0.0.2:7000".to_string()),
            dry_run: true,
            ..Overrides::default()
        };
        let config = AppConfig::extract(AppConfig::apply(AppConfig::base(), &overrides)).unwrap();
        assert_eq!(config.link.peer, "10.0.0.2:7000");
        assert_eq!(config.link.listen, LinkConfig::default().listen);
        assert!(config.gateway.dry_run);
    }

    #[test]
    fn test_example_config_generation() {
        let example = AppConfig::example_config();
        assert!(example.contains("[core.session]"));
        assert!(example.contains("[link]"));
        assert!(example.contains("[gateway]"));
        assert!(example.contains("{to}"));

        let parsed: AppConfig = toml::from_str(&example).unwrap();
        assert!(parsed.validate().is_ok());
    }
}
