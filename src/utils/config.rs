//! Configuration management for the room daemon.
//!
//! TOML configuration layered from defaults, an optional file and
//! environment variables, validated before use.

use crate::utils::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "onionroom.toml";

/// Environment variable prefix for configuration
pub const ENV_PREFIX: &str = "ONIONROOM";

/// Complete configuration for the daemon
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Onion network and listener configuration
    pub network: NetworkConfig,
    /// Delivery loop cadence and timeouts
    pub delivery: DeliveryConfig,
    /// Room formation policy
    pub rooms: RoomPolicy,
    /// State file locations
    pub storage: StorageConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Onion network and listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// SOCKS5 endpoint of the local onion router
    pub socks_proxy: SocketAddr,
    /// Pre-provisioned rendezvous address handed to new identities
    pub rendezvous_address: Option<String>,
    /// Port peers dial for the contact-exchange handshake
    pub contact_port: u16,
    /// Port peers dial to push queued messages
    pub conversation_port: u16,
    /// Local interface the listeners bind to
    pub listen_host: String,
    /// Connect timeout in seconds
    pub connect_timeout: u64,
}

/// Delivery loop cadence and timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Seconds between delivery passes for every peer
    pub retry_interval: u64,
    /// Upper bound in seconds for one contact handshake
    pub handshake_timeout: u64,
}

/// How room creation treats a failing invitee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormationPolicy {
    /// Any failed invitee fails the whole room
    Atomic,
    /// Failed invitees are left out, the room keeps the rest
    BestEffort,
}

/// Room formation policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomPolicy {
    /// Atomic or best-effort membership on creation
    pub formation: FormationPolicy,
    /// Send a `join` command for every peer after creation
    pub announce_members: bool,
}

/// State file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory for daemon state
    pub data_dir: PathBuf,
    /// Snapshot file written on shutdown
    pub state_file: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            socks_proxy: SocketAddr::from(([127, 0, 0, 1], crate::defaults::DEFAULT_SOCKS_PORT)),
            rendezvous_address: None,
            contact_port: crate::defaults::DEFAULT_CONTACT_PORT,
            conversation_port: crate::defaults::DEFAULT_CONVERSATION_PORT,
            listen_host: "127.0.0.1".to_string(),
            connect_timeout: 30,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            retry_interval: crate::defaults::DEFAULT_RETRY_INTERVAL,
            handshake_timeout: crate::defaults::DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

impl Default for RoomPolicy {
    fn default() -> Self {
        Self {
            formation: FormationPolicy::Atomic,
            announce_members: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("onionroom");

        Self {
            state_file: data_dir.join("state.json"),
            data_dir,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl NetworkConfig {
    /// Connect timeout as a `Duration`
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }
}

impl DeliveryConfig {
    /// Delivery pass interval as a `Duration`
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval)
    }

    /// Handshake timeout as a `Duration`
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout)
    }
}

impl DaemonConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, parsed or validated
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with multiple sources (default, file, environment)
    ///
    /// An explicit path that does not exist falls back to defaults.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = config_file {
            if path.exists() {
                config = Self::from_file(path)?;
            }
        } else {
            let default_locations = [
                PathBuf::from(DEFAULT_CONFIG_FILE),
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("onionroom")
                    .join(DEFAULT_CONFIG_FILE),
            ];

            if let Some(location) = default_locations.iter().find(|l| l.exists()) {
                config = Self::from_file(location)?;
            }
        }

        config = config.merge_from_env()?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = self.to_toml_string()?;
        std::fs::write(path, content).map_err(|e| ConfigError::ParseError {
            reason: e.to_string(),
        })?;
        Ok(())
    }

    fn merge_from_env(mut self) -> Result<Self> {
        fn parsed<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
            match std::env::var(key) {
                Ok(value) => value
                    .parse()
                    .map(Some)
                    .map_err(|_| ConfigError::InvalidValue { field: key.to_string(), value }.into()),
                Err(_) => Ok(None),
            }
        }

        if let Some(port) = parsed(&format!("{ENV_PREFIX}_NETWORK_CONTACT_PORT"))? {
            self.network.contact_port = port;
        }
        if let Some(port) = parsed(&format!("{ENV_PREFIX}_NETWORK_CONVERSATION_PORT"))? {
            self.network.conversation_port = port;
        }
        if let Some(proxy) = parsed(&format!("{ENV_PREFIX}_NETWORK_SOCKS_PROXY"))? {
            self.network.socks_proxy = proxy;
        }
        if let Ok(level) = std::env::var(format!("{ENV_PREFIX}_LOGGING_LEVEL")) {
            self.logging.level = level;
        }
        if let Ok(data_dir) = std::env::var(format!("{ENV_PREFIX}_STORAGE_DATA_DIR")) {
            self.storage.data_dir = PathBuf::from(data_dir);
            self.storage.state_file = self.storage.data_dir.join("state.json");
        }

        Ok(self)
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &str, value: String| -> crate::utils::MessengerError {
            ConfigError::InvalidValue {
                field: field.to_string(),
                value,
            }
            .into()
        };

        if self.network.contact_port == 0 {
            return Err(invalid("network.contact_port", "0".to_string()));
        }
        if self.network.conversation_port == 0 {
            return Err(invalid("network.conversation_port", "0".to_string()));
        }
        if self.network.contact_port == self.network.conversation_port {
            return Err(invalid(
                "network.conversation_port",
                self.network.conversation_port.to_string(),
            ));
        }
        if self.network.connect_timeout == 0 {
            return Err(invalid("network.connect_timeout", "0".to_string()));
        }
        if self.delivery.retry_interval == 0 {
            return Err(invalid("delivery.retry_interval", "0".to_string()));
        }
        if self.delivery.handshake_timeout == 0 {
            return Err(invalid("delivery.handshake_timeout", "0".to_string()));
        }

        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => return Err(invalid("logging.level", self.logging.level.clone())),
        }

        Ok(())
    }

    /// Ensure the state directory exists
    pub fn ensure_directories(&self) -> Result<()> {
        let dir = &self.storage.data_dir;
        if !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|_| ConfigError::DirectoryCreation {
                path: dir.display().to_string(),
            })?;
        }
        Ok(())
    }

    /// Get the configuration as a pretty-printed TOML string
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| {
            ConfigError::ParseError {
                reason: e.to_string(),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.network.contact_port, crate::defaults::DEFAULT_CONTACT_PORT);
        assert_eq!(config.rooms.formation, FormationPolicy::Atomic);
        assert!(config.rooms.announce_members);
    }

    #[test]
    fn test_config_serialization() {
        let config = DaemonConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("contact_port"));
        assert!(toml_str.contains("formation = \"atomic\""));
    }

    #[test]
    fn test_config_file_operations() {
        let mut config = DaemonConfig::default();
        config.rooms.formation = FormationPolicy::BestEffort;
        config.network.rendezvous_address = Some("abcdef.onion".to_string());
        let temp_file = NamedTempFile::new().unwrap();

        config.save(temp_file.path()).unwrap();
        let loaded = DaemonConfig::from_file(temp_file.path()).unwrap();

        assert_eq!(loaded.rooms.formation, FormationPolicy::BestEffort);
        assert_eq!(loaded.network.rendezvous_address.as_deref(), Some("abcdef.onion"));
        assert_eq!(loaded.delivery.retry_interval, config.delivery.retry_interval);
    }

    #[test]
    fn test_config_validation() {
        let mut config = DaemonConfig::default();
        config.network.contact_port = 0;
        assert!(config.validate().is_err());

        config = DaemonConfig::default();
        config.network.conversation_port = config.network.contact_port;
        assert!(config.validate().is_err());

        config = DaemonConfig::default();
        config.delivery.retry_interval = 0;
        assert!(config.validate().is_err());

        config = DaemonConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = DaemonConfig::from_file("/definitely/not/here.toml");
        assert!(matches!(
            result,
            Err(crate::utils::MessengerError::Config(ConfigError::FileNotFound { .. }))
        ));
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("ONIONROOM_NETWORK_CONVERSATION_PORT", "19999");

        let config = DaemonConfig::default().merge_from_env().unwrap();
        assert_eq!(config.network.conversation_port, 19999);

        std::env::remove_var("ONIONROOM_NETWORK_CONVERSATION_PORT");
    }
}
