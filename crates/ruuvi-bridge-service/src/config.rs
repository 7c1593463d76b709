//! Bridge configuration.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use ruuvi_bridge_core::{
    DEFAULT_REGISTRY_URL, NodeConfig, ReconcilerOptions, TagFilter,
};
use ruuvi_bridge_types::{DeviceHandle, IdentityError, PairingInfo};

/// Bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP status server settings.
    pub server: ServerConfig,
    /// Upstream registry settings.
    pub registry: RegistryConfig,
    /// Bridge node settings.
    pub bridge: BridgeConfig,
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// A missing file yields the defaults.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration, collecting every problem found.
    ///
    /// # Example
    ///
    /// ```
    /// use ruuvi_bridge_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.registry.validate());
        errors.extend(self.bridge.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Settings for the local bridge node.
    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            vendor_id: self.bridge.vendor_id,
            product_id: self.bridge.product_id,
            discriminator: self.bridge.discriminator,
            pairing: self.bridge.pairing(),
            storage_path: Some(self.bridge.storage_path.clone()),
        }
    }

    /// Settings for the reconciler.
    ///
    /// Fails only if an enabled tag is not a valid hardware address, which
    /// [`validate`](Self::validate) already reports.
    pub fn reconciler_options(&self) -> Result<ReconcilerOptions, IdentityError> {
        Ok(ReconcilerOptions::default()
            .interval(self.registry.poll_interval())
            .vendor_id(self.bridge.vendor_id)
            .filter(TagFilter::from_addresses(&self.bridge.enabled_tags)?))
    }
}

/// HTTP status server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:5555").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5555".to_string(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError::new(
                "server.bind",
                "bind address cannot be empty",
            ));
            return errors;
        }

        match self.bind.rsplit_once(':') {
            None => errors.push(ValidationError::new(
                "server.bind",
                format!(
                    "invalid bind address '{}': expected format 'host:port'",
                    self.bind
                ),
            )),
            Some((_, port)) => match port.parse::<u16>() {
                Ok(0) => errors.push(ValidationError::new("server.bind", "port cannot be 0")),
                Ok(_) => {}
                Err(_) => errors.push(ValidationError::new(
                    "server.bind",
                    format!("invalid port '{}': must be a number 1-65535", port),
                )),
            },
        }

        errors
    }
}

/// Minimum registry poll interval in seconds.
pub const MIN_POLL_INTERVAL: u64 = 1;
/// Maximum registry poll interval in seconds (1 hour).
pub const MAX_POLL_INTERVAL: u64 = 3600;
/// Minimum registry request timeout in seconds.
pub const MIN_TIMEOUT: u64 = 1;
/// Maximum registry request timeout in seconds.
pub const MAX_TIMEOUT: u64 = 300;

/// Upstream registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// URL of the gateway's tag list.
    pub url: String,
    /// Delay between reconciliation cycles in seconds.
    pub poll_interval_secs: u64,
    /// Timeout for one registry request in seconds.
    pub timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REGISTRY_URL.to_string(),
            poll_interval_secs: 5,
            timeout_secs: 10,
        }
    }
}

impl RegistryConfig {
    /// Delay between cycles.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate registry configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        let url = self.url.trim();
        if url.is_empty() {
            errors.push(ValidationError::new(
                "registry.url",
                "registry URL cannot be empty",
            ));
        } else if !url.starts_with("http://") && !url.starts_with("https://") {
            errors.push(ValidationError::new(
                "registry.url",
                format!("URL must start with http:// or https://, got: {}", url),
            ));
        }

        if !(MIN_POLL_INTERVAL..=MAX_POLL_INTERVAL).contains(&self.poll_interval_secs) {
            errors.push(ValidationError::new(
                "registry.poll_interval_secs",
                format!(
                    "poll interval {} out of range ({}-{} seconds)",
                    self.poll_interval_secs, MIN_POLL_INTERVAL, MAX_POLL_INTERVAL
                ),
            ));
        }

        if !(MIN_TIMEOUT..=MAX_TIMEOUT).contains(&self.timeout_secs) {
            errors.push(ValidationError::new(
                "registry.timeout_secs",
                format!(
                    "timeout {} out of range ({}-{} seconds)",
                    self.timeout_secs, MIN_TIMEOUT, MAX_TIMEOUT
                ),
            ));
        }

        errors
    }
}

/// Largest valid setup passcode.
pub const MAX_PASSCODE: u32 = 99_999_998;
/// Largest valid 12-bit discriminator.
pub const MAX_DISCRIMINATOR: u16 = 0x0FFF;

/// Passcodes that are too easy to guess.
const TRIVIAL_PASSCODES: [u32; 10] = [
    11_111_111, 22_222_222, 33_333_333, 44_444_444, 55_555_555, 66_666_666, 77_777_777,
    88_888_888, 12_345_678, 87_654_321,
];

/// Bridge node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Run the bridge at all. When false the service exits right away.
    pub enabled: bool,
    /// Setup passcode.
    pub passcode: u32,
    /// Discriminator advertised while waiting to be commissioned.
    pub discriminator: u16,
    /// Vendor identifier.
    pub vendor_id: u16,
    /// Product identifier.
    pub product_id: u16,
    /// Directory for persisted node state.
    pub storage_path: PathBuf,
    /// Hardware addresses to bridge; empty bridges every tag.
    pub enabled_tags: Vec<String>,
    /// Manual pairing code to report while not commissioned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pairing_code: Option<String>,
    /// QR code payload to report while not commissioned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            passcode: 20_202_021,
            discriminator: 3840,
            vendor_id: 0xFFF1,
            product_id: 0x8000,
            storage_path: default_storage_path(),
            enabled_tags: Vec::new(),
            pairing_code: None,
            qr_code: None,
        }
    }
}

impl BridgeConfig {
    /// Pairing artifacts from the configured codes, if any is set.
    pub fn pairing(&self) -> Option<PairingInfo> {
        if self.pairing_code.is_none() && self.qr_code.is_none() {
            return None;
        }
        Some(PairingInfo::new(
            self.pairing_code.clone().unwrap_or_default(),
            self.qr_code.clone().unwrap_or_default(),
        ))
    }

    /// Validate bridge configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.passcode == 0 || self.passcode > MAX_PASSCODE {
            errors.push(ValidationError::new(
                "bridge.passcode",
                format!(
                    "passcode {} out of range (1-{})",
                    self.passcode, MAX_PASSCODE
                ),
            ));
        } else if TRIVIAL_PASSCODES.contains(&self.passcode) {
            errors.push(ValidationError::new(
                "bridge.passcode",
                format!("passcode {} is too easy to guess", self.passcode),
            ));
        }

        if self.discriminator > MAX_DISCRIMINATOR {
            errors.push(ValidationError::new(
                "bridge.discriminator",
                format!(
                    "discriminator {} out of range (0-{})",
                    self.discriminator, MAX_DISCRIMINATOR
                ),
            ));
        }

        if self.vendor_id == 0 {
            errors.push(ValidationError::new("bridge.vendor_id", "vendor id cannot be 0"));
        }
        if self.product_id == 0 {
            errors.push(ValidationError::new(
                "bridge.product_id",
                "product id cannot be 0",
            ));
        }

        if self.storage_path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "bridge.storage_path",
                "storage path cannot be empty",
            ));
        }

        let mut seen = HashSet::new();
        for (i, tag) in self.enabled_tags.iter().enumerate() {
            let field = format!("bridge.enabled_tags[{}]", i);
            match DeviceHandle::from_address(tag) {
                Ok(handle) => {
                    if !seen.insert(handle) {
                        errors.push(ValidationError::new(
                            field,
                            format!("duplicate tag address '{}'", tag),
                        ));
                    }
                }
                Err(e) => errors.push(ValidationError::new(field, e.to_string())),
            }
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `bridge.enabled_tags[0]`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ruuvi-bridge")
        .join("bridge.toml")
}

/// Default directory for persisted node state.
pub fn default_storage_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ruuvi-bridge")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(result: Result<(), ConfigError>) -> Vec<String> {
        match result {
            Err(ConfigError::Validation(errors)) => errors.into_iter().map(|e| e.field).collect(),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(()) => Vec::new(),
        }
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.bind, "127.0.0.1:5555");
        assert_eq!(config.registry.url, "http://localhost:8080/api/tags");
        assert_eq!(config.registry.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.registry.timeout(), Duration::from_secs(10));
        assert!(config.bridge.enabled);
        assert_eq!(config.bridge.passcode, 20202021);
        assert_eq!(config.bridge.discriminator, 3840);
        assert_eq!(config.bridge.vendor_id, 0xFFF1);
        assert_eq!(config.bridge.product_id, 0x8000);
        assert!(config.bridge.enabled_tags.is_empty());
        assert!(config.bridge.pairing().is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_config_full_toml() {
        let toml = r#"
            [server]
            bind = "0.0.0.0:5555"

            [registry]
            url = "http://gateway.local:8080/api/tags"
            poll_interval_secs = 30
            timeout_secs = 3

            [bridge]
            enabled = true
            passcode = 34567890
            discriminator = 1234
            vendor_id = 0xFFF2
            product_id = 0x8001
            storage_path = "/var/lib/ruuvi-bridge"
            enabled_tags = ["AA:BB:CC:DD:EE:FF", "11-22-33-44-55-66"]
            pairing_code = "34970112332"
            qr_code = "MT:Y.K9042C00KA0648G00"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.bind, "0.0.0.0:5555");
        assert_eq!(config.registry.poll_interval_secs, 30);
        assert_eq!(config.bridge.vendor_id, 0xFFF2);
        assert_eq!(config.bridge.enabled_tags.len(), 2);
        assert_eq!(
            config.bridge.pairing(),
            Some(PairingInfo::new("34970112332", "MT:Y.K9042C00KA0648G00"))
        );

        let node = config.node_config();
        assert_eq!(node.product_id, 0x8001);
        assert_eq!(node.discriminator, 1234);
        assert_eq!(node.storage_path, Some(PathBuf::from("/var/lib/ruuvi-bridge")));

        let options = config.reconciler_options().unwrap();
        assert_eq!(options.interval, Duration::from_secs(30));
        assert_eq!(options.vendor_id, 0xFFF2);
        assert_eq!(options.filter.len(), 2);
    }

    #[test]
    fn test_config_partial_toml_uses_defaults() {
        let toml = r#"
            [bridge]
            enabled = false
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(!config.bridge.enabled);
        assert_eq!(config.bridge.passcode, 20202021);
        assert_eq!(config.server.bind, "127.0.0.1:5555");
    }

    #[test]
    fn test_pairing_with_only_qr_code() {
        let bridge = BridgeConfig {
            qr_code: Some("MT:X".to_string()),
            ..BridgeConfig::default()
        };
        assert_eq!(bridge.pairing(), Some(PairingInfo::new("", "MT:X")));
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("bridge.toml");

        let mut config = Config::default();
        config.server.bind = "0.0.0.0:9090".to_string();
        config.bridge.storage_path = PathBuf::from("/tmp/ruuvi");
        config.bridge.enabled_tags = vec!["AA:BB:CC:DD:EE:FF".to_string()];
        config.bridge.pairing_code = Some("123".to_string());

        config.save(&config_path).unwrap();
        let loaded = Config::load_validated(&config_path).unwrap();

        assert_eq!(loaded.server.bind, "0.0.0.0:9090");
        assert_eq!(loaded.bridge.storage_path, PathBuf::from("/tmp/ruuvi"));
        assert_eq!(loaded.bridge.enabled_tags, vec!["AA:BB:CC:DD:EE:FF"]);
        assert_eq!(loaded.bridge.pairing_code.as_deref(), Some("123"));
        assert_eq!(loaded.bridge.qr_code, None);
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/bridge.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        std::fs::write(&config_path, "this is not valid { toml").unwrap();

        let result = Config::load(&config_path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_validate_server_bind() {
        for bind in ["", "localhost", "127.0.0.1:0", "127.0.0.1:http"] {
            let mut config = Config::default();
            config.server.bind = bind.to_string();
            assert_eq!(fields(config.validate()), vec!["server.bind"], "bind {:?}", bind);
        }

        let mut config = Config::default();
        config.server.bind = "[::1]:5555".to_string();
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_registry() {
        let mut config = Config::default();
        config.registry.url = "ftp://gateway/tags".to_string();
        config.registry.poll_interval_secs = 0;
        config.registry.timeout_secs = 301;

        assert_eq!(
            fields(config.validate()),
            vec![
                "registry.url",
                "registry.poll_interval_secs",
                "registry.timeout_secs"
            ]
        );
    }

    #[test]
    fn test_validate_passcode() {
        for passcode in [0, 99_999_999, 11_111_111, 12_345_678] {
            let mut config = Config::default();
            config.bridge.passcode = passcode;
            assert_eq!(fields(config.validate()), vec!["bridge.passcode"]);
        }

        let mut config = Config::default();
        config.bridge.passcode = 1;
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_bridge_ids() {
        let mut config = Config::default();
        config.bridge.discriminator = 4096;
        config.bridge.vendor_id = 0;
        config.bridge.product_id = 0;
        config.bridge.storage_path = PathBuf::new();

        assert_eq!(
            fields(config.validate()),
            vec![
                "bridge.discriminator",
                "bridge.vendor_id",
                "bridge.product_id",
                "bridge.storage_path"
            ]
        );
    }

    #[test]
    fn test_validate_enabled_tags() {
        let mut config = Config::default();
        config.bridge.enabled_tags = vec![
            "AA:BB:CC:DD:EE:FF".to_string(),
            "not a mac".to_string(),
            "aa-bb-cc-dd-ee-ff".to_string(),
        ];

        assert_eq!(
            fields(config.validate()),
            vec!["bridge.enabled_tags[1]", "bridge.enabled_tags[2]"]
        );
        assert!(config.reconciler_options().is_err());
    }

    #[test]
    fn test_validation_error_display() {
        let mut config = Config::default();
        config.bridge.vendor_id = 0;
        let display = config.validate().unwrap_err().to_string();
        assert!(display.contains("Configuration validation failed"));
        assert!(display.contains("bridge.vendor_id: vendor id cannot be 0"));
    }

    #[test]
    fn test_default_paths() {
        assert!(default_config_path().ends_with("ruuvi-bridge/bridge.toml"));
        assert!(default_storage_path().ends_with("ruuvi-bridge"));
    }
}
