use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use heronfs_common::config::EndpointConfig;

use crate::error::ClientResult;

/// Gateway configuration, assembled once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Nameserver endpoint
    pub nameserver: EndpointConfig,

    /// Mount point path
    pub mount_point: PathBuf,

    /// Session cache behavior
    pub session: SessionCacheConfig,

    /// TTL the kernel may cache attributes for
    pub attr_ttl: Duration,

    /// Move deleted files into the caller's trash instead of removing them
    pub use_trash: bool,

    /// Enable read-only mode
    pub read_only: bool,

    /// Allow other users to access the mount
    pub allow_other: bool,

    /// Allow root to access the mount
    pub allow_root: bool,
}

/// Tunables for the identity-scoped session cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCacheConfig {
    /// Idle time after which an unborrowed session is evicted
    pub idle_timeout: Duration,

    /// How often the background sweeper runs
    pub sweep_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            nameserver: EndpointConfig::default(),
            mount_point: PathBuf::from("/mnt/heronfs"),
            session: SessionCacheConfig::default(),
            attr_ttl: Duration::from_secs(1),
            use_trash: true,
            read_only: false,
            allow_other: false,
            allow_root: false,
        }
    }
}

impl Default for SessionCacheConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a file via the config crate builder
    pub fn load<P: AsRef<Path>>(path: P) -> ClientResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> ClientResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> ClientResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.nameserver.host, "127.0.0.1");
        assert_eq!(config.nameserver.port, 8020);
        assert!(!config.nameserver.legacy_protocol);
        assert_eq!(config.mount_point, PathBuf::from("/mnt/heronfs"));
        assert!(config.use_trash);
        assert!(!config.read_only);
        assert!(config.session.idle_timeout > config.session.sweep_interval);
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heronfs.json");

        let mut config = ClientConfig::default();
        config.nameserver.host = "nn1.example.com".to_string();
        config.read_only = true;
        config.to_file(&path).unwrap();

        let back = ClientConfig::from_file(&path).unwrap();
        assert_eq!(back.nameserver.host, "nn1.example.com");
        assert!(back.read_only);
        assert_eq!(back.session.idle_timeout, config.session.idle_timeout);
    }

    #[test]
    fn test_load_via_config_crate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heronfs.json");
        ClientConfig::default().to_file(&path).unwrap();

        let loaded = ClientConfig::load(&path).unwrap();
        assert_eq!(loaded.nameserver.port, 8020);
    }
}
