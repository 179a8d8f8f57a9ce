use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::{Identity, ANONYMOUS_USER, DEFAULT_NAMESERVER_PORT};

/// Nameserver endpoint configuration.
///
/// Loaded once at startup and passed explicitly into the connection
/// factory and cache; read-only thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Nameserver host
    pub host: String,

    /// Nameserver port
    pub port: u16,

    /// Set when the nameserver predates per-user sessions; every caller
    /// then aliases to one shared anonymous session.
    pub legacy_protocol: bool,

    /// Bound on the whole session handshake (dial plus OpenSession)
    pub connect_timeout: Duration,

    /// Per-request timeout applied to every RPC on an open session
    pub request_timeout: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_NAMESERVER_PORT,
            legacy_protocol: false,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl EndpointConfig {
    /// Target URI for the gRPC channel
    pub fn uri(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// The user a session for `identity` is opened as.
    ///
    /// This is the single place the legacy-protocol branch lives: both
    /// the cache (for keying) and the factory (for the handshake)
    /// consult it, so pre-user-session nameservers collapse every
    /// caller onto one shared anonymous session.
    pub fn effective_user<'a>(&self, identity: &'a Identity) -> &'a str {
        if self.legacy_protocol {
            ANONYMOUS_USER
        } else {
            &identity.username
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_rendering() {
        let config = EndpointConfig {
            host: "nn1.example.com".to_string(),
            port: 9000,
            ..Default::default()
        };
        assert_eq!(config.uri(), "http://nn1.example.com:9000");
    }

    #[test]
    fn test_effective_user() {
        let alice = Identity::new("alice", "staff", vec![]);
        let mut config = EndpointConfig::default();
        assert_eq!(config.effective_user(&alice), "alice");

        config.legacy_protocol = true;
        assert_eq!(config.effective_user(&alice), ANONYMOUS_USER);
    }

    #[test]
    fn test_json_round_trip() {
        let config = EndpointConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: EndpointConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.host, config.host);
        assert_eq!(back.port, config.port);
        assert_eq!(back.connect_timeout, config.connect_timeout);
    }
}
