//! Shared vocabulary for the HeronFS FUSE gateway.
//!
//! This crate holds the types that cross crate boundaries: caller
//! identity, logical file metadata, remote status codes, and the
//! nameserver endpoint configuration.

pub mod config;
pub mod types;

pub use config::EndpointConfig;
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(DFS_ROOT_PATH, "/");
        assert_eq!(DEFAULT_NAMESERVER_PORT, 8020);
        assert!(DFS_NAME_MAX >= 255);
    }
}
