//! HeronFS FUSE Gateway Library
//!
//! This crate implements a FUSE gateway for HeronFS: it mounts a remote,
//! authenticated distributed filesystem and routes every local POSIX
//! call through a nameserver session opened as the calling user, so
//! server-side permission checks apply per caller rather than per
//! daemon process.

pub mod config;
pub mod connection;
pub mod error;
pub mod filesystem;
pub mod identity;
pub mod inodes;
pub mod session;
pub mod transport;

pub use crate::config::{ClientConfig, SessionCacheConfig};
pub use crate::connection::{ConnectionCache, SessionConnector};
pub use crate::error::{ClientError, ClientResult, ConnectError, LookupError, RpcError};
pub use crate::filesystem::HeronFuse;
pub use crate::identity::IdentityResolver;
pub use crate::session::{SessionHandle, SessionLease};
pub use crate::transport::{DfsSession, GrpcConnector};
