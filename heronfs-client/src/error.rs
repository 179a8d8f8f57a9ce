use thiserror::Error;

use heronfs_common::types::DfsStatus;

/// Caller identity could not be resolved
#[derive(Error, Debug, Clone)]
pub enum LookupError {
    #[error("no account for uid {0}")]
    UnknownUser(u32),

    #[error("identity database unavailable: {0}")]
    Unavailable(String),
}

/// Session establishment failed.
///
/// Clone is required: the cache broadcasts one connect result to every
/// coalesced waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),

    #[error("session handshake timed out")]
    Timeout,
}

/// An RPC through an established session failed
#[derive(Error, Debug, Clone)]
pub enum RpcError {
    #[error("nameserver error: {0}")]
    Remote(DfsStatus),

    #[error("session is stale")]
    StaleSession,

    #[error("transport error: {0}")]
    Transport(String),
}

/// Umbrella error for the gateway
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("identity lookup failed: {0}")]
    Lookup(#[from] LookupError),

    #[error("session connect failed: {0}")]
    Connect(#[from] ConnectError),

    #[error("remote operation failed: {0}")]
    Rpc(#[from] RpcError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Map a nameserver status code to the errno the kernel sees.
///
/// The single lookup table every layer above relies on.
pub fn status_errno(status: DfsStatus) -> libc::c_int {
    match status {
        DfsStatus::Ok => 0,
        DfsStatus::EPerm => libc::EPERM,
        DfsStatus::ENotDir => libc::ENOTDIR,
        DfsStatus::ENoEnt => libc::ENOENT,
        DfsStatus::EAcces => libc::EACCES,
        DfsStatus::EExist => libc::EEXIST,
        DfsStatus::EInval => libc::EINVAL,
        DfsStatus::ENotEmpty => libc::ENOTEMPTY,
        DfsStatus::EDQuot => libc::EDQUOT,
        DfsStatus::EIO => libc::EIO,
        DfsStatus::ENoSpc => libc::ENOSPC,
        DfsStatus::EBusy => libc::EBUSY,
        DfsStatus::ENameTooLong => libc::ENAMETOOLONG,
        DfsStatus::ENotSupported => libc::ENOSYS,
        DfsStatus::ESessionExpired => libc::ESTALE,
    }
}

impl ClientError {
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            ClientError::Lookup(LookupError::UnknownUser(_)) => libc::EACCES,
            ClientError::Lookup(LookupError::Unavailable(_)) => libc::EIO,
            ClientError::Connect(ConnectError::Auth(_)) => libc::EACCES,
            ClientError::Connect(ConnectError::Network(_)) => libc::EIO,
            ClientError::Connect(ConnectError::ProtocolMismatch(_)) => libc::EPROTO,
            ClientError::Connect(ConnectError::Timeout) => libc::ETIMEDOUT,
            ClientError::Rpc(RpcError::Remote(status)) => status_errno(*status),
            ClientError::Rpc(RpcError::StaleSession) => libc::ESTALE,
            ClientError::Rpc(RpcError::Transport(_)) => libc::EIO,
            ClientError::InvalidArgument(_) => libc::EINVAL,
            _ => libc::EIO,
        }
    }

    /// Whether the dispatch layer may retry the whole operation once on
    /// a fresh session. Auth failures and remote status errors never
    /// qualify; this is the only place that policy lives.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Connect(ConnectError::Network(_))
                | ClientError::Connect(ConnectError::Timeout)
                | ClientError::Rpc(RpcError::StaleSession)
                | ClientError::Rpc(RpcError::Transport(_))
        )
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        let err = ClientError::Lookup(LookupError::UnknownUser(12345));
        assert_eq!(err.to_errno(), libc::EACCES);

        let err = ClientError::Connect(ConnectError::Timeout);
        assert_eq!(err.to_errno(), libc::ETIMEDOUT);

        let err = ClientError::Rpc(RpcError::Remote(DfsStatus::ENoEnt));
        assert_eq!(err.to_errno(), libc::ENOENT);

        let err = ClientError::Rpc(RpcError::StaleSession);
        assert_eq!(err.to_errno(), libc::ESTALE);

        let err = ClientError::InvalidArgument("bad name".into());
        assert_eq!(err.to_errno(), libc::EINVAL);
    }

    #[test]
    fn test_retry_policy() {
        assert!(ClientError::Rpc(RpcError::StaleSession).is_retryable());
        assert!(ClientError::Rpc(RpcError::Transport("reset".into())).is_retryable());
        assert!(ClientError::Connect(ConnectError::Network("refused".into())).is_retryable());
        assert!(ClientError::Connect(ConnectError::Timeout).is_retryable());

        assert!(!ClientError::Connect(ConnectError::Auth("bad token".into())).is_retryable());
        assert!(!ClientError::Rpc(RpcError::Remote(DfsStatus::EAcces)).is_retryable());
        assert!(!ClientError::Lookup(LookupError::UnknownUser(1)).is_retryable());
    }

    #[test]
    fn test_every_status_has_sane_errno() {
        for status in DfsStatus::ALL {
            let errno = status_errno(status);
            if status.is_ok() {
                assert_eq!(errno, 0);
            } else {
                assert!(errno > 0, "{status:?} mapped to {errno}");
            }
        }
    }
}
