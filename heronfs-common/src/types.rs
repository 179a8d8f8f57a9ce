use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

/// HeronFS gateway version information
pub const HERONFS_VERSION: &str = "0.1.0";

/// Protocol version this client speaks. Nameservers older than
/// `MIN_USER_SESSION_VERSION` do not understand per-user sessions.
pub const CLIENT_PROTOCOL_VERSION: u32 = 21;
pub const MIN_USER_SESSION_VERSION: u32 = 19;

/// File system constants
pub const DFS_ROOT_PATH: &str = "/";
pub const DFS_NAME_MAX: usize = 255;
pub const DFS_PATH_MAX: usize = 8000;
pub const DEFAULT_NAMESERVER_PORT: u16 = 8020;
pub const DEFAULT_BLOCK_SIZE: u64 = 0x0800_0000; // 128MB

/// User string sent on the wire when the nameserver predates per-user
/// sessions; the server hands every such caller the shared session.
pub const ANONYMOUS_USER: &str = "";

/// Unique identifier for remote sessions
pub type SessionId = u64;

/// Timestamps in microseconds since UNIX epoch
pub type Timestamp = u64;

/// Get current timestamp in microseconds
pub fn now_micros() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

/// Canonical caller identity, derived once per filesystem call from the
/// numeric credentials the kernel attaches to the request.
///
/// Equality and hashing are by username only: the nameserver's session
/// model is per-user, so group data rides along for the handshake but
/// never participates in cache keying.
#[derive(Debug, Clone, Eq)]
pub struct Identity {
    pub username: String,
    pub primary_group: String,
    pub groups: Vec<String>,
}

impl Identity {
    pub fn new(
        username: impl Into<String>,
        primary_group: impl Into<String>,
        groups: Vec<String>,
    ) -> Self {
        Self {
            username: username.into(),
            primary_group: primary_group.into(),
            groups,
        }
    }

    /// The identity used when the remote service predates per-user
    /// sessions and every caller aliases to one shared session.
    pub fn anonymous() -> Self {
        Self {
            username: ANONYMOUS_USER.to_string(),
            primary_group: ANONYMOUS_USER.to_string(),
            groups: Vec::new(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username == ANONYMOUS_USER
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.username == other.username
    }
}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.username.hash(state);
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_anonymous() {
            write!(f, "<anonymous>")
        } else {
            write!(f, "{}", self.username)
        }
    }
}

/// Kind of a remote filesystem object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
}

/// Logical (not wire) metadata for one remote file.
///
/// Owner and group are carried as names; mapping to local uid/gid is the
/// gateway's job at the FUSE boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStatus {
    pub path: String,
    pub kind: FileKind,
    pub length: u64,
    pub permission: u32,
    pub owner: String,
    pub group: String,
    pub atime: Timestamp,
    pub mtime: Timestamp,
    pub block_size: u64,
    pub nlink: u32,
    pub replication: u32,
}

impl FileStatus {
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }
}

/// Aggregate filesystem statistics for statfs
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FsStats {
    pub capacity: u64,
    pub used: u64,
    pub remaining: u64,
    pub file_count: u64,
}

/// Status codes reported in-band by the nameserver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DfsStatus {
    Ok = 0,
    EPerm = 1,
    ENotDir = 2,
    ENoEnt = 3,
    EAcces = 4,
    EExist = 5,
    EInval = 6,
    ENotEmpty = 7,
    EDQuot = 8,
    EIO = 9,
    ENoSpc = 10,
    EBusy = 11,
    ENameTooLong = 12,
    ENotSupported = 13,
    ESessionExpired = 14,
}

impl DfsStatus {
    /// Every variant, for table-driven tests
    pub const ALL: [DfsStatus; 15] = [
        DfsStatus::Ok,
        DfsStatus::EPerm,
        DfsStatus::ENotDir,
        DfsStatus::ENoEnt,
        DfsStatus::EAcces,
        DfsStatus::EExist,
        DfsStatus::EInval,
        DfsStatus::ENotEmpty,
        DfsStatus::EDQuot,
        DfsStatus::EIO,
        DfsStatus::ENoSpc,
        DfsStatus::EBusy,
        DfsStatus::ENameTooLong,
        DfsStatus::ENotSupported,
        DfsStatus::ESessionExpired,
    ];

    pub fn is_ok(&self) -> bool {
        matches!(self, DfsStatus::Ok)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DfsStatus::Ok => "OK",
            DfsStatus::EPerm => "Operation not permitted",
            DfsStatus::ENotDir => "Not a directory",
            DfsStatus::ENoEnt => "No such file or directory",
            DfsStatus::EAcces => "Permission denied",
            DfsStatus::EExist => "File exists",
            DfsStatus::EInval => "Invalid argument",
            DfsStatus::ENotEmpty => "Directory not empty",
            DfsStatus::EDQuot => "Quota exceeded",
            DfsStatus::EIO => "I/O error",
            DfsStatus::ENoSpc => "No space left on device",
            DfsStatus::EBusy => "Device or resource busy",
            DfsStatus::ENameTooLong => "Name too long",
            DfsStatus::ENotSupported => "Operation not supported",
            DfsStatus::ESessionExpired => "Session expired",
        }
    }
}

impl fmt::Display for DfsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_identity_equality_by_username_only() {
        let a = Identity::new("alice", "staff", vec!["staff".into(), "wheel".into()]);
        let b = Identity::new("alice", "users", vec![]);
        let c = Identity::new("bob", "staff", vec!["staff".into()]);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert!(!set.contains(&c));
    }

    #[test]
    fn test_anonymous_identity() {
        let anon = Identity::anonymous();
        assert!(anon.is_anonymous());
        assert_eq!(anon.to_string(), "<anonymous>");
        assert!(!Identity::new("alice", "staff", vec![]).is_anonymous());
    }

    #[test]
    fn test_status_display() {
        assert!(DfsStatus::Ok.is_ok());
        for status in DfsStatus::ALL {
            assert!(!status.as_str().is_empty());
        }
        assert_eq!(DfsStatus::ENoEnt.to_string(), "No such file or directory");
    }

    #[test]
    fn test_file_status_is_dir() {
        let status = FileStatus {
            path: "/user/alice".to_string(),
            kind: FileKind::Directory,
            length: 0,
            permission: 0o755,
            owner: "alice".to_string(),
            group: "staff".to_string(),
            atime: now_micros(),
            mtime: now_micros(),
            block_size: DEFAULT_BLOCK_SIZE,
            nlink: 2,
            replication: 0,
        };
        assert!(status.is_dir());
    }
}
