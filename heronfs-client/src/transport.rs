use async_trait::async_trait;
use tonic::transport::Endpoint;
use tonic::Code;
use tracing::{debug, info};

use heronfs_common::config::EndpointConfig;
use heronfs_common::types::{
    DfsStatus, FileKind, FileStatus, FsStats, Identity, SessionId, CLIENT_PROTOCOL_VERSION,
    MIN_USER_SESSION_VERSION,
};
use heronfs_protocol as proto;
use heronfs_protocol::NameServiceClient;

use crate::connection::SessionConnector;
use crate::error::{ConnectError, RpcError};
use std::sync::Arc;

/// The operation surface the dispatch adapter needs from one open
/// session. Implementations must be safe for concurrent independent
/// requests; borrowers never serialize against each other.
#[async_trait]
pub trait DfsSession: Send + Sync {
    async fn file_status(&self, path: &str) -> Result<FileStatus, RpcError>;
    async fn list_status(&self, path: &str) -> Result<Vec<FileStatus>, RpcError>;
    async fn create(&self, path: &str, mode: u32, overwrite: bool) -> Result<FileStatus, RpcError>;
    async fn read(&self, path: &str, offset: u64, length: u32) -> Result<Vec<u8>, RpcError>;
    async fn write(&self, path: &str, offset: u64, data: &[u8]) -> Result<u32, RpcError>;
    async fn mkdirs(&self, path: &str, mode: u32) -> Result<(), RpcError>;
    async fn delete(&self, path: &str, recursive: bool) -> Result<(), RpcError>;
    async fn rename(&self, src: &str, dst: &str) -> Result<(), RpcError>;
    async fn set_permission(&self, path: &str, mode: u32) -> Result<(), RpcError>;
    async fn set_owner(
        &self,
        path: &str,
        owner: Option<&str>,
        group: Option<&str>,
    ) -> Result<(), RpcError>;
    async fn set_times(
        &self,
        path: &str,
        atime: Option<u64>,
        mtime: Option<u64>,
    ) -> Result<(), RpcError>;
    async fn truncate(&self, path: &str, length: u64) -> Result<(), RpcError>;
    async fn fs_stats(&self) -> Result<FsStats, RpcError>;
    async fn close(&self) -> Result<(), RpcError>;
}

fn status_from_wire(code: i32) -> DfsStatus {
    match proto::StatusCode::try_from(code) {
        Ok(proto::StatusCode::Ok) => DfsStatus::Ok,
        Ok(proto::StatusCode::EPerm) => DfsStatus::EPerm,
        Ok(proto::StatusCode::ENotDir) => DfsStatus::ENotDir,
        Ok(proto::StatusCode::ENoEnt) => DfsStatus::ENoEnt,
        Ok(proto::StatusCode::EAcces) => DfsStatus::EAcces,
        Ok(proto::StatusCode::EExist) => DfsStatus::EExist,
        Ok(proto::StatusCode::EInval) => DfsStatus::EInval,
        Ok(proto::StatusCode::ENotEmpty) => DfsStatus::ENotEmpty,
        Ok(proto::StatusCode::EDQuot) => DfsStatus::EDQuot,
        Ok(proto::StatusCode::EIo) => DfsStatus::EIO,
        Ok(proto::StatusCode::ENoSpc) => DfsStatus::ENoSpc,
        Ok(proto::StatusCode::EBusy) => DfsStatus::EBusy,
        Ok(proto::StatusCode::ENameTooLong) => DfsStatus::ENameTooLong,
        Ok(proto::StatusCode::ENotSupported) => DfsStatus::ENotSupported,
        Ok(proto::StatusCode::ESessionExpired) => DfsStatus::ESessionExpired,
        Err(_) => DfsStatus::EIO,
    }
}

fn file_status_from_wire(file: proto::FileStatusProto) -> FileStatus {
    let kind = match proto::FileType::try_from(file.file_type) {
        Ok(proto::FileType::Directory) => FileKind::Directory,
        Ok(proto::FileType::Symlink) => FileKind::Symlink,
        _ => FileKind::Regular,
    };
    FileStatus {
        path: file.path,
        kind,
        length: file.length,
        permission: file.permission,
        owner: file.owner,
        group: file.group,
        atime: file.atime,
        mtime: file.mtime,
        block_size: file.block_size,
        nlink: file.nlink,
        replication: file.replication,
    }
}

/// Map an in-band status on an established session to an RPC error.
/// An expired session is the stale-session signal that drives cache
/// invalidation upstream.
fn check_status(code: i32) -> Result<(), RpcError> {
    match status_from_wire(code) {
        DfsStatus::Ok => Ok(()),
        DfsStatus::ESessionExpired => Err(RpcError::StaleSession),
        status => Err(RpcError::Remote(status)),
    }
}

/// Map a transport-level failure on an established session. A severed
/// or de-authenticated channel means the cached session is unusable.
fn rpc_error(status: tonic::Status) -> RpcError {
    match status.code() {
        Code::Unavailable | Code::Unauthenticated => RpcError::StaleSession,
        _ => RpcError::Transport(status.to_string()),
    }
}

/// Production connection factory: dials the nameserver and performs the
/// OpenSession handshake under a given identity.
///
/// One attempt per call, no retries; the cache coordinates retry and
/// coalescing policy across waiters.
pub struct GrpcConnector {
    endpoint: EndpointConfig,
}

impl GrpcConnector {
    pub fn new(endpoint: EndpointConfig) -> Self {
        Self { endpoint }
    }

    fn connect_error(status: tonic::Status) -> ConnectError {
        match status.code() {
            Code::Unauthenticated | Code::PermissionDenied => {
                ConnectError::Auth(status.message().to_string())
            }
            Code::DeadlineExceeded => ConnectError::Timeout,
            _ => ConnectError::Network(status.to_string()),
        }
    }
}

#[async_trait]
impl SessionConnector for GrpcConnector {
    async fn connect(&self, identity: &Identity) -> Result<Arc<dyn DfsSession>, ConnectError> {
        let user = self.endpoint.effective_user(identity);
        debug!("dialing {} as '{}'", self.endpoint.uri(), user);

        let endpoint = Endpoint::from_shared(self.endpoint.uri())
            .map_err(|e| ConnectError::Network(format!("invalid endpoint: {e}")))?
            .connect_timeout(self.endpoint.connect_timeout)
            .timeout(self.endpoint.request_timeout);

        let channel = endpoint
            .connect()
            .await
            .map_err(|e| ConnectError::Network(e.to_string()))?;

        let mut client = NameServiceClient::new(channel);
        let request = proto::OpenSessionRequest {
            user: user.to_string(),
            primary_group: if user.is_empty() {
                String::new()
            } else {
                identity.primary_group.clone()
            },
            groups: if user.is_empty() {
                Vec::new()
            } else {
                identity.groups.clone()
            },
            client_version: CLIENT_PROTOCOL_VERSION,
        };

        let response = client
            .open_session(request)
            .await
            .map_err(Self::connect_error)?
            .into_inner();

        match status_from_wire(response.status) {
            DfsStatus::Ok => {}
            DfsStatus::EAcces | DfsStatus::EPerm => {
                return Err(ConnectError::Auth(format!(
                    "nameserver rejected session for '{user}'"
                )))
            }
            DfsStatus::ENotSupported => {
                return Err(ConnectError::ProtocolMismatch(
                    "nameserver does not support this client version".to_string(),
                ))
            }
            status => return Err(ConnectError::Network(status.to_string())),
        }

        if !self.endpoint.legacy_protocol && response.protocol_version < MIN_USER_SESSION_VERSION {
            return Err(ConnectError::ProtocolMismatch(format!(
                "nameserver protocol {} predates per-user sessions; \
                 mount with legacy_protocol to use the shared session",
                response.protocol_version
            )));
        }

        info!(
            "opened session {} as '{}' (server protocol {})",
            response.session_id, user, response.protocol_version
        );
        Ok(Arc::new(GrpcSession {
            client,
            session_id: response.session_id,
        }))
    }
}

/// An established nameserver session bound to one remote session id
pub struct GrpcSession {
    client: NameServiceClient,
    session_id: SessionId,
}

impl GrpcSession {
    /// Channel clones are cheap and let concurrent RPCs share the
    /// underlying HTTP/2 connection without serializing.
    fn client(&self) -> NameServiceClient {
        self.client.clone()
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }
}

#[async_trait]
impl DfsSession for GrpcSession {
    async fn file_status(&self, path: &str) -> Result<FileStatus, RpcError> {
        let response = self
            .client()
            .get_file_status(proto::GetFileStatusRequest {
                session_id: self.session_id,
                path: path.to_string(),
            })
            .await
            .map_err(rpc_error)?
            .into_inner();
        check_status(response.status)?;
        response
            .file
            .map(file_status_from_wire)
            .ok_or(RpcError::Remote(DfsStatus::ENoEnt))
    }

    async fn list_status(&self, path: &str) -> Result<Vec<FileStatus>, RpcError> {
        let response = self
            .client()
            .list_status(proto::ListStatusRequest {
                session_id: self.session_id,
                path: path.to_string(),
            })
            .await
            .map_err(rpc_error)?
            .into_inner();
        check_status(response.status)?;
        Ok(response
            .entries
            .into_iter()
            .map(file_status_from_wire)
            .collect())
    }

    async fn create(&self, path: &str, mode: u32, overwrite: bool) -> Result<FileStatus, RpcError> {
        let response = self
            .client()
            .create_file(proto::CreateFileRequest {
                session_id: self.session_id,
                path: path.to_string(),
                mode,
                overwrite,
            })
            .await
            .map_err(rpc_error)?
            .into_inner();
        check_status(response.status)?;
        response
            .file
            .map(file_status_from_wire)
            .ok_or(RpcError::Remote(DfsStatus::EIO))
    }

    async fn read(&self, path: &str, offset: u64, length: u32) -> Result<Vec<u8>, RpcError> {
        let response = self
            .client()
            .read(proto::ReadRequest {
                session_id: self.session_id,
                path: path.to_string(),
                offset,
                length,
            })
            .await
            .map_err(rpc_error)?
            .into_inner();
        check_status(response.status)?;
        Ok(response.data)
    }

    async fn write(&self, path: &str, offset: u64, data: &[u8]) -> Result<u32, RpcError> {
        let response = self
            .client()
            .write(proto::WriteRequest {
                session_id: self.session_id,
                path: path.to_string(),
                offset,
                data: data.to_vec(),
            })
            .await
            .map_err(rpc_error)?
            .into_inner();
        check_status(response.status)?;
        Ok(response.written)
    }

    async fn mkdirs(&self, path: &str, mode: u32) -> Result<(), RpcError> {
        let response = self
            .client()
            .mkdirs(proto::MkdirsRequest {
                session_id: self.session_id,
                path: path.to_string(),
                mode,
            })
            .await
            .map_err(rpc_error)?
            .into_inner();
        check_status(response.status)
    }

    async fn delete(&self, path: &str, recursive: bool) -> Result<(), RpcError> {
        let response = self
            .client()
            .delete(proto::DeleteRequest {
                session_id: self.session_id,
                path: path.to_string(),
                recursive,
            })
            .await
            .map_err(rpc_error)?
            .into_inner();
        check_status(response.status)
    }

    async fn rename(&self, src: &str, dst: &str) -> Result<(), RpcError> {
        let response = self
            .client()
            .rename(proto::RenameRequest {
                session_id: self.session_id,
                src: src.to_string(),
                dst: dst.to_string(),
            })
            .await
            .map_err(rpc_error)?
            .into_inner();
        check_status(response.status)
    }

    async fn set_permission(&self, path: &str, mode: u32) -> Result<(), RpcError> {
        let response = self
            .client()
            .set_permission(proto::SetPermissionRequest {
                session_id: self.session_id,
                path: path.to_string(),
                mode,
            })
            .await
            .map_err(rpc_error)?
            .into_inner();
        check_status(response.status)
    }

    async fn set_owner(
        &self,
        path: &str,
        owner: Option<&str>,
        group: Option<&str>,
    ) -> Result<(), RpcError> {
        let response = self
            .client()
            .set_owner(proto::SetOwnerRequest {
                session_id: self.session_id,
                path: path.to_string(),
                owner: owner.map(str::to_string),
                group: group.map(str::to_string),
            })
            .await
            .map_err(rpc_error)?
            .into_inner();
        check_status(response.status)
    }

    async fn set_times(
        &self,
        path: &str,
        atime: Option<u64>,
        mtime: Option<u64>,
    ) -> Result<(), RpcError> {
        let response = self
            .client()
            .set_times(proto::SetTimesRequest {
                session_id: self.session_id,
                path: path.to_string(),
                atime,
                mtime,
            })
            .await
            .map_err(rpc_error)?
            .into_inner();
        check_status(response.status)
    }

    async fn truncate(&self, path: &str, length: u64) -> Result<(), RpcError> {
        let response = self
            .client()
            .truncate(proto::TruncateRequest {
                session_id: self.session_id,
                path: path.to_string(),
                length,
            })
            .await
            .map_err(rpc_error)?
            .into_inner();
        check_status(response.status)
    }

    async fn fs_stats(&self) -> Result<FsStats, RpcError> {
        let response = self
            .client()
            .get_fs_stats(proto::GetFsStatsRequest {
                session_id: self.session_id,
            })
            .await
            .map_err(rpc_error)?
            .into_inner();
        check_status(response.status)?;
        Ok(FsStats {
            capacity: response.capacity,
            used: response.used,
            remaining: response.remaining,
            file_count: response.file_count,
        })
    }

    async fn close(&self) -> Result<(), RpcError> {
        let response = self
            .client()
            .close_session(proto::CloseSessionRequest {
                session_id: self.session_id,
            })
            .await
            .map_err(rpc_error)?
            .into_inner();
        check_status(response.status)
    }
}

/// Connector and session stubs shared by unit and integration tests
pub mod testing {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// In-memory session that records calls instead of talking to a
    /// nameserver. Once closed, every RPC fails as a real severed
    /// session would.
    #[derive(Default)]
    pub struct StubDfsSession {
        closes: AtomicU64,
        requests: AtomicU64,
        last_delete: Mutex<Option<(String, bool)>>,
    }

    impl StubDfsSession {
        pub fn close_count(&self) -> u64 {
            self.closes.load(Ordering::SeqCst)
        }

        pub fn request_count(&self) -> u64 {
            self.requests.load(Ordering::SeqCst)
        }

        /// Path and recursive flag of the most recent delete call
        pub fn last_delete(&self) -> Option<(String, bool)> {
            self.last_delete.lock().unwrap().clone()
        }

        fn track(&self) -> Result<(), RpcError> {
            if self.closes.load(Ordering::SeqCst) > 0 {
                return Err(RpcError::StaleSession);
            }
            self.requests.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn empty_status(&self, path: &str) -> FileStatus {
            FileStatus {
                path: path.to_string(),
                kind: FileKind::Regular,
                length: 0,
                permission: 0o644,
                owner: "alice".to_string(),
                group: "staff".to_string(),
                atime: 0,
                mtime: 0,
                block_size: heronfs_common::types::DEFAULT_BLOCK_SIZE,
                nlink: 1,
                replication: 3,
            }
        }
    }

    #[async_trait]
    impl DfsSession for StubDfsSession {
        async fn file_status(&self, path: &str) -> Result<FileStatus, RpcError> {
            self.track()?;
            Ok(self.empty_status(path))
        }

        async fn list_status(&self, _path: &str) -> Result<Vec<FileStatus>, RpcError> {
            self.track()?;
            Ok(Vec::new())
        }

        async fn create(
            &self,
            path: &str,
            _mode: u32,
            _overwrite: bool,
        ) -> Result<FileStatus, RpcError> {
            self.track()?;
            Ok(self.empty_status(path))
        }

        async fn read(&self, _path: &str, _offset: u64, length: u32) -> Result<Vec<u8>, RpcError> {
            self.track()?;
            Ok(vec![0u8; length as usize])
        }

        async fn write(&self, _path: &str, _offset: u64, data: &[u8]) -> Result<u32, RpcError> {
            self.track()?;
            Ok(data.len() as u32)
        }

        async fn mkdirs(&self, _path: &str, _mode: u32) -> Result<(), RpcError> {
            self.track()
        }

        async fn delete(&self, path: &str, recursive: bool) -> Result<(), RpcError> {
            self.track()?;
            *self.last_delete.lock().unwrap() = Some((path.to_string(), recursive));
            Ok(())
        }

        async fn rename(&self, _src: &str, _dst: &str) -> Result<(), RpcError> {
            self.track()
        }

        async fn set_permission(&self, _path: &str, _mode: u32) -> Result<(), RpcError> {
            self.track()
        }

        async fn set_owner(
            &self,
            _path: &str,
            _owner: Option<&str>,
            _group: Option<&str>,
        ) -> Result<(), RpcError> {
            self.track()
        }

        async fn set_times(
            &self,
            _path: &str,
            _atime: Option<u64>,
            _mtime: Option<u64>,
        ) -> Result<(), RpcError> {
            self.track()
        }

        async fn truncate(&self, _path: &str, _length: u64) -> Result<(), RpcError> {
            self.track()
        }

        async fn fs_stats(&self) -> Result<FsStats, RpcError> {
            self.track()?;
            Ok(FsStats::default())
        }

        async fn close(&self) -> Result<(), RpcError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Counting factory stub with a configurable delay and failure mode
    pub struct StubConnector {
        connects: AtomicU64,
        delay: Option<Duration>,
        failure: Mutex<Option<ConnectError>>,
        sessions: Mutex<Vec<Arc<StubDfsSession>>>,
    }

    impl StubConnector {
        pub fn new() -> Self {
            Self {
                connects: AtomicU64::new(0),
                delay: None,
                failure: Mutex::new(None),
                sessions: Mutex::new(Vec::new()),
            }
        }

        pub fn with_connect_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn failing_with(self, error: ConnectError) -> Self {
            *self.failure.lock().unwrap() = Some(error);
            self
        }

        /// Clear a configured failure so later connects succeed
        pub fn heal(&self) {
            *self.failure.lock().unwrap() = None;
        }

        pub fn connect_count(&self) -> u64 {
            self.connects.load(Ordering::SeqCst)
        }

        /// The most recently created stub session
        pub fn last_session(&self) -> Option<Arc<StubDfsSession>> {
            self.sessions.lock().unwrap().last().cloned()
        }
    }

    impl Default for StubConnector {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl SessionConnector for StubConnector {
        async fn connect(&self, _identity: &Identity) -> Result<Arc<dyn DfsSession>, ConnectError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(error) = self.failure.lock().unwrap().clone() {
                return Err(error);
            }
            let session = Arc::new(StubDfsSession::default());
            self.sessions.lock().unwrap().push(session.clone());
            Ok(session)
        }
    }
}
