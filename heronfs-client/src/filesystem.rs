use fuser::{
    FileAttr as FuseFileAttr, FileType as FuseFileType, Filesystem, ReplyAttr, ReplyCreate,
    ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite,
    Request, TimeOrNow,
};
use futures::future::BoxFuture;
use libc::{EACCES, EINVAL};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use heronfs_common::types::{now_micros, FileKind, FileStatus, FsStats, Identity, DFS_NAME_MAX};

use crate::config::ClientConfig;
use crate::connection::{ConnectionCache, SessionConnector};
use crate::error::{ClientError, ClientResult, RpcError};
use crate::identity::IdentityResolver;
use crate::inodes::InodeTable;
use crate::transport::{DfsSession, GrpcConnector};

use heronfs_common::types::DfsStatus;

/// Numeric credentials the kernel attaches to one request, made an
/// explicit parameter instead of ambient state
#[derive(Debug, Clone, Copy)]
struct Caller {
    uid: u32,
    gid: u32,
}

impl From<&Request<'_>> for Caller {
    fn from(req: &Request<'_>) -> Self {
        Self {
            uid: req.uid(),
            gid: req.gid(),
        }
    }
}

fn convert_file_kind(kind: FileKind) -> FuseFileType {
    match kind {
        FileKind::Regular => FuseFileType::RegularFile,
        FileKind::Directory => FuseFileType::Directory,
        FileKind::Symlink => FuseFileType::Symlink,
    }
}

/// True when any segment of the path is a trash directory; such paths
/// are deleted outright instead of being moved to trash again
fn is_in_trash(path: &str) -> bool {
    path.split('/').any(|segment| segment == ".Trash")
}

/// Where a deleted file lands in its owner's trash
fn trash_target(user: &str, path: &str) -> String {
    format!("/user/{user}/.Trash/Current{path}")
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

/// Request messages carried from FUSE callback threads to the async
/// dispatch workers
enum FuseRequest {
    Lookup {
        caller: Caller,
        parent: u64,
        name: String,
        reply: oneshot::Sender<ClientResult<FuseFileAttr>>,
    },
    GetAttr {
        caller: Caller,
        ino: u64,
        reply: oneshot::Sender<ClientResult<FuseFileAttr>>,
    },
    SetAttr {
        caller: Caller,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<u64>,
        mtime: Option<u64>,
        reply: oneshot::Sender<ClientResult<FuseFileAttr>>,
    },
    Mknod {
        caller: Caller,
        parent: u64,
        name: String,
        mode: u32,
        reply: oneshot::Sender<ClientResult<FuseFileAttr>>,
    },
    Mkdir {
        caller: Caller,
        parent: u64,
        name: String,
        mode: u32,
        reply: oneshot::Sender<ClientResult<FuseFileAttr>>,
    },
    Unlink {
        caller: Caller,
        parent: u64,
        name: String,
        reply: oneshot::Sender<ClientResult<()>>,
    },
    Rmdir {
        caller: Caller,
        parent: u64,
        name: String,
        reply: oneshot::Sender<ClientResult<()>>,
    },
    Rename {
        caller: Caller,
        parent: u64,
        name: String,
        newparent: u64,
        newname: String,
        reply: oneshot::Sender<ClientResult<()>>,
    },
    Open {
        caller: Caller,
        ino: u64,
        reply: oneshot::Sender<ClientResult<()>>,
    },
    Read {
        caller: Caller,
        ino: u64,
        offset: u64,
        size: u32,
        reply: oneshot::Sender<ClientResult<Vec<u8>>>,
    },
    Write {
        caller: Caller,
        ino: u64,
        offset: u64,
        data: Vec<u8>,
        reply: oneshot::Sender<ClientResult<u32>>,
    },
    ReadDir {
        caller: Caller,
        ino: u64,
        reply: oneshot::Sender<ClientResult<Vec<(u64, FuseFileType, String)>>>,
    },
    Create {
        caller: Caller,
        parent: u64,
        name: String,
        mode: u32,
        reply: oneshot::Sender<ClientResult<FuseFileAttr>>,
    },
    StatFs {
        caller: Caller,
        reply: oneshot::Sender<ClientResult<FsStats>>,
    },
}

/// Async side of the gateway: resolves identity, borrows a session from
/// the cache, runs the RPC, and applies the retry policy.
#[derive(Clone)]
struct Gateway {
    resolver: Arc<IdentityResolver>,
    cache: Arc<ConnectionCache>,
    inodes: Arc<InodeTable>,
    config: Arc<ClientConfig>,
}

impl Gateway {
    fn identify(&self, caller: Caller) -> ClientResult<Identity> {
        Ok(self.resolver.resolve(caller.uid, caller.gid)?)
    }

    fn path_for(&self, ino: u64) -> ClientResult<String> {
        self.inodes
            .path_of(ino)
            .ok_or_else(|| ClientError::Rpc(RpcError::Remote(DfsStatus::ENoEnt)))
    }

    fn child_for(&self, parent: u64, name: &str) -> ClientResult<String> {
        if name.len() > DFS_NAME_MAX {
            return Err(ClientError::Rpc(RpcError::Remote(DfsStatus::ENameTooLong)));
        }
        Ok(InodeTable::child_path(&self.path_for(parent)?, name))
    }

    /// Run one remote operation under the caller's session, with the
    /// dispatch-layer retry policy: a retryable failure invalidates the
    /// session and the whole operation is retried exactly once against
    /// a fresh one. Auth failures and remote status errors surface
    /// immediately.
    async fn with_session<T, F>(&self, identity: &Identity, op: F) -> ClientResult<T>
    where
        F: Fn(Arc<dyn DfsSession>) -> BoxFuture<'static, Result<T, RpcError>>,
    {
        let lease = match self.cache.acquire(identity).await {
            Ok(lease) => lease,
            Err(e) => {
                let err = ClientError::from(e);
                if !err.is_retryable() {
                    return Err(err);
                }
                debug!("retrying session open for {} after: {}", identity, err);
                self.cache.acquire(identity).await.map_err(ClientError::from)?
            }
        };

        match op(lease.session()).await {
            Ok(value) => {
                lease.record_success();
                return Ok(value);
            }
            Err(e) => {
                lease.record_error();
                let err = ClientError::from(e);
                if !err.is_retryable() {
                    return Err(err);
                }
                warn!("session for {} went stale, reconnecting: {}", identity, err);
            }
        }

        // The borrower found the session broken: detach it and run the
        // operation once more on a fresh session.
        self.cache.invalidate(identity).await;
        let lease = self.cache.acquire(identity).await.map_err(ClientError::from)?;
        match op(lease.session()).await {
            Ok(value) => {
                lease.record_success();
                Ok(value)
            }
            Err(e) => {
                lease.record_error();
                Err(e.into())
            }
        }
    }

    fn to_attr(&self, status: &FileStatus, ino: u64) -> FuseFileAttr {
        FuseFileAttr {
            ino,
            size: status.length,
            blocks: (status.length + 511) / 512,
            atime: UNIX_EPOCH + Duration::from_micros(status.atime),
            mtime: UNIX_EPOCH + Duration::from_micros(status.mtime),
            ctime: UNIX_EPOCH + Duration::from_micros(status.mtime),
            crtime: UNIX_EPOCH + Duration::from_micros(status.mtime),
            kind: convert_file_kind(status.kind),
            perm: status.permission as u16,
            nlink: status.nlink.max(1),
            uid: self.resolver.uid_for(&status.owner),
            gid: self.resolver.gid_for(&status.group),
            rdev: 0,
            blksize: status.block_size.min(u32::MAX as u64) as u32,
            flags: 0,
        }
    }

    async fn stat_path(&self, identity: &Identity, path: String) -> ClientResult<FileStatus> {
        self.with_session(identity, move |session| {
            let path = path.clone();
            Box::pin(async move { session.file_status(&path).await })
        })
        .await
    }

    async fn lookup(&self, caller: Caller, parent: u64, name: String) -> ClientResult<FuseFileAttr> {
        let identity = self.identify(caller)?;
        let path = self.child_for(parent, &name)?;
        let status = self.stat_path(&identity, path.clone()).await?;
        let ino = self.inodes.ino_for(&path);
        Ok(self.to_attr(&status, ino))
    }

    async fn getattr(&self, caller: Caller, ino: u64) -> ClientResult<FuseFileAttr> {
        let identity = self.identify(caller)?;
        let path = self.path_for(ino)?;
        let status = self.stat_path(&identity, path).await?;
        Ok(self.to_attr(&status, ino))
    }

    #[allow(clippy::too_many_arguments)]
    async fn setattr(
        &self,
        caller: Caller,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<u64>,
        mtime: Option<u64>,
    ) -> ClientResult<FuseFileAttr> {
        let identity = self.identify(caller)?;
        let path = self.path_for(ino)?;

        if let Some(mode) = mode {
            let target = path.clone();
            self.with_session(&identity, move |session| {
                let target = target.clone();
                Box::pin(async move { session.set_permission(&target, mode & 0o7777).await })
            })
            .await?;
        }

        if uid.is_some() || gid.is_some() {
            let owner = uid.and_then(|uid| self.resolver.name_of_uid(uid));
            let group = gid.and_then(|gid| self.resolver.name_of_gid(gid));
            if owner.is_none() && group.is_none() {
                return Err(ClientError::InvalidArgument(
                    "chown target has no local account".to_string(),
                ));
            }
            let target = path.clone();
            self.with_session(&identity, move |session| {
                let target = target.clone();
                let owner = owner.clone();
                let group = group.clone();
                Box::pin(async move {
                    session
                        .set_owner(&target, owner.as_deref(), group.as_deref())
                        .await
                })
            })
            .await?;
        }

        if let Some(size) = size {
            let target = path.clone();
            self.with_session(&identity, move |session| {
                let target = target.clone();
                Box::pin(async move { session.truncate(&target, size).await })
            })
            .await?;
        }

        if atime.is_some() || mtime.is_some() {
            let target = path.clone();
            self.with_session(&identity, move |session| {
                let target = target.clone();
                Box::pin(async move { session.set_times(&target, atime, mtime).await })
            })
            .await?;
        }

        let status = self.stat_path(&identity, path).await?;
        Ok(self.to_attr(&status, ino))
    }

    async fn create_file(
        &self,
        caller: Caller,
        parent: u64,
        name: String,
        mode: u32,
    ) -> ClientResult<FuseFileAttr> {
        let identity = self.identify(caller)?;
        let path = self.child_for(parent, &name)?;
        let target = path.clone();
        let status = self
            .with_session(&identity, move |session| {
                let target = target.clone();
                Box::pin(async move { session.create(&target, mode & 0o7777, false).await })
            })
            .await?;
        let ino = self.inodes.ino_for(&path);
        Ok(self.to_attr(&status, ino))
    }

    async fn mkdir(
        &self,
        caller: Caller,
        parent: u64,
        name: String,
        mode: u32,
    ) -> ClientResult<FuseFileAttr> {
        let identity = self.identify(caller)?;
        let path = self.child_for(parent, &name)?;
        let target = path.clone();
        self.with_session(&identity, move |session| {
            let target = target.clone();
            Box::pin(async move { session.mkdirs(&target, mode & 0o7777).await })
        })
        .await?;
        let status = self.stat_path(&identity, path.clone()).await?;
        let ino = self.inodes.ino_for(&path);
        Ok(self.to_attr(&status, ino))
    }

    /// Remove a file or directory, routing through the caller's trash
    /// when configured. Paths already inside a trash directory are
    /// deleted outright.
    async fn remove(&self, caller: Caller, parent: u64, name: String) -> ClientResult<()> {
        let identity = self.identify(caller)?;
        let path = self.child_for(parent, &name)?;

        if self.config.use_trash && !is_in_trash(&path) && !identity.is_anonymous() {
            self.move_to_trash(&identity, &path).await?;
        } else {
            // Deleting inside the trash is the one place a recursive
            // delete is issued; everywhere else non-empty directories
            // are the server's call to refuse.
            let recursive = is_in_trash(&path);
            let target = path.clone();
            self.with_session(&identity, move |session| {
                let target = target.clone();
                Box::pin(async move { session.delete(&target, recursive).await })
            })
            .await?;
        }
        self.inodes.forget_path(&path);
        Ok(())
    }

    async fn move_to_trash(&self, identity: &Identity, path: &str) -> ClientResult<()> {
        let target = trash_target(&identity.username, path);
        let trash_parent = parent_of(&target).to_string();

        let parent = trash_parent.clone();
        self.with_session(identity, move |session| {
            let parent = parent.clone();
            Box::pin(async move { session.mkdirs(&parent, 0o700).await })
        })
        .await?;

        let src = path.to_string();
        let dst = target.clone();
        let moved = self
            .with_session(identity, move |session| {
                let src = src.clone();
                let dst = dst.clone();
                Box::pin(async move { session.rename(&src, &dst).await })
            })
            .await;

        match moved {
            // A previous deletion already parked something at the trash
            // path; disambiguate with a timestamp suffix
            Err(ClientError::Rpc(RpcError::Remote(DfsStatus::EExist))) => {
                let src = path.to_string();
                let dst = format!("{}.{}", target, now_micros());
                info!("trash collision for {}, moving to {}", path, dst);
                self.with_session(identity, move |session| {
                    let src = src.clone();
                    let dst = dst.clone();
                    Box::pin(async move { session.rename(&src, &dst).await })
                })
                .await
            }
            other => other,
        }
    }

    async fn rename(
        &self,
        caller: Caller,
        parent: u64,
        name: String,
        newparent: u64,
        newname: String,
    ) -> ClientResult<()> {
        let identity = self.identify(caller)?;
        let src = self.child_for(parent, &name)?;
        let dst = self.child_for(newparent, &newname)?;

        let from = src.clone();
        let to = dst.clone();
        self.with_session(&identity, move |session| {
            let from = from.clone();
            let to = to.clone();
            Box::pin(async move { session.rename(&from, &to).await })
        })
        .await?;

        self.inodes.rename(&src, &dst);
        Ok(())
    }

    async fn open(&self, caller: Caller, ino: u64) -> ClientResult<()> {
        // Handles are stateless; open is an existence and permission
        // probe under the caller's session
        self.getattr(caller, ino).await.map(|_| ())
    }

    async fn read(
        &self,
        caller: Caller,
        ino: u64,
        offset: u64,
        size: u32,
    ) -> ClientResult<Vec<u8>> {
        let identity = self.identify(caller)?;
        let path = self.path_for(ino)?;
        self.with_session(&identity, move |session| {
            let path = path.clone();
            Box::pin(async move { session.read(&path, offset, size).await })
        })
        .await
    }

    async fn write(
        &self,
        caller: Caller,
        ino: u64,
        offset: u64,
        data: Vec<u8>,
    ) -> ClientResult<u32> {
        let identity = self.identify(caller)?;
        let path = self.path_for(ino)?;
        self.with_session(&identity, move |session| {
            let path = path.clone();
            let data = data.clone();
            Box::pin(async move { session.write(&path, offset, &data).await })
        })
        .await
    }

    async fn readdir(
        &self,
        caller: Caller,
        ino: u64,
    ) -> ClientResult<Vec<(u64, FuseFileType, String)>> {
        let identity = self.identify(caller)?;
        let path = self.path_for(ino)?;
        let listing = self
            .with_session(&identity, {
                let path = path.clone();
                move |session| {
                    let path = path.clone();
                    Box::pin(async move { session.list_status(&path).await })
                }
            })
            .await?;

        let mut entries = Vec::with_capacity(listing.len());
        for status in listing {
            let name = status
                .path
                .rsplit('/')
                .next()
                .unwrap_or(&status.path)
                .to_string();
            let child = InodeTable::child_path(&path, &name);
            let child_ino = self.inodes.ino_for(&child);
            entries.push((child_ino, convert_file_kind(status.kind), name));
        }
        Ok(entries)
    }

    async fn statfs(&self, caller: Caller) -> ClientResult<FsStats> {
        let identity = self.identify(caller)?;
        self.with_session(&identity, move |session| {
            Box::pin(async move { session.fs_stats().await })
        })
        .await
    }

    async fn handle(self, request: FuseRequest) {
        match request {
            FuseRequest::Lookup {
                caller,
                parent,
                name,
                reply,
            } => {
                let _ = reply.send(self.lookup(caller, parent, name).await);
            }
            FuseRequest::GetAttr { caller, ino, reply } => {
                let _ = reply.send(self.getattr(caller, ino).await);
            }
            FuseRequest::SetAttr {
                caller,
                ino,
                mode,
                uid,
                gid,
                size,
                atime,
                mtime,
                reply,
            } => {
                let _ = reply.send(
                    self.setattr(caller, ino, mode, uid, gid, size, atime, mtime)
                        .await,
                );
            }
            FuseRequest::Mknod {
                caller,
                parent,
                name,
                mode,
                reply,
            }
            | FuseRequest::Create {
                caller,
                parent,
                name,
                mode,
                reply,
            } => {
                let _ = reply.send(self.create_file(caller, parent, name, mode).await);
            }
            FuseRequest::Mkdir {
                caller,
                parent,
                name,
                mode,
                reply,
            } => {
                let _ = reply.send(self.mkdir(caller, parent, name, mode).await);
            }
            FuseRequest::Unlink {
                caller,
                parent,
                name,
                reply,
            }
            | FuseRequest::Rmdir {
                caller,
                parent,
                name,
                reply,
            } => {
                let _ = reply.send(self.remove(caller, parent, name).await);
            }
            FuseRequest::Rename {
                caller,
                parent,
                name,
                newparent,
                newname,
                reply,
            } => {
                let _ = reply.send(self.rename(caller, parent, name, newparent, newname).await);
            }
            FuseRequest::Open { caller, ino, reply } => {
                let _ = reply.send(self.open(caller, ino).await);
            }
            FuseRequest::Read {
                caller,
                ino,
                offset,
                size,
                reply,
            } => {
                let _ = reply.send(self.read(caller, ino, offset, size).await);
            }
            FuseRequest::Write {
                caller,
                ino,
                offset,
                data,
                reply,
            } => {
                let _ = reply.send(self.write(caller, ino, offset, data).await);
            }
            FuseRequest::ReadDir { caller, ino, reply } => {
                let _ = reply.send(self.readdir(caller, ino).await);
            }
            FuseRequest::StatFs { caller, reply } => {
                let _ = reply.send(self.statfs(caller).await);
            }
        }
    }
}

/// HeronFS FUSE gateway.
///
/// Each kernel callback extracts the caller's credentials, ships the
/// request over a channel to the async workers, and blocks on a oneshot
/// reply; every request runs on its own task so concurrent kernel
/// callbacks stay concurrent.
///
/// Must be constructed inside a tokio runtime. No session is opened
/// eagerly; sessions are created per user on first use.
pub struct HeronFuse {
    config: Arc<ClientConfig>,
    request_tx: mpsc::UnboundedSender<FuseRequest>,
}

impl HeronFuse {
    pub fn new(config: ClientConfig) -> Self {
        let connector = Arc::new(GrpcConnector::new(config.nameserver.clone()));
        Self::with_connector(config, connector)
    }

    /// Construct with a custom connection factory (used by tests)
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn SessionConnector>) -> Self {
        let config = Arc::new(config);
        let cache = ConnectionCache::new(
            connector,
            config.nameserver.clone(),
            config.session.clone(),
        );
        cache.start_sweeper();

        let gateway = Gateway {
            resolver: Arc::new(IdentityResolver::new()),
            cache,
            inodes: Arc::new(InodeTable::new()),
            config: config.clone(),
        };

        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<FuseRequest>();
        tokio::spawn(async move {
            while let Some(request) = request_rx.recv().await {
                let gateway = gateway.clone();
                tokio::spawn(gateway.handle(request));
            }
        });

        info!(
            "gateway ready for {} (legacy protocol: {})",
            config.nameserver.uri(),
            config.nameserver.legacy_protocol
        );
        Self { config, request_tx }
    }

    fn dispatch<T>(&self, request: FuseRequest, rx: oneshot::Receiver<ClientResult<T>>) -> ClientResult<T> {
        self.request_tx
            .send(request)
            .map_err(|_| ClientError::InvalidArgument("gateway worker gone".to_string()))?;
        rx.blocking_recv()
            .map_err(|_| ClientError::InvalidArgument("gateway reply dropped".to_string()))?
    }

    fn attr_ttl(&self) -> Duration {
        self.config.attr_ttl
    }
}

fn valid_name(name: &OsStr) -> Option<&str> {
    name.to_str().filter(|name| !name.contains('/'))
}

fn time_to_micros(time: TimeOrNow) -> u64 {
    match time {
        TimeOrNow::SpecificTime(t) => t
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64,
        TimeOrNow::Now => now_micros(),
    }
}

impl Filesystem for HeronFuse {
    fn init(
        &mut self,
        _req: &Request<'_>,
        _config: &mut fuser::KernelConfig,
    ) -> Result<(), libc::c_int> {
        info!("FUSE filesystem initialized");
        Ok(())
    }

    fn lookup(&mut self, req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let name = match valid_name(name) {
            Some(name) => name.to_string(),
            None => {
                reply.error(EINVAL);
                return;
            }
        };
        debug!("lookup: parent={}, name={}", parent, name);

        let (tx, rx) = oneshot::channel();
        let request = FuseRequest::Lookup {
            caller: req.into(),
            parent,
            name,
            reply: tx,
        };
        match self.dispatch(request, rx) {
            Ok(attr) => reply.entry(&self.attr_ttl(), &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn getattr(&mut self, req: &Request, ino: u64, reply: ReplyAttr) {
        debug!("getattr: ino={}", ino);

        let (tx, rx) = oneshot::channel();
        let request = FuseRequest::GetAttr {
            caller: req.into(),
            ino,
            reply: tx,
        };
        match self.dispatch(request, rx) {
            Ok(attr) => reply.attr(&self.attr_ttl(), &attr),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        req: &Request,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        debug!("setattr: ino={}, mode={:?}, size={:?}", ino, mode, size);
        if self.config.read_only {
            reply.error(EACCES);
            return;
        }

        let (tx, rx) = oneshot::channel();
        let request = FuseRequest::SetAttr {
            caller: req.into(),
            ino,
            mode,
            uid,
            gid,
            size,
            atime: atime.map(time_to_micros),
            mtime: mtime.map(time_to_micros),
            reply: tx,
        };
        match self.dispatch(request, rx) {
            Ok(attr) => reply.attr(&self.attr_ttl(), &attr),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mknod(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        let name = match valid_name(name) {
            Some(name) => name.to_string(),
            None => {
                reply.error(EINVAL);
                return;
            }
        };
        debug!("mknod: parent={}, name={}, mode={:o}", parent, name, mode);
        if self.config.read_only {
            reply.error(EACCES);
            return;
        }
        // Only regular files; devices and pipes have no remote analogue
        if mode & libc::S_IFMT != libc::S_IFREG {
            reply.error(EINVAL);
            return;
        }

        let (tx, rx) = oneshot::channel();
        let request = FuseRequest::Mknod {
            caller: req.into(),
            parent,
            name,
            mode,
            reply: tx,
        };
        match self.dispatch(request, rx) {
            Ok(attr) => reply.entry(&self.attr_ttl(), &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mkdir(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let name = match valid_name(name) {
            Some(name) => name.to_string(),
            None => {
                reply.error(EINVAL);
                return;
            }
        };
        debug!("mkdir: parent={}, name={}, mode={:o}", parent, name, mode);
        if self.config.read_only {
            reply.error(EACCES);
            return;
        }

        let (tx, rx) = oneshot::channel();
        let request = FuseRequest::Mkdir {
            caller: req.into(),
            parent,
            name,
            mode,
            reply: tx,
        };
        match self.dispatch(request, rx) {
            Ok(attr) => reply.entry(&self.attr_ttl(), &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn unlink(&mut self, req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = match valid_name(name) {
            Some(name) => name.to_string(),
            None => {
                reply.error(EINVAL);
                return;
            }
        };
        debug!("unlink: parent={}, name={}", parent, name);
        if self.config.read_only {
            reply.error(EACCES);
            return;
        }

        let (tx, rx) = oneshot::channel();
        let request = FuseRequest::Unlink {
            caller: req.into(),
            parent,
            name,
            reply: tx,
        };
        match self.dispatch(request, rx) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rmdir(&mut self, req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = match valid_name(name) {
            Some(name) => name.to_string(),
            None => {
                reply.error(EINVAL);
                return;
            }
        };
        debug!("rmdir: parent={}, name={}", parent, name);
        if self.config.read_only {
            reply.error(EACCES);
            return;
        }

        let (tx, rx) = oneshot::channel();
        let request = FuseRequest::Rmdir {
            caller: req.into(),
            parent,
            name,
            reply: tx,
        };
        match self.dispatch(request, rx) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rename(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (name, newname) = match (valid_name(name), valid_name(newname)) {
            (Some(a), Some(b)) => (a.to_string(), b.to_string()),
            _ => {
                reply.error(EINVAL);
                return;
            }
        };
        debug!(
            "rename: {}/{} -> {}/{}",
            parent, name, newparent, newname
        );
        if self.config.read_only {
            reply.error(EACCES);
            return;
        }

        let (tx, rx) = oneshot::channel();
        let request = FuseRequest::Rename {
            caller: req.into(),
            parent,
            name,
            newparent,
            newname,
            reply: tx,
        };
        match self.dispatch(request, rx) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn open(&mut self, req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!("open: ino={}, flags={:#x}", ino, flags);
        if self.config.read_only && (flags & libc::O_ACCMODE) != libc::O_RDONLY {
            reply.error(EACCES);
            return;
        }

        let (tx, rx) = oneshot::channel();
        let request = FuseRequest::Open {
            caller: req.into(),
            ino,
            reply: tx,
        };
        match self.dispatch(request, rx) {
            // Handles are stateless; the inode doubles as the handle
            Ok(()) => reply.opened(ino, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn read(
        &mut self,
        req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock: Option<u64>,
        reply: ReplyData,
    ) {
        debug!("read: ino={}, offset={}, size={}", ino, offset, size);
        if offset < 0 {
            reply.error(EINVAL);
            return;
        }

        let (tx, rx) = oneshot::channel();
        let request = FuseRequest::Read {
            caller: req.into(),
            ino,
            offset: offset as u64,
            size,
            reply: tx,
        };
        match self.dispatch(request, rx) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn write(
        &mut self,
        req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!("write: ino={}, offset={}, size={}", ino, offset, data.len());
        if self.config.read_only {
            reply.error(EACCES);
            return;
        }
        if offset < 0 {
            reply.error(EINVAL);
            return;
        }

        let (tx, rx) = oneshot::channel();
        let request = FuseRequest::Write {
            caller: req.into(),
            ino,
            offset: offset as u64,
            data: data.to_vec(),
            reply: tx,
        };
        match self.dispatch(request, rx) {
            Ok(written) => reply.written(written),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn flush(&mut self, _req: &Request, _ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        // Writes are synchronous RPCs; nothing is buffered locally
        reply.ok();
    }

    fn fsync(&mut self, _req: &Request, _ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn readdir(
        &mut self,
        req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!("readdir: ino={}, offset={}", ino, offset);

        let (tx, rx) = oneshot::channel();
        let request = FuseRequest::ReadDir {
            caller: req.into(),
            ino,
            reply: tx,
        };
        let entries = match self.dispatch(request, rx) {
            Ok(entries) => entries,
            Err(e) => {
                error!("readdir error: {}", e);
                reply.error(e.to_errno());
                return;
            }
        };

        let mut index = offset;
        if index == 0 {
            if reply.add(ino, 1, FuseFileType::Directory, ".") {
                reply.ok();
                return;
            }
            index = 1;
        }
        if index == 1 {
            if reply.add(ino, 2, FuseFileType::Directory, "..") {
                reply.ok();
                return;
            }
            index = 2;
        }
        for (i, (child_ino, kind, name)) in entries.iter().enumerate().skip((index - 2) as usize) {
            if reply.add(*child_ino, (i as i64) + 3, *kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn create(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let name = match valid_name(name) {
            Some(name) => name.to_string(),
            None => {
                reply.error(EINVAL);
                return;
            }
        };
        debug!("create: parent={}, name={}, mode={:o}", parent, name, mode);
        if self.config.read_only {
            reply.error(EACCES);
            return;
        }

        let (tx, rx) = oneshot::channel();
        let request = FuseRequest::Create {
            caller: req.into(),
            parent,
            name,
            mode,
            reply: tx,
        };
        match self.dispatch(request, rx) {
            Ok(attr) => reply.created(&self.attr_ttl(), &attr, 0, attr.ino, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn statfs(&mut self, req: &Request, _ino: u64, reply: ReplyStatfs) {
        debug!("statfs");

        let (tx, rx) = oneshot::channel();
        let request = FuseRequest::StatFs {
            caller: req.into(),
            reply: tx,
        };
        match self.dispatch(request, rx) {
            Ok(stats) => {
                let bsize: u32 = 4096;
                let blocks = stats.capacity / bsize as u64;
                let bfree = stats.remaining / bsize as u64;
                reply.statfs(
                    blocks,
                    bfree,
                    bfree,
                    stats.file_count,
                    u64::MAX,
                    bsize,
                    DFS_NAME_MAX as u32,
                    bsize,
                );
            }
            Err(e) => {
                warn!("statfs error: {}", e);
                reply.error(e.to_errno());
            }
        }
    }
}
