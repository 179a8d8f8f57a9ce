use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use heronfs_common::types::{Identity, SessionId};

use crate::transport::DfsSession;

/// Error-rate heuristic: a session with more than this many requests
/// and over half of them failed is considered suspect.
const SUSPECT_MIN_REQUESTS: u64 = 10;

/// Observed health of a cached session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionHealth {
    Live,
    Suspect,
    Dead,
}

/// One live, authenticated connection to the nameserver, opened as a
/// specific identity.
///
/// The cache entry owns the handle until eviction; dispatch callers
/// borrow it through a [`SessionLease`] for the duration of one RPC.
/// The underlying transport is safe for concurrent independent requests
/// on one session, so borrowers never serialize against each other.
pub struct SessionHandle {
    id: SessionId,
    identity: Identity,
    rpc: Arc<dyn DfsSession>,
    created_at: Instant,
    last_validated: Mutex<Instant>,
    borrows: AtomicU32,
    dead: AtomicBool,
    closed: AtomicBool,
    requests: AtomicU64,
    errors: AtomicU64,
}

impl SessionHandle {
    pub fn new(id: SessionId, identity: Identity, rpc: Arc<dyn DfsSession>) -> Self {
        let now = Instant::now();
        Self {
            id,
            identity,
            rpc,
            created_at: now,
            last_validated: Mutex::new(now),
            borrows: AtomicU32::new(0),
            dead: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn rpc(&self) -> &Arc<dyn DfsSession> {
        &self.rpc
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the session was last handed out while healthy
    pub fn idle_for(&self) -> Duration {
        self.last_validated.lock().unwrap().elapsed()
    }

    pub fn borrows(&self) -> u32 {
        self.borrows.load(Ordering::SeqCst)
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    pub fn health(&self) -> SessionHealth {
        if self.is_dead() {
            return SessionHealth::Dead;
        }
        let requests = self.requests.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        if requests > SUSPECT_MIN_REQUESTS && errors * 2 > requests {
            SessionHealth::Suspect
        } else {
            SessionHealth::Live
        }
    }

    /// Refresh the last-validated timestamp. A suspect session is not
    /// refreshed; it ages toward sweep eviction instead.
    pub fn touch(&self) {
        if self.health() == SessionHealth::Live {
            *self.last_validated.lock().unwrap() = Instant::now();
        }
    }

    pub fn record_success(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark the session unusable. Once set, the cache never serves this
    /// handle again; destruction waits for the last borrower.
    pub fn mark_dead(&self) {
        self.dead.store(true, Ordering::SeqCst);
    }

    /// Tear down the underlying session exactly once.
    ///
    /// The atomic swap makes this safe to call from both the sweeper and
    /// a racing lease drop; the actual CloseSession RPC runs on its own
    /// task so no caller blocks on it.
    pub fn schedule_close(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let rpc = self.rpc.clone();
        let id = self.id;
        let identity = self.identity.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    debug!("closing session {} for {}", id, identity);
                    if let Err(e) = rpc.close().await {
                        warn!("close of session {} failed: {}", id, e);
                    }
                });
            }
            Err(_) => {
                warn!(
                    "no runtime to close session {} for {}; remote session leaked",
                    id, identity
                );
            }
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("borrows", &self.borrows())
            .field("health", &self.health())
            .finish()
    }
}

/// RAII borrow of a cached session.
///
/// Holding a lease keeps the handle's borrow count above zero, which
/// defers destruction of an invalidated session until every in-flight
/// RPC against it has finished.
pub struct SessionLease {
    handle: Arc<SessionHandle>,
}

impl std::fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease")
            .field("session_id", &self.handle.id)
            .finish_non_exhaustive()
    }
}

impl SessionLease {
    pub(crate) fn new(handle: Arc<SessionHandle>) -> Self {
        handle.borrows.fetch_add(1, Ordering::SeqCst);
        Self { handle }
    }

    pub fn handle(&self) -> &Arc<SessionHandle> {
        &self.handle
    }

    pub fn session(&self) -> Arc<dyn DfsSession> {
        self.handle.rpc.clone()
    }

    pub fn record_success(&self) {
        self.handle.record_success();
    }

    pub fn record_error(&self) {
        self.handle.record_error();
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        let previous = self.handle.borrows.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 && self.handle.is_dead() {
            // Last borrower of an invalidated session drives teardown
            self.handle.schedule_close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::StubDfsSession;

    fn handle() -> Arc<SessionHandle> {
        let identity = Identity::new("alice", "staff", vec![]);
        Arc::new(SessionHandle::new(
            7,
            identity,
            Arc::new(StubDfsSession::default()),
        ))
    }

    #[tokio::test]
    async fn test_borrow_counting() {
        let handle = handle();
        assert_eq!(handle.borrows(), 0);

        let a = SessionLease::new(handle.clone());
        let b = SessionLease::new(handle.clone());
        assert_eq!(handle.borrows(), 2);

        drop(a);
        assert_eq!(handle.borrows(), 1);
        drop(b);
        assert_eq!(handle.borrows(), 0);
    }

    #[tokio::test]
    async fn test_health_heuristic() {
        let handle = handle();
        assert_eq!(handle.health(), SessionHealth::Live);

        for _ in 0..20 {
            handle.record_error();
        }
        assert_eq!(handle.health(), SessionHealth::Suspect);

        handle.mark_dead();
        assert_eq!(handle.health(), SessionHealth::Dead);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspect_session_is_not_refreshed() {
        let handle = handle();
        tokio::time::advance(Duration::from_secs(10)).await;
        handle.touch();
        assert!(handle.idle_for() < Duration::from_secs(1));

        for _ in 0..20 {
            handle.record_error();
        }
        tokio::time::advance(Duration::from_secs(10)).await;
        handle.touch();
        assert!(handle.idle_for() >= Duration::from_secs(10));
    }

    #[test]
    fn test_close_outside_runtime_does_not_panic() {
        let stub = Arc::new(StubDfsSession::default());
        let identity = Identity::new("alice", "staff", vec![]);
        let handle = Arc::new(SessionHandle::new(11, identity, stub.clone() as _));

        // No runtime here: the close is skipped (and logged), not panicked
        handle.schedule_close();
        assert_eq!(stub.close_count(), 0);
    }

    #[tokio::test]
    async fn test_close_runs_exactly_once() {
        let stub = Arc::new(StubDfsSession::default());
        let identity = Identity::new("alice", "staff", vec![]);
        let handle = Arc::new(SessionHandle::new(9, identity, stub.clone() as _));

        handle.schedule_close();
        handle.schedule_close();
        tokio::task::yield_now().await;

        assert_eq!(stub.close_count(), 1);
    }
}
