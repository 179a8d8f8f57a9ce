use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use heronfs_common::config::EndpointConfig;
use heronfs_common::types::Identity;

use crate::config::SessionCacheConfig;
use crate::error::ConnectError;
use crate::session::{SessionHandle, SessionLease};
use crate::transport::DfsSession;

/// The connection factory seam.
///
/// One call performs one session-establishment handshake under the
/// given identity, with no retries; retry-or-coalesce policy belongs to
/// the cache so it can coordinate waiters.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, identity: &Identity) -> Result<Arc<dyn DfsSession>, ConnectError>;
}

type ConnectOutcome = Option<Result<Arc<SessionHandle>, ConnectError>>;

/// State of one identity's table slot
enum Slot {
    /// An established session, shared by all borrowers of this identity
    Ready(Arc<SessionHandle>),
    /// A handshake is in flight; waiters subscribe to its outcome
    Pending(watch::Receiver<ConnectOutcome>),
}

/// Counters exposed for diagnostics
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub connects: u64,
    pub connect_failures: u64,
    pub invalidations: u64,
    pub evictions: u64,
    pub live_entries: usize,
    pub pending_entries: usize,
}

#[derive(Default)]
struct StatCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    connects: AtomicU64,
    connect_failures: AtomicU64,
    invalidations: AtomicU64,
    evictions: AtomicU64,
}

/// Identity-scoped session cache.
///
/// Maps each caller identity to at most one live nameserver session,
/// serves cached sessions to concurrent callers without blocking,
/// coalesces concurrent handshakes for the same identity into one
/// (single-flight), and recovers from sessions that go stale.
///
/// The table mutex guards bookkeeping only; it is never held across a
/// handshake.
pub struct ConnectionCache {
    table: Mutex<HashMap<String, Slot>>,
    connector: Arc<dyn SessionConnector>,
    endpoint: EndpointConfig,
    config: SessionCacheConfig,
    next_handle_id: AtomicU64,
    stats: StatCounters,
}

impl ConnectionCache {
    pub fn new(
        connector: Arc<dyn SessionConnector>,
        endpoint: EndpointConfig,
        config: SessionCacheConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            table: Mutex::new(HashMap::new()),
            connector,
            endpoint,
            config,
            next_handle_id: AtomicU64::new(1),
            stats: StatCounters::default(),
        })
    }

    /// Borrow a live session for the given identity.
    ///
    /// Cache hit: returns immediately. Miss: performs the handshake,
    /// bounded by the endpoint's connect timeout, while concurrent
    /// callers for the same identity wait for this attempt's outcome
    /// instead of opening duplicate sessions. A factory failure is
    /// returned verbatim to every coalesced waiter; the cache never
    /// retries on its own.
    pub async fn acquire(&self, identity: &Identity) -> Result<SessionLease, ConnectError> {
        let key = self.endpoint.effective_user(identity).to_string();

        loop {
            enum Plan {
                Hit(SessionLease),
                Wait(watch::Receiver<ConnectOutcome>),
                Create(watch::Sender<ConnectOutcome>),
            }

            let plan = {
                let mut table = self.table.lock().await;
                match table.get(&key) {
                    // The borrow count is bumped while the table lock is
                    // still held; invalidate and sweep take the same lock,
                    // so neither can observe this handle at zero borrows
                    // between lookup and lease construction.
                    Some(Slot::Ready(handle)) if !handle.is_dead() => {
                        Plan::Hit(SessionLease::new(handle.clone()))
                    }
                    Some(Slot::Ready(handle)) => {
                        // A dead entry still installed: detach it so it
                        // can never be served, then fall through to a
                        // fresh connect.
                        let stale = handle.clone();
                        table.remove(&key);
                        if stale.borrows() == 0 {
                            stale.schedule_close();
                        }
                        continue;
                    }
                    Some(Slot::Pending(rx)) => Plan::Wait(rx.clone()),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        table.insert(key.clone(), Slot::Pending(rx));
                        Plan::Create(tx)
                    }
                }
            };

            match plan {
                Plan::Hit(lease) => {
                    lease.handle().touch();
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(lease);
                }
                Plan::Wait(rx) => {
                    self.stats.coalesced.fetch_add(1, Ordering::Relaxed);
                    match self.await_pending(&key, rx).await {
                        Some(Ok(handle)) => {
                            let lease = SessionLease::new(handle);
                            if lease.handle().is_dead() {
                                // Invalidated between the broadcast and
                                // our borrow; dropping the lease drives
                                // teardown if we were last, then retry
                                drop(lease);
                                continue;
                            }
                            lease.handle().touch();
                            return Ok(lease);
                        }
                        Some(Err(e)) => return Err(e),
                        // Creator vanished without publishing; retry
                        None => continue,
                    }
                }
                Plan::Create(tx) => return self.connect_and_install(identity, &key, tx).await,
            }
        }
    }

    /// Wait for an in-flight handshake's broadcast outcome
    async fn await_pending(
        &self,
        key: &str,
        mut rx: watch::Receiver<ConnectOutcome>,
    ) -> Option<Result<Arc<SessionHandle>, ConnectError>> {
        loop {
            if let Some(outcome) = rx.borrow_and_update().clone() {
                return Some(outcome);
            }
            if rx.changed().await.is_err() {
                // The creating task dropped its sender without sending a
                // result. Clear the orphaned slot so callers do not spin
                // on it.
                let mut table = self.table.lock().await;
                if let Some(Slot::Pending(current)) = table.get(key) {
                    if current.same_channel(&rx) {
                        table.remove(key);
                    }
                }
                return None;
            }
        }
    }

    /// Run the handshake with the table lock released, then re-lock to
    /// install the result and broadcast it to waiters.
    async fn connect_and_install(
        &self,
        identity: &Identity,
        key: &str,
        tx: watch::Sender<ConnectOutcome>,
    ) -> Result<SessionLease, ConnectError> {
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        debug!("opening session for {}", identity);

        let deadline = self.endpoint.connect_timeout;
        let attempt = match timeout(deadline, self.connector.connect(identity)).await {
            Ok(Ok(rpc)) => {
                let id = self.next_handle_id.fetch_add(1, Ordering::Relaxed);
                Ok(Arc::new(SessionHandle::new(id, identity.clone(), rpc)))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ConnectError::Timeout),
        };

        // The creator's own lease is taken under the same lock that
        // installs the handle, so a racing invalidate can never close it
        // before the creator has borrowed it.
        let (outcome, lease) = {
            let mut table = self.table.lock().await;
            match &attempt {
                Ok(handle) => match table.get(key) {
                    // Raced with another installer: keep the winner's
                    // session, discard ours.
                    Some(Slot::Ready(existing)) if !existing.is_dead() => {
                        let winner = existing.clone();
                        handle.mark_dead();
                        handle.schedule_close();
                        let lease = SessionLease::new(winner.clone());
                        (Ok(winner), Some(lease))
                    }
                    _ => {
                        table.insert(key.to_string(), Slot::Ready(handle.clone()));
                        let lease = SessionLease::new(handle.clone());
                        (Ok(handle.clone()), Some(lease))
                    }
                },
                Err(e) => {
                    // Never leave a permanently pending slot behind
                    if matches!(table.get(key), Some(Slot::Pending(_))) {
                        table.remove(key);
                    }
                    (Err(e.clone()), None)
                }
            }
        };

        let _ = tx.send(Some(outcome.clone()));

        match (outcome, lease) {
            (Ok(handle), Some(lease)) => {
                self.stats.connects.fetch_add(1, Ordering::Relaxed);
                info!("session {} opened for {}", handle.id(), identity);
                Ok(lease)
            }
            (Err(e), _) => {
                self.stats.connect_failures.fetch_add(1, Ordering::Relaxed);
                warn!("session open for {} failed: {}", identity, e);
                Err(e)
            }
            (Ok(_), None) => unreachable!("successful connect always yields a lease"),
        }
    }

    /// Mark the identity's current session unusable and detach it.
    ///
    /// Linearizable per identity: once this returns, no later `acquire`
    /// can observe the invalidated session; it triggers a fresh connect
    /// instead. In-flight borrows complete against the old session and
    /// the last one drives teardown. A pending handshake is left alone;
    /// the session it produces postdates the invalidation.
    pub async fn invalidate(&self, identity: &Identity) {
        let key = self.endpoint.effective_user(identity).to_string();
        let mut table = self.table.lock().await;
        if let Some(Slot::Ready(handle)) = table.get(&key) {
            let handle = handle.clone();
            handle.mark_dead();
            table.remove(&key);
            self.stats.invalidations.fetch_add(1, Ordering::Relaxed);
            info!(
                "invalidated session {} for {} ({} borrows outstanding)",
                handle.id(),
                identity,
                handle.borrows()
            );
            if handle.borrows() == 0 {
                handle.schedule_close();
            }
        }
    }

    /// Evict sessions that have sat unborrowed past the idle timeout.
    ///
    /// Entries with active borrowers or recent activity are untouched.
    pub async fn sweep(&self) {
        let idle_timeout = self.config.idle_timeout;
        let mut evicted = 0u64;
        {
            let mut table = self.table.lock().await;
            table.retain(|user, slot| match slot {
                Slot::Ready(handle) => {
                    if handle.borrows() == 0 && handle.idle_for() >= idle_timeout {
                        debug!(
                            "evicting idle session {} for {} (idle {:?})",
                            handle.id(),
                            user,
                            handle.idle_for()
                        );
                        handle.mark_dead();
                        handle.schedule_close();
                        evicted += 1;
                        false
                    } else {
                        true
                    }
                }
                Slot::Pending(_) => true,
            });
        }
        if evicted > 0 {
            self.stats.evictions.fetch_add(evicted, Ordering::Relaxed);
            debug!("sweep evicted {} idle sessions", evicted);
        }
    }

    /// Spawn the periodic sweeper task
    pub fn start_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        let interval = cache.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                cache.sweep().await;
            }
        })
    }

    pub async fn stats(&self) -> CacheStats {
        let table = self.table.lock().await;
        let mut live = 0;
        let mut pending = 0;
        for slot in table.values() {
            match slot {
                Slot::Ready(_) => live += 1,
                Slot::Pending(_) => pending += 1,
            }
        }
        CacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            coalesced: self.stats.coalesced.load(Ordering::Relaxed),
            connects: self.stats.connects.load(Ordering::Relaxed),
            connect_failures: self.stats.connect_failures.load(Ordering::Relaxed),
            invalidations: self.stats.invalidations.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            live_entries: live,
            pending_entries: pending,
        }
    }

    #[cfg(test)]
    pub(crate) async fn entry_count(&self) -> usize {
        self.table.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{StubConnector, StubDfsSession};
    use std::time::Duration;

    fn cache_with(
        connector: Arc<StubConnector>,
        legacy: bool,
        idle_timeout: Duration,
    ) -> Arc<ConnectionCache> {
        let endpoint = EndpointConfig {
            legacy_protocol: legacy,
            connect_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let config = SessionCacheConfig {
            idle_timeout,
            sweep_interval: Duration::from_secs(60),
        };
        ConnectionCache::new(connector, endpoint, config)
    }

    fn alice() -> Identity {
        Identity::new("alice", "staff", vec!["staff".into()])
    }

    fn bob() -> Identity {
        Identity::new("bob", "users", vec!["users".into()])
    }

    #[tokio::test]
    async fn test_distinct_identities_get_distinct_sessions() {
        let connector = Arc::new(StubConnector::new());
        let cache = cache_with(connector.clone(), false, Duration::from_secs(300));

        let alice = alice();
        let bob = bob();
        let (a, b) = tokio::join!(cache.acquire(&alice), cache.acquire(&bob));
        let a = a.unwrap();
        let b = b.unwrap();

        assert_ne!(a.handle().id(), b.handle().id());
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_hit_reuses_session_without_reconnect() {
        let connector = Arc::new(StubConnector::new());
        let cache = cache_with(connector.clone(), false, Duration::from_secs(300));

        let first = cache.acquire(&alice()).await.unwrap();
        let first_id = first.handle().id();
        drop(first);

        let second = cache.acquire(&alice()).await.unwrap();
        assert_eq!(second.handle().id(), first_id);
        assert_eq!(connector.connect_count(), 1);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_single_flight_under_concurrency() {
        let connector = Arc::new(StubConnector::new().with_connect_delay(Duration::from_millis(50)));
        let cache = cache_with(connector.clone(), false, Duration::from_secs(300));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move { cache.acquire(&alice()).await }));
        }

        let mut ids = Vec::new();
        for task in tasks {
            let lease = task.await.unwrap().unwrap();
            ids.push(lease.handle().id());
        }

        assert_eq!(connector.connect_count(), 1);
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_connect_failure_broadcast_to_all_waiters() {
        let connector = Arc::new(
            StubConnector::new()
                .with_connect_delay(Duration::from_millis(50))
                .failing_with(ConnectError::Timeout),
        );
        let cache = cache_with(connector.clone(), false, Duration::from_secs(300));

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move { cache.acquire(&alice()).await }));
        }
        for task in tasks {
            let err = task.await.unwrap().unwrap_err();
            assert_eq!(err, ConnectError::Timeout);
        }
        assert_eq!(connector.connect_count(), 1);

        // A failure leaves no entry behind; once the factory is healed
        // the next acquire succeeds.
        assert_eq!(cache.entry_count().await, 0);
        connector.heal();
        let lease = cache.acquire(&alice()).await.unwrap();
        assert_eq!(lease.handle().identity().username, "alice");
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_bounded_by_timeout() {
        let connector = Arc::new(StubConnector::new().with_connect_delay(Duration::from_secs(60)));
        let cache = cache_with(connector.clone(), false, Duration::from_secs(300));

        let err = cache.acquire(&alice()).await.unwrap_err();
        assert_eq!(err, ConnectError::Timeout);
        assert_eq!(cache.entry_count().await, 0);
    }

    #[tokio::test]
    async fn test_invalidate_wins_over_concurrent_acquire() {
        let connector = Arc::new(StubConnector::new());
        let cache = cache_with(connector.clone(), false, Duration::from_secs(300));

        let lease = cache.acquire(&alice()).await.unwrap();
        let old_id = lease.handle().id();
        let old_session = connector.last_session().unwrap();

        cache.invalidate(&alice()).await;

        // The outstanding lease defers teardown
        tokio::task::yield_now().await;
        assert_eq!(old_session.close_count(), 0);

        // A fresh acquire never sees the invalidated handle
        let fresh = cache.acquire(&alice()).await.unwrap();
        assert_ne!(fresh.handle().id(), old_id);
        assert_eq!(connector.connect_count(), 2);

        // Dropping the last borrow of the dead handle closes it, once
        drop(lease);
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(old_session.close_count(), 1);
    }

    #[tokio::test]
    async fn test_hit_borrow_is_atomic_with_lookup() {
        let connector = Arc::new(StubConnector::new());
        let cache = cache_with(connector.clone(), false, Duration::from_secs(300));

        // Race an invalidate against a cache hit, repeatedly. Whichever
        // way the race lands, a returned lease must be usable: either
        // the hit borrowed the handle before the invalidate could see
        // zero borrows, or the invalidate won and the acquire opened a
        // fresh session. A lease over an already-closing session is the
        // failure mode.
        for _ in 0..50 {
            drop(cache.acquire(&alice()).await.unwrap());

            let racing = {
                let cache = cache.clone();
                tokio::spawn(async move { cache.invalidate(&alice()).await })
            };
            let lease = cache.acquire(&alice()).await.unwrap();
            racing.await.unwrap();
            tokio::task::yield_now().await;

            assert!(lease.session().file_status("/").await.is_ok());

            drop(lease);
            cache.invalidate(&alice()).await;
        }
    }

    #[tokio::test]
    async fn test_invalidate_without_borrowers_closes_immediately() {
        let connector = Arc::new(StubConnector::new());
        let cache = cache_with(connector.clone(), false, Duration::from_secs(300));

        drop(cache.acquire(&alice()).await.unwrap());
        let session = connector.last_session().unwrap();

        cache.invalidate(&alice()).await;
        tokio::task::yield_now().await;
        assert_eq!(session.close_count(), 1);
        assert_eq!(cache.entry_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_only_idle_unborrowed_entries() {
        let connector = Arc::new(StubConnector::new());
        let cache = cache_with(connector.clone(), false, Duration::from_secs(300));

        // alice: idle. bob: kept borrowed. carol: touched recently.
        drop(cache.acquire(&alice()).await.unwrap());
        let bob_lease = cache.acquire(&bob()).await.unwrap();
        let carol = Identity::new("carol", "staff", vec![]);
        drop(cache.acquire(&carol).await.unwrap());

        tokio::time::advance(Duration::from_secs(299)).await;
        cache.sweep().await;
        assert_eq!(cache.entry_count().await, 3);

        // Refresh carol just before the threshold passes
        drop(cache.acquire(&carol).await.unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        cache.sweep().await;

        let stats = cache.stats().await;
        assert_eq!(stats.evictions, 1);
        assert_eq!(cache.entry_count().await, 2);

        // alice is gone; reacquiring reconnects
        drop(cache.acquire(&alice()).await.unwrap());
        assert_eq!(connector.connect_count(), 4);
        drop(bob_lease);
    }

    #[tokio::test]
    async fn test_legacy_protocol_aliases_every_identity() {
        let connector = Arc::new(StubConnector::new());
        let cache = cache_with(connector.clone(), true, Duration::from_secs(300));

        let a = cache.acquire(&alice()).await.unwrap();
        let b = cache.acquire(&bob()).await.unwrap();

        assert_eq!(a.handle().id(), b.handle().id());
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(cache.entry_count().await, 1);
    }

    #[tokio::test]
    async fn test_borrow_round_trip_keeps_entry() {
        let connector = Arc::new(StubConnector::new());
        let cache = cache_with(connector.clone(), false, Duration::from_secs(300));

        for _ in 0..10 {
            let lease = cache.acquire(&alice()).await.unwrap();
            assert_eq!(lease.handle().borrows(), 1);
        }

        let lease = cache.acquire(&alice()).await.unwrap();
        assert_eq!(lease.handle().borrows(), 1);
        drop(lease);

        assert_eq!(connector.connect_count(), 1);
        assert_eq!(cache.entry_count().await, 1);
    }
}
