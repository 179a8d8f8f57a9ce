//! End-to-end scenarios for the identity-scoped session cache: many
//! users, concurrent bursts, failure recovery, and the idle lifecycle.

use std::sync::Arc;
use std::time::Duration;

use heronfs_client::transport::testing::StubConnector;
use heronfs_client::{ConnectError, ConnectionCache, SessionCacheConfig};
use heronfs_common::config::EndpointConfig;
use heronfs_common::types::Identity;

fn cache(connector: Arc<StubConnector>, legacy: bool) -> Arc<ConnectionCache> {
    let endpoint = EndpointConfig {
        legacy_protocol: legacy,
        connect_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    ConnectionCache::new(connector, endpoint, SessionCacheConfig::default())
}

fn user(name: &str) -> Identity {
    Identity::new(name, "staff", vec!["staff".to_string()])
}

#[tokio::test]
async fn concurrent_burst_across_users_opens_one_session_each() {
    let connector = Arc::new(StubConnector::new().with_connect_delay(Duration::from_millis(20)));
    let cache = cache(connector.clone(), false);

    let users = ["alice", "bob", "carol", "dave"];
    let mut tasks = Vec::new();
    for name in users {
        for _ in 0..8 {
            let cache = cache.clone();
            let identity = user(name);
            tasks.push(tokio::spawn(async move {
                let lease = cache.acquire(&identity).await.unwrap();
                (identity.username.clone(), lease.handle().id())
            }));
        }
    }

    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await.unwrap());
    }

    // One session per user, shared by that user's whole burst
    assert_eq!(connector.connect_count(), users.len() as u64);
    for name in users {
        let ids: Vec<_> = results
            .iter()
            .filter(|(u, _)| u == name)
            .map(|(_, id)| *id)
            .collect();
        assert_eq!(ids.len(), 8);
        assert!(ids.windows(2).all(|w| w[0] == w[1]), "{name} split sessions");
    }

    // And no two users share a session
    let mut per_user: Vec<_> = users
        .iter()
        .map(|name| results.iter().find(|(u, _)| u == name).unwrap().1)
        .collect();
    per_user.sort_unstable();
    per_user.dedup();
    assert_eq!(per_user.len(), users.len());

    let stats = cache.stats().await;
    assert_eq!(stats.connects, 4);
    assert_eq!(stats.live_entries, 4);
    assert_eq!(stats.hits + stats.coalesced + stats.misses, 32);
}

#[tokio::test]
async fn invalidation_recycles_one_user_without_disturbing_others() {
    let connector = Arc::new(StubConnector::new());
    let cache = cache(connector.clone(), false);

    let alice_lease = cache.acquire(&user("alice")).await.unwrap();
    let alice_old = alice_lease.handle().id();
    let alice_session = connector.last_session().unwrap();
    let bob_lease = cache.acquire(&user("bob")).await.unwrap();
    let bob_id = bob_lease.handle().id();

    cache.invalidate(&user("alice")).await;

    // Alice reconnects; bob's cached session is untouched
    let alice_fresh = cache.acquire(&user("alice")).await.unwrap();
    assert_ne!(alice_fresh.handle().id(), alice_old);
    drop(bob_lease);
    let bob_again = cache.acquire(&user("bob")).await.unwrap();
    assert_eq!(bob_again.handle().id(), bob_id);
    assert_eq!(connector.connect_count(), 3);

    // The in-flight borrow finished against the old session; its drop
    // drives the close of the invalidated session
    drop(alice_lease);
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
    assert_eq!(alice_session.close_count(), 1);
}

#[tokio::test]
async fn outage_is_broadcast_then_recovery_is_clean() {
    let connector = Arc::new(
        StubConnector::new()
            .with_connect_delay(Duration::from_millis(20))
            .failing_with(ConnectError::Network("connection refused".into())),
    );
    let cache = cache(connector.clone(), false);

    // A burst during the outage fails as a unit, with a single attempt
    let mut tasks = Vec::new();
    for _ in 0..6 {
        let cache = cache.clone();
        tasks.push(tokio::spawn(async move { cache.acquire(&user("alice")).await }));
    }
    for task in tasks {
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, ConnectError::Network(_)));
    }
    assert_eq!(connector.connect_count(), 1);

    let stats = cache.stats().await;
    assert_eq!(stats.connect_failures, 1);
    assert_eq!(stats.live_entries, 0);
    assert_eq!(stats.pending_entries, 0);

    // The nameserver comes back; the next caller connects normally
    connector.heal();
    let lease = cache.acquire(&user("alice")).await.unwrap();
    assert_eq!(lease.handle().identity().username, "alice");
    assert_eq!(connector.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn idle_sessions_age_out_while_active_ones_survive() {
    let connector = Arc::new(StubConnector::new());
    let endpoint = EndpointConfig {
        connect_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    let config = SessionCacheConfig {
        idle_timeout: Duration::from_secs(60),
        sweep_interval: Duration::from_secs(10),
    };
    let cache = ConnectionCache::new(connector.clone(), endpoint, config);

    drop(cache.acquire(&user("alice")).await.unwrap());
    drop(cache.acquire(&user("bob")).await.unwrap());

    // bob stays active across the idle window, alice goes quiet
    for _ in 0..4 {
        tokio::time::advance(Duration::from_secs(30)).await;
        drop(cache.acquire(&user("bob")).await.unwrap());
        cache.sweep().await;
    }

    let stats = cache.stats().await;
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.live_entries, 1);

    // alice's next call reconnects transparently
    drop(cache.acquire(&user("alice")).await.unwrap());
    assert_eq!(connector.connect_count(), 3);
}

#[tokio::test]
async fn legacy_nameserver_serves_every_caller_from_one_session() {
    let connector = Arc::new(StubConnector::new());
    let cache = cache(connector.clone(), true);

    let mut ids = Vec::new();
    for name in ["alice", "bob", "carol"] {
        let lease = cache.acquire(&user(name)).await.unwrap();
        ids.push(lease.handle().id());
    }
    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(connector.connect_count(), 1);

    // Invalidating the shared session affects everyone exactly once
    cache.invalidate(&user("alice")).await;
    let lease = cache.acquire(&user("bob")).await.unwrap();
    assert_ne!(lease.handle().id(), ids[0]);
    assert_eq!(connector.connect_count(), 2);
}
