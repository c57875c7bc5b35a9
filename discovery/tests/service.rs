use rally_common::{DiscoveryError, MemberEntry, NodeAddress, Registry};
use rally_discovery::{DiscoveryService, DiscoverySettings, DiscoveryState, JoinStrategy};
use rally_testkit::{MemoryRegistry, ScriptedCluster};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const CLUSTER: &str = "orders";

fn addr(host: &str, port: u16) -> NodeAddress {
    NodeAddress::new(CLUSTER, host, port)
}

fn entry(host: &str, port: u16) -> MemberEntry {
    MemberEntry::new(CLUSTER, addr(host, port), ["worker"])
}

fn locking_settings() -> DiscoverySettings {
    DiscoverySettings::new(
        Duration::from_secs(1),
        Duration::from_secs(60),
        Duration::from_secs(2),
        3,
        JoinStrategy::Locking {
            lock_retry_interval: Duration::from_millis(20),
        },
    )
    .unwrap()
}

/// Lockless with a single turn, so the join signal always fires immediately.
fn lockless_settings(join_retries: u32) -> DiscoverySettings {
    DiscoverySettings::new(
        Duration::from_secs(1),
        Duration::from_secs(60),
        Duration::from_secs(2),
        join_retries,
        JoinStrategy::Lockless {
            turn_period: Duration::from_millis(1),
            max_turns: 1,
        },
    )
    .unwrap()
}

fn fixture(host: &str, port: u16) -> (Arc<MemoryRegistry>, Arc<ScriptedCluster>) {
    rally_testkit::init_logging();
    let registry = Arc::new(MemoryRegistry::new(Duration::from_secs(60)));
    let cluster = Arc::new(ScriptedCluster::new(entry(host, port)));
    (registry, cluster)
}

/// Lets already woken tasks run before asserting.
async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_self_seeds_when_registry_is_empty() {
    let (registry, cluster) = fixture("10.0.0.1", 2552);
    let mut handle =
        DiscoveryService::spawn(locking_settings(), registry.clone(), cluster.clone());

    handle.wait_ready().await.unwrap();

    assert_eq!(cluster.joins(), vec![vec![addr("10.0.0.1", 2552)]]);
    assert!(registry.alive(CLUSTER).contains(&addr("10.0.0.1", 2552)));
    assert_eq!(registry.registration_count(), 1);
    assert!(registry.heartbeat_count() >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_joins_using_exactly_the_discovered_alive_set() {
    let (registry, cluster) = fixture("10.0.0.1", 2552);
    registry.seed(addr("10.0.0.2", 2552));
    registry.seed(addr("10.0.0.3", 2552));

    let mut handle =
        DiscoveryService::spawn(locking_settings(), registry.clone(), cluster.clone());
    handle.wait_ready().await.unwrap();

    let joins = cluster.joins();
    assert_eq!(joins.len(), 1);
    let seeds: HashSet<_> = joins[0].iter().cloned().collect();
    let expected: HashSet<_> = [addr("10.0.0.2", 2552), addr("10.0.0.3", 2552)]
        .into_iter()
        .collect();
    assert_eq!(seeds, expected);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeats_repeat_at_alive_interval() {
    let (registry, cluster) = fixture("10.0.0.1", 2552);
    let mut handle =
        DiscoveryService::spawn(locking_settings(), registry.clone(), cluster.clone());
    handle.wait_ready().await.unwrap();

    let after_join = registry.heartbeat_count();
    tokio::time::sleep(Duration::from_millis(3100)).await;
    settle().await;

    assert!(
        registry.heartbeat_count() >= after_join + 3,
        "expected at least 3 periodic heartbeats, got {}",
        registry.heartbeat_count() - after_join
    );
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_failures_do_not_stop_the_service() {
    let (registry, cluster) = fixture("10.0.0.1", 2552);
    let mut handle =
        DiscoveryService::spawn(locking_settings(), registry.clone(), cluster.clone());
    handle.wait_ready().await.unwrap();

    registry.fail_next_heartbeats(2);
    tokio::time::sleep(Duration::from_millis(3100)).await;
    settle().await;

    assert_eq!(handle.state(), DiscoveryState::Ready);
    assert!(registry.alive(CLUSTER).contains(&addr("10.0.0.1", 2552)));
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_exhausting_join_retries() {
    let (registry, cluster) = fixture("10.0.0.1", 2552);
    registry.fail_next_queries(10);

    let mut handle =
        DiscoveryService::spawn(lockless_settings(3), registry.clone(), cluster.clone());

    let err = handle.wait_ready().await.unwrap_err();
    match err {
        DiscoveryError::JoinFailed { cluster: name, attempts } => {
            assert_eq!(name, CLUSTER);
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(handle.state(), DiscoveryState::Terminated);
    assert_eq!(registry.query_count(), 3);
    assert!(cluster.joins().is_empty());

    // terminated means inert: no further attempts ever
    tokio::time::sleep(Duration::from_secs(5)).await;
    settle().await;
    assert_eq!(registry.query_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_lock_contention_retries_without_consuming_the_budget() {
    let (registry, cluster) = fixture("10.0.0.1", 2552);
    let held = registry.hold_lock(CLUSTER).unwrap();

    let settings = DiscoverySettings::new(
        Duration::from_secs(1),
        Duration::from_secs(60),
        Duration::from_secs(2),
        1,
        JoinStrategy::Locking {
            lock_retry_interval: Duration::from_millis(20),
        },
    )
    .unwrap();

    let mut handle = DiscoveryService::spawn(settings, registry.clone(), cluster.clone());

    // many contention retries happen in here; with a budget of 1, a single
    // counted failure would already be fatal
    tokio::time::sleep(Duration::from_millis(200)).await;
    settle().await;
    assert_eq!(handle.state(), DiscoveryState::Joining);
    assert_eq!(registry.query_count(), 0);

    registry.release_lock(held).await.unwrap();
    handle.wait_ready().await.unwrap();
    assert_eq!(registry.query_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_lock_is_released_after_a_failed_attempt() {
    let (registry, cluster) = fixture("10.0.0.1", 2552);
    registry.fail_next_queries(1);

    let mut handle =
        DiscoveryService::spawn(locking_settings(), registry.clone(), cluster.clone());
    handle.wait_ready().await.unwrap();

    // the first attempt failed under the lock, the second succeeded, and the
    // lock is free again afterwards
    assert_eq!(registry.query_count(), 2);
    assert!(!registry.lock_held(CLUSTER));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_joiners_form_one_cluster_under_the_lock() {
    let registry = Arc::new(MemoryRegistry::new(Duration::from_secs(60)));
    let cluster_a = Arc::new(ScriptedCluster::new(entry("10.0.0.1", 2552)));
    let cluster_b = Arc::new(ScriptedCluster::new(entry("10.0.0.2", 2552)));

    let mut handle_a =
        DiscoveryService::spawn(locking_settings(), registry.clone(), cluster_a.clone());
    let mut handle_b =
        DiscoveryService::spawn(locking_settings(), registry.clone(), cluster_b.clone());

    handle_a.wait_ready().await.unwrap();
    handle_b.wait_ready().await.unwrap();

    // the lock serializes the attempts: exactly one node saw an empty
    // registry and self-seeded, the other discovered it
    let self_seeds = [
        (cluster_a.joins(), addr("10.0.0.1", 2552)),
        (cluster_b.joins(), addr("10.0.0.2", 2552)),
    ]
    .into_iter()
    .filter(|(joins, own)| joins[0] == vec![own.clone()])
    .count();
    assert_eq!(self_seeds, 1);
    assert_eq!(registry.alive(CLUSTER).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reconciliation_downs_members_the_registry_does_not_confirm() {
    let (registry, cluster) = fixture("10.0.0.1", 2552);
    registry.seed(addr("10.0.0.2", 2552));

    let mut handle =
        DiscoveryService::spawn(locking_settings(), registry.clone(), cluster.clone());
    handle.wait_ready().await.unwrap();

    // locally known: self, B (member), C (unreachable); registry confirms
    // only self and B
    cluster.set_members([addr("10.0.0.1", 2552), addr("10.0.0.2", 2552)]);
    cluster.set_unreachable([addr("10.0.0.9", 2552)]);

    tokio::time::sleep(Duration::from_millis(2100)).await;
    settle().await;

    assert_eq!(cluster.downed(), vec![addr("10.0.0.9", 2552)]);
    assert_eq!(handle.state(), DiscoveryState::Ready);

    // converged now; further cycles must not down anything else
    tokio::time::sleep(Duration::from_millis(4100)).await;
    settle().await;
    assert_eq!(cluster.downed(), vec![addr("10.0.0.9", 2552)]);
}

#[tokio::test(start_paused = true)]
async fn test_reconciliation_query_failure_downs_the_local_node_and_stops() {
    let (registry, cluster) = fixture("10.0.0.1", 2552);
    let mut handle =
        DiscoveryService::spawn(locking_settings(), registry.clone(), cluster.clone());
    handle.wait_ready().await.unwrap();

    registry.fail_next_queries(1);
    handle.wait_terminated().await;

    assert_eq!(cluster.downed(), vec![addr("10.0.0.1", 2552)]);

    // inert after the partition signal: heartbeats stopped for good
    let heartbeats = registry.heartbeat_count();
    tokio::time::sleep(Duration::from_secs(5)).await;
    settle().await;
    assert_eq!(registry.heartbeat_count(), heartbeats);
}

#[tokio::test(start_paused = true)]
async fn test_zero_refresh_interval_disables_reconciliation() {
    let (registry, cluster) = fixture("10.0.0.1", 2552);
    let settings = DiscoverySettings::new(
        Duration::from_secs(1),
        Duration::from_secs(60),
        Duration::ZERO,
        3,
        JoinStrategy::Locking {
            lock_retry_interval: Duration::from_millis(20),
        },
    )
    .unwrap();

    let mut handle = DiscoveryService::spawn(settings, registry.clone(), cluster.clone());
    handle.wait_ready().await.unwrap();

    cluster.set_unreachable([addr("10.0.0.9", 2552)]);
    tokio::time::sleep(Duration::from_secs(10)).await;
    settle().await;

    // only the join-time query ever happened, and nothing was downed
    assert_eq!(registry.query_count(), 1);
    assert!(cluster.downed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_deregisters_and_stops_heartbeats() {
    let (registry, cluster) = fixture("10.0.0.1", 2552);
    let mut handle =
        DiscoveryService::spawn(locking_settings(), registry.clone(), cluster.clone());
    handle.wait_ready().await.unwrap();
    assert!(registry.alive(CLUSTER).contains(&addr("10.0.0.1", 2552)));

    handle.shutdown().await;

    assert!(!registry.alive(CLUSTER).contains(&addr("10.0.0.1", 2552)));
    let heartbeats = registry.heartbeat_count();
    tokio::time::sleep(Duration::from_secs(5)).await;
    settle().await;
    assert_eq!(registry.heartbeat_count(), heartbeats);
}
