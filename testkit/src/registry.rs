use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rally_common::{DiscoveryError, MemberEntry, NodeAddress, Registry, RegistryLock, Result};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Default)]
struct Faults {
    queries: u32,
    registrations: u32,
    heartbeats: u32,
}

/// In-memory registry with TTL-based liveness and a single in-process lock
/// per key. Registrations expire `alive_timeout` after the last heartbeat,
/// the same way a real backend would expire a silent node.
///
/// Failures can be injected per operation kind to drive the coordinator's
/// retry and partition paths. Uses `tokio::time::Instant` so paused-clock
/// tests control expiry.
pub struct MemoryRegistry {
    alive_timeout: Duration,
    entries: DashMap<String, DashMap<NodeAddress, Instant>>,
    locks: DashMap<String, String>,
    lock_seq: AtomicU64,
    faults: Mutex<Faults>,
    queries: AtomicUsize,
    registrations: AtomicUsize,
    heartbeats: AtomicUsize,
}

impl MemoryRegistry {
    pub fn new(alive_timeout: Duration) -> Self {
        Self {
            alive_timeout,
            entries: DashMap::new(),
            locks: DashMap::new(),
            lock_seq: AtomicU64::new(0),
            faults: Mutex::new(Faults::default()),
            queries: AtomicUsize::new(0),
            registrations: AtomicUsize::new(0),
            heartbeats: AtomicUsize::new(0),
        }
    }

    /// Marks `address` alive as if another node had registered it.
    pub fn seed(&self, address: NodeAddress) {
        let deadline = Instant::now() + self.alive_timeout;
        self.entries
            .entry(address.cluster.clone())
            .or_default()
            .insert(address, deadline);
    }

    /// Drops `address` from the alive set, as if its TTL had expired.
    pub fn forget(&self, address: &NodeAddress) {
        if let Some(cluster) = self.entries.get(&address.cluster) {
            cluster.remove(address);
        }
    }

    /// Currently alive addresses for `cluster`, without counting as a query.
    pub fn alive(&self, cluster: &str) -> HashSet<NodeAddress> {
        self.collect_alive(cluster)
    }

    /// Fails the next `n` alive-node queries.
    pub fn fail_next_queries(&self, n: u32) {
        self.faults.lock().queries = n;
    }

    /// Fails the next `n` registrations.
    pub fn fail_next_registrations(&self, n: u32) {
        self.faults.lock().registrations = n;
    }

    /// Fails the next `n` heartbeats.
    pub fn fail_next_heartbeats(&self, n: u32) {
        self.faults.lock().heartbeats = n;
    }

    /// Takes the named lock from the test side, simulating another node
    /// holding it. Release through [`Registry::release_lock`].
    pub fn hold_lock(&self, key: &str) -> Option<RegistryLock> {
        self.try_lock(key)
    }

    pub fn lock_held(&self, key: &str) -> bool {
        self.locks.contains_key(key)
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn registration_count(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    pub fn heartbeat_count(&self) -> usize {
        self.heartbeats.load(Ordering::SeqCst)
    }

    fn collect_alive(&self, cluster: &str) -> HashSet<NodeAddress> {
        let now = Instant::now();
        match self.entries.get(cluster) {
            Some(nodes) => {
                nodes.retain(|_, deadline| *deadline > now);
                nodes.iter().map(|kv| kv.key().clone()).collect()
            }
            None => HashSet::new(),
        }
    }

    fn try_lock(&self, key: &str) -> Option<RegistryLock> {
        let token = self.lock_seq.fetch_add(1, Ordering::SeqCst).to_string();
        match self.locks.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(token.clone());
                Some(RegistryLock::new(key, token))
            }
        }
    }

    fn take_fault(counter: &mut u32) -> bool {
        if *counter > 0 {
            *counter -= 1;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn alive_nodes(&self, cluster: &str) -> Result<HashSet<NodeAddress>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if Self::take_fault(&mut self.faults.lock().queries) {
            return Err(DiscoveryError::Registry("injected query failure".into()));
        }
        Ok(self.collect_alive(cluster))
    }

    async fn register(&self, entry: &MemberEntry) -> Result<()> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        if Self::take_fault(&mut self.faults.lock().registrations) {
            return Err(DiscoveryError::Registry(
                "injected registration failure".into(),
            ));
        }
        let deadline = Instant::now() + self.alive_timeout;
        self.entries
            .entry(entry.cluster_name.clone())
            .or_default()
            .insert(entry.address.clone(), deadline);
        Ok(())
    }

    async fn deregister(&self, entry: &MemberEntry) -> Result<()> {
        if let Some(cluster) = self.entries.get(&entry.cluster_name) {
            cluster.remove(&entry.address);
        }
        Ok(())
    }

    async fn mark_alive(&self, entry: &MemberEntry) -> Result<()> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        if Self::take_fault(&mut self.faults.lock().heartbeats) {
            return Err(DiscoveryError::Registry("injected heartbeat failure".into()));
        }
        let deadline = Instant::now() + self.alive_timeout;
        let refreshed = self
            .entries
            .get(&entry.cluster_name)
            .and_then(|nodes| nodes.get_mut(&entry.address).map(|mut slot| *slot = deadline))
            .is_some();
        if refreshed {
            Ok(())
        } else {
            Err(DiscoveryError::Registry(format!(
                "heartbeat for unregistered node {}",
                entry.address
            )))
        }
    }

    async fn acquire_lock(&self, key: &str) -> Result<Option<RegistryLock>> {
        Ok(self.try_lock(key))
    }

    async fn release_lock(&self, lock: RegistryLock) -> Result<()> {
        let released = self
            .locks
            .remove_if(&lock.key, |_, holder| *holder == lock.token)
            .is_some();
        if released {
            Ok(())
        } else {
            Err(DiscoveryError::Registry(format!(
                "lock [{}] not held by this token",
                lock.key
            )))
        }
    }
}
