use crate::error::{DiscoveryError, Result};
use crate::types::{MemberEntry, NodeAddress};
use async_trait::async_trait;
use std::collections::HashSet;

/// Handle for a held distributed lock. Backends pair the release with the
/// exact acquisition through the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryLock {
    pub key: String,
    pub token: String,
}

impl RegistryLock {
    pub fn new(key: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            token: token.into(),
        }
    }
}

/// Contract between the discovery core and a third-party registry backend.
///
/// Every call round-trips to the backend; the core keeps no cache of
/// registry state. Implementations must tolerate duplicate heartbeats and
/// re-registration of an already registered entry.
///
/// The lock pair is optional: backends without a mutual-exclusion primitive
/// keep the default implementations and are driven with the lockless
/// strategy instead.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Addresses the backend currently reports healthy for `cluster`.
    /// An empty set means no cluster has been established yet.
    async fn alive_nodes(&self, cluster: &str) -> Result<HashSet<NodeAddress>>;

    /// Records `entry` under an identity derived from its address.
    async fn register(&self, entry: &MemberEntry) -> Result<()>;

    /// Removes a prior registration. Backends relying purely on TTL expiry
    /// may treat this as a no-op.
    async fn deregister(&self, entry: &MemberEntry) -> Result<()>;

    /// Resets the backend-side liveness TTL for `entry`.
    async fn mark_alive(&self, entry: &MemberEntry) -> Result<()>;

    /// Tries to take the named lock. `Ok(None)` means the lock is held
    /// elsewhere; that is contention, not an error.
    async fn acquire_lock(&self, _key: &str) -> Result<Option<RegistryLock>> {
        Err(DiscoveryError::LockNotSupported)
    }

    /// Releases a previously acquired lock.
    async fn release_lock(&self, _lock: RegistryLock) -> Result<()> {
        Err(DiscoveryError::LockNotSupported)
    }
}
