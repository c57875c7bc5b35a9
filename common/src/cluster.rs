use crate::error::Result;
use crate::types::{MemberEntry, NodeAddress};
use async_trait::async_trait;
use std::collections::HashSet;

/// Contract between the discovery core and the surrounding cluster
/// membership substrate.
///
/// The substrate owns the actual membership protocol; discovery only feeds
/// it seed nodes and down decisions and reads its current view back.
#[async_trait]
pub trait ClusterControl: Send + Sync {
    /// Identity of the local node, used to build the registry entry.
    fn self_entry(&self) -> MemberEntry;

    /// Attempts to join the cluster using the given seed addresses.
    async fn join_seed_nodes(&self, seeds: Vec<NodeAddress>) -> Result<()>;

    /// Forcibly marks a member as down.
    async fn down(&self, address: &NodeAddress) -> Result<()>;

    /// Addresses of all current members.
    async fn members(&self) -> Result<HashSet<NodeAddress>>;

    /// Addresses of members currently considered unreachable.
    async fn unreachable(&self) -> Result<HashSet<NodeAddress>>;
}
