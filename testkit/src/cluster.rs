use async_trait::async_trait;
use parking_lot::Mutex;
use rally_common::{ClusterControl, MemberEntry, NodeAddress, Result};
use std::collections::HashSet;

/// Scriptable membership substrate. Records every `join_seed_nodes` and
/// `down` invocation and serves whatever member/unreachable sets the test
/// scripted.
pub struct ScriptedCluster {
    entry: MemberEntry,
    members: Mutex<HashSet<NodeAddress>>,
    unreachable: Mutex<HashSet<NodeAddress>>,
    joins: Mutex<Vec<Vec<NodeAddress>>>,
    downed: Mutex<Vec<NodeAddress>>,
}

impl ScriptedCluster {
    pub fn new(entry: MemberEntry) -> Self {
        Self {
            entry,
            members: Mutex::new(HashSet::new()),
            unreachable: Mutex::new(HashSet::new()),
            joins: Mutex::new(Vec::new()),
            downed: Mutex::new(Vec::new()),
        }
    }

    pub fn set_members(&self, members: impl IntoIterator<Item = NodeAddress>) {
        *self.members.lock() = members.into_iter().collect();
    }

    pub fn set_unreachable(&self, unreachable: impl IntoIterator<Item = NodeAddress>) {
        *self.unreachable.lock() = unreachable.into_iter().collect();
    }

    /// Seed lists passed to `join_seed_nodes`, in call order.
    pub fn joins(&self) -> Vec<Vec<NodeAddress>> {
        self.joins.lock().clone()
    }

    /// Addresses downed so far, in call order.
    pub fn downed(&self) -> Vec<NodeAddress> {
        self.downed.lock().clone()
    }
}

#[async_trait]
impl ClusterControl for ScriptedCluster {
    fn self_entry(&self) -> MemberEntry {
        self.entry.clone()
    }

    async fn join_seed_nodes(&self, seeds: Vec<NodeAddress>) -> Result<()> {
        self.joins.lock().push(seeds);
        // joining makes the local node a member of whatever cluster forms
        self.members.lock().insert(self.entry.address.clone());
        Ok(())
    }

    async fn down(&self, address: &NodeAddress) -> Result<()> {
        self.downed.lock().push(address.clone());
        self.members.lock().remove(address);
        self.unreachable.lock().remove(address);
        Ok(())
    }

    async fn members(&self) -> Result<HashSet<NodeAddress>> {
        Ok(self.members.lock().clone())
    }

    async fn unreachable(&self) -> Result<HashSet<NodeAddress>> {
        Ok(self.unreachable.lock().clone())
    }
}
