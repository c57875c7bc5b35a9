use crate::error::DiscoveryError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Network identity of a cluster node.
///
/// Rendered as `cluster@host:port`, which is also the identity backends use
/// to key registrations. Two addresses are equal iff all three components are.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddress {
    pub cluster: String,
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(cluster: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            cluster: cluster.into(),
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.cluster, self.host, self.port)
    }
}

impl FromStr for NodeAddress {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DiscoveryError::InvalidAddress(s.to_string());

        let (cluster, rest) = s.split_once('@').ok_or_else(invalid)?;
        let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
        if cluster.is_empty() || host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;

        Ok(Self::new(cluster, host, port))
    }
}

/// Most basic data about the local cluster node, used to join or initialize
/// the cluster. Built once at coordinator startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberEntry {
    /// Name of the cluster this node belongs to. All nodes of one cluster
    /// must share the same name.
    pub cluster_name: String,

    /// Address the local node is listening on.
    pub address: NodeAddress,

    /// Roles attached to the local node. Set semantics, order never matters.
    pub roles: BTreeSet<String>,
}

impl MemberEntry {
    pub fn new<I, S>(cluster_name: impl Into<String>, address: NodeAddress, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cluster_name: cluster_name.into(),
            address,
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for MemberEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}
