//! Cluster bootstrap through a third-party registry.
//!
//! A [`DiscoveryService`] discovers the current members of a cluster from an
//! external registry (Consul, etcd, Zookeeper, ...), joins the membership
//! substrate using them as seed nodes (or seeds a new cluster when none are
//! alive), registers the local node and keeps its liveness TTL refreshed,
//! and periodically downs members the registry no longer confirms.
//!
//! The registry itself does not run the membership protocol; it only keeps
//! the authoritative list of alive seed nodes.

pub mod service;
pub mod settings;

mod strategy;

pub use service::{DiscoveryHandle, DiscoveryService, DiscoveryState};
pub use settings::{DiscoveryConfig, DiscoverySettings, JoinStrategy, StrategyKind};

pub use rally_common::{
    ClusterControl, DiscoveryError, MemberEntry, NodeAddress, Registry, RegistryLock, Result,
};
