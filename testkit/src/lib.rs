//! In-memory [`Registry`] and scriptable [`ClusterControl`] implementations
//! for exercising the discovery coordinator without a real backend.
//!
//! [`Registry`]: rally_common::Registry
//! [`ClusterControl`]: rally_common::ClusterControl

pub mod cluster;
pub mod registry;

pub use cluster::ScriptedCluster;
pub use registry::MemoryRegistry;

use std::sync::Once;

static INIT: Once = Once::new();

/// Installs a `RUST_LOG`-controlled subscriber once per test binary.
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
