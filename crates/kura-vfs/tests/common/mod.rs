//! Shared setup for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use kura_vfs::{MemoryBackend, Root, RootConfig};
use tracing_subscriber::EnvFilter;

/// Install a test subscriber once; `RUST_LOG=kura_vfs=debug` to see output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Fresh in-memory tree. Keys must be unique per test: lock and channel
/// tables are process-wide.
pub async fn memory_root(key: &str) -> (Root, Arc<MemoryBackend>) {
    init_tracing();
    let backend = Arc::new(MemoryBackend::new());
    let root = Root::open(backend.clone(), RootConfig::new(key))
        .await
        .expect("open root");
    (root, backend)
}
