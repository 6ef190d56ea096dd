//! Root configuration.
//!
//! ```toml
//! key = "workspace"
//! owns_backend = false
//! auto_repair = true
//! sidecar_policy = "strict"
//! max_meta_bytes = 65536
//! broadcast_capacity = 256
//! ```

use serde::{Deserialize, Serialize};

use kura_types::DEFAULT_MAX_META_BYTES;

use crate::vfs::{VfsError, VfsResult};

/// What to do with a sidecar that fails to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SidecarPolicy {
    /// Log a warning and use the default record.
    #[default]
    Lenient,
    /// Fail with [`VfsError::CorruptMetadata`].
    Strict,
}

/// Configuration for one [`Root`](crate::Root).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RootConfig {
    /// Tree key. Names the change bus channel and prefixes lock names.
    pub key: String,
    /// Whether `destroy()` removes the backend root itself, rather than only
    /// its contents.
    pub owns_backend: bool,
    /// Run fsck during initialization.
    pub auto_repair: bool,
    pub sidecar_policy: SidecarPolicy,
    /// Cap on serialized user metadata per entry.
    pub max_meta_bytes: usize,
    /// Change bus buffer size.
    pub broadcast_capacity: usize,
}

impl Default for RootConfig {
    fn default() -> Self {
        Self {
            key: "kura".to_string(),
            owns_backend: true,
            auto_repair: false,
            sidecar_policy: SidecarPolicy::Lenient,
            max_meta_bytes: DEFAULT_MAX_META_BYTES,
            broadcast_capacity: 256,
        }
    }
}

impl RootConfig {
    /// Default configuration for tree `key`.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    /// Parse from TOML text. Missing fields take their defaults.
    pub fn from_toml_str(text: &str) -> VfsResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| VfsError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no tree can run with.
    pub fn validate(&self) -> VfsResult<()> {
        if self.key.is_empty() {
            return Err(VfsError::Config("key must not be empty".into()));
        }
        if self.broadcast_capacity == 0 {
            return Err(VfsError::Config("broadcast_capacity must be at least 1".into()));
        }
        Ok(())
    }

    pub fn owns_backend(mut self, owns: bool) -> Self {
        self.owns_backend = owns;
        self
    }

    pub fn auto_repair(mut self, enabled: bool) -> Self {
        self.auto_repair = enabled;
        self
    }

    pub fn sidecar_policy(mut self, policy: SidecarPolicy) -> Self {
        self.sidecar_policy = policy;
        self
    }

    pub fn max_meta_bytes(mut self, limit: usize) -> Self {
        self.max_meta_bytes = limit;
        self
    }

    pub fn broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }
}
