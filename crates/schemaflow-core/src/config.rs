//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the metadata store and the physical workspaces.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the metadata database directory.
    pub data_path: PathBuf,

    /// Temporary metadata database (deleted on drop).
    pub temporary: bool,

    /// Page cache capacity in bytes.
    pub cache_capacity: u64,

    /// Flush interval in milliseconds. None means flush on every write.
    pub flush_every_ms: Option<u64>,

    /// Directory holding one SQLite file per tenant. None keeps workspaces in memory.
    pub workspace_path: Option<PathBuf>,

    /// Drain the tenant's queue right after every metadata write.
    pub drain_on_write: bool,

    /// How long a DDL statement waits on a locked workspace.
    pub busy_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("./schemaflow_data"),
            temporary: false,
            cache_capacity: 256 * 1024 * 1024, // 256MB
            flush_every_ms: Some(500),
            workspace_path: Some(PathBuf::from("./schemaflow_data/workspaces")),
            drain_on_write: false,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    /// Create a configuration storing everything under `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let data_path = path.into();
        Self {
            workspace_path: Some(data_path.join("workspaces")),
            data_path,
            ..Default::default()
        }
    }

    /// Create a temporary configuration with in-memory workspaces, for testing.
    pub fn temporary() -> Self {
        Self {
            data_path: PathBuf::from(""),
            temporary: true,
            workspace_path: None,
            ..Default::default()
        }
    }

    /// Set the workspace directory.
    pub fn with_workspace_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.workspace_path = Some(path.into());
        self
    }

    /// Keep workspaces in memory.
    pub fn with_in_memory_workspaces(mut self) -> Self {
        self.workspace_path = None;
        self
    }

    /// Enable or disable draining after each metadata write.
    pub fn with_drain_on_write(mut self, enabled: bool) -> Self {
        self.drain_on_write = enabled;
        self
    }

    /// Set the busy timeout.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Set the flush interval.
    pub fn with_flush_every_ms(mut self, ms: Option<u64>) -> Self {
        self.flush_every_ms = ms;
        self
    }

    /// Convert to sled configuration.
    pub(crate) fn to_sled_config(&self) -> sled::Config {
        let mut config = sled::Config::new()
            .cache_capacity(self.cache_capacity)
            .use_compression(true);

        if self.temporary {
            config = config.temporary(true);
        } else {
            config = config.path(&self.data_path);
        }

        if let Some(ms) = self.flush_every_ms {
            config = config.flush_every_ms(Some(ms));
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_places_workspaces_under_data_path() {
        let config = EngineConfig::new("/var/lib/schemaflow");
        assert_eq!(config.data_path, PathBuf::from("/var/lib/schemaflow"));
        assert_eq!(
            config.workspace_path,
            Some(PathBuf::from("/var/lib/schemaflow/workspaces"))
        );
        assert!(!config.temporary);
    }

    #[test]
    fn test_temporary_is_fully_in_memory() {
        let config = EngineConfig::temporary();
        assert!(config.temporary);
        assert!(config.workspace_path.is_none());
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::temporary()
            .with_drain_on_write(true)
            .with_busy_timeout(Duration::from_millis(250))
            .with_workspace_path("/tmp/ws");
        assert!(config.drain_on_write);
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        assert_eq!(config.workspace_path, Some(PathBuf::from("/tmp/ws")));
    }
}
