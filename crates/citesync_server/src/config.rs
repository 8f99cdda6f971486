//! Server configuration.

/// Configuration for a sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Hard cap on the number of changes returned per pull, applied on
    /// top of whatever limit the client requests.
    pub max_pull_batch: u32,
    /// Number of stream positions a tombstone is kept beyond its
    /// creation before it becomes eligible for pruning.
    pub tombstone_retention: u64,
}

impl ServerConfig {
    /// Creates a configuration with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the pull batch cap.
    #[must_use]
    pub fn with_max_pull_batch(mut self, limit: u32) -> Self {
        self.max_pull_batch = limit;
        self
    }

    /// Sets the tombstone retention window.
    #[must_use]
    pub fn with_tombstone_retention(mut self, positions: u64) -> Self {
        self.tombstone_retention = positions;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_pull_batch: 500,
            tombstone_retention: 100_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = ServerConfig::new()
            .with_max_pull_batch(10)
            .with_tombstone_retention(50);
        assert_eq!(config.max_pull_batch, 10);
        assert_eq!(config.tombstone_retention, 50);
    }
}
