//! World construction configuration.

/// Tunables fixed at world construction: a plain, cheaply-cloned config
/// struct rather than global statics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldConfig {
    /// Byte budget used to size a chunk's unmanaged-instance columns.
    pub chunk_byte_budget: usize,
    /// Initial byte capacity of each command-buffer lane.
    pub lane_byte_capacity: usize,
    /// Ready-queue depth below which a chunk group proactively provisions
    /// an extra chunk on its next slow-path allocation.
    pub provision_threshold: usize,
    /// Bounded retry count for lock-free fast-path CAS loops before a
    /// caller falls back to the slow (mutex-guarded) path.
    pub spin_iterations: u32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            chunk_byte_budget: 16 * 1024,
            lane_byte_capacity: 64 * 1024,
            provision_threshold: 2,
            spin_iterations: 32,
        }
    }
}

impl WorldConfig {
    /// Start a builder seeded with the defaults.
    pub fn builder() -> WorldConfigBuilder {
        WorldConfigBuilder(Self::default())
    }
}

/// Chained-setter builder for [`WorldConfig`].
#[derive(Debug, Clone, Copy)]
pub struct WorldConfigBuilder(WorldConfig);

impl WorldConfigBuilder {
    pub fn chunk_byte_budget(mut self, bytes: usize) -> Self {
        self.0.chunk_byte_budget = bytes;
        self
    }

    pub fn lane_byte_capacity(mut self, bytes: usize) -> Self {
        self.0.lane_byte_capacity = bytes;
        self
    }

    pub fn provision_threshold(mut self, depth: usize) -> Self {
        self.0.provision_threshold = depth;
        self
    }

    pub fn spin_iterations(mut self, spins: u32) -> Self {
        self.0.spin_iterations = spins;
        self
    }

    pub fn build(self) -> WorldConfig {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = WorldConfig::default();
        assert_eq!(cfg.chunk_byte_budget, 16 * 1024);
        assert_eq!(cfg.lane_byte_capacity, 64 * 1024);
        assert_eq!(cfg.provision_threshold, 2);
        assert_eq!(cfg.spin_iterations, 32);
    }

    #[test]
    fn builder_overrides_fields() {
        let cfg = WorldConfig::builder().chunk_byte_budget(4096).build();
        assert_eq!(cfg.chunk_byte_budget, 4096);
        assert_eq!(cfg.lane_byte_capacity, 64 * 1024);
    }
}
