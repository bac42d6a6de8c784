#[derive(Debug, Clone)]
pub struct Config {
    /// Number of relationships a node's chain may reach before the next
    /// insert converts the node to the dense representation.
    pub dense_node_threshold: u32,
    /// Whether ids reserved by created records are returned to the store
    /// allocators when the transaction rolls back.
    pub free_ids_during_rollback: bool,
    /// Capacity of the default node record cache.
    pub node_cache_size: usize,
    /// Capacity of the default relationship record cache.
    pub relationship_cache_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dense_node_threshold: 50,
            free_ids_during_rollback: true,
            node_cache_size: 10_000,
            relationship_cache_size: 100_000,
        }
    }
}

impl Config {
    /// Configuration with a small dense-node threshold, useful for exercising
    /// the group-chain paths without creating thousands of relationships.
    pub fn with_dense_threshold(threshold: u32) -> Self {
        Self {
            dense_node_threshold: threshold,
            ..Self::default()
        }
    }
}
