//! Key to node routing shared by every multi-node store.

/// Index of the node owning `key` among `node_count` nodes.
///
/// CRC-32 of the key bytes, modulo the node count, so placement is stable across processes and
/// platforms. Returns 0 when there are no nodes; callers are expected to reject empty clusters
/// earlier.
pub fn node_index(key: &str, node_count: usize) -> usize {
    if node_count == 0 {
        return 0;
    }
    crc32fast::hash(key.as_bytes()) as usize % node_count
}
