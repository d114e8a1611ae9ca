use serde::{Deserialize, Serialize};

use crate::common::{Handle, MapConfig};
use crate::error::Result;

/// Reference to a stored key or value object.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectRef {
    pub handle: Handle,
    /// True when the referenced object is a box the map allocated and owns;
    /// owned boxes are destroyed when the entry releases them. Managed
    /// objects (`owned == false`) belong to the caller and are never
    /// destroyed by the map.
    pub owned: bool,
}

/// A single key/value binding in a leaf bucket chain.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Mixed hash of the key, cached so routing and bucket scans never have
    /// to resolve the key object.
    pub hash: u32,
    pub key: ObjectRef,
    pub value: ObjectRef,
}

/// Tuning parameters fixed at map construction and copied into every node,
/// so structural decisions never re-read the root.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct NodeParams {
    /// Bucket table width of each leaf; always a power of two.
    pub leaf_capacity: u32,
    pub split_factor: f32,
    pub merge_factor: f32,
    /// A leaf splits when `count` reaches this.
    pub split_threshold: u32,
    /// A leaf asks its parent to merge when `count` drops below this.
    pub merge_threshold: u32,
    pub min_concurrency: u32,
    /// Leaves never sit above this depth once construction finishes.
    pub min_depth: u8,
}

impl NodeParams {
    /// Derive the per-node parameters from a validated configuration.
    pub fn from_config(config: &MapConfig) -> NodeParams {
        let capacity = config.normalized_capacity();
        let split_threshold = (capacity as f32 * config.split_factor) as u32;
        let merge_threshold = if config.legacy_merge_threshold {
            ((capacity as f32 * config.split_factor) as u32)
                .min(split_threshold.saturating_sub(1))
        } else {
            (capacity as f32 * config.merge_factor) as u32
        };
        NodeParams {
            leaf_capacity: capacity,
            split_factor: config.split_factor,
            merge_factor: config.merge_factor,
            split_threshold,
            merge_threshold,
            min_concurrency: config.min_concurrency,
            min_depth: config.min_depth(),
        }
    }
}

/// Body of a node. Leaves hold all the data; internal nodes only route.
/// The two states are disjoint by construction: a node is never both.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum NodeBody {
    Leaf {
        /// Entry chains; the chain for a hash lives at
        /// `bucket_index(hash, buckets.len())`.
        buckets: Vec<Vec<Entry>>,
        /// Live entries in this leaf, chained entries included.
        count: u32,
        /// Adjacent leaves in left-to-right trie order. The leftmost leaf has
        /// no left sibling, the rightmost no right sibling.
        left_sibling: Option<Handle>,
        right_sibling: Option<Handle>,
    },
    Internal {
        left_child: Handle,
        right_child: Handle,
    },
}

/// A trie node as persisted in the store. Each node is an independently
/// stored object; all inter-node links are durable handles, never owning
/// references, which is what lets sibling and parent pointers form cycles.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Node {
    /// Absent only at the root.
    pub parent: Option<Handle>,
    /// Distance from the root; bounded by [`crate::common::MAX_DEPTH`].
    pub depth: u8,
    pub params: NodeParams,
    pub body: NodeBody,
}

impl Node {
    /// Creates an empty leaf with the given header.
    pub fn new_leaf(parent: Option<Handle>, depth: u8, params: NodeParams) -> Node {
        Node {
            parent,
            depth,
            params,
            body: NodeBody::Leaf {
                buckets: vec![Vec::new(); params.leaf_capacity as usize],
                count: 0,
                left_sibling: None,
                right_sibling: None,
            },
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.body, NodeBody::Leaf { .. })
    }

    /// Encodes the node for storage.
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(Into::into)
    }

    /// Decodes a node from stored bytes. The leaf count is recomputed from
    /// the bucket chains so chained entries always count toward leaf size,
    /// whatever the writer recorded.
    pub fn decode(bytes: &[u8]) -> Result<Node> {
        let mut node: Node = bincode::deserialize(bytes)?;
        if let NodeBody::Leaf { buckets, count, .. } = &mut node.body {
            let live = buckets.iter().map(|chain| chain.len() as u32).sum();
            if *count != live {
                log::warn!(
                    "leaf count {} disagrees with {} chained entries; using the chains",
                    count,
                    live
                );
                *count = live;
            }
        }
        Ok(node)
    }
}

/// Bucket index for a mixed hash in a table of `buckets` chains.
/// `buckets` must be a power of two.
pub fn bucket_index(hash: u32, buckets: usize) -> usize {
    hash as usize & (buckets - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> NodeParams {
        NodeParams::from_config(&MapConfig::default())
    }

    fn entry(hash: u32) -> Entry {
        Entry {
            hash,
            key: ObjectRef {
                handle: Handle::from_raw(100 + hash as u64),
                owned: true,
            },
            value: ObjectRef {
                handle: Handle::from_raw(200 + hash as u64),
                owned: true,
            },
        }
    }

    #[test]
    fn capacity_is_normalized_to_power_of_two() {
        let config = MapConfig {
            leaf_capacity: 100,
            ..MapConfig::default()
        };
        assert_eq!(NodeParams::from_config(&config).leaf_capacity, 128);
    }

    #[test]
    fn merge_threshold_derivations() {
        let config = MapConfig {
            leaf_capacity: 4,
            split_factor: 1.0,
            merge_factor: 0.25,
            ..MapConfig::default()
        };
        let corrected = NodeParams::from_config(&config);
        assert_eq!(corrected.split_threshold, 4);
        assert_eq!(corrected.merge_threshold, 1);

        let legacy = NodeParams::from_config(&MapConfig {
            legacy_merge_threshold: true,
            ..config
        });
        assert_eq!(legacy.merge_threshold, 3);
    }

    #[test]
    fn decode_recounts_chained_entries() {
        let mut node = Node::new_leaf(None, 0, params());
        if let NodeBody::Leaf { buckets, count, .. } = &mut node.body {
            buckets[0].push(entry(0));
            buckets[0].push(entry(128));
            buckets[3].push(entry(3));
            // Simulate a writer that recorded a stale size.
            *count = 1;
        }
        let decoded = Node::decode(&node.encode().unwrap()).unwrap();
        match decoded.body {
            NodeBody::Leaf { count, .. } => assert_eq!(count, 3),
            NodeBody::Internal { .. } => panic!("leaf expected"),
        }
    }
}
