//! The read-path spine: hash-prefix routing from the root to a leaf.

use crate::common::{Handle, MAX_DEPTH};
use crate::error::{MapError, Result};
use crate::node::{Node, NodeBody};
use crate::store::ObjectStore;

use super::io;

/// Descend from `root` to the leaf owning `hash`.
///
/// Each internal level consumes the high bit of the remaining hash: a 1
/// routes to the left child, a 0 to the right, and the hash shifts left by
/// one. Routing is O(depth) and reads only the nodes on the path, so it
/// dirties nothing.
pub(super) async fn lookup_leaf<S: ObjectStore>(
    store: &S,
    txn: &mut S::Txn,
    root: Handle,
    hash: u32,
) -> Result<(Handle, Node)> {
    let mut handle = root;
    let mut node = io::load_node(store, txn, handle).await?;
    let mut h = hash;
    for _ in 0..MAX_DEPTH {
        match node.body {
            NodeBody::Internal {
                left_child,
                right_child,
            } => {
                handle = if h & 0x8000_0000 != 0 {
                    left_child
                } else {
                    right_child
                };
                h <<= 1;
                node = io::load_node(store, txn, handle).await?;
            }
            NodeBody::Leaf { .. } => return Ok((handle, node)),
        }
    }
    if node.is_leaf() {
        Ok((handle, node))
    } else {
        Err(MapError::Internal(
            "trie deeper than the depth bound".to_string(),
        ))
    }
}

/// Descend `left_child` links until a leaf is reached. The result is the
/// head of the sibling chain when called on the root.
pub(super) async fn leftmost_leaf<S: ObjectStore>(
    store: &S,
    txn: &mut S::Txn,
    from: Handle,
) -> Result<(Handle, Node)> {
    let mut handle = from;
    let mut node = io::load_node(store, txn, handle).await?;
    for _ in 0..=MAX_DEPTH {
        match node.body {
            NodeBody::Internal { left_child, .. } => {
                handle = left_child;
                node = io::load_node(store, txn, handle).await?;
            }
            NodeBody::Leaf { .. } => return Ok((handle, node)),
        }
    }
    Err(MapError::Internal(
        "trie deeper than the depth bound".to_string(),
    ))
}
