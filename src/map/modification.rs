//! Structural reshaping of the trie: leaf splits, parent merges, the
//! breadth-first pre-split at construction, and full teardown.

use std::collections::VecDeque;

use async_recursion::async_recursion;

use crate::common::Handle;
use crate::error::{MapError, Result};
use crate::node::{bucket_index, Entry, Node, NodeBody};
use crate::store::ObjectStore;

use super::io;

/// Split a leaf into two children at `depth + 1` and turn it internal.
///
/// Entries move to the left child when the next prefix bit of their hash is
/// set, to the right child otherwise; redistribution never re-splits. The
/// sibling chain is rewired so the two children take the leaf's place, and
/// the former neighbors point inward at them.
pub(super) async fn split<S: ObjectStore>(
    store: &S,
    txn: &mut S::Txn,
    handle: Handle,
    mut node: Node,
) -> Result<(Handle, Handle)> {
    let NodeBody::Leaf {
        buckets,
        count,
        left_sibling,
        right_sibling,
    } = node.body
    else {
        return Err(MapError::Internal("split target is not a leaf".to_string()));
    };
    log::debug!(
        "splitting leaf {:?} at depth {} with {} entries",
        handle,
        node.depth,
        count
    );

    let params = node.params;
    let width = params.leaf_capacity as usize;
    let mut left = Node::new_leaf(Some(handle), node.depth + 1, params);
    let mut right = Node::new_leaf(Some(handle), node.depth + 1, params);
    {
        let NodeBody::Leaf {
            buckets: lb,
            count: lc,
            left_sibling: lls,
            ..
        } = &mut left.body
        else {
            unreachable!()
        };
        let NodeBody::Leaf {
            buckets: rb,
            count: rc,
            right_sibling: rrs,
            ..
        } = &mut right.body
        else {
            unreachable!()
        };
        *lls = left_sibling;
        *rrs = right_sibling;
        for chain in buckets {
            for entry in chain {
                let (target, target_count) = if (entry.hash << node.depth) & 0x8000_0000 != 0 {
                    (&mut *lb, &mut *lc)
                } else {
                    (&mut *rb, &mut *rc)
                };
                target[bucket_index(entry.hash, width)].insert(0, entry);
                *target_count += 1;
            }
        }
    }

    let left_handle = io::create_node(store, txn, &left).await?;
    if let NodeBody::Leaf { left_sibling, .. } = &mut right.body {
        *left_sibling = Some(left_handle);
    }
    let right_handle = io::create_node(store, txn, &right).await?;
    if let NodeBody::Leaf { right_sibling, .. } = &mut left.body {
        *right_sibling = Some(right_handle);
    }
    store.mark_for_update(txn, left_handle).await?;
    io::write_node(store, txn, left_handle, &left).await?;

    node.body = NodeBody::Internal {
        left_child: left_handle,
        right_child: right_handle,
    };
    store.mark_for_update(txn, handle).await?;
    io::write_node(store, txn, handle, &node).await?;

    if let Some(neighbor) = left_sibling {
        set_right_sibling(store, txn, neighbor, Some(left_handle)).await?;
    }
    if let Some(neighbor) = right_sibling {
        set_left_sibling(store, txn, neighbor, Some(right_handle)).await?;
    }
    Ok((left_handle, right_handle))
}

/// Collapse the two children of `parent` back into it, making it a leaf.
///
/// Aborts (returning `false`) unless both children are leaves and their
/// combined population is small enough that the merged leaf would not split
/// straight away. Children are removed from the store on success.
pub(super) async fn merge<S: ObjectStore>(
    store: &S,
    txn: &mut S::Txn,
    parent_handle: Handle,
) -> Result<bool> {
    let mut parent = io::load_node(store, txn, parent_handle).await?;
    let NodeBody::Internal {
        left_child,
        right_child,
    } = parent.body
    else {
        return Ok(false);
    };

    let left = io::load_node(store, txn, left_child).await?;
    let right = io::load_node(store, txn, right_child).await?;
    let (
        NodeBody::Leaf {
            buckets: left_buckets,
            count: left_count,
            left_sibling: outer_left,
            ..
        },
        NodeBody::Leaf {
            buckets: right_buckets,
            count: right_count,
            right_sibling: outer_right,
            ..
        },
    ) = (left.body, right.body)
    else {
        // Only same-level leaves merge.
        return Ok(false);
    };
    if (left_count + right_count) / 2 > parent.params.split_threshold {
        return Ok(false);
    }

    let width = parent.params.leaf_capacity as usize;
    let mut buckets = vec![Vec::new(); width];
    let mut count = 0u32;
    for chain in left_buckets.into_iter().chain(right_buckets) {
        for entry in chain {
            buckets[bucket_index(entry.hash, width)].insert(0, entry);
            count += 1;
        }
    }
    parent.body = NodeBody::Leaf {
        buckets,
        count,
        left_sibling: outer_left,
        right_sibling: outer_right,
    };
    store.mark_for_update(txn, parent_handle).await?;
    io::write_node(store, txn, parent_handle, &parent).await?;

    if let Some(neighbor) = outer_left {
        set_right_sibling(store, txn, neighbor, Some(parent_handle)).await?;
    }
    if let Some(neighbor) = outer_right {
        set_left_sibling(store, txn, neighbor, Some(parent_handle)).await?;
    }
    io::remove_node(store, txn, left_child).await?;
    io::remove_node(store, txn, right_child).await?;
    log::debug!(
        "merged children of {:?}; leaf holds {} entries at depth {}",
        parent_handle,
        count,
        parent.depth
    );
    Ok(true)
}

/// Pre-split the trie until every leaf sits at `min_depth`.
///
/// The walk is breadth-first on purpose: splitting a whole level before
/// descending keeps the sibling chain consistent while it is being built.
pub(super) async fn ensure_min_depth<S: ObjectStore>(
    store: &S,
    txn: &mut S::Txn,
    root: Handle,
    min_depth: u8,
) -> Result<()> {
    if min_depth == 0 {
        return Ok(());
    }
    let mut queue = VecDeque::from([root]);
    while let Some(handle) = queue.pop_front() {
        let node = io::load_node(store, txn, handle).await?;
        if node.depth >= min_depth {
            continue;
        }
        match node.body {
            NodeBody::Leaf { .. } => {
                let (left, right) = split(store, txn, handle, node).await?;
                queue.push_back(left);
                queue.push_back(right);
            }
            NodeBody::Internal {
                left_child,
                right_child,
            } => {
                queue.push_back(left_child);
                queue.push_back(right_child);
            }
        }
    }
    Ok(())
}

/// Empty the map: destroy every owned box, remove every non-root node from
/// the store, and repair the root to a singleton empty leaf.
pub(super) async fn clear<S: ObjectStore>(
    store: &S,
    txn: &mut S::Txn,
    root: Handle,
) -> Result<()> {
    let mut node = io::load_node(store, txn, root).await?;
    store.mark_for_update(txn, root).await?;
    match node.body {
        NodeBody::Leaf { buckets, .. } => {
            release_entries(store, txn, buckets).await?;
        }
        NodeBody::Internal {
            left_child,
            right_child,
        } => {
            purge_subtree(store, txn, left_child).await?;
            purge_subtree(store, txn, right_child).await?;
        }
    }
    node.body = NodeBody::Leaf {
        buckets: vec![Vec::new(); node.params.leaf_capacity as usize],
        count: 0,
        left_sibling: None,
        right_sibling: None,
    };
    io::write_node(store, txn, root, &node).await
}

#[async_recursion]
async fn purge_subtree<S: ObjectStore>(
    store: &S,
    txn: &mut S::Txn,
    handle: Handle,
) -> Result<()> {
    let node = io::load_node(store, txn, handle).await?;
    match node.body {
        NodeBody::Leaf { buckets, .. } => {
            release_entries(store, txn, buckets).await?;
        }
        NodeBody::Internal {
            left_child,
            right_child,
        } => {
            purge_subtree(store, txn, left_child).await?;
            purge_subtree(store, txn, right_child).await?;
        }
    }
    io::remove_node(store, txn, handle).await
}

async fn release_entries<S: ObjectStore>(
    store: &S,
    txn: &mut S::Txn,
    buckets: Vec<Vec<Entry>>,
) -> Result<()> {
    for chain in buckets {
        for entry in chain {
            io::release_ref(store, txn, entry.key).await?;
            io::release_ref(store, txn, entry.value).await?;
        }
    }
    Ok(())
}

async fn set_left_sibling<S: ObjectStore>(
    store: &S,
    txn: &mut S::Txn,
    handle: Handle,
    sibling: Option<Handle>,
) -> Result<()> {
    let mut node = io::load_node(store, txn, handle).await?;
    let NodeBody::Leaf { left_sibling, .. } = &mut node.body else {
        return Err(MapError::Internal(
            "sibling link points at an internal node".to_string(),
        ));
    };
    *left_sibling = sibling;
    store.mark_for_update(txn, handle).await?;
    io::write_node(store, txn, handle, &node).await
}

async fn set_right_sibling<S: ObjectStore>(
    store: &S,
    txn: &mut S::Txn,
    handle: Handle,
    sibling: Option<Handle>,
) -> Result<()> {
    let mut node = io::load_node(store, txn, handle).await?;
    let NodeBody::Leaf { right_sibling, .. } = &mut node.body else {
        return Err(MapError::Internal(
            "sibling link points at an internal node".to_string(),
        ));
    };
    *right_sibling = sibling;
    store.mark_for_update(txn, handle).await?;
    io::write_node(store, txn, handle, &node).await
}
