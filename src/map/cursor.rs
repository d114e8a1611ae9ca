use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::common::{Handle, MAX_DEPTH};
use crate::error::{MapError, Result};
use crate::node::{Entry, NodeBody};
use crate::store::ObjectStore;

use super::io;

/// Traversal over the entries of a map, leftmost leaf first.
///
/// A cursor holds only durable positions: a leaf handle plus bucket and
/// chain offsets. Every step re-resolves the leaf through the store and
/// follows whatever sibling chain currently exists, so concurrent mutation
/// of the map never invalidates a cursor; mutations behind or ahead of its
/// position may or may not be observed. No ordering is guaranteed beyond
/// "all entries of a leaf precede all entries of the next leaf".
#[derive(Debug)]
pub struct Cursor<S: ObjectStore> {
    store: Arc<S>,
    leaf: Option<Handle>,
    /// Parent of the current leaf, remembered so a leaf merged away between
    /// steps can be resumed from the node that absorbed its entries.
    parent: Option<Handle>,
    bucket: usize,
    offset: usize,
}

impl<S: ObjectStore> Cursor<S> {
    /// Positions a new cursor before the first entry of the leftmost leaf.
    pub(super) async fn at_leftmost(
        store: Arc<S>,
        txn: &mut S::Txn,
        root: Handle,
    ) -> Result<Cursor<S>> {
        let (leaf, node) = super::core_logic::leftmost_leaf(&*store, txn, root).await?;
        Ok(Cursor {
            store,
            leaf: Some(leaf),
            parent: node.parent,
            bucket: 0,
            offset: 0,
        })
    }

    /// Advance to the next entry, or `None` once the rightmost leaf is
    /// exhausted.
    pub async fn next_entry(&mut self, txn: &mut S::Txn) -> Result<Option<Entry>> {
        loop {
            let Some(mut handle) = self.leaf else {
                return Ok(None);
            };
            let mut node = match io::load_node(&*self.store, txn, handle).await {
                Ok(node) => node,
                // The leaf was merged away underneath us; its entries moved
                // up into the parent, so resume there. With no parent left
                // either, the traversal just ends.
                Err(MapError::ObjectNotFound(_)) => match self.parent.take() {
                    Some(p) => {
                        self.leaf = Some(p);
                        self.bucket = 0;
                        self.offset = 0;
                        continue;
                    }
                    None => {
                        self.leaf = None;
                        return Ok(None);
                    }
                },
                Err(e) => return Err(e),
            };
            // The leaf may have split since the last step. Its entries now
            // live under the subtree that replaced it, so continue from that
            // subtree's leftmost leaf.
            let mut hops = 0u8;
            while let NodeBody::Internal { left_child, .. } = node.body {
                handle = left_child;
                node = io::load_node(&*self.store, txn, handle).await?;
                self.leaf = Some(handle);
                self.bucket = 0;
                self.offset = 0;
                hops += 1;
                if hops > MAX_DEPTH {
                    return Err(MapError::Internal(
                        "trie deeper than the depth bound".to_string(),
                    ));
                }
            }
            self.parent = node.parent;
            let NodeBody::Leaf {
                buckets,
                count,
                right_sibling,
                ..
            } = node.body
            else {
                unreachable!()
            };
            if count > 0 {
                while self.bucket < buckets.len() {
                    let chain = &buckets[self.bucket];
                    if self.offset < chain.len() {
                        let entry = chain[self.offset].clone();
                        self.offset += 1;
                        return Ok(Some(entry));
                    }
                    self.bucket += 1;
                    self.offset = 0;
                }
            }
            self.leaf = right_sibling;
            self.bucket = 0;
            self.offset = 0;
        }
    }

    /// Removal through a cursor is not supported; remove entries through the
    /// map, inside the same transaction, instead.
    pub fn remove_current(&self) -> Result<()> {
        Err(MapError::Unsupported("cursor removal".to_string()))
    }
}

/// Live view over the `(key, value)` pairs of a map.
#[derive(Debug)]
pub struct Entries<K, V, S: ObjectStore> {
    cursor: Cursor<S>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, S> Entries<K, V, S>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
    S: ObjectStore,
{
    pub(super) fn new(cursor: Cursor<S>) -> Self {
        Entries {
            cursor,
            _marker: PhantomData,
        }
    }

    pub async fn next(&mut self, txn: &mut S::Txn) -> Result<Option<(K, V)>> {
        match self.cursor.next_entry(txn).await? {
            Some(entry) => {
                let key = io::read_object(&*self.cursor.store, txn, entry.key.handle).await?;
                let value = io::read_object(&*self.cursor.store, txn, entry.value.handle).await?;
                Ok(Some((key, value)))
            }
            None => Ok(None),
        }
    }
}

/// Live view over the keys of a map.
#[derive(Debug)]
pub struct Keys<K, S: ObjectStore> {
    cursor: Cursor<S>,
    _marker: PhantomData<fn() -> K>,
}

impl<K, S> Keys<K, S>
where
    K: DeserializeOwned,
    S: ObjectStore,
{
    pub(super) fn new(cursor: Cursor<S>) -> Self {
        Keys {
            cursor,
            _marker: PhantomData,
        }
    }

    pub async fn next(&mut self, txn: &mut S::Txn) -> Result<Option<K>> {
        match self.cursor.next_entry(txn).await? {
            Some(entry) => {
                let key = io::read_object(&*self.cursor.store, txn, entry.key.handle).await?;
                Ok(Some(key))
            }
            None => Ok(None),
        }
    }
}

/// Live view over the values of a map.
#[derive(Debug)]
pub struct Values<V, S: ObjectStore> {
    cursor: Cursor<S>,
    _marker: PhantomData<fn() -> V>,
}

impl<V, S> Values<V, S>
where
    V: DeserializeOwned,
    S: ObjectStore,
{
    pub(super) fn new(cursor: Cursor<S>) -> Self {
        Values {
            cursor,
            _marker: PhantomData,
        }
    }

    pub async fn next(&mut self, txn: &mut S::Txn) -> Result<Option<V>> {
        match self.cursor.next_entry(txn).await? {
            Some(entry) => {
                let value = io::read_object(&*self.cursor.store, txn, entry.value.handle).await?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}
