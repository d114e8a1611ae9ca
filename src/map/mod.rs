//! A concurrent hash map persisted as a binary prefix trie.
//!
//! Internal nodes only route; fixed-capacity hash-bucket leaves hold all the
//! data, linked to their neighbors so iteration is a linear sweep. Every
//! node is an independently stored object, so a typical mutation dirties a
//! single leaf and writers touching disjoint leaves proceed in parallel
//! under the store's optimistic concurrency.

pub mod cursor;

mod core_logic;
mod io;
mod modification;
mod types;

pub use cursor::{Cursor, Entries, Keys, Values};
pub use types::Stored;

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::{mix, Handle, HashCode, MapConfig, MAX_DEPTH};
use crate::error::{MapError, Result};
use crate::node::{bucket_index, Entry, Node, NodeBody, NodeParams, ObjectRef};
use crate::store::ObjectStore;

/// A hash map whose trie nodes live as independent objects in an external
/// transactional store.
///
/// The map itself is a lightweight façade: a root handle plus tuning
/// parameters. All state lives behind the store, and every operation runs
/// inside a caller-supplied transaction, so two maps opened on the same root
/// handle are the same map. Aborted transactions leave no trace; operations
/// are plain read-modify-write on a handful of objects and can simply be
/// retried.
pub struct HashTrieMap<K, V, S: ObjectStore> {
    store: Arc<S>,
    root: Handle,
    config: MapConfig,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, S: ObjectStore> fmt::Debug for HashTrieMap<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashTrieMap")
            .field("root", &self.root)
            .field("config", &self.config)
            .finish()
    }
}

impl<K, V, S> HashTrieMap<K, V, S>
where
    K: HashCode + PartialEq + Serialize + DeserializeOwned + Send + Sync,
    V: PartialEq + Serialize + DeserializeOwned + Send + Sync,
    S: ObjectStore,
{
    /// Creates a new empty map in the store.
    ///
    /// The trie is eagerly split, breadth-first, to the depth implied by
    /// `min_concurrency`, and never contracts below it.
    pub async fn new(store: Arc<S>, txn: &mut S::Txn, config: MapConfig) -> Result<Self> {
        config.validate()?;
        let params = NodeParams::from_config(&config);
        let root = io::create_node(&*store, txn, &Node::new_leaf(None, 0, params)).await?;
        modification::ensure_min_depth(&*store, txn, root, params.min_depth).await?;
        Ok(HashTrieMap {
            store,
            root,
            config,
            _marker: PhantomData,
        })
    }

    /// Reopens a map from its durable root handle, e.g. after a restart.
    pub async fn open(store: Arc<S>, txn: &mut S::Txn, root: Handle) -> Result<Self> {
        let node = io::load_node(&*store, txn, root).await?;
        let p = node.params;
        let config = MapConfig {
            min_concurrency: p.min_concurrency,
            split_factor: p.split_factor,
            merge_factor: p.merge_factor,
            leaf_capacity: p.leaf_capacity,
            legacy_merge_threshold: p.merge_threshold
                != (p.leaf_capacity as f32 * p.merge_factor) as u32,
        };
        Ok(HashTrieMap {
            store,
            root,
            config,
            _marker: PhantomData,
        })
    }

    /// The durable handle of the root node. Store it to reopen the map.
    pub fn root_handle(&self) -> Handle {
        self.root
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    /// Looks up the value bound to `key`. Reads only the nodes on the route
    /// and dirties nothing.
    pub async fn get(&self, txn: &mut S::Txn, key: &K) -> Result<Option<V>> {
        let hash = mix(key.hash_code());
        let (_, node) = core_logic::lookup_leaf(&*self.store, txn, self.root, hash).await?;
        let NodeBody::Leaf { buckets, .. } = &node.body else {
            return Err(MapError::Internal("router returned a non-leaf".to_string()));
        };
        for entry in &buckets[bucket_index(hash, buckets.len())] {
            if entry.hash != hash {
                continue;
            }
            let stored: K = io::read_object(&*self.store, txn, entry.key.handle).await?;
            if stored == *key {
                let value = io::read_object(&*self.store, txn, entry.value.handle).await?;
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    pub async fn contains_key(&self, txn: &mut S::Txn, key: &K) -> Result<bool> {
        let hash = mix(key.hash_code());
        let (_, node) = core_logic::lookup_leaf(&*self.store, txn, self.root, hash).await?;
        let NodeBody::Leaf { buckets, .. } = &node.body else {
            return Err(MapError::Internal("router returned a non-leaf".to_string()));
        };
        for entry in &buckets[bucket_index(hash, buckets.len())] {
            if entry.hash != hash {
                continue;
            }
            let stored: K = io::read_object(&*self.store, txn, entry.key.handle).await?;
            if stored == *key {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Binds `key` to `value` and returns the previously bound value, if
    /// any. Plain keys and values are boxed into store objects the map owns;
    /// pass [`Stored::Managed`] to bind an object the caller manages.
    ///
    /// A value box is reused when a plain value overwrites a plain value,
    /// and destroyed when a managed reference overwrites it. Dirties exactly
    /// one leaf unless the insert pushes the leaf over its split threshold.
    pub async fn put(
        &self,
        txn: &mut S::Txn,
        key: impl Into<Stored<K>>,
        value: impl Into<Stored<V>>,
    ) -> Result<Option<V>> {
        let (probe, managed_key) = match key.into() {
            Stored::Value(k) => (k, None),
            Stored::Managed(h) => (io::read_object(&*self.store, txn, h).await?, Some(h)),
        };
        let value = value.into();
        let hash = mix(probe.hash_code());
        let (leaf_handle, mut leaf) =
            core_logic::lookup_leaf(&*self.store, txn, self.root, hash).await?;
        self.store.mark_for_update(txn, leaf_handle).await?;

        let depth = leaf.depth;
        let params = leaf.params;
        let NodeBody::Leaf { buckets, count, .. } = &mut leaf.body else {
            return Err(MapError::Internal("router returned a non-leaf".to_string()));
        };
        let idx = bucket_index(hash, buckets.len());

        let mut found = None;
        for (i, entry) in buckets[idx].iter().enumerate() {
            if entry.hash != hash {
                continue;
            }
            if managed_key == Some(entry.key.handle) {
                found = Some(i);
                break;
            }
            let stored: K = io::read_object(&*self.store, txn, entry.key.handle).await?;
            if stored == probe {
                found = Some(i);
                break;
            }
        }

        if let Some(i) = found {
            let old_ref = buckets[idx][i].value;
            let previous: V = io::read_object(&*self.store, txn, old_ref.handle).await?;
            let new_ref = match value {
                Stored::Managed(h) => {
                    if old_ref.owned {
                        io::release_ref(&*self.store, txn, old_ref).await?;
                    }
                    ObjectRef {
                        handle: h,
                        owned: false,
                    }
                }
                Stored::Value(v) => {
                    if old_ref.owned {
                        io::rewrite_box(&*self.store, txn, old_ref.handle, &v).await?;
                        old_ref
                    } else {
                        ObjectRef {
                            handle: io::new_box(&*self.store, txn, &v).await?,
                            owned: true,
                        }
                    }
                }
            };
            buckets[idx][i].value = new_ref;
            io::write_node(&*self.store, txn, leaf_handle, &leaf).await?;
            return Ok(Some(previous));
        }

        let key_ref = match managed_key {
            Some(h) => ObjectRef {
                handle: h,
                owned: false,
            },
            None => ObjectRef {
                handle: io::new_box(&*self.store, txn, &probe).await?,
                owned: true,
            },
        };
        let value_ref = match value {
            Stored::Managed(h) => ObjectRef {
                handle: h,
                owned: false,
            },
            Stored::Value(v) => ObjectRef {
                handle: io::new_box(&*self.store, txn, &v).await?,
                owned: true,
            },
        };
        buckets[idx].insert(
            0,
            Entry {
                hash,
                key: key_ref,
                value: value_ref,
            },
        );
        *count += 1;
        // A leaf at the depth bound can never split again; its chains just
        // grow.
        if *count >= params.split_threshold && depth < MAX_DEPTH {
            modification::split(&*self.store, txn, leaf_handle, leaf).await?;
        } else {
            io::write_node(&*self.store, txn, leaf_handle, &leaf).await?;
        }
        Ok(None)
    }

    /// Unbinds `key`, returning the value it was bound to. Boxes owned by
    /// the entry are destroyed; managed objects are left to their owner.
    pub async fn remove(&self, txn: &mut S::Txn, key: &K) -> Result<Option<V>> {
        let hash = mix(key.hash_code());
        let (leaf_handle, mut leaf) =
            core_logic::lookup_leaf(&*self.store, txn, self.root, hash).await?;
        let depth = leaf.depth;
        let params = leaf.params;
        let parent = leaf.parent;
        let NodeBody::Leaf { buckets, count, .. } = &mut leaf.body else {
            return Err(MapError::Internal("router returned a non-leaf".to_string()));
        };
        let idx = bucket_index(hash, buckets.len());

        let mut found = None;
        for (i, entry) in buckets[idx].iter().enumerate() {
            if entry.hash != hash {
                continue;
            }
            let stored: K = io::read_object(&*self.store, txn, entry.key.handle).await?;
            if stored == *key {
                found = Some(i);
                break;
            }
        }
        let Some(i) = found else {
            return Ok(None);
        };

        self.store.mark_for_update(txn, leaf_handle).await?;
        let entry = buckets[idx].remove(i);
        let previous: V = io::read_object(&*self.store, txn, entry.value.handle).await?;
        io::release_ref(&*self.store, txn, entry.key).await?;
        io::release_ref(&*self.store, txn, entry.value).await?;
        *count -= 1;
        let request_merge = *count < params.merge_threshold && depth > params.min_depth;
        io::write_node(&*self.store, txn, leaf_handle, &leaf).await?;

        // At most one merge per removal; contraction does not cascade up the
        // tree within a single call.
        if request_merge {
            if let Some(parent_handle) = parent {
                modification::merge(&*self.store, txn, parent_handle).await?;
            }
        }
        Ok(Some(previous))
    }

    /// Whether any entry is bound to a value equal to `value`. Sweeps the
    /// whole leaf chain.
    pub async fn contains_value(&self, txn: &mut S::Txn, value: &V) -> Result<bool> {
        let mut values = self.values(txn).await?;
        while let Some(candidate) = values.next(txn).await? {
            if candidate == *value {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Number of live entries. Walks every leaf, so the conflict footprint
    /// is the whole sibling chain; treat it as non-trivial.
    pub async fn size(&self, txn: &mut S::Txn) -> Result<u64> {
        let (_, mut node) = core_logic::leftmost_leaf(&*self.store, txn, self.root).await?;
        let mut total = 0u64;
        loop {
            let NodeBody::Leaf {
                count,
                right_sibling,
                ..
            } = node.body
            else {
                return Err(MapError::Internal(
                    "sibling chain reached a non-leaf".to_string(),
                ));
            };
            total += count as u64;
            match right_sibling {
                Some(next) => node = io::load_node(&*self.store, txn, next).await?,
                None => return Ok(total),
            }
        }
    }

    /// Whether the map holds no entries. Walks the sibling chain until the
    /// first non-empty leaf, so it is O(1) only when the root is a leaf.
    pub async fn is_empty(&self, txn: &mut S::Txn) -> Result<bool> {
        let (_, mut node) = core_logic::leftmost_leaf(&*self.store, txn, self.root).await?;
        loop {
            let NodeBody::Leaf {
                count,
                right_sibling,
                ..
            } = node.body
            else {
                return Err(MapError::Internal(
                    "sibling chain reached a non-leaf".to_string(),
                ));
            };
            if count > 0 {
                return Ok(false);
            }
            match right_sibling {
                Some(next) => node = io::load_node(&*self.store, txn, next).await?,
                None => return Ok(true),
            }
        }
    }

    /// Removes every entry, destroying all owned boxes and every non-root
    /// node. The root is repaired to a singleton empty leaf.
    pub async fn clear(&self, txn: &mut S::Txn) -> Result<()> {
        modification::clear(&*self.store, txn, self.root).await
    }

    /// Inserts every pair, boxing keys and values.
    pub async fn put_all<I>(&self, txn: &mut S::Txn, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in entries {
            self.put(txn, key, value).await?;
        }
        Ok(())
    }

    /// Copies every entry of `other` into this map.
    pub async fn put_all_from(&self, txn: &mut S::Txn, other: &Self) -> Result<()> {
        let mut entries = other.entries(txn).await?;
        while let Some((key, value)) = entries.next(txn).await? {
            self.put(txn, key, value).await?;
        }
        Ok(())
    }

    /// Live view over `(key, value)` pairs.
    pub async fn entries(&self, txn: &mut S::Txn) -> Result<Entries<K, V, S>> {
        let cursor = Cursor::at_leftmost(Arc::clone(&self.store), txn, self.root).await?;
        Ok(Entries::new(cursor))
    }

    /// Live view over keys.
    pub async fn keys(&self, txn: &mut S::Txn) -> Result<Keys<K, S>> {
        let cursor = Cursor::at_leftmost(Arc::clone(&self.store), txn, self.root).await?;
        Ok(Keys::new(cursor))
    }

    /// Live view over values.
    pub async fn values(&self, txn: &mut S::Txn) -> Result<Values<V, S>> {
        let cursor = Cursor::at_leftmost(Arc::clone(&self.store), txn, self.root).await?;
        Ok(Values::new(cursor))
    }

    /// All leaves in sibling-chain order; test-only introspection.
    #[cfg(test)]
    pub(crate) async fn leaves(&self, txn: &mut S::Txn) -> Result<Vec<(Handle, Node)>> {
        let (mut handle, mut node) = core_logic::leftmost_leaf(&*self.store, txn, self.root).await?;
        let mut out = Vec::new();
        loop {
            let NodeBody::Leaf { right_sibling, .. } = &node.body else {
                return Err(MapError::Internal(
                    "sibling chain reached a non-leaf".to_string(),
                ));
            };
            let next = *right_sibling;
            out.push((handle, node));
            match next {
                Some(n) => {
                    handle = n;
                    node = io::load_node(&*self.store, txn, n).await?;
                }
                None => return Ok(out),
            }
        }
    }
}
