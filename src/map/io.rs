//! Thin helpers between the map and its object store: node round-trips and
//! box allocation, all bincode-encoded.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::Handle;
use crate::error::Result;
use crate::node::{Node, ObjectRef};
use crate::store::ObjectStore;

pub(super) async fn load_node<S: ObjectStore>(
    store: &S,
    txn: &mut S::Txn,
    handle: Handle,
) -> Result<Node> {
    let bytes = store.get(txn, handle).await?;
    Node::decode(&bytes)
}

pub(super) async fn create_node<S: ObjectStore>(
    store: &S,
    txn: &mut S::Txn,
    node: &Node,
) -> Result<Handle> {
    store.create(txn, node.encode()?).await
}

/// Write back a node previously marked for update.
pub(super) async fn write_node<S: ObjectStore>(
    store: &S,
    txn: &mut S::Txn,
    handle: Handle,
    node: &Node,
) -> Result<()> {
    store.put(txn, handle, node.encode()?).await
}

pub(super) async fn remove_node<S: ObjectStore>(
    store: &S,
    txn: &mut S::Txn,
    handle: Handle,
) -> Result<()> {
    store.remove(txn, handle).await
}

/// Allocate a box: a store object owned by the map, holding one serialized
/// key or value.
pub(super) async fn new_box<S: ObjectStore, T: Serialize>(
    store: &S,
    txn: &mut S::Txn,
    value: &T,
) -> Result<Handle> {
    store.create(txn, bincode::serialize(value)?).await
}

/// Overwrite a box in place; used to reuse a value box on replacement.
pub(super) async fn rewrite_box<S: ObjectStore, T: Serialize>(
    store: &S,
    txn: &mut S::Txn,
    handle: Handle,
    value: &T,
) -> Result<()> {
    store.mark_for_update(txn, handle).await?;
    store.put(txn, handle, bincode::serialize(value)?).await
}

/// Decode the object behind a handle; boxes and managed citizens serialize
/// the same way.
pub(super) async fn read_object<S: ObjectStore, T: DeserializeOwned>(
    store: &S,
    txn: &mut S::Txn,
    handle: Handle,
) -> Result<T> {
    let bytes = store.get(txn, handle).await?;
    Ok(bincode::deserialize(&bytes)?)
}

/// Destroy the referenced object if the entry owns it. Managed objects are
/// left untouched.
pub(super) async fn release_ref<S: ObjectStore>(
    store: &S,
    txn: &mut S::Txn,
    obj: ObjectRef,
) -> Result<()> {
    if obj.owned {
        store.remove(txn, obj.handle).await?;
    }
    Ok(())
}
