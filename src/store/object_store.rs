use std::fmt;

use async_trait::async_trait;

use crate::common::Handle;
use crate::error::Result;

/// Trait for the transactional object store backing a map.
///
/// Every stored object is an opaque byte blob addressed by a durable
/// [`Handle`]. The store supplies optimistic transactional concurrency at
/// object granularity: all reads and writes happen inside a transaction, and
/// commit fails with [`crate::error::MapError::TransactionConflict`] when a
/// touched object changed underneath the transaction. Any resolution of a
/// handle may suspend, which is why the whole trait is async.
#[async_trait]
pub trait ObjectStore: fmt::Debug + Send + Sync + 'static {
    /// Per-transaction context threaded through every operation.
    type Txn: Send;

    /// Open a new transaction.
    async fn begin(&self) -> Result<Self::Txn>;

    /// Validate and atomically apply the transaction's effects.
    async fn commit(&self, txn: Self::Txn) -> Result<()>;

    /// Register a newly constructed object and return its durable handle.
    async fn create(&self, txn: &mut Self::Txn, bytes: Vec<u8>) -> Result<Handle>;

    /// Resolve a handle to the object's current bytes inside the transaction.
    /// Writes buffered by the same transaction are visible.
    async fn get(&self, txn: &mut Self::Txn, handle: Handle) -> Result<Vec<u8>>;

    /// Declare intent to write the object before mutating it; cues the store
    /// to take write access and widens the transaction's conflict footprint
    /// to cover it.
    async fn mark_for_update(&self, txn: &mut Self::Txn, handle: Handle) -> Result<()>;

    /// Write back new object state.
    async fn put(&self, txn: &mut Self::Txn, handle: Handle, bytes: Vec<u8>) -> Result<()>;

    /// Delete the object from the store.
    async fn remove(&self, txn: &mut Self::Txn, handle: Handle) -> Result<()>;
}
