use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::common::Handle;
use crate::error::{MapError, Result};

use super::object_store::ObjectStore;

#[derive(Debug, Clone)]
struct Committed {
    version: u64,
    bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct MemStoreInner {
    objects: HashMap<Handle, Committed>,
    next_id: u64,
}

/// In-memory [`ObjectStore`] with optimistic transactional concurrency.
///
/// Objects carry versions; each transaction buffers its writes and records
/// the version of everything it read or marked for update. Commit validates
/// the recorded versions against committed state and aborts with
/// [`MapError::TransactionConflict`] if any object changed underneath the
/// transaction. This is the reference store the test suite runs against.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    inner: Arc<RwLock<MemStoreInner>>,
}

#[derive(Debug, Clone)]
enum Op {
    Put(Vec<u8>),
    Remove,
}

/// Buffered state of one open transaction.
#[derive(Debug, Default)]
pub struct MemTxn {
    /// Committed version and bytes observed per handle; repeated reads are
    /// served from here so the transaction sees a stable snapshot.
    reads: HashMap<Handle, (u64, Vec<u8>)>,
    /// Pending effects, consulted before committed state (read-your-writes).
    writes: HashMap<Handle, Op>,
    /// Handles allocated by this transaction; they have no committed version
    /// to validate.
    created: HashSet<Handle>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed objects; lets tests observe box lifetime.
    pub async fn object_count(&self) -> usize {
        self.inner.read().await.objects.len()
    }

    /// Whether a committed object exists for the handle.
    pub async fn contains(&self, handle: Handle) -> bool {
        self.inner.read().await.objects.contains_key(&handle)
    }

    /// Record the committed version (and bytes) of `handle` in the read set,
    /// or fail if no committed object exists.
    async fn observe(&self, txn: &mut MemTxn, handle: Handle) -> Result<()> {
        if txn.reads.contains_key(&handle) {
            return Ok(());
        }
        let guard = self.inner.read().await;
        match guard.objects.get(&handle) {
            Some(committed) => {
                txn.reads
                    .insert(handle, (committed.version, committed.bytes.clone()));
                Ok(())
            }
            None => Err(MapError::ObjectNotFound(handle)),
        }
    }
}

#[async_trait]
impl ObjectStore for MemStore {
    type Txn = MemTxn;

    async fn begin(&self) -> Result<MemTxn> {
        Ok(MemTxn::default())
    }

    async fn commit(&self, txn: MemTxn) -> Result<()> {
        let mut guard = self.inner.write().await;
        for (handle, (version, _)) in &txn.reads {
            match guard.objects.get(handle) {
                Some(committed) if committed.version == *version => {}
                _ => {
                    return Err(MapError::TransactionConflict(format!(
                        "object {:?} changed underneath the transaction",
                        handle
                    )));
                }
            }
        }
        for (handle, op) in txn.writes {
            match op {
                Op::Put(bytes) => {
                    let version = guard.objects.get(&handle).map_or(1, |c| c.version + 1);
                    guard.objects.insert(handle, Committed { version, bytes });
                }
                Op::Remove => {
                    guard.objects.remove(&handle);
                }
            }
        }
        Ok(())
    }

    async fn create(&self, txn: &mut MemTxn, bytes: Vec<u8>) -> Result<Handle> {
        let mut guard = self.inner.write().await;
        guard.next_id += 1;
        let handle = Handle::from_raw(guard.next_id);
        drop(guard);
        txn.created.insert(handle);
        txn.writes.insert(handle, Op::Put(bytes));
        Ok(handle)
    }

    async fn get(&self, txn: &mut MemTxn, handle: Handle) -> Result<Vec<u8>> {
        match txn.writes.get(&handle) {
            Some(Op::Put(bytes)) => return Ok(bytes.clone()),
            Some(Op::Remove) => return Err(MapError::ObjectNotFound(handle)),
            None => {}
        }
        self.observe(txn, handle).await?;
        Ok(txn.reads[&handle].1.clone())
    }

    async fn mark_for_update(&self, txn: &mut MemTxn, handle: Handle) -> Result<()> {
        if txn.created.contains(&handle) || txn.writes.contains_key(&handle) {
            return Ok(());
        }
        self.observe(txn, handle).await
    }

    async fn put(&self, txn: &mut MemTxn, handle: Handle, bytes: Vec<u8>) -> Result<()> {
        if !txn.created.contains(&handle) && !txn.writes.contains_key(&handle) {
            self.observe(txn, handle).await?;
        }
        txn.writes.insert(handle, Op::Put(bytes));
        Ok(())
    }

    async fn remove(&self, txn: &mut MemTxn, handle: Handle) -> Result<()> {
        match txn.writes.get(&handle) {
            Some(Op::Remove) => return Err(MapError::ObjectNotFound(handle)),
            Some(Op::Put(_)) => {}
            None => self.observe(txn, handle).await?,
        }
        txn.writes.insert(handle, Op::Remove);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_is_visible_in_txn_and_after_commit() {
        let store = MemStore::new();
        let mut txn = store.begin().await.unwrap();
        let handle = store.create(&mut txn, b"hello".to_vec()).await.unwrap();
        assert_eq!(store.get(&mut txn, handle).await.unwrap(), b"hello");
        store.commit(txn).await.unwrap();

        let mut txn = store.begin().await.unwrap();
        assert_eq!(store.get(&mut txn, handle).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn reads_see_own_writes() {
        let store = MemStore::new();
        let mut setup = store.begin().await.unwrap();
        let handle = store.create(&mut setup, b"v1".to_vec()).await.unwrap();
        store.commit(setup).await.unwrap();

        let mut txn = store.begin().await.unwrap();
        store.mark_for_update(&mut txn, handle).await.unwrap();
        store.put(&mut txn, handle, b"v2".to_vec()).await.unwrap();
        assert_eq!(store.get(&mut txn, handle).await.unwrap(), b"v2");

        // Committed state is untouched until commit.
        let mut other = store.begin().await.unwrap();
        assert_eq!(store.get(&mut other, handle).await.unwrap(), b"v1");
    }

    #[tokio::test]
    async fn removed_object_is_not_found() {
        let store = MemStore::new();
        let mut txn = store.begin().await.unwrap();
        let handle = store.create(&mut txn, b"x".to_vec()).await.unwrap();
        store.commit(txn).await.unwrap();

        let mut txn = store.begin().await.unwrap();
        store.remove(&mut txn, handle).await.unwrap();
        assert!(matches!(
            store.get(&mut txn, handle).await,
            Err(MapError::ObjectNotFound(_))
        ));
        assert!(matches!(
            store.remove(&mut txn, handle).await,
            Err(MapError::ObjectNotFound(_))
        ));
        store.commit(txn).await.unwrap();
        assert_eq!(store.object_count().await, 0);
    }

    #[tokio::test]
    async fn conflicting_writers_abort() {
        let store = MemStore::new();
        let mut setup = store.begin().await.unwrap();
        let handle = store.create(&mut setup, b"base".to_vec()).await.unwrap();
        store.commit(setup).await.unwrap();

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        store.mark_for_update(&mut first, handle).await.unwrap();
        store.mark_for_update(&mut second, handle).await.unwrap();
        store.put(&mut first, handle, b"first".to_vec()).await.unwrap();
        store.put(&mut second, handle, b"second".to_vec()).await.unwrap();

        store.commit(first).await.unwrap();
        assert!(matches!(
            store.commit(second).await,
            Err(MapError::TransactionConflict(_))
        ));

        let mut check = store.begin().await.unwrap();
        assert_eq!(store.get(&mut check, handle).await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn stale_read_aborts_commit() {
        let store = MemStore::new();
        let mut setup = store.begin().await.unwrap();
        let handle = store.create(&mut setup, b"base".to_vec()).await.unwrap();
        store.commit(setup).await.unwrap();

        let mut reader = store.begin().await.unwrap();
        store.get(&mut reader, handle).await.unwrap();

        let mut writer = store.begin().await.unwrap();
        store.mark_for_update(&mut writer, handle).await.unwrap();
        store.put(&mut writer, handle, b"new".to_vec()).await.unwrap();
        store.commit(writer).await.unwrap();

        assert!(matches!(
            store.commit(reader).await,
            Err(MapError::TransactionConflict(_))
        ));
    }

    #[tokio::test]
    async fn disjoint_writers_commit() {
        let store = MemStore::new();
        let mut setup = store.begin().await.unwrap();
        let a = store.create(&mut setup, b"a".to_vec()).await.unwrap();
        let b = store.create(&mut setup, b"b".to_vec()).await.unwrap();
        store.commit(setup).await.unwrap();

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        store.mark_for_update(&mut first, a).await.unwrap();
        store.put(&mut first, a, b"a2".to_vec()).await.unwrap();
        store.mark_for_update(&mut second, b).await.unwrap();
        store.put(&mut second, b, b"b2".to_vec()).await.unwrap();

        store.commit(first).await.unwrap();
        store.commit(second).await.unwrap();
    }
}
