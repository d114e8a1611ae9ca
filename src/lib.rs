//! A distributed, concurrent hash map backed by an externally managed
//! object store.
//!
//! [`HashTrieMap`] behaves like an associative map while persisting its trie
//! nodes as independent objects in a transactional [`ObjectStore`]. Leaves
//! split and merge dynamically so each node stays small, serializable, and
//! independently lockable: writers touching disjoint parts of the key space
//! proceed in parallel without serializing the whole map. Concurrency
//! control is delegated entirely to the store; every map operation runs
//! inside a caller-supplied transaction.

pub mod common;
pub mod error;
pub mod map;
pub mod node;
pub mod store;

pub use common::{Handle, HashCode, MapConfig};
pub use error::{MapError, Result};
pub use map::{Cursor, Entries, HashTrieMap, Keys, Stored, Values};
pub use store::{MemStore, ObjectStore};
