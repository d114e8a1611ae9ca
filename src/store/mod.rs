pub mod mem_store;
pub mod object_store;

pub use mem_store::{MemStore, MemTxn};
pub use object_store::ObjectStore;
