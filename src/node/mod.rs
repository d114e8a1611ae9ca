pub mod definition;

pub use definition::{bucket_index, Entry, Node, NodeBody, NodeParams, ObjectRef};
