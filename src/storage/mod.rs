//! Collection stores and the collection handle used by the workflow

pub mod catalog;
pub mod collection;
pub mod local;
pub mod memory;

pub use catalog::{AclState, Catalog, Node};
pub use collection::Collection;
pub use local::LocalStore;
pub use memory::MemoryStore;
