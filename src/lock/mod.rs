//! Permission snapshot and the scoped collection lock built on it

pub mod collection_lock;
pub mod snapshot;

pub use collection_lock::{CollectionLock, PUBLIC_PRINCIPAL};
pub use snapshot::{AclFailure, PermissionSnapshot};
