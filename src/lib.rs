pub mod core;
pub mod drafts;
pub mod identifiers;
pub mod lock;
pub mod orchestration;
pub mod security;
pub mod storage;

pub use core::*;
pub use drafts::{DraftKind, DraftLoader};
pub use identifiers::LocalAuthority;
pub use lock::{CollectionLock, PermissionSnapshot};
pub use orchestration::{PublishWorkflow, Report, WorkflowOptions};
pub use security::SecureTokenManager;
pub use storage::{Collection, LocalStore, MemoryStore};
