//! Repository draft backends

pub mod b2share;
pub mod ckan;
pub mod dataverse;
pub mod draft_loader;
pub mod http;

#[cfg(test)]
pub(crate) mod test_server;

pub use b2share::B2ShareDraft;
pub use ckan::CkanDraft;
pub use dataverse::DataverseDraft;
pub use draft_loader::{DraftKind, DraftLoader};
