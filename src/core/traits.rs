//! Core traits and types for collection publishing
//!
//! This module defines the seams of the system: the storage collaborator,
//! the polymorphic repository draft, the identifier authority and the
//! operator prompt.

use crate::core::error::PublishError;
use crate::core::state_machine::DraftState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tokio::io::AsyncRead;

/// Key/value metadata of a collection or member (keys are unique)
pub type Metadata = BTreeMap<String, String>;

/// Member path → identifier (ticket or PID)
pub type Identifiers = BTreeMap<String, String>;

/// Streaming reader handed out by a store
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

// ============================================================================
// Access control
// ============================================================================

/// Permission level of an access-control entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    /// No access; setting it revokes the entry
    Null,
    Read,
    Write,
    Own,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Null => "null",
            AccessLevel::Read => "read",
            AccessLevel::Write => "write",
            AccessLevel::Own => "own",
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A (resource, principal, level) grant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessControlEntry {
    pub path: String,
    pub principal: String,
    pub level: AccessLevel,
}

impl AccessControlEntry {
    pub fn new(path: impl Into<String>, principal: impl Into<String>, level: AccessLevel) -> Self {
        Self {
            path: path.into(),
            principal: principal.into(),
            level,
        }
    }

    /// The entry that revokes this one
    pub fn revoked(&self) -> Self {
        Self::new(self.path.clone(), self.principal.clone(), AccessLevel::Null)
    }
}

impl fmt::Display for AccessControlEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.level, self.principal, self.path)
    }
}

// ============================================================================
// Storage
// ============================================================================

/// A data member of a collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub owner: String,
}

/// Direct children of a collection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionListing {
    pub members: Vec<Member>,
    pub subcollections: Vec<String>,
}

/// Storage collaborator holding collections, metadata and permissions
///
/// Paths are absolute logical paths such as `/zoneA/home/pub/demo`.
#[async_trait]
pub trait CollectionStore: Send + Sync {
    /// Zone (namespace root) of this store
    fn zone(&self) -> &str;

    /// Locator of a path, used in logs and reports
    fn uri(&self, path: &str) -> String;

    /// List the direct members and sub-collections of a collection
    async fn list(&self, collection: &str) -> Result<CollectionListing, PublishError>;

    /// Owner principal of a collection or object
    async fn owner_of(&self, path: &str) -> Result<Option<String>, PublishError>;

    async fn get_metadata(&self, path: &str) -> Result<Metadata, PublishError>;

    /// Set a metadata entry; an existing value under the same key is replaced
    async fn set_metadata(&self, path: &str, key: &str, value: &str) -> Result<(), PublishError>;

    async fn remove_metadata(&self, path: &str, key: &str) -> Result<(), PublishError>;

    async fn get_permissions(&self, path: &str) -> Result<Vec<AccessControlEntry>, PublishError>;

    /// Grant an entry; `AccessLevel::Null` revokes it
    async fn set_permission(&self, entry: &AccessControlEntry) -> Result<(), PublishError>;

    /// Open an object for streaming reads
    async fn read_object(&self, path: &str) -> Result<ObjectReader, PublishError>;

    /// Create an empty object; fails if the path already exists
    async fn create_object(&self, path: &str) -> Result<(), PublishError>;

    /// Replace the content of an existing object
    async fn write_object(&self, path: &str, data: &[u8]) -> Result<(), PublishError>;
}

// ============================================================================
// Repository drafts
// ============================================================================

/// In-progress publication record at a remote repository
///
/// Every backend shares the lifecycle `Unset → Created → Patched →
/// (Uploaded) → Published`. A failed call never advances the state.
#[async_trait]
pub trait Draft: Send + Sync {
    /// Repository name used as metadata key prefix (e.g. "B2SHARE")
    fn repo_name(&self) -> &str;

    /// Locator of the repository endpoint or of the draft once created
    fn uri(&self) -> String;

    /// Landing page of the draft; empty until created
    fn url(&self) -> String;

    /// Persistent identifier; empty until published
    fn doi(&self) -> String;

    /// Metadata keys the backend cannot publish without
    fn required_keys(&self) -> &[&'static str];

    /// Whether the backend accepts direct file upload
    fn has_data(&self) -> bool;

    fn state(&self) -> DraftState;

    /// Allocate the remote draft record
    async fn create(&mut self, title: &str) -> Result<(), PublishError>;

    /// Apply creator/description-equivalent fields
    async fn patch(&mut self, metadata: &Metadata, collection_path: &str)
        -> Result<(), PublishError>;

    /// Add anonymous-access references; no-op on an empty map
    async fn patch_tickets(&mut self, tickets: &Identifiers) -> Result<(), PublishError>;

    /// Add persistent-identifier references; no-op on an empty map
    async fn patch_pids(&mut self, pids: &Identifiers) -> Result<(), PublishError>;

    /// Stream one local file to the backend
    async fn upload_file(&mut self, path: &Path) -> Result<(), PublishError>;

    /// Terminal transition; assigns the DOI
    async fn publish(&mut self) -> Result<(), PublishError>;
}

/// Missing required keys of a draft, in declaration order
pub fn missing_keys(required: &[&'static str], metadata: &Metadata) -> Vec<String> {
    required
        .iter()
        .filter(|key| !metadata.contains_key(**key))
        .map(|key| key.to_string())
        .collect()
}

// ============================================================================
// Identifier authority
// ============================================================================

/// External authority issuing tickets and persistent identifiers
///
/// Results are opaque strings; their correctness is the authority's concern.
#[async_trait]
pub trait IdentifierAuthority: Send + Sync {
    /// Anonymous read-access token for a path
    async fn mint_ticket(&self, path: &str) -> Result<String, PublishError>;

    /// Persistent identifier for a path
    async fn mint_pid(&self, path: &str) -> Result<String, PublishError>;
}

// ============================================================================
// Operator prompt
// ============================================================================

/// What the operator wants after a failed step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDecision {
    Retry,
    Continue,
    Abort,
}

/// Interactive operator channel
#[async_trait]
pub trait Prompt: Send + Sync {
    /// Yes/no question
    async fn confirm(&self, message: &str) -> Result<bool, PublishError>;

    /// Ask how to proceed after a step failure
    async fn decide(&self, message: &str) -> Result<StepDecision, PublishError>;
}
