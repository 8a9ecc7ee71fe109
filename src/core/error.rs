//! Error handling for collection publishing
//!
//! One error type covers the whole protocol. Every variant carries enough
//! context to be written into a report line, and exposes a stable code plus
//! recovery guidance for the operator.

use thiserror::Error;

/// Main error type for collection publishing operations
#[derive(Error, Debug)]
pub enum PublishError {
    // Lock errors
    #[error("principal {principal} does not own {resource}")]
    Ownership { resource: String, principal: String },

    #[error("a permission snapshot already exists for {resource} ({principal})")]
    SnapshotExists { resource: String, principal: String },

    #[error("collection {collection} is already locked")]
    LockHeld { collection: String },

    // Idempotency guard
    #[error("[{repository}] data already published ({key}={value})")]
    AlreadyPublished {
        repository: String,
        key: String,
        value: String,
    },

    // Validation errors
    #[error("[{repository}] validation failed: {message}")]
    Validation { repository: String, message: String },

    #[error("[{repository}] required metadata missing: {}", keys.join(", "))]
    MissingMetadata {
        repository: String,
        keys: Vec<String>,
    },

    // Draft errors
    #[error("[{repository}] draft already exists: {locator}")]
    AlreadyExists { repository: String, locator: String },

    #[error("[{repository}] remote rejected request (HTTP {status}): {message}")]
    RemoteRejected {
        repository: String,
        status: u16,
        message: String,
    },

    #[error("[{repository}] publishing failed: {message}")]
    Publish { repository: String, message: String },

    #[error("[{repository}] cannot {operation} a draft in state {state}")]
    InvalidState {
        repository: String,
        operation: String,
        state: String,
    },

    #[error("[{repository}] network error: {message}")]
    Network { repository: String, message: String },

    // Orchestration errors
    #[error("step {step} failed: {message}")]
    StepFailed { step: String, message: String },

    #[error("publishing cancelled by operator")]
    Cancelled,

    // Collaborator errors
    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PublishError {
    /// Build a storage error from any displayable cause
    pub fn storage(message: impl std::fmt::Display) -> Self {
        Self::Storage(message.to_string())
    }

    /// Get the repository name associated with this error, if any
    pub fn repository(&self) -> Option<&str> {
        match self {
            Self::AlreadyPublished { repository, .. }
            | Self::Validation { repository, .. }
            | Self::MissingMetadata { repository, .. }
            | Self::AlreadyExists { repository, .. }
            | Self::RemoteRejected { repository, .. }
            | Self::Publish { repository, .. }
            | Self::InvalidState { repository, .. }
            | Self::Network { repository, .. } => Some(repository),
            _ => None,
        }
    }

    /// Check if this error can be retried by the operator within the same run
    ///
    /// Only step-level failures are recoverable; everything that guards the
    /// protocol (ownership, idempotency, draft double-create) is fatal.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::RemoteRejected { .. }
                | Self::Network { .. }
                | Self::MissingMetadata { .. }
                | Self::InvalidState { .. }
                | Self::StepFailed { .. }
                | Self::Io(_)
        )
    }

    /// Get suggested actions for this error
    pub fn suggested_actions(&self) -> Vec<&'static str> {
        match self {
            Self::Ownership { .. } => vec![
                "Run the publisher as the owner of the collection",
                "Ask the owner to grant 'own' permission on every member",
            ],
            Self::SnapshotExists { .. } | Self::LockHeld { .. } => {
                vec!["Restore the previous lock before locking again"]
            }
            Self::AlreadyPublished { .. } => vec![
                "The collection carries a DOI for this repository already",
                "Remove the <repository>/DOI entry only if the publication was withdrawn",
            ],
            Self::Validation { .. } => vec![
                "Make sure the collection is flat and contains data",
                "Add the missing metadata entries",
            ],
            Self::MissingMetadata { .. } => {
                vec!["Add the missing metadata entries to the collection"]
            }
            Self::AlreadyExists { .. } => vec![
                "Use a fresh draft configuration",
                "Remove the draft_url entry from the configuration",
            ],
            Self::RemoteRejected { .. } => vec![
                "Check the API token and its permissions",
                "Inspect the repository response in the report",
            ],
            Self::Publish { .. } => vec![
                "The draft is left unpublished; finish it in the repository UI",
                "Re-run with the draft_url of the existing draft",
            ],
            Self::InvalidState { .. } => {
                vec!["Re-run the earlier protocol step that failed"]
            }
            Self::Network { .. } => vec![
                "Check the network connection",
                "Check the repository API URL",
            ],
            Self::StepFailed { .. } => vec![
                "Inspect the step error in the report",
                "Re-run with --force to publish despite step errors",
            ],
            Self::Cancelled => vec!["Re-run when ready to publish"],
            Self::Storage(_) => vec!["Check the storage connection and permissions"],
            Self::ConfigError(_) => vec!["Check the configuration file"],
            Self::Io(_) => vec!["Check local disk space and permissions"],
        }
    }

    /// Get error code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::Ownership { .. } => "OWNERSHIP_ERROR",
            Self::SnapshotExists { .. } => "SNAPSHOT_EXISTS",
            Self::LockHeld { .. } => "LOCK_HELD",
            Self::AlreadyPublished { .. } => "ALREADY_PUBLISHED",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::MissingMetadata { .. } => "MISSING_METADATA",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::RemoteRejected { .. } => "REMOTE_REJECTED",
            Self::Publish { .. } => "PUBLISH_ERROR",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::Network { .. } => "NETWORK_ERROR",
            Self::StepFailed { .. } => "STEP_FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ownership_error() {
        let error = PublishError::Ownership {
            resource: "/zoneA/home/pub/demo".to_string(),
            principal: "bob".to_string(),
        };

        assert_eq!(error.code(), "OWNERSHIP_ERROR");
        assert!(!error.is_recoverable());
        assert!(error.repository().is_none());
        assert!(error.to_string().contains("bob"));
    }

    #[test]
    fn test_already_published_error() {
        let error = PublishError::AlreadyPublished {
            repository: "Repo".to_string(),
            key: "Repo/DOI".to_string(),
            value: "10.5/old".to_string(),
        };

        assert_eq!(error.repository(), Some("Repo"));
        assert!(!error.is_recoverable());
        assert_eq!(error.code(), "ALREADY_PUBLISHED");
        assert!(error.to_string().contains("10.5/old"));
    }

    #[test]
    fn test_missing_metadata_lists_keys() {
        let error = PublishError::MissingMetadata {
            repository: "B2SHARE".to_string(),
            keys: vec!["CREATOR".to_string(), "ABSTRACT".to_string()],
        };

        let display = error.to_string();
        assert!(display.contains("CREATOR, ABSTRACT"));
        assert!(error.is_recoverable());
    }

    #[test]
    fn test_remote_rejected_error() {
        let error = PublishError::RemoteRejected {
            repository: "CKAN".to_string(),
            status: 403,
            message: "Access denied".to_string(),
        };

        assert_eq!(error.code(), "REMOTE_REJECTED");
        assert!(error.is_recoverable());
        assert!(error.to_string().contains("HTTP 403"));
        assert!(!error.suggested_actions().is_empty());
    }

    #[test]
    fn test_draft_guards_are_fatal() {
        let exists = PublishError::AlreadyExists {
            repository: "Dataverse".to_string(),
            locator: "http://dv/dataset.xhtml".to_string(),
        };
        let publish = PublishError::Publish {
            repository: "Dataverse".to_string(),
            message: "draft was never created".to_string(),
        };

        assert!(!exists.is_recoverable());
        assert!(!publish.is_recoverable());
        assert_eq!(publish.code(), "PUBLISH_ERROR");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let error: PublishError = io.into();

        assert_eq!(error.code(), "IO_ERROR");
        assert!(error.to_string().contains("gone"));
    }
}
