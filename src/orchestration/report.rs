//! Publish report
//!
//! One report per attempt, written as a new object into the report
//! collection and never touched again.

use crate::core::error::PublishError;
use crate::core::logging::PublishLog;
use crate::core::traits::{AccessControlEntry, AccessLevel, CollectionStore};
use crate::security::SecureTokenManager;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Attempts at a free report name before giving up
const MAX_NAME_ATTEMPTS: usize = 10;

/// Why a run stopped before publishing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AbortReason {
    LockFailed,
    AlreadyPublished,
    ValidationFailed,
    IdentifiersFailed,
    DraftCreateFailed,
    StepsFailed,
    Cancelled,
    PublishFailed,
}

impl AbortReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbortReason::LockFailed => "LockFailed",
            AbortReason::AlreadyPublished => "AlreadyPublished",
            AbortReason::ValidationFailed => "ValidationFailed",
            AbortReason::IdentifiersFailed => "IdentifiersFailed",
            AbortReason::DraftCreateFailed => "DraftCreateFailed",
            AbortReason::StepsFailed => "StepsFailed",
            AbortReason::Cancelled => "Cancelled",
            AbortReason::PublishFailed => "PublishFailed",
        }
    }
}

/// Terminal status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PublishStatus {
    Published,
    Aborted(AbortReason),
}

impl PublishStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, PublishStatus::Published)
    }

    /// Process exit code for this status
    pub fn exit_code(&self) -> i32 {
        match self {
            PublishStatus::Published => 0,
            PublishStatus::Aborted(AbortReason::LockFailed) => 2,
            PublishStatus::Aborted(AbortReason::AlreadyPublished) => 3,
            PublishStatus::Aborted(AbortReason::ValidationFailed) => 4,
            PublishStatus::Aborted(AbortReason::Cancelled) => 5,
            PublishStatus::Aborted(AbortReason::PublishFailed) => 6,
            PublishStatus::Aborted(_) => 1,
        }
    }
}

impl fmt::Display for PublishStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishStatus::Published => f.write_str("PUBLISHED"),
            PublishStatus::Aborted(reason) => write!(f, "ABORTED({})", reason.as_str()),
        }
    }
}

/// Result of one publish attempt
#[derive(Debug)]
pub struct Report {
    pub status: PublishStatus,
    pub repository: String,
    pub collection: String,
    pub doi: Option<String>,
    pub url: Option<String>,
    /// Captured log lines, oldest first
    pub lines: Vec<String>,
    /// Workflow state transitions
    pub history: Vec<String>,
    pub step_failures: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Storage path of the written report object
    pub location: Option<String>,
    pub error: Option<PublishError>,
}

impl Report {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    /// Text of the report object with every known token masked
    pub fn render(&self, tokens: &SecureTokenManager) -> String {
        let mut out = Vec::new();
        out.push(format!("status: {}", self.status));
        out.push(format!("repository: {}", self.repository));
        out.push(format!("collection: {}", self.collection));
        if let Some(doi) = &self.doi {
            out.push(format!("doi: {}", doi));
        }
        if let Some(url) = &self.url {
            out.push(format!("url: {}", url));
        }
        if let Some(error) = &self.error {
            out.push(format!("error: [{}] {}", error.code(), error));
        }
        if self.step_failures > 0 {
            out.push(format!("step failures: {}", self.step_failures));
        }
        out.push(format!("duration: {} ms", self.duration_ms()));
        out.push(String::new());
        out.extend(self.history.iter().cloned());
        out.push(String::new());
        out.extend(self.lines.iter().cloned());

        tokens.mask_tokens_in_string(&out.join("\n"))
    }

    /// Write the report as a new object in `directory`
    ///
    /// The object is named `<owners>_<collection>.status_<timestamp>`; on a
    /// name collision a numeric suffix is appended. Owners get write access
    /// to the object. Returns the object path.
    pub async fn write(
        &mut self,
        store: &dyn CollectionStore,
        directory: &str,
        owners: &BTreeSet<String>,
        tokens: &SecureTokenManager,
        log: &PublishLog,
    ) -> Result<String, PublishError> {
        let base = format!(
            "{}/{}",
            directory.trim_end_matches('/'),
            object_name(owners, collection_name(&self.collection), Local::now())
        );
        log.info(format!("Create report {}", base));

        let path = create_unique(store, &base).await?;
        store
            .write_object(&path, self.render(tokens).as_bytes())
            .await?;

        let current = store.get_permissions(&path).await.unwrap_or_default();
        for owner in owners {
            let held = current.iter().any(|e| &e.principal == owner && e.level >= AccessLevel::Write);
            if held {
                continue;
            }
            log.debug(format!("setting write permissions for user {}", owner));
            let entry = AccessControlEntry::new(path.clone(), owner.clone(), AccessLevel::Write);
            if let Err(e) = store.set_permission(&entry).await {
                log.warn(format!("REPORT: cannot grant {}: {}", entry, e));
            }
        }
        self.location = Some(path.clone());
        Ok(path)
    }
}

fn collection_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

/// `alice-bob_demo.status_16-10-26_14:05`
pub fn object_name(owners: &BTreeSet<String>, collection: &str, at: DateTime<Local>) -> String {
    let users = owners.iter().cloned().collect::<Vec<_>>().join("-");
    format!(
        "{}_{}.status_{}",
        users,
        collection,
        at.format("%d-%m-%y_%H:%M")
    )
}

async fn create_unique(store: &dyn CollectionStore, base: &str) -> Result<String, PublishError> {
    let mut last_error = None;
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let candidate = if attempt == 0 {
            base.to_string()
        } else {
            format!("{}_{}", base, attempt)
        };
        match store.create_object(&candidate).await {
            Ok(()) => return Ok(candidate),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or_else(|| PublishError::storage(format!("cannot create {}", base))))
}
