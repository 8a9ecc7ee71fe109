//! Scoped publish lock over a collection and its members
//!
//! `lock` downgrades everybody but the acting principal to read access and
//! opens the collection to the public; `release` puts the original ACLs back.
//! The workflow calls `release` after the protected region on every path. A
//! lock dropped while still held restores in the background and logs an
//! error.

use super::snapshot::{AclFailure, PermissionSnapshot};
use crate::core::error::PublishError;
use crate::core::logging::PublishLog;
use crate::core::traits::{AccessControlEntry, AccessLevel, CollectionStore};
use crate::storage::Collection;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Principal standing for anonymous users
pub const PUBLIC_PRINCIPAL: &str = "public";

pub struct CollectionLock {
    store: Arc<dyn CollectionStore>,
    principal: String,
    log: PublishLog,
    snapshot: Option<PermissionSnapshot>,
    collection: Option<String>,
    finalized: bool,
}

impl CollectionLock {
    pub fn new(store: Arc<dyn CollectionStore>, principal: impl Into<String>, log: PublishLog) -> Self {
        Self {
            store,
            principal: principal.into(),
            log,
            snapshot: None,
            collection: None,
            finalized: false,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.snapshot.is_some()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Close the collection for writing
    ///
    /// On an ownership failure nothing has been changed.
    pub async fn lock(&mut self, collection: &Collection) -> Result<(), PublishError> {
        if self.snapshot.is_some() {
            return Err(PublishError::LockHeld {
                collection: self
                    .collection
                    .clone()
                    .unwrap_or_else(|| collection.path().to_string()),
            });
        }

        let mut snapshot =
            PermissionSnapshot::new(self.store.clone(), self.principal.clone(), self.log.clone());
        snapshot.capture(&collection.resources()).await?;

        let grants = self.lock_grants(&snapshot);
        self.snapshot = Some(snapshot);
        self.collection = Some(collection.path().to_string());
        self.finalized = false;

        let failures = match &self.snapshot {
            Some(snapshot) => snapshot.apply(&grants).await,
            None => Vec::new(),
        };
        if !failures.is_empty() {
            self.log.warn(format!(
                "LOCK: {} permission changes failed on {}",
                failures.len(),
                collection.path()
            ));
        }

        let owners: BTreeSet<&str> = grants
            .iter()
            .map(|g| g.principal.as_str())
            .filter(|p| *p != PUBLIC_PRINCIPAL)
            .collect();
        self.log.info(format!(
            "COLLECTION LOCKED: {} (read only for public{})",
            collection.path(),
            owners
                .iter()
                .map(|o| format!(", {}", o))
                .collect::<String>()
        ));
        Ok(())
    }

    /// `public` and every other captured principal get `read`
    fn lock_grants(&self, snapshot: &PermissionSnapshot) -> Vec<AccessControlEntry> {
        let entries = snapshot.entries();
        let mut grants = Vec::new();
        for resource in snapshot.resources() {
            grants.push(AccessControlEntry::new(resource, PUBLIC_PRINCIPAL, AccessLevel::Read));
            for entry in entries.iter().filter(|e| e.path == resource) {
                if entry.principal != self.principal
                    && entry.principal != PUBLIC_PRINCIPAL
                    && entry.level != AccessLevel::Read
                {
                    grants.push(AccessControlEntry::new(
                        resource,
                        entry.principal.clone(),
                        AccessLevel::Read,
                    ));
                }
            }
        }
        grants
    }

    /// Restore the original ACLs; a no-op when not locked
    pub async fn unlock(&mut self) -> Vec<AclFailure> {
        let Some(mut snapshot) = self.snapshot.take() else {
            return Vec::new();
        };
        let failures = snapshot.restore().await;
        let collection = self.collection.take().unwrap_or_default();
        if failures.is_empty() {
            self.log.info(format!("COLLECTION UNLOCKED: {}", collection));
        } else {
            for failure in &failures {
                self.log.error(format!("UNLOCK: {}", failure));
            }
        }
        failures
    }

    /// Keep the locked permissions; `release` will not restore them
    pub fn finalize(&mut self) {
        if self.snapshot.take().is_some() {
            self.finalized = true;
            self.log.info(format!(
                "COLLECTION CLOSED: {} stays read only",
                self.collection.take().unwrap_or_default()
            ));
        }
    }

    /// Scoped exit: unlock unless finalized
    pub async fn release(&mut self) -> Vec<AclFailure> {
        if self.finalized {
            return Vec::new();
        }
        self.unlock().await
    }
}

impl Drop for CollectionLock {
    fn drop(&mut self) {
        let Some(mut snapshot) = self.snapshot.take() else {
            return;
        };
        let collection = self.collection.take().unwrap_or_default();
        self.log.error(format!(
            "LOCK: {} dropped while locked, restoring permissions",
            collection
        ));

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    snapshot.restore().await;
                });
            }
            Err(_) => self.log.error(format!(
                "LOCK: no runtime to restore {}; permissions stay locked",
                collection
            )),
        }
    }
}
