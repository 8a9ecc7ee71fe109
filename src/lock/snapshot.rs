//! Owned record of access-control entries, captured once and restored later

use crate::core::error::PublishError;
use crate::core::logging::PublishLog;
use crate::core::traits::{AccessControlEntry, AccessLevel, CollectionStore};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A permission change that could not be applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclFailure {
    pub path: String,
    pub principal: String,
    pub message: String,
}

impl fmt::Display for AclFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.path, self.principal, self.message)
    }
}

/// Original ACLs of a set of resources, owned on behalf of one principal
///
/// The acting principal's own entries are recorded but never touched: they
/// are what lets the principal restore everything else.
pub struct PermissionSnapshot {
    store: Arc<dyn CollectionStore>,
    principal: String,
    captured: BTreeMap<String, BTreeMap<String, AccessLevel>>,
    log: PublishLog,
}

impl PermissionSnapshot {
    pub fn new(store: Arc<dyn CollectionStore>, principal: impl Into<String>, log: PublishLog) -> Self {
        Self {
            store,
            principal: principal.into(),
            captured: BTreeMap::new(),
            log,
        }
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn is_empty(&self) -> bool {
        self.captured.is_empty()
    }

    pub fn resources(&self) -> impl Iterator<Item = &str> {
        self.captured.keys().map(String::as_str)
    }

    /// Captured entries, resource by resource
    pub fn entries(&self) -> Vec<AccessControlEntry> {
        self.captured
            .iter()
            .flat_map(|(path, acl)| {
                acl.iter()
                    .map(move |(principal, level)| AccessControlEntry::new(path, principal, *level))
            })
            .collect()
    }

    /// Record the current ACLs of `resources`
    ///
    /// Every resource must be owned by the acting principal; the check covers
    /// all of them before anything is recorded. A resource already in the
    /// snapshot is rejected until `restore` clears it.
    pub async fn capture(&mut self, resources: &[String]) -> Result<(), PublishError> {
        let mut pending = BTreeMap::new();

        for resource in resources {
            if self.captured.contains_key(resource) || pending.contains_key(resource) {
                return Err(PublishError::SnapshotExists {
                    resource: resource.clone(),
                    principal: self.principal.clone(),
                });
            }

            let entries = self.store.get_permissions(resource).await?;
            let owner = self.store.owner_of(resource).await?;
            let owns = owner.as_deref() == Some(self.principal.as_str())
                || entries
                    .iter()
                    .any(|e| e.principal == self.principal && e.level == AccessLevel::Own);
            if !owns {
                self.log.error(format!(
                    "LOCK: {} is not owned by {}",
                    resource, self.principal
                ));
                return Err(PublishError::Ownership {
                    resource: resource.clone(),
                    principal: self.principal.clone(),
                });
            }

            let acl: BTreeMap<String, AccessLevel> = entries
                .into_iter()
                .map(|e| (e.principal, e.level))
                .collect();
            pending.insert(resource.clone(), acl);
        }

        self.log
            .debug(format!("captured ACLs of {} resources", pending.len()));
        self.captured.extend(pending);
        Ok(())
    }

    /// Grant every entry; failures are logged and returned, never fatal
    pub async fn apply(&self, entries: &[AccessControlEntry]) -> Vec<AclFailure> {
        let mut failures = Vec::new();
        for entry in entries {
            self.log.debug(format!("ACL set {}", entry));
            if let Err(e) = self.store.set_permission(entry).await {
                self.log.warn(format!("ACL: cannot set {}: {}", entry, e));
                failures.push(AclFailure {
                    path: entry.path.clone(),
                    principal: entry.principal.clone(),
                    message: e.to_string(),
                });
            }
        }
        failures
    }

    /// Put every captured entry back and revoke entries added since capture
    ///
    /// Captured entries of the acting principal are not reissued. Clears the
    /// snapshot, so a second call does nothing.
    pub async fn restore(&mut self) -> Vec<AclFailure> {
        let captured = std::mem::take(&mut self.captured);
        let mut failures = Vec::new();

        for (path, original) in &captured {
            let current = match self.store.get_permissions(path).await {
                Ok(entries) => entries,
                Err(e) => {
                    self.log
                        .error(format!("ACL: cannot read {} for restore: {}", path, e));
                    failures.push(AclFailure {
                        path: path.clone(),
                        principal: self.principal.clone(),
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let mut changes: Vec<AccessControlEntry> = original
                .iter()
                .filter(|(principal, _)| **principal != self.principal)
                .map(|(principal, level)| AccessControlEntry::new(path, principal, *level))
                .collect();
            changes.extend(
                current
                    .iter()
                    .filter(|e| !original.contains_key(&e.principal))
                    .map(AccessControlEntry::revoked),
            );

            failures.extend(self.apply(&changes).await);
        }

        if !captured.is_empty() {
            self.log
                .debug(format!("restored ACLs of {} resources", captured.len()));
        }
        failures
    }
}
