//! Handle over one collection in a store
//!
//! Caches the listing and the collection metadata. Metadata updates go
//! through to the store first and are then reflected in the cache.

use crate::core::error::PublishError;
use crate::core::logging::PublishLog;
use crate::core::traits::{AccessLevel, CollectionStore, Identifiers, Member, Metadata};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{self, AsyncWriteExt, BufWriter};

use super::catalog::{name_of, normalize};

pub struct Collection {
    store: Arc<dyn CollectionStore>,
    path: String,
    members: Vec<Member>,
    subcollections: Vec<String>,
    metadata: Metadata,
    owner: Option<String>,
    log: PublishLog,
}

impl Collection {
    /// Load listing, metadata and owner of `path`
    pub async fn open(
        store: Arc<dyn CollectionStore>,
        path: &str,
        log: PublishLog,
    ) -> Result<Self, PublishError> {
        let path = normalize(path);
        let listing = store.list(&path).await?;
        let metadata = store.get_metadata(&path).await?;
        let owner = store.owner_of(&path).await?;
        log.debug(format!(
            "opened {} ({} members, {} sub-collections)",
            path,
            listing.members.len(),
            listing.subcollections.len()
        ));

        Ok(Self {
            store,
            path,
            members: listing.members,
            subcollections: listing.subcollections,
            metadata,
            owner,
            log,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        name_of(&self.path)
    }

    pub fn uri(&self) -> String {
        self.store.uri(&self.path)
    }

    pub fn store(&self) -> &Arc<dyn CollectionStore> {
        &self.store
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn subcollections(&self) -> &[String] {
        &self.subcollections
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// TITLE metadata, falling back to the collection name
    pub fn title(&self) -> &str {
        self.metadata
            .get("TITLE")
            .map(String::as_str)
            .unwrap_or_else(|| self.name())
    }

    /// Total size of the data members in bytes
    pub fn size(&self) -> u64 {
        self.members.iter().map(|m| m.size).sum()
    }

    /// Collection and member paths, collection first
    pub fn resources(&self) -> Vec<String> {
        std::iter::once(self.path.clone())
            .chain(self.members.iter().map(|m| m.path.clone()))
            .collect()
    }

    /// Structural problems that keep the collection from being published
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !self.subcollections.is_empty() {
            problems.push(format!(
                "collection contains sub-collections: {}",
                self.subcollections.join(", ")
            ));
        }
        if self.members.is_empty() {
            problems.push("collection does not contain data".to_string());
        }
        for problem in &problems {
            self.log.error(format!("PUBLISH: {}", problem));
        }
        problems
    }

    /// Set a collection metadata entry, replacing an existing value
    pub async fn update_metadata(&mut self, key: &str, value: &str) -> Result<(), PublishError> {
        if let Some(existing) = self.metadata.get(key) {
            self.log.warn(format!(
                "METADATA: collection already has {}={}, updating",
                key, existing
            ));
        }
        self.store.set_metadata(&self.path, key, value).await?;
        self.metadata.insert(key.to_string(), value.to_string());
        self.log.info(format!("METADATA ADDED {{{}={}}}", key, value));
        Ok(())
    }

    /// Re-read the collection metadata from the store
    pub async fn refresh_metadata(&mut self) -> Result<(), PublishError> {
        self.metadata = self.store.get_metadata(&self.path).await?;
        Ok(())
    }

    pub async fn set_member_metadata(
        &self,
        member: &Member,
        key: &str,
        value: &str,
    ) -> Result<(), PublishError> {
        self.store.set_metadata(&member.path, key, value).await
    }

    /// Values of `key` on the collection and its members, by path
    pub async fn metadata_all(&self, key: &str) -> Result<Identifiers, PublishError> {
        let mut values = Identifiers::new();
        if let Some(value) = self.metadata.get(key) {
            values.insert(self.path.clone(), value.clone());
        }
        for member in &self.members {
            let metadata = self.store.get_metadata(&member.path).await?;
            if let Some(value) = metadata.get(key) {
                values.insert(member.path.clone(), value.clone());
            }
        }
        Ok(values)
    }

    /// Principals owning the collection or any of its members
    pub async fn owners(&self) -> Result<BTreeSet<String>, PublishError> {
        let mut owners: BTreeSet<String> = self.owner.iter().cloned().collect();
        for member in &self.members {
            if !member.owner.is_empty() {
                owners.insert(member.owner.clone());
            }
        }
        for entry in self.store.get_permissions(&self.path).await? {
            if entry.level == AccessLevel::Own {
                owners.insert(entry.principal);
            }
        }
        Ok(owners)
    }

    /// Stream one member into `dir`; returns the local file path
    pub async fn download_member(&self, member: &Member, dir: &Path) -> Result<PathBuf, PublishError> {
        let target = dir.join(&member.name);
        self.log.debug(format!(
            "download {} -> {}",
            member.path,
            target.display()
        ));

        let mut reader = self.store.read_object(&member.path).await?;
        let mut writer = BufWriter::new(File::create(&target).await?);
        io::copy(&mut reader, &mut writer).await?;
        writer.flush().await?;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use tempfile::TempDir;

    fn demo_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new("zoneA", "alice"));
        store
            .add_collection("/zoneA/home/pub/demo", "alice")
            .add_object("/zoneA/home/pub/demo/a.txt", "alice", b"aaa")
            .add_object("/zoneA/home/pub/demo/b.txt", "bob", b"bb")
            .add_metadata("/zoneA/home/pub/demo", "TITLE", "Demo")
            .add_metadata("/zoneA/home/pub/demo/b.txt", "TICKET", "t-b");
        store
    }

    #[tokio::test]
    async fn test_open_and_inspect() {
        let store = demo_store();
        let collection = Collection::open(store, "/zoneA/home/pub/demo/", PublishLog::default())
            .await
            .unwrap();

        assert_eq!(collection.path(), "/zoneA/home/pub/demo");
        assert_eq!(collection.name(), "demo");
        assert_eq!(collection.title(), "Demo");
        assert_eq!(collection.size(), 5);
        assert_eq!(collection.resources().len(), 3);
        assert!(collection.validate().is_empty());
    }

    #[tokio::test]
    async fn test_validate_empty_and_nested() {
        let store = Arc::new(MemoryStore::new("zoneA", "alice"));
        store.add_collection("/zoneA/home/pub/nested/sub", "alice");
        let log = PublishLog::default();

        let collection = Collection::open(store, "/zoneA/home/pub/nested", log.clone())
            .await
            .unwrap();
        let problems = collection.validate();

        assert_eq!(problems.len(), 2);
        assert!(log.lines().iter().any(|l| l.contains("sub-collections")));
    }

    #[tokio::test]
    async fn test_update_metadata_overwrites() {
        let store = demo_store();
        let log = PublishLog::default();
        let mut collection = Collection::open(store.clone(), "/zoneA/home/pub/demo", log.clone())
            .await
            .unwrap();

        collection.update_metadata("TITLE", "Renamed").await.unwrap();

        assert_eq!(collection.title(), "Renamed");
        assert_eq!(
            store.metadata_of("/zoneA/home/pub/demo").get("TITLE").map(String::as_str),
            Some("Renamed")
        );
        assert!(log.lines().iter().any(|l| l.contains("WARN")));
    }

    #[tokio::test]
    async fn test_metadata_all_and_owners() {
        let store = demo_store();
        store.add_metadata("/zoneA/home/pub/demo", "TICKET", "t-coll");
        let collection = Collection::open(store, "/zoneA/home/pub/demo", PublishLog::default())
            .await
            .unwrap();

        let tickets = collection.metadata_all("TICKET").await.unwrap();
        assert_eq!(tickets.len(), 2);
        assert_eq!(tickets["/zoneA/home/pub/demo/b.txt"], "t-b");

        let owners = collection.owners().await.unwrap();
        assert_eq!(owners.into_iter().collect::<Vec<_>>(), vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_download_member() {
        let store = demo_store();
        let collection = Collection::open(store, "/zoneA/home/pub/demo", PublishLog::default())
            .await
            .unwrap();
        let dir = TempDir::new().unwrap();

        let member = &collection.members()[0];
        let local = collection.download_member(member, dir.path()).await.unwrap();

        assert_eq!(std::fs::read(local).unwrap(), b"aaa");
    }
}
