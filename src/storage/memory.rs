//! In-memory collection store

use super::catalog::{AclState, Catalog, name_of, normalize, parent_of};
use crate::core::error::PublishError;
use crate::core::traits::{
    AccessControlEntry, AccessLevel, CollectionListing, CollectionStore, Member, Metadata,
    ObjectReader,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Cursor;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemoryState {
    catalog: Catalog,
    collections: BTreeSet<String>,
    objects: BTreeMap<String, Vec<u8>>,
}

/// Store keeping everything in process memory
///
/// Objects created through the trait are owned by the store's user.
#[derive(Debug)]
pub struct MemoryStore {
    zone: String,
    user: String,
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new(zone: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            zone: zone.into(),
            user: user.into(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Add a collection (and its missing parents) owned by `owner`
    pub fn add_collection(&self, path: &str, owner: &str) -> &Self {
        let path = normalize(path);
        let mut state = self.state();
        let mut current = Some(path.as_str());
        while let Some(p) = current {
            if p == "/" {
                break;
            }
            state.collections.insert(p.to_string());
            state.catalog.entry(p, owner);
            current = parent_of(p);
        }
        self
    }

    /// Add an object with content; the parent collection is created if needed
    pub fn add_object(&self, path: &str, owner: &str, data: &[u8]) -> &Self {
        let path = normalize(path);
        if let Some(parent) = parent_of(&path) {
            self.add_collection(parent, owner);
        }
        let mut state = self.state();
        state.catalog.entry(&path, owner);
        state.objects.insert(path, data.to_vec());
        self
    }

    pub fn add_metadata(&self, path: &str, key: &str, value: &str) -> &Self {
        if let Ok(node) = self.state().catalog.get_mut(path) {
            node.metadata.insert(key.to_string(), value.to_string());
        }
        self
    }

    pub fn grant(&self, path: &str, principal: &str, level: AccessLevel) -> &Self {
        let _ = self
            .state()
            .catalog
            .set_permission(&AccessControlEntry::new(path, principal, level));
        self
    }

    /// Every ACL held by the store
    pub fn acl_state(&self) -> AclState {
        self.state().catalog.acl_state()
    }

    pub fn object_data(&self, path: &str) -> Option<Vec<u8>> {
        self.state().objects.get(&normalize(path)).cloned()
    }

    pub fn metadata_of(&self, path: &str) -> Metadata {
        self.state()
            .catalog
            .get(path)
            .map(|node| node.metadata.clone())
            .unwrap_or_default()
    }

    /// Object paths directly below `collection`
    pub fn objects_in(&self, collection: &str) -> Vec<String> {
        let collection = normalize(collection);
        self.state()
            .objects
            .keys()
            .filter(|path| parent_of(path) == Some(collection.as_str()))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CollectionStore for MemoryStore {
    fn zone(&self) -> &str {
        &self.zone
    }

    fn uri(&self, path: &str) -> String {
        format!("memory://{}{}", self.zone, normalize(path))
    }

    async fn list(&self, collection: &str) -> Result<CollectionListing, PublishError> {
        let collection = normalize(collection);
        let state = self.state();
        if !state.collections.contains(&collection) {
            return Err(PublishError::storage(format!("no such collection: {}", collection)));
        }

        let mut listing = CollectionListing::default();
        for child in state.catalog.children(&collection) {
            if state.collections.contains(child) {
                listing.subcollections.push(child.to_string());
            } else if let Some(data) = state.objects.get(child) {
                listing.members.push(Member {
                    path: child.to_string(),
                    name: name_of(child).to_string(),
                    size: data.len() as u64,
                    owner: state
                        .catalog
                        .get(child)
                        .map(|node| node.owner.clone())
                        .unwrap_or_default(),
                });
            }
        }
        Ok(listing)
    }

    async fn owner_of(&self, path: &str) -> Result<Option<String>, PublishError> {
        Ok(self.state().catalog.get(path).map(|node| node.owner.clone()))
    }

    async fn get_metadata(&self, path: &str) -> Result<Metadata, PublishError> {
        match self.state().catalog.get(path) {
            Some(node) => Ok(node.metadata.clone()),
            None => Err(PublishError::storage(format!("no such path: {}", path))),
        }
    }

    async fn set_metadata(&self, path: &str, key: &str, value: &str) -> Result<(), PublishError> {
        let mut state = self.state();
        let node = state.catalog.get_mut(path)?;
        node.metadata.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_metadata(&self, path: &str, key: &str) -> Result<(), PublishError> {
        let mut state = self.state();
        state.catalog.get_mut(path)?.metadata.remove(key);
        Ok(())
    }

    async fn get_permissions(&self, path: &str) -> Result<Vec<AccessControlEntry>, PublishError> {
        let state = self.state();
        if !state.catalog.contains(path) {
            return Err(PublishError::storage(format!("no such path: {}", path)));
        }
        Ok(state.catalog.permissions(path))
    }

    async fn set_permission(&self, entry: &AccessControlEntry) -> Result<(), PublishError> {
        self.state().catalog.set_permission(entry)
    }

    async fn read_object(&self, path: &str) -> Result<ObjectReader, PublishError> {
        match self.state().objects.get(&normalize(path)) {
            Some(data) => Ok(Box::new(Cursor::new(data.clone()))),
            None => Err(PublishError::storage(format!("no such object: {}", path))),
        }
    }

    async fn create_object(&self, path: &str) -> Result<(), PublishError> {
        let path = normalize(path);
        let mut state = self.state();
        if state.catalog.contains(&path) {
            return Err(PublishError::storage(format!("object already exists: {}", path)));
        }
        match parent_of(&path) {
            Some(parent) if state.collections.contains(parent) => {}
            _ => return Err(PublishError::storage(format!("no parent collection for {}", path))),
        }
        let user = self.user.clone();
        state.catalog.entry(&path, &user);
        state.objects.insert(path, Vec::new());
        Ok(())
    }

    async fn write_object(&self, path: &str, data: &[u8]) -> Result<(), PublishError> {
        match self.state().objects.get_mut(&normalize(path)) {
            Some(content) => {
                *content = data.to_vec();
                Ok(())
            }
            None => Err(PublishError::storage(format!("no such object: {}", path))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn demo_store() -> MemoryStore {
        let store = MemoryStore::new("zoneA", "alice");
        store
            .add_collection("/zoneA/home/pub/demo", "alice")
            .add_object("/zoneA/home/pub/demo/a.txt", "alice", b"aaa")
            .add_object("/zoneA/home/pub/demo/b.txt", "alice", b"bb")
            .add_metadata("/zoneA/home/pub/demo", "TITLE", "Demo");
        store
    }

    #[tokio::test]
    async fn test_list_members() {
        let store = demo_store();
        store.add_collection("/zoneA/home/pub/demo/sub", "alice");

        let listing = store.list("/zoneA/home/pub/demo").await.unwrap();
        assert_eq!(listing.members.len(), 2);
        assert_eq!(listing.members[0].name, "a.txt");
        assert_eq!(listing.members[0].size, 3);
        assert_eq!(listing.subcollections, vec!["/zoneA/home/pub/demo/sub"]);
    }

    #[tokio::test]
    async fn test_metadata_last_write_wins() {
        let store = demo_store();
        let path = "/zoneA/home/pub/demo";

        store.set_metadata(path, "TITLE", "Other").await.unwrap();
        store.set_metadata(path, "CREATOR", "Alice").await.unwrap();
        let metadata = store.get_metadata(path).await.unwrap();

        assert_eq!(metadata.get("TITLE").map(String::as_str), Some("Other"));
        assert_eq!(metadata.len(), 2);

        store.remove_metadata(path, "CREATOR").await.unwrap();
        assert_eq!(store.get_metadata(path).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_object_rejects_existing() {
        let store = demo_store();

        store.create_object("/zoneA/home/pub/demo/report").await.unwrap();
        let err = store.create_object("/zoneA/home/pub/demo/report").await.unwrap_err();
        assert!(err.to_string().contains("already exists"));

        store.write_object("/zoneA/home/pub/demo/report", b"done").await.unwrap();
        assert_eq!(store.object_data("/zoneA/home/pub/demo/report").unwrap(), b"done");
        assert_eq!(
            store.owner_of("/zoneA/home/pub/demo/report").await.unwrap().as_deref(),
            Some("alice")
        );
    }

    #[tokio::test]
    async fn test_read_object_streams_content() {
        let store = demo_store();

        let mut reader = store.read_object("/zoneA/home/pub/demo/a.txt").await.unwrap();
        let mut content = String::new();
        reader.read_to_string(&mut content).await.unwrap();
        assert_eq!(content, "aaa");
    }

    #[tokio::test]
    async fn test_unknown_collection() {
        let store = demo_store();
        assert!(store.list("/zoneA/home/none").await.is_err());
        assert!(store.get_permissions("/zoneA/home/none").await.is_err());
    }
}
