//! Collection store backed by a local directory tree
//!
//! The logical path `/<zone>/home/pub/demo` maps to `<root>/home/pub/demo`.
//! Collections are directories, members are regular files. Metadata, owners
//! and ACLs live in a JSON catalog at the root that is rewritten atomically
//! after every change. Paths without a catalog record belong to the store's
//! user.

use super::catalog::{Catalog, Node, normalize};
use crate::core::error::PublishError;
use crate::core::traits::{
    AccessControlEntry, CollectionListing, CollectionStore, Member, Metadata, ObjectReader,
};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use walkdir::WalkDir;

const CATALOG_FILE: &str = ".catalog.json";

#[derive(Debug)]
pub struct LocalStore {
    root: PathBuf,
    zone: String,
    user: String,
    catalog: Mutex<Catalog>,
}

impl LocalStore {
    /// Open (or initialize) a store rooted at `root`
    pub async fn open(
        root: impl Into<PathBuf>,
        zone: impl Into<String>,
        user: impl Into<String>,
    ) -> Result<Self, PublishError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;

        let catalog_path = root.join(CATALOG_FILE);
        let catalog = if fs::try_exists(&catalog_path).await? {
            let content = fs::read_to_string(&catalog_path).await?;
            serde_json::from_str(&content).map_err(|e| {
                PublishError::storage(format!("corrupt catalog {}: {}", catalog_path.display(), e))
            })?
        } else {
            Catalog::default()
        };

        Ok(Self {
            root,
            zone: zone.into(),
            user: user.into(),
            catalog: Mutex::new(catalog),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a logical path below the zone to a filesystem path
    fn local_path(&self, path: &str) -> Result<PathBuf, PublishError> {
        let path = normalize(path);
        let zone_prefix = format!("/{}", self.zone);
        let relative = match path.strip_prefix(&zone_prefix) {
            Some("") => "",
            Some(rest) if rest.starts_with('/') => &rest[1..],
            _ => {
                return Err(PublishError::storage(format!(
                    "{} is outside zone {}",
                    path, self.zone
                )));
            }
        };

        let relative = Path::new(relative);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(PublishError::storage(format!("invalid path: {}", path)));
        }
        Ok(self.root.join(relative))
    }

    async fn exists(&self, path: &str) -> Result<bool, PublishError> {
        let local = self.local_path(path)?;
        Ok(fs::try_exists(&local).await?)
    }

    async fn ensure_exists(&self, path: &str) -> Result<(), PublishError> {
        if self.exists(path).await? {
            Ok(())
        } else {
            Err(PublishError::storage(format!("no such path: {}", path)))
        }
    }

    /// Persist the catalog: write a temp file, then rename over the old one
    async fn save(&self, catalog: &Catalog) -> Result<(), PublishError> {
        let content = serde_json::to_string_pretty(catalog)
            .map_err(|e| PublishError::storage(format!("cannot encode catalog: {}", e)))?;
        let target = self.root.join(CATALOG_FILE);
        let temp = self.root.join(format!("{}.tmp", CATALOG_FILE));
        fs::write(&temp, content).await?;
        fs::rename(&temp, &target).await?;
        Ok(())
    }

    fn implicit_node(&self) -> Node {
        Node::owned_by(&self.user)
    }
}

#[async_trait]
impl CollectionStore for LocalStore {
    fn zone(&self) -> &str {
        &self.zone
    }

    fn uri(&self, path: &str) -> String {
        match self.local_path(path) {
            Ok(local) => format!("file://{}", local.display()),
            Err(_) => normalize(path),
        }
    }

    async fn list(&self, collection: &str) -> Result<CollectionListing, PublishError> {
        let collection = normalize(collection);
        let dir = self.local_path(&collection)?;
        if !fs::metadata(&dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(PublishError::storage(format!("no such collection: {}", collection)));
        }

        let catalog = self.catalog.lock().await;
        let mut listing = CollectionListing::default();
        let walker = WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name();
        for entry in walker {
            let entry = entry.map_err(|e| PublishError::storage(e.to_string()))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let path = format!("{}/{}", collection, name);

            if entry.file_type().is_dir() {
                listing.subcollections.push(path);
            } else if entry.file_type().is_file() {
                let size = entry
                    .metadata()
                    .map_err(|e| PublishError::storage(e.to_string()))?
                    .len();
                let owner = catalog
                    .get(&path)
                    .map(|node| node.owner.clone())
                    .unwrap_or_else(|| self.user.clone());
                listing.members.push(Member {
                    path,
                    name,
                    size,
                    owner,
                });
            }
        }
        Ok(listing)
    }

    async fn owner_of(&self, path: &str) -> Result<Option<String>, PublishError> {
        if let Some(node) = self.catalog.lock().await.get(path) {
            return Ok(Some(node.owner.clone()));
        }
        if self.exists(path).await? {
            Ok(Some(self.user.clone()))
        } else {
            Ok(None)
        }
    }

    async fn get_metadata(&self, path: &str) -> Result<Metadata, PublishError> {
        if let Some(node) = self.catalog.lock().await.get(path) {
            return Ok(node.metadata.clone());
        }
        self.ensure_exists(path).await?;
        Ok(Metadata::new())
    }

    async fn set_metadata(&self, path: &str, key: &str, value: &str) -> Result<(), PublishError> {
        self.ensure_exists(path).await?;
        let mut catalog = self.catalog.lock().await;
        catalog
            .entry(path, &self.user)
            .metadata
            .insert(key.to_string(), value.to_string());
        self.save(&catalog).await
    }

    async fn remove_metadata(&self, path: &str, key: &str) -> Result<(), PublishError> {
        self.ensure_exists(path).await?;
        let mut catalog = self.catalog.lock().await;
        if let Ok(node) = catalog.get_mut(path)
            && node.metadata.remove(key).is_some()
        {
            self.save(&catalog).await?;
        }
        Ok(())
    }

    async fn get_permissions(&self, path: &str) -> Result<Vec<AccessControlEntry>, PublishError> {
        {
            let catalog = self.catalog.lock().await;
            if catalog.contains(path) {
                return Ok(catalog.permissions(path));
            }
        }
        self.ensure_exists(path).await?;
        let implicit = self.implicit_node();
        Ok(implicit
            .acl
            .iter()
            .map(|(principal, level)| AccessControlEntry::new(normalize(path), principal, *level))
            .collect())
    }

    async fn set_permission(&self, entry: &AccessControlEntry) -> Result<(), PublishError> {
        self.ensure_exists(&entry.path).await?;
        let mut catalog = self.catalog.lock().await;
        catalog.entry(&entry.path, &self.user);
        catalog.set_permission(entry)?;
        self.save(&catalog).await
    }

    async fn read_object(&self, path: &str) -> Result<ObjectReader, PublishError> {
        let local = self.local_path(path)?;
        let file = fs::File::open(&local)
            .await
            .map_err(|e| PublishError::storage(format!("cannot open {}: {}", path, e)))?;
        Ok(Box::new(file))
    }

    async fn create_object(&self, path: &str) -> Result<(), PublishError> {
        let local = self.local_path(path)?;
        let created = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&local)
            .await;
        match created {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(PublishError::storage(format!("object already exists: {}", path)));
            }
            Err(e) => return Err(PublishError::storage(format!("cannot create {}: {}", path, e))),
        }

        let mut catalog = self.catalog.lock().await;
        catalog.entry(path, &self.user);
        self.save(&catalog).await
    }

    async fn write_object(&self, path: &str, data: &[u8]) -> Result<(), PublishError> {
        let local = self.local_path(path)?;
        if !fs::try_exists(&local).await? {
            return Err(PublishError::storage(format!("no such object: {}", path)));
        }
        fs::write(&local, data).await?;
        Ok(())
    }
}
