//! Metadata, ownership and ACL records shared by the bundled stores

use crate::core::error::PublishError;
use crate::core::traits::{AccessControlEntry, AccessLevel, Metadata};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Path → principal → level, used to compare permission states
pub type AclState = BTreeMap<String, BTreeMap<String, AccessLevel>>;

/// Record of one collection or object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub owner: String,

    #[serde(default)]
    pub metadata: Metadata,

    #[serde(default)]
    pub acl: BTreeMap<String, AccessLevel>,
}

impl Node {
    /// New record; the owner holds `own`
    pub fn owned_by(owner: &str) -> Self {
        let mut acl = BTreeMap::new();
        acl.insert(owner.to_string(), AccessLevel::Own);
        Self {
            owner: owner.to_string(),
            metadata: Metadata::new(),
            acl,
        }
    }
}

/// Records keyed by normalized logical path
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    nodes: BTreeMap<String, Node>,
}

impl Catalog {
    pub fn get(&self, path: &str) -> Option<&Node> {
        self.nodes.get(&normalize(path))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.nodes.contains_key(&normalize(path))
    }

    /// Record for `path`, created for `owner` if absent
    pub fn entry(&mut self, path: &str, owner: &str) -> &mut Node {
        self.nodes
            .entry(normalize(path))
            .or_insert_with(|| Node::owned_by(owner))
    }

    pub fn get_mut(&mut self, path: &str) -> Result<&mut Node, PublishError> {
        self.nodes
            .get_mut(&normalize(path))
            .ok_or_else(|| PublishError::storage(format!("no such path: {}", path)))
    }

    pub fn permissions(&self, path: &str) -> Vec<AccessControlEntry> {
        let path = normalize(path);
        match self.nodes.get(&path) {
            Some(node) => node
                .acl
                .iter()
                .map(|(principal, level)| AccessControlEntry::new(path.clone(), principal, *level))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn set_permission(&mut self, entry: &AccessControlEntry) -> Result<(), PublishError> {
        let node = self.get_mut(&entry.path)?;
        if entry.level == AccessLevel::Null {
            node.acl.remove(&entry.principal);
        } else {
            node.acl.insert(entry.principal.clone(), entry.level);
        }
        Ok(())
    }

    /// Every ACL in the catalog
    pub fn acl_state(&self) -> AclState {
        self.nodes
            .iter()
            .map(|(path, node)| (path.clone(), node.acl.clone()))
            .collect()
    }

    /// Paths directly below `collection`
    pub fn children<'a>(&'a self, collection: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.nodes
            .keys()
            .filter(move |path| parent_of(path) == Some(collection))
            .map(String::as_str)
    }
}

/// Absolute path without trailing slash
pub fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

pub fn parent_of(path: &str) -> Option<&str> {
    match path.rsplit_once('/') {
        Some(("", "")) | None => None,
        Some(("", _)) => Some("/"),
        Some((parent, _)) => Some(parent),
    }
}

pub fn name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
