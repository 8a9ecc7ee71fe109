//! Draft Loader - builds repository drafts from configuration
//!
//! # Example
//!
//! ```no_run
//! use collection_publisher::core::{PublishConfig, PublishLog};
//! use collection_publisher::drafts::{DraftKind, DraftLoader};
//! use collection_publisher::security::SecureTokenManager;
//!
//! # fn example(config: &PublishConfig) -> Result<(), collection_publisher::core::PublishError> {
//! let mut tokens = SecureTokenManager::from_process_env();
//! let loader = DraftLoader::new(config);
//! let draft = loader.load_draft(DraftKind::B2Share, &mut tokens, "demo", PublishLog::default())?;
//! println!("publishing to {}", draft.repo_name());
//! # Ok(())
//! # }
//! ```

use super::{B2ShareDraft, CkanDraft, DataverseDraft};
use crate::core::config::PublishConfig;
use crate::core::error::PublishError;
use crate::core::logging::PublishLog;
use crate::core::traits::Draft;
use crate::security::SecureTokenManager;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Repository backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DraftKind {
    B2Share,
    Ckan,
    Dataverse,
}

impl DraftKind {
    /// Get string representation of the backend type
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftKind::B2Share => "b2share",
            DraftKind::Ckan => "ckan",
            DraftKind::Dataverse => "dataverse",
        }
    }
}

impl fmt::Display for DraftKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DraftKind {
    type Err = PublishError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "b2share" => Ok(DraftKind::B2Share),
            "ckan" => Ok(DraftKind::Ckan),
            "dataverse" => Ok(DraftKind::Dataverse),
            other => Err(PublishError::ConfigError(format!(
                "unknown draft type '{}' (expected b2share, ckan or dataverse)",
                other
            ))),
        }
    }
}

/// Builds `Draft` instances from the `drafts` section of a configuration
pub struct DraftLoader<'a> {
    config: &'a PublishConfig,
}

impl<'a> DraftLoader<'a> {
    pub fn new(config: &'a PublishConfig) -> Self {
        Self { config }
    }

    /// Backend type selected by the configuration
    pub fn configured_kind(&self) -> Result<DraftKind, PublishError> {
        match self.config.draft_type.as_deref() {
            Some(kind) => kind.parse(),
            None => Err(PublishError::ConfigError(
                "no draft type configured (set `type` or pass --type)".to_string(),
            )),
        }
    }

    /// Build the draft for `kind`
    ///
    /// `collection_name` names the CKAN dataset when no id is configured.
    pub fn load_draft(
        &self,
        kind: DraftKind,
        tokens: &mut SecureTokenManager,
        collection_name: &str,
        log: PublishLog,
    ) -> Result<Box<dyn Draft>, PublishError> {
        let drafts = &self.config.drafts;
        match kind {
            DraftKind::B2Share => {
                let cfg = drafts.b2share.as_ref().ok_or_else(|| missing_section(kind))?;
                let token = tokens.resolve(kind.as_str(), cfg.api_token.as_ref());
                Ok(Box::new(B2ShareDraft::new(
                    &cfg.api_url,
                    token,
                    &cfg.community,
                    non_empty(cfg.draft_url.as_deref()),
                    log,
                )?))
            }
            DraftKind::Ckan => {
                let cfg = drafts.ckan.as_ref().ok_or_else(|| missing_section(kind))?;
                let token = tokens.resolve(kind.as_str(), cfg.api_token.as_ref());
                let name = match non_empty(cfg.id.as_deref()) {
                    Some(id) => id.to_string(),
                    None => dataset_name(collection_name),
                };
                Ok(Box::new(CkanDraft::new(
                    &cfg.api_url,
                    token,
                    &cfg.org,
                    &name,
                    cfg.group.as_deref(),
                    log,
                )?))
            }
            DraftKind::Dataverse => {
                let cfg = drafts.dataverse.as_ref().ok_or_else(|| missing_section(kind))?;
                let token = tokens.resolve(kind.as_str(), cfg.api_token.as_ref());
                Ok(Box::new(DataverseDraft::new(
                    &cfg.api_url,
                    token,
                    &cfg.alias,
                    non_empty(cfg.draft_url.as_deref()),
                    log,
                )?))
            }
        }
    }
}

fn missing_section(kind: DraftKind) -> PublishError {
    PublishError::ConfigError(format!("missing drafts.{} configuration section", kind))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// CKAN-compatible dataset name derived from a collection name
pub fn dataset_name(collection_name: &str) -> String {
    let mut name = String::new();
    for c in collection_name.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
            name.push(c);
        } else if !name.ends_with('-') {
            name.push('-');
        }
    }
    let name = name.trim_matches('-').to_string();
    if name.is_empty() {
        uuid::Uuid::new_v4().simple().to_string()
    } else {
        name
    }
}
