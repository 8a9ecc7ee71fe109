//! Configuration structures and types for collection-publisher
//!
//! This module provides type-safe configuration management with serde support.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Root configuration object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PublishConfig {
    /// Schema version
    #[serde(default)]
    pub version: String,

    /// Extend from base configuration file (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,

    /// Draft backend to publish to: b2share, ckan or dataverse
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub draft_type: Option<String>,

    /// Storage holding the collections
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageConfig>,

    /// Repository-specific configurations
    #[serde(default)]
    pub drafts: DraftConfigs,

    /// Publish options (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish: Option<PublishOptionsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifiers: Option<IdentifiersConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Storage backend kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Local,
    Memory,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StorageConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<StorageKind>,

    /// Root directory of a local store
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,

    /// Zone name; logical paths start with `/<zone>`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,

    /// Acting principal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Prefix joined to relative collection names given on the command line
    #[serde(skip_serializing_if = "Option::is_none", rename = "collectionPrefix")]
    pub collection_prefix: Option<String>,

    /// Public HTTP endpoint used to build references to members
    #[serde(skip_serializing_if = "Option::is_none", rename = "httpEndpoint")]
    pub http_endpoint: Option<String>,
}

/// API token read from configuration; never printed
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ApiToken(String);

impl ApiToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_secret(&self) -> SecretString {
        SecretString::new(self.0.clone().into())
    }

    pub(crate) fn expose(&self) -> &str {
        &self.0
    }

    pub(crate) fn replace(&mut self, value: String) {
        self.0 = value;
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiToken(****)")
    }
}

/// Repository configurations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DraftConfigs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub b2share: Option<B2ShareConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ckan: Option<CkanConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataverse: Option<DataverseConfig>,
}

/// B2SHARE configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct B2ShareConfig {
    /// Base API URL, e.g. `https://trng-b2share.eudat.eu/api`
    #[serde(rename = "apiUrl")]
    pub api_url: String,

    /// Falls back to the B2SHARE_API_TOKEN environment variable
    #[serde(skip_serializing_if = "Option::is_none", rename = "apiToken")]
    pub api_token: Option<ApiToken>,

    /// Community id new records are created in
    pub community: String,

    /// Resume an existing draft instead of creating one
    #[serde(skip_serializing_if = "Option::is_none", rename = "draftUrl")]
    pub draft_url: Option<String>,
}

/// CKAN configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CkanConfig {
    #[serde(rename = "apiUrl")]
    pub api_url: String,

    #[serde(skip_serializing_if = "Option::is_none", rename = "apiToken")]
    pub api_token: Option<ApiToken>,

    /// Owner organization
    pub org: String,

    /// Dataset name; derived from the collection name when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// Dataverse configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataverseConfig {
    #[serde(rename = "apiUrl")]
    pub api_url: String,

    #[serde(skip_serializing_if = "Option::is_none", rename = "apiToken")]
    pub api_token: Option<ApiToken>,

    /// Dataverse alias new datasets are created in
    pub alias: String,

    /// Persistent id of an existing draft dataset
    #[serde(skip_serializing_if = "Option::is_none", rename = "draftUrl")]
    pub draft_url: Option<String>,
}

/// Publish options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PublishOptionsConfig {
    /// Never prompt; step failures abort
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<bool>,

    /// Publish despite step failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,

    /// Upload data members when the backend accepts data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload: Option<bool>,

    /// Collections above this size are published without data
    #[serde(skip_serializing_if = "Option::is_none", rename = "maxUploadBytes")]
    pub max_upload_bytes: Option<u64>,

    /// Remove downloaded members after upload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<bool>,

    /// Keep the collection read-only after a successful publish
    #[serde(skip_serializing_if = "Option::is_none", rename = "keepClosed")]
    pub keep_closed: Option<bool>,

    /// Collection reports are written to; defaults to `/<zone>/home/public`
    #[serde(skip_serializing_if = "Option::is_none", rename = "reportCollection")]
    pub report_collection: Option<String>,

    /// Local publish history file
    #[serde(skip_serializing_if = "Option::is_none", rename = "historyFile")]
    pub history_file: Option<String>,
}

/// Identifier assignment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct IdentifiersConfig {
    /// Mint PIDs for the collection and its members
    #[serde(skip_serializing_if = "Option::is_none", rename = "assignPids")]
    pub assign_pids: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none", rename = "pidPrefix")]
    pub pid_prefix: Option<String>,
}

/// Logging options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LoggingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<bool>,

    /// Lowest level copied into the report: error, warn, info or debug
    #[serde(skip_serializing_if = "Option::is_none", rename = "reportLevel")]
    pub report_level: Option<String>,
}

impl PublishConfig {
    /// Built-in defaults, the lowest configuration layer
    pub fn defaults() -> Self {
        Self {
            version: "1.0".to_string(),
            storage: Some(StorageConfig {
                kind: Some(StorageKind::Local),
                zone: Some("zone".to_string()),
                ..Default::default()
            }),
            publish: Some(PublishOptionsConfig {
                batch: Some(false),
                force: Some(false),
                upload: Some(true),
                cleanup: Some(true),
                keep_closed: Some(false),
                ..Default::default()
            }),
            identifiers: Some(IdentifiersConfig {
                assign_pids: Some(false),
                pid_prefix: None,
            }),
            logging: Some(LoggingConfig {
                verbose: Some(false),
                color: Some(true),
                report_level: Some("info".to_string()),
            }),
            ..Default::default()
        }
    }

    pub fn publish_options(&self) -> PublishOptionsConfig {
        self.publish.clone().unwrap_or_default()
    }

    pub fn storage_options(&self) -> StorageConfig {
        self.storage.clone().unwrap_or_default()
    }

    pub fn logging_options(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    pub fn identifier_options(&self) -> IdentifiersConfig {
        self.identifiers.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_b2share_config() {
        let yaml = r#"
version: "1.0"
type: b2share
storage:
  root: /srv/grid
  zone: zoneA
  user: alice
drafts:
  b2share:
    apiUrl: https://b2share.example.org/api
    apiToken: secret-token
    community: e9b9792e
publish:
  batch: true
  maxUploadBytes: 1048576
"#;

        let config: PublishConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.draft_type.as_deref(), Some("b2share"));
        assert_eq!(config.storage_options().zone.as_deref(), Some("zoneA"));

        let b2share = config.drafts.b2share.as_ref().unwrap();
        assert_eq!(b2share.community, "e9b9792e");
        assert_eq!(b2share.api_token.as_ref().unwrap().expose(), "secret-token");
        assert_eq!(config.publish_options().max_upload_bytes, Some(1048576));
    }

    #[test]
    fn test_api_token_is_not_debug_printed() {
        let config = CkanConfig {
            api_url: "https://ckan.example.org/api/3/action".to_string(),
            api_token: Some(ApiToken::new("very-secret")),
            org: "eudat".to_string(),
            id: None,
            group: None,
        };

        let debug = format!("{:?}", config);
        assert!(!debug.contains("very-secret"));
        assert!(debug.contains("****"));
    }

    #[test]
    fn test_defaults() {
        let config = PublishConfig::defaults();

        assert_eq!(config.version, "1.0");
        assert_eq!(config.publish_options().cleanup, Some(true));
        assert_eq!(config.storage_options().kind, Some(StorageKind::Local));
        assert!(config.draft_type.is_none());
    }
}
