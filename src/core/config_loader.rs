//! Configuration file loader for collection-publisher
//!
//! This module provides configuration loading, validation, and merging capabilities.

use super::config::*;
use crate::core::error::PublishError;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Configuration file name
pub const CONFIG_FILENAME: &str = ".collection-publisher.yaml";

/// Environment variable pattern (${VAR_NAME})
const ENV_VAR_PATTERN: &str = r"\$\{([A-Z_][A-Z0-9_]*)\}";

/// Draft types the loader accepts
pub const DRAFT_TYPES: [&str; 3] = ["b2share", "ckan", "dataverse"];

/// Configuration load options
#[derive(Debug, Clone, Default)]
pub struct ConfigLoadOptions {
    /// Directory searched for the project config
    pub project_path: PathBuf,

    /// Explicit config file; replaces the project config when set
    pub config_path: Option<PathBuf>,

    /// CLI arguments (highest priority)
    pub cli_args: Option<PublishConfig>,

    /// Environment variables
    pub env: HashMap<String, String>,
}

/// Configuration validation result
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationResult {
    pub valid: bool,
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationWarning>,
}

/// Configuration validation error
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationError {
    /// Field path (e.g., "drafts.b2share.community")
    pub field: String,
    pub message: String,
}

/// Configuration validation warning
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

/// Configuration file loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from multiple sources with priority
    ///
    /// Priority (high to low):
    /// 1. CLI arguments
    /// 2. Environment variables
    /// 3. `--config` file, or ./.collection-publisher.yaml
    /// 4. Global config (~/.collection-publisher.yaml)
    /// 5. Default values
    pub async fn load(options: ConfigLoadOptions) -> Result<PublishConfig, PublishError> {
        let mut configs: Vec<PublishConfig> = vec![PublishConfig::defaults()];

        if let Some(home) = options.env.get("HOME") {
            let global_path = PathBuf::from(home).join(CONFIG_FILENAME);
            if let Some(global_config) = Self::load_config_file(&global_path).await? {
                configs.push(global_config);
            }
        }

        match &options.config_path {
            Some(path) => match Self::load_config_file(path).await? {
                Some(config) => configs.push(config),
                None => {
                    return Err(PublishError::ConfigError(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
            },
            None => {
                let project_path = options.project_path.join(CONFIG_FILENAME);
                if let Some(project_config) = Self::load_config_file(&project_path).await? {
                    configs.push(project_config);
                }
            }
        }

        if let Some(env_config) = Self::load_env_config(&options.env) {
            configs.push(env_config);
        }

        if let Some(cli_config) = options.cli_args {
            configs.push(cli_config);
        }

        let merged = Self::merge_configs(configs);
        Self::expand_env_vars(merged, &options.env)
    }

    /// Load configuration from a YAML file; `None` when it does not exist
    fn load_config_file(
        file_path: &Path,
    ) -> std::pin::Pin<
        Box<
            dyn std::future::Future<Output = Result<Option<PublishConfig>, PublishError>>
                + Send
                + '_,
        >,
    > {
        Box::pin(async move {
            if !fs::try_exists(file_path).await.unwrap_or(false) {
                return Ok(None);
            }

            let content = fs::read_to_string(file_path).await.map_err(|e| {
                PublishError::ConfigError(format!(
                    "failed to read {}: {}",
                    file_path.display(),
                    e
                ))
            })?;

            let config: PublishConfig = serde_yaml::from_str(&content).map_err(|e| {
                PublishError::ConfigError(format!(
                    "failed to parse {}: {}",
                    file_path.display(),
                    e
                ))
            })?;

            if let Some(extends_path) = &config.extends {
                let base_path = file_path
                    .parent()
                    .ok_or_else(|| {
                        PublishError::ConfigError("invalid config file path".to_string())
                    })?
                    .join(extends_path);

                if let Some(base_config) = Self::load_config_file(&base_path).await? {
                    return Ok(Some(Self::merge_configs(vec![base_config, config])));
                }
            }

            Ok(Some(config))
        })
    }

    /// Load configuration from environment variables
    fn load_env_config(env: &HashMap<String, String>) -> Option<PublishConfig> {
        let mut config = PublishConfig::default();
        let mut has_changes = false;

        // PUBLISH_DRAFT_TYPE -> type
        if let Some(draft_type) = env.get("PUBLISH_DRAFT_TYPE") {
            config.draft_type = Some(draft_type.to_lowercase());
            has_changes = true;
        }

        // PUBLISH_BATCH -> publish.batch
        if let Some(batch) = env.get("PUBLISH_BATCH") {
            let batch = matches!(batch.as_str(), "1" | "true" | "yes");
            config.publish = Some(PublishOptionsConfig {
                batch: Some(batch),
                ..Default::default()
            });
            has_changes = true;
        }

        if has_changes { Some(config) } else { None }
    }

    /// Merge multiple configurations, later ones win
    pub fn merge_configs(configs: Vec<PublishConfig>) -> PublishConfig {
        let mut result = PublishConfig::default();

        for config in configs {
            Self::merge_into(&mut result, config);
        }

        result
    }

    fn merge_into(target: &mut PublishConfig, source: PublishConfig) {
        if !source.version.is_empty() {
            target.version = source.version;
        }
        if source.extends.is_some() {
            target.extends = source.extends;
        }
        if source.draft_type.is_some() {
            target.draft_type = source.draft_type;
        }

        if let Some(storage) = source.storage {
            let t = target.storage.get_or_insert_with(StorageConfig::default);
            overlay(&mut t.kind, storage.kind);
            overlay(&mut t.root, storage.root);
            overlay(&mut t.zone, storage.zone);
            overlay(&mut t.user, storage.user);
            overlay(&mut t.collection_prefix, storage.collection_prefix);
            overlay(&mut t.http_endpoint, storage.http_endpoint);
        }

        // Draft sections are replaced as a whole
        overlay(&mut target.drafts.b2share, source.drafts.b2share);
        overlay(&mut target.drafts.ckan, source.drafts.ckan);
        overlay(&mut target.drafts.dataverse, source.drafts.dataverse);

        if let Some(publish) = source.publish {
            let t = target.publish.get_or_insert_with(PublishOptionsConfig::default);
            overlay(&mut t.batch, publish.batch);
            overlay(&mut t.force, publish.force);
            overlay(&mut t.upload, publish.upload);
            overlay(&mut t.max_upload_bytes, publish.max_upload_bytes);
            overlay(&mut t.cleanup, publish.cleanup);
            overlay(&mut t.keep_closed, publish.keep_closed);
            overlay(&mut t.report_collection, publish.report_collection);
            overlay(&mut t.history_file, publish.history_file);
        }

        if let Some(identifiers) = source.identifiers {
            let t = target.identifiers.get_or_insert_with(IdentifiersConfig::default);
            overlay(&mut t.assign_pids, identifiers.assign_pids);
            overlay(&mut t.pid_prefix, identifiers.pid_prefix);
        }

        if let Some(logging) = source.logging {
            let t = target.logging.get_or_insert_with(LoggingConfig::default);
            overlay(&mut t.verbose, logging.verbose);
            overlay(&mut t.color, logging.color);
            overlay(&mut t.report_level, logging.report_level);
        }
    }

    /// Expand `${VAR}` references in URLs, tokens and paths
    fn expand_env_vars(
        mut config: PublishConfig,
        env: &HashMap<String, String>,
    ) -> Result<PublishConfig, PublishError> {
        let pattern = Regex::new(ENV_VAR_PATTERN)
            .map_err(|e| PublishError::ConfigError(format!("invalid env pattern: {}", e)))?;
        let expand = |value: &mut String| *value = Self::expand_string(&pattern, value, env);
        let expand_opt = |value: &mut Option<String>| {
            if let Some(v) = value {
                *v = Self::expand_string(&pattern, v, env);
            }
        };
        let expand_token = |token: &mut Option<ApiToken>| {
            if let Some(t) = token {
                let expanded = Self::expand_string(&pattern, t.expose(), env);
                t.replace(expanded);
            }
        };

        if let Some(storage) = &mut config.storage {
            expand_opt(&mut storage.root);
            expand_opt(&mut storage.user);
            expand_opt(&mut storage.http_endpoint);
        }
        if let Some(b2share) = &mut config.drafts.b2share {
            expand(&mut b2share.api_url);
            expand_token(&mut b2share.api_token);
            expand_opt(&mut b2share.draft_url);
        }
        if let Some(ckan) = &mut config.drafts.ckan {
            expand(&mut ckan.api_url);
            expand_token(&mut ckan.api_token);
        }
        if let Some(dataverse) = &mut config.drafts.dataverse {
            expand(&mut dataverse.api_url);
            expand_token(&mut dataverse.api_token);
            expand_opt(&mut dataverse.draft_url);
        }
        if let Some(publish) = &mut config.publish {
            expand_opt(&mut publish.history_file);
        }

        Ok(config)
    }

    /// Expand environment variables in a single string; unknown ones stay as written
    fn expand_string(pattern: &Regex, input: &str, env: &HashMap<String, String>) -> String {
        pattern
            .replace_all(input, |caps: &regex::Captures| match env.get(&caps[1]) {
                Some(value) => value.clone(),
                None => {
                    tracing::warn!("environment variable {} not found", &caps[1]);
                    caps[0].to_string()
                }
            })
            .into_owned()
    }

    /// Validate configuration
    pub fn validate(config: &PublishConfig) -> ConfigValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if config.version.is_empty() {
            errors.push(ConfigValidationError {
                field: "version".to_string(),
                message: "version is required".to_string(),
            });
        } else if config.version != "1.0" {
            warnings.push(ConfigValidationWarning {
                field: "version".to_string(),
                message: format!("unknown version: {}", config.version),
                suggestion: Some("currently supported version is \"1.0\" only".to_string()),
            });
        }

        match config.draft_type.as_deref() {
            None => errors.push(ConfigValidationError {
                field: "type".to_string(),
                message: format!("draft type is required (one of {})", DRAFT_TYPES.join(", ")),
            }),
            Some(kind) if !DRAFT_TYPES.contains(&kind) => errors.push(ConfigValidationError {
                field: "type".to_string(),
                message: format!("unknown draft type: {}", kind),
            }),
            Some(kind) => Self::validate_draft_section(config, kind, &mut errors, &mut warnings),
        }

        let storage = config.storage_options();
        if storage.kind.unwrap_or_default() == StorageKind::Local && storage.root.is_none() {
            errors.push(ConfigValidationError {
                field: "storage.root".to_string(),
                message: "a local store needs a root directory".to_string(),
            });
        }
        if storage.user.is_none() {
            warnings.push(ConfigValidationWarning {
                field: "storage.user".to_string(),
                message: "no acting principal configured".to_string(),
                suggestion: Some("the USER environment variable is used instead".to_string()),
            });
        }

        let publish = config.publish_options();
        if publish.batch == Some(true) && publish.force == Some(true) {
            warnings.push(ConfigValidationWarning {
                field: "publish.force".to_string(),
                message: "force overrides batch: step failures are ignored".to_string(),
                suggestion: None,
            });
        }

        if let Some(level) = config.logging_options().report_level
            && !matches!(level.as_str(), "error" | "warn" | "info" | "debug")
        {
            errors.push(ConfigValidationError {
                field: "logging.reportLevel".to_string(),
                message: format!("unknown level: {}", level),
            });
        }

        ConfigValidationResult {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    fn validate_draft_section(
        config: &PublishConfig,
        kind: &str,
        errors: &mut Vec<ConfigValidationError>,
        warnings: &mut Vec<ConfigValidationWarning>,
    ) {
        let (api_url, has_token) = match kind {
            "b2share" => match &config.drafts.b2share {
                Some(c) => (c.api_url.as_str(), c.api_token.is_some()),
                None => return Self::missing_section(kind, errors),
            },
            "ckan" => match &config.drafts.ckan {
                Some(c) => (c.api_url.as_str(), c.api_token.is_some()),
                None => return Self::missing_section(kind, errors),
            },
            _ => match &config.drafts.dataverse {
                Some(c) => (c.api_url.as_str(), c.api_token.is_some()),
                None => return Self::missing_section(kind, errors),
            },
        };

        if !api_url.starts_with("http://") && !api_url.starts_with("https://") {
            errors.push(ConfigValidationError {
                field: format!("drafts.{}.apiUrl", kind),
                message: format!("not an HTTP URL: {}", api_url),
            });
        }
        if !has_token {
            warnings.push(ConfigValidationWarning {
                field: format!("drafts.{}.apiToken", kind),
                message: "no API token configured".to_string(),
                suggestion: Some(format!(
                    "set {}_API_TOKEN in the environment",
                    kind.to_uppercase()
                )),
            });
        }
    }

    fn missing_section(kind: &str, errors: &mut Vec<ConfigValidationError>) {
        errors.push(ConfigValidationError {
            field: format!("drafts.{}", kind),
            message: format!("type is {} but the drafts.{} section is missing", kind, kind),
        });
    }
}

fn overlay<T>(target: &mut Option<T>, source: Option<T>) {
    if source.is_some() {
        *target = source;
    }
}
