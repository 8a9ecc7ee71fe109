//! Secure token manager with memory-safe handling and masking capabilities
//!
//! This module resolves repository API tokens from configuration or the
//! environment, using the `secrecy` crate to prevent accidental token exposure
//! in logs, reports or memory dumps.

use crate::core::config::ApiToken;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;

/// Supported repositories with their environment variable names
const REPOSITORY_TOKENS: &[(&str, &str)] = &[
    ("b2share", "B2SHARE_API_TOKEN"),
    ("ckan", "CKAN_API_TOKEN"),
    ("dataverse", "DATAVERSE_API_TOKEN"),
];

/// Secure token manager for repository authentication
///
/// Every token handed out is remembered so that it can be masked in any text
/// leaving the process.
///
/// # Examples
///
/// ```
/// use collection_publisher::security::SecureTokenManager;
/// use std::collections::HashMap;
///
/// let mut env = HashMap::new();
/// env.insert("CKAN_API_TOKEN".to_string(), "ckan-secret-token".to_string());
/// let mut manager = SecureTokenManager::new(env);
///
/// assert!(manager.resolve("ckan", None).is_some());
/// assert_eq!(manager.mask_tokens_in_string("key=ckan-secret-token"), "key=cka...ken");
/// ```
#[derive(Default)]
pub struct SecureTokenManager {
    repository_map: HashMap<String, String>,
    env: HashMap<String, String>,
    issued: Vec<SecretString>,
}

impl SecureTokenManager {
    /// Creates a manager reading tokens from the given environment
    pub fn new(env: HashMap<String, String>) -> Self {
        let repository_map = REPOSITORY_TOKENS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        Self {
            repository_map,
            env,
            issued: Vec::new(),
        }
    }

    /// Creates a manager over the process environment
    pub fn from_process_env() -> Self {
        Self::new(std::env::vars().collect())
    }

    /// Retrieves a token for the repository from the environment
    ///
    /// Returns `None` if the repository is not supported or the token is not set.
    pub fn get_token(&self, repository: &str) -> Option<SecretString> {
        let token_name = self.repository_map.get(&repository.to_lowercase())?;
        let token_value = self.env.get(token_name)?;
        if token_value.is_empty() {
            return None;
        }
        Some(SecretString::new(token_value.clone().into()))
    }

    /// Token for a repository: the configured one wins over the environment
    pub fn resolve(&mut self, repository: &str, configured: Option<&ApiToken>) -> Option<SecretString> {
        let token = match configured {
            Some(token) if !token.is_empty() => Some(token.to_secret()),
            _ => self.get_token(repository),
        }?;
        self.issued
            .push(SecretString::new(token.expose_secret().to_string().into()));
        Some(token)
    }

    /// Checks if a token is set for the repository
    pub fn has_token(&self, repository: &str) -> bool {
        self.get_token(repository).is_some()
    }

    /// Masks a token for safe logging
    ///
    /// Shows only the first 3 and last 3 characters for identification purposes.
    /// Tokens shorter than 10 characters are fully masked as "****".
    ///
    /// ```
    /// use collection_publisher::security::SecureTokenManager;
    ///
    /// let manager = SecureTokenManager::default();
    /// assert_eq!(manager.mask_token("abcdef123456"), "abc...456");
    /// assert_eq!(manager.mask_token("short"), "****");
    /// ```
    pub fn mask_token(&self, token: &str) -> String {
        if token.chars().count() < 10 {
            return "****".to_string();
        }

        let chars: Vec<char> = token.chars().collect();
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 3..].iter().collect();
        format!("{}...{}", prefix, suffix)
    }

    /// Masks every token this manager knows about in a string
    pub fn mask_tokens_in_string(&self, text: &str) -> String {
        let mut masked = text.to_string();

        let env_tokens = self
            .repository_map
            .values()
            .filter_map(|name| self.env.get(name))
            .filter(|token| !token.is_empty())
            .map(String::as_str);
        let issued = self.issued.iter().map(|token| token.expose_secret());

        for token in env_tokens.chain(issued) {
            if let Ok(regex) = Regex::new(&regex::escape(token)) {
                let masked_token = self.mask_token(token);
                masked = regex
                    .replace_all(&masked, masked_token.as_str())
                    .to_string();
            }
        }

        masked
    }

    /// Gets the environment variable name for a repository
    pub fn get_token_name(&self, repository: &str) -> Option<&str> {
        self.repository_map
            .get(&repository.to_lowercase())
            .map(|s| s.as_str())
    }

    /// Returns a list of all supported repository names
    pub fn get_supported_repositories(&self) -> Vec<String> {
        let mut names: Vec<String> = self.repository_map.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_with(name: &str, value: &str) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert(name.to_string(), value.to_string());
        env
    }

    #[test]
    fn test_supported_repositories() {
        let manager = SecureTokenManager::new(HashMap::new());
        assert_eq!(
            manager.get_supported_repositories(),
            vec!["b2share", "ckan", "dataverse"]
        );
    }

    #[test]
    fn test_get_token_returns_none_for_unknown_repository() {
        let manager = SecureTokenManager::new(env_with("ZENODO_API_TOKEN", "x"));
        assert!(manager.get_token("zenodo").is_none());
    }

    #[test]
    fn test_get_token_from_env() {
        let manager = SecureTokenManager::new(env_with("B2SHARE_API_TOKEN", "b2-token-12345"));

        let token = manager.get_token("B2SHARE").unwrap();
        assert_eq!(token.expose_secret(), "b2-token-12345");
        assert!(manager.has_token("b2share"));
        assert!(!manager.has_token("ckan"));
    }

    #[test]
    fn test_configured_token_wins() {
        let mut manager = SecureTokenManager::new(env_with("DATAVERSE_API_TOKEN", "from-env-token"));

        let configured = ApiToken::new("from-config-token");
        let token = manager.resolve("dataverse", Some(&configured)).unwrap();
        assert_eq!(token.expose_secret(), "from-config-token");

        let empty = ApiToken::new("");
        let token = manager.resolve("dataverse", Some(&empty)).unwrap();
        assert_eq!(token.expose_secret(), "from-env-token");
    }

    #[test]
    fn test_mask_token() {
        let manager = SecureTokenManager::default();
        assert_eq!(manager.mask_token("short"), "****");
        assert_eq!(manager.mask_token(""), "****");
        assert_eq!(manager.mask_token("very-long-token-string"), "ver...ing");
    }

    #[test]
    fn test_mask_resolved_tokens_in_string() {
        let mut manager = SecureTokenManager::new(HashMap::new());
        let configured = ApiToken::new("secret-b2share-token");
        manager.resolve("b2share", Some(&configured));

        let output = manager
            .mask_tokens_in_string("PUT https://b2share/api/files?access_token=secret-b2share-token");
        assert!(output.contains("sec...ken"));
        assert!(!output.contains("secret-b2share-token"));
    }

    #[test]
    fn test_mask_tokens_in_string_no_tokens() {
        let manager = SecureTokenManager::new(HashMap::new());
        let input = "This is a safe string with no tokens";
        assert_eq!(manager.mask_tokens_in_string(input), input);
    }

    #[test]
    fn test_get_token_name() {
        let manager = SecureTokenManager::new(HashMap::new());
        assert_eq!(manager.get_token_name("ckan"), Some("CKAN_API_TOKEN"));
        assert_eq!(manager.get_token_name("unknown"), None);
    }
}
