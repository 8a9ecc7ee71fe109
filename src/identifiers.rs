//! Ticket and persistent-identifier minting

use crate::core::error::PublishError;
use crate::core::traits::IdentifierAuthority;
use async_trait::async_trait;
use uuid::Uuid;

/// Authority minting random UUID based identifiers without a remote service
#[derive(Debug, Clone, Default)]
pub struct LocalAuthority {
    pid_prefix: Option<String>,
}

impl LocalAuthority {
    pub fn new(pid_prefix: Option<String>) -> Self {
        Self {
            pid_prefix: pid_prefix.filter(|p| !p.is_empty()),
        }
    }
}

#[async_trait]
impl IdentifierAuthority for LocalAuthority {
    async fn mint_ticket(&self, _path: &str) -> Result<String, PublishError> {
        Ok(Uuid::new_v4().simple().to_string())
    }

    async fn mint_pid(&self, _path: &str) -> Result<String, PublishError> {
        let id = Uuid::new_v4().to_string();
        Ok(match &self.pid_prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), id),
            None => id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tickets_are_unique() {
        let authority = LocalAuthority::default();
        let a = authority.mint_ticket("/z/c/a").await.unwrap();
        let b = authority.mint_ticket("/z/c/a").await.unwrap();

        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[tokio::test]
    async fn test_pid_prefix() {
        let authority = LocalAuthority::new(Some("21.T12995/".to_string()));
        let pid = authority.mint_pid("/z/c").await.unwrap();
        assert!(pid.starts_with("21.T12995/"));
        assert_eq!(pid.len(), "21.T12995/".len() + 36);

        let bare = LocalAuthority::new(Some(String::new()));
        assert_eq!(bare.mint_pid("/z/c").await.unwrap().len(), 36);
    }
}
