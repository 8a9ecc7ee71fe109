//! CKAN draft backend
//!
//! CKAN datasets describe data that stays in the source store: no upload,
//! references only. The dataset name doubles as the identifier once
//! published.

use super::http::{ApiClient, TokenHeader};
use crate::core::error::PublishError;
use crate::core::logging::PublishLog;
use crate::core::state_machine::{DraftLifecycle, DraftState};
use crate::core::traits::{Draft, Identifiers, Metadata, missing_keys};
use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::SecretString;
use serde_json::{Map, Value, json};
use std::path::Path;

const REPO_NAME: &str = "CKAN";
const REQUIRED_KEYS: &[&str] = &["TITLE", "ABSTRACT", "CREATOR"];
const HANDLE_PREFIX: &str = "hdl.handle.net/";

pub struct CkanDraft {
    client: ApiClient,
    org: String,
    name: String,
    group: Option<String>,
    dataset: Map<String, Value>,
    lifecycle: DraftLifecycle,
    published: bool,
    log: PublishLog,
}

impl CkanDraft {
    /// `name` is the dataset name (CKAN id); lower case letters, digits, `-` and `_`
    pub fn new(
        api_url: &str,
        token: Option<SecretString>,
        org: &str,
        name: &str,
        group: Option<&str>,
        log: PublishLog,
    ) -> Result<Self, PublishError> {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(PublishError::ConfigError(format!(
                "invalid CKAN dataset name: {:?}",
                name
            )));
        }

        Ok(Self {
            client: ApiClient::new(REPO_NAME, api_url, token.as_ref(), TokenHeader::Raw)?,
            org: org.to_string(),
            name: name.to_string(),
            group: group.filter(|g| !g.is_empty()).map(str::to_string),
            dataset: Map::new(),
            lifecycle: DraftLifecycle::new(REPO_NAME),
            published: false,
            log,
        })
    }

    /// Run a CKAN action; `tolerated` statuses are logged instead of failing
    async fn action(
        &self,
        action: &str,
        data: &Map<String, Value>,
        tolerated: &[StatusCode],
    ) -> Result<(), PublishError> {
        let request = self
            .client
            .http()
            .post(self.client.endpoint(&format!("action/{}", action)))
            .json(data);
        if self.client.call_allowing(request, tolerated).await?.is_none() {
            self.log
                .warn(format!("CKAN: {} reported an existing dataset {}", action, self.name));
        }
        Ok(())
    }

    async fn patch_refs(&mut self, key: &str, value: String) -> Result<(), PublishError> {
        self.lifecycle.ensure_can_patch_references()?;
        let mut updated = self.dataset.clone();
        append_extra(&mut updated, json!({"key": key, "value": value}));

        self.action("package_update", &updated, &[]).await?;
        self.dataset = updated;
        Ok(())
    }
}

fn append_extra(data: &mut Map<String, Value>, extra: Value) {
    match data.get_mut("extras") {
        Some(Value::Array(items)) => items.push(extra),
        _ => {
            data.insert("extras".to_string(), Value::Array(vec![extra]));
        }
    }
}

pub(crate) fn create_payload(title: &str, org: &str, name: &str, group: Option<&str>) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("title".to_string(), json!(title));
    data.insert("owner_org".to_string(), json!(org));
    data.insert("name".to_string(), json!(name));
    if let Some(group) = group {
        data.insert("groups".to_string(), json!([{"name": group}]));
    }
    data
}

/// Dataset fields derived from collection metadata
pub(crate) fn update_payload(
    dataset: &Map<String, Value>,
    metadata: &Metadata,
    collection_path: &str,
) -> Map<String, Value> {
    let mut data = dataset.clone();
    if let Some(creator) = metadata.get("CREATOR") {
        data.insert("author".to_string(), json!(creator));
    }
    if let Some(abstract_text) = metadata.get("ABSTRACT") {
        data.insert("notes".to_string(), json!(abstract_text));
    }
    data.insert("url".to_string(), json!(collection_path));

    if let Some(other) = metadata.get("OTHER") {
        append_extra(&mut data, json!({"key": "Web access", "value": other}));
    }
    if let Some(pid) = metadata.get("PID") {
        append_extra(
            &mut data,
            json!({"key": "Handle", "value": format!("{}{}", HANDLE_PREFIX, pid)}),
        );
    }
    if let Some(ticket) = metadata.get("TICKET") {
        append_extra(&mut data, json!({"key": "Other ID", "value": ticket}));
    }
    data
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[async_trait]
impl Draft for CkanDraft {
    fn repo_name(&self) -> &str {
        REPO_NAME
    }

    fn uri(&self) -> String {
        self.client.endpoint(&self.org)
    }

    fn url(&self) -> String {
        if self.lifecycle.state() == DraftState::Unset {
            return String::new();
        }
        let site = match self.client.base_url().split_once("/api") {
            Some((site, _)) => site,
            None => self.client.base_url(),
        };
        format!("{}/dataset/{}", site, self.name)
    }

    fn doi(&self) -> String {
        if self.published {
            self.name.clone()
        } else {
            String::new()
        }
    }

    fn required_keys(&self) -> &[&'static str] {
        REQUIRED_KEYS
    }

    fn has_data(&self) -> bool {
        false
    }

    fn state(&self) -> DraftState {
        self.lifecycle.state()
    }

    async fn create(&mut self, title: &str) -> Result<(), PublishError> {
        self.lifecycle.ensure_can_create(&self.url())?;
        if title.trim().is_empty() {
            return Err(PublishError::Validation {
                repository: REPO_NAME.to_string(),
                message: "draft title is empty".to_string(),
            });
        }

        let data = create_payload(title, &self.org, &self.name, self.group.as_deref());
        self.log.debug(format!(
            "CKAN: package_create {}",
            Value::Object(data.clone())
        ));
        // 409: a dataset with this name exists already
        self.action("package_create", &data, &[StatusCode::CONFLICT])
            .await?;
        self.dataset = data;
        self.lifecycle.advance(DraftState::Created)?;
        self.log.info(format!("CKAN: draft created {}", self.url()));
        Ok(())
    }

    async fn patch(&mut self, metadata: &Metadata, collection_path: &str) -> Result<(), PublishError> {
        self.lifecycle.ensure_can_patch()?;
        let missing = missing_keys(REQUIRED_KEYS, metadata);
        if !missing.is_empty() {
            return Err(PublishError::MissingMetadata {
                repository: REPO_NAME.to_string(),
                keys: missing,
            });
        }

        let data = update_payload(&self.dataset, metadata, collection_path);
        self.action("package_update", &data, &[]).await?;
        self.dataset = data;
        self.lifecycle.advance(DraftState::Patched)?;
        self.log.info("CKAN: draft patched");
        Ok(())
    }

    async fn patch_tickets(&mut self, tickets: &Identifiers) -> Result<(), PublishError> {
        if tickets.is_empty() {
            return Ok(());
        }
        let value = tickets
            .iter()
            .map(|(path, ticket)| format!("{} Ticket: {}", path, ticket))
            .collect::<Vec<_>>()
            .join("; ");
        self.patch_refs("Tickets", value).await?;
        self.log
            .info(format!("CKAN: draft patched with {} tickets", tickets.len()));
        Ok(())
    }

    async fn patch_pids(&mut self, pids: &Identifiers) -> Result<(), PublishError> {
        if pids.is_empty() {
            return Ok(());
        }
        let value = pids
            .iter()
            .map(|(path, pid)| format!("{}> {}{}", base_name(path), HANDLE_PREFIX, pid))
            .collect::<Vec<_>>()
            .join("; ");
        self.patch_refs("File Handles", value).await?;
        self.log
            .info(format!("CKAN: draft patched with {} PIDs", pids.len()));
        Ok(())
    }

    async fn upload_file(&mut self, path: &Path) -> Result<(), PublishError> {
        Err(PublishError::Validation {
            repository: REPO_NAME.to_string(),
            message: format!("CKAN drafts do not accept data ({})", path.display()),
        })
    }

    async fn publish(&mut self) -> Result<(), PublishError> {
        self.lifecycle.ensure_can_publish()?;
        self.published = true;
        self.lifecycle.advance(DraftState::Published)?;
        self.log.info(format!("CKAN: published {}", self.url()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drafts::test_server::TestServer;

    fn metadata(pairs: &[(&str, &str)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn full_metadata() -> Metadata {
        metadata(&[("TITLE", "Demo"), ("CREATOR", "Alice"), ("ABSTRACT", "About")])
    }

    fn served_draft(server: &TestServer, log: PublishLog) -> CkanDraft {
        CkanDraft::new(&server.url("/api/3"), None, "eudat", "demo-data", None, log).unwrap()
    }

    fn offline_draft() -> CkanDraft {
        CkanDraft::new("http://127.0.0.1:9/api/3", None, "eudat", "demo-data", None, PublishLog::default())
            .unwrap()
    }

    #[test]
    fn test_rejects_invalid_dataset_name() {
        let err = CkanDraft::new("http://ckan/api/3", None, "eudat", "Demo Data", None, PublishLog::default())
            .err()
            .unwrap();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_create_payload_with_group() {
        let data = create_payload("Demo", "eudat", "demo-data", Some("climate"));
        assert_eq!(data["owner_org"], "eudat");
        assert_eq!(data["groups"][0]["name"], "climate");

        let data = create_payload("Demo", "eudat", "demo-data", None);
        assert!(!data.contains_key("groups"));
    }

    #[test]
    fn test_update_payload_maps_fields() {
        let dataset = create_payload("Demo", "eudat", "demo-data", None);
        let data = update_payload(
            &dataset,
            &metadata(&[
                ("CREATOR", "Alice"),
                ("ABSTRACT", "About"),
                ("PID", "21.T/1"),
                ("TICKET", "t-coll"),
            ]),
            "/zoneA/home/pub/demo",
        );

        assert_eq!(data["author"], "Alice");
        assert_eq!(data["notes"], "About");
        assert_eq!(data["url"], "/zoneA/home/pub/demo");
        assert_eq!(data["name"], "demo-data");
        let extras = data["extras"].as_array().unwrap();
        assert_eq!(extras.len(), 2);
        assert_eq!(extras[0]["value"], "hdl.handle.net/21.T/1");
    }

    #[tokio::test]
    async fn test_upload_is_rejected() {
        let mut draft = offline_draft();
        assert!(!draft.has_data());
        assert!(draft.upload_file(Path::new("/tmp/a.txt")).await.is_err());
    }

    #[tokio::test]
    async fn test_publish_before_create() {
        let mut draft = offline_draft();

        let err = draft.publish().await.unwrap_err();
        assert!(matches!(err, PublishError::Publish { .. }));
        assert!(draft.doi().is_empty());
        assert!(draft.url().is_empty());
    }

    #[tokio::test]
    async fn test_failed_create_keeps_unset() {
        let mut draft = offline_draft();

        let err = draft.create("Demo").await.unwrap_err();
        assert_eq!(err.code(), "NETWORK_ERROR");
        assert_eq!(draft.state(), DraftState::Unset);
        assert!(draft.create("").await.is_err());
    }

    #[tokio::test]
    async fn test_create_patch_publish() {
        let server = TestServer::start().await;
        server.reply("POST", "/api/3/action/package_create", 200, json!({"success": true}));
        server.reply("POST", "/api/3/action/package_update", 200, json!({"success": true}));

        let mut draft = served_draft(&server, PublishLog::default());
        draft.create("Demo").await.unwrap();
        draft.patch(&full_metadata(), "/zoneA/home/pub/demo").await.unwrap();
        let mut tickets = Identifiers::new();
        tickets.insert("/zoneA/home/pub/demo/a.txt".to_string(), "t1".to_string());
        draft.patch_tickets(&tickets).await.unwrap();
        draft.publish().await.unwrap();

        assert_eq!(draft.state(), DraftState::Published);
        assert_eq!(draft.doi(), "demo-data");
        assert_eq!(draft.url(), server.url("/dataset/demo-data"));

        let requests = server.requests();
        assert_eq!(requests.len(), 3);
        let created: Value = serde_json::from_str(&requests[0].body).unwrap();
        assert_eq!(created["owner_org"], "eudat");
        let updated: Value = serde_json::from_str(&requests[1].body).unwrap();
        assert_eq!(updated["author"], "Alice");
        assert_eq!(updated["name"], "demo-data");
        let referenced: Value = serde_json::from_str(&requests[2].body).unwrap();
        assert_eq!(referenced["extras"][0]["key"], "Tickets");
        assert_eq!(
            referenced["extras"][0]["value"],
            "/zoneA/home/pub/demo/a.txt Ticket: t1"
        );
    }

    #[tokio::test]
    async fn test_update_conflict_is_rejected() {
        let server = TestServer::start().await;
        server.reply("POST", "/api/3/action/package_create", 200, json!({"success": true}));
        server.reply(
            "POST",
            "/api/3/action/package_update",
            409,
            json!({"success": false, "error": {"message": "revision conflict"}}),
        );

        let mut draft = served_draft(&server, PublishLog::default());
        draft.create("Demo").await.unwrap();
        let err = draft.patch(&full_metadata(), "/z/c").await.unwrap_err();

        match &err {
            PublishError::RemoteRejected { status, message, .. } => {
                assert_eq!(*status, 409);
                assert!(message.contains("revision conflict"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(draft.state(), DraftState::Created);
        assert!(draft.publish().await.is_err());
        assert!(draft.doi().is_empty());
    }

    #[tokio::test]
    async fn test_create_conflict_is_tolerated() {
        let server = TestServer::start().await;
        server.reply(
            "POST",
            "/api/3/action/package_create",
            409,
            json!({"success": false, "error": {"name": ["That URL is already in use."]}}),
        );
        let log = PublishLog::default();

        let mut draft = served_draft(&server, log.clone());
        draft.create("Demo").await.unwrap();

        assert_eq!(draft.state(), DraftState::Created);
        assert!(
            log.lines()
                .iter()
                .any(|line| line.contains("package_create reported an existing dataset"))
        );
    }

    #[tokio::test]
    async fn test_create_rejection_keeps_unset() {
        let server = TestServer::start().await;
        server.reply(
            "POST",
            "/api/3/action/package_create",
            403,
            json!({"success": false, "error": {"message": "Access denied"}}),
        );

        let mut draft = served_draft(&server, PublishLog::default());
        let err = draft.create("Demo").await.unwrap_err();

        assert!(matches!(err, PublishError::RemoteRejected { status: 403, .. }));
        assert_eq!(draft.state(), DraftState::Unset);
    }
}
