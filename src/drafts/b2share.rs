//! B2SHARE draft backend
//!
//! Records are created in a community, patched with JSON-Patch documents and
//! published by submitting the draft. Files go to the draft's file bucket.

use super::http::{ApiClient, TokenHeader, file_name, json_str};
use crate::core::error::PublishError;
use crate::core::logging::PublishLog;
use crate::core::state_machine::{DraftLifecycle, DraftState};
use crate::core::traits::{Draft, Identifiers, Metadata, missing_keys};
use async_trait::async_trait;
use reqwest::Body;
use secrecy::SecretString;
use serde_json::{Value, json};
use std::path::Path;

const REPO_NAME: &str = "B2SHARE";
const REQUIRED_KEYS: &[&str] = &["TITLE", "CREATOR", "ABSTRACT"];

/// Description types filled from collection metadata
const DESCRIPTIONS: &[(&str, &str)] = &[
    ("ABSTRACT", "Abstract"),
    ("SERIESINFORMATION", "SeriesInformation"),
    ("TABLEOFCONTENTS", "TableOfContents"),
    ("TECHNICALINFO", "TechnicalInfo"),
];

pub struct B2ShareDraft {
    client: ApiClient,
    community: String,
    lifecycle: DraftLifecycle,
    record_id: Option<String>,
    files_bucket: Option<String>,
    doi: String,
    log: PublishLog,
}

impl B2ShareDraft {
    /// `draft_url` resumes an existing draft (`.../records/<id>/draft`)
    pub fn new(
        api_url: &str,
        token: Option<SecretString>,
        community: &str,
        draft_url: Option<&str>,
        log: PublishLog,
    ) -> Result<Self, PublishError> {
        let client = ApiClient::new(REPO_NAME, api_url, token.as_ref(), TokenHeader::Bearer)?;

        let record_id = draft_url.and_then(record_id_from_url);
        let lifecycle = match &record_id {
            Some(_) => DraftLifecycle::resumed(REPO_NAME),
            None => DraftLifecycle::new(REPO_NAME),
        };

        Ok(Self {
            client,
            community: community.to_string(),
            lifecycle,
            record_id,
            files_bucket: None,
            doi: String::new(),
            log,
        })
    }

    fn draft_endpoint(&self) -> Result<String, PublishError> {
        match &self.record_id {
            Some(id) => Ok(self.client.endpoint(&format!("records/{}/draft", id))),
            None => Err(PublishError::Publish {
                repository: REPO_NAME.to_string(),
                message: "draft was never created".to_string(),
            }),
        }
    }

    async fn apply_patch(&self, patch: Value) -> Result<Value, PublishError> {
        let request = self
            .client
            .http()
            .patch(self.draft_endpoint()?)
            .header("Content-Type", "application/json-patch+json")
            .body(patch.to_string());
        self.client.call(request).await
    }

    async fn files_bucket(&mut self) -> Result<String, PublishError> {
        if let Some(bucket) = &self.files_bucket {
            return Ok(bucket.clone());
        }
        let record = self
            .client
            .call(self.client.http().get(self.draft_endpoint()?))
            .await?;
        let bucket = json_str(&record, "/links/files")
            .map(str::to_string)
            .ok_or_else(|| PublishError::RemoteRejected {
                repository: REPO_NAME.to_string(),
                status: 200,
                message: "draft has no file bucket".to_string(),
            })?;
        self.files_bucket = Some(bucket.clone());
        Ok(bucket)
    }

    /// Read the submitted record once more when the submit response has no DOI
    async fn fetch_doi(&self) -> Result<String, PublishError> {
        let id = self.record_id.as_deref().unwrap_or_default();
        let record = self
            .client
            .call(self.client.http().get(self.client.endpoint(&format!("records/{}", id))))
            .await?;
        doi_of(&record).ok_or_else(|| PublishError::Publish {
            repository: REPO_NAME.to_string(),
            message: format!("response carries no DOI for record {}", id),
        })
    }
}

fn doi_of(record: &Value) -> Option<String> {
    json_str(record, "/metadata/DOI")
        .or_else(|| json_str(record, "/metadata/ePIC_PID"))
        .map(str::to_string)
}

fn record_id_from_url(url: &str) -> Option<String> {
    let trimmed = url.trim_end_matches('/');
    let trimmed = trimmed.strip_suffix("/draft").unwrap_or(trimmed);
    trimmed
        .rsplit_once("/records/")
        .map(|(_, id)| id.to_string())
        .filter(|id| !id.is_empty() && !id.contains('/'))
}

pub(crate) fn create_payload(title: &str, community: &str) -> Value {
    json!({
        "titles": [{"title": title}],
        "community": community,
        "open_access": true,
        "community_specific": {},
    })
}

pub(crate) fn metadata_patch(metadata: &Metadata) -> Value {
    let mut ops = Vec::new();
    if let Some(creator) = metadata.get("CREATOR") {
        ops.push(json!({
            "op": "add",
            "path": "/creators",
            "value": [{"creator_name": creator}],
        }));
    }

    let descriptions: Vec<Value> = DESCRIPTIONS
        .iter()
        .filter_map(|(key, kind)| {
            metadata.get(*key).map(|text| {
                json!({"description": text, "description_type": kind})
            })
        })
        .collect();
    if !descriptions.is_empty() {
        ops.push(json!({"op": "add", "path": "/descriptions", "value": descriptions}));
    }
    Value::Array(ops)
}

pub(crate) fn tickets_patch(tickets: &Identifiers) -> Value {
    let types: Vec<Value> = tickets
        .iter()
        .map(|(path, ticket)| {
            json!({
                "resource_type": format!("path={} ticket={}", path, ticket),
                "resource_type_general": "Dataset",
            })
        })
        .collect();
    json!([{"op": "add", "path": "/resource_types", "value": types}])
}

pub(crate) fn pids_patch(pids: &Identifiers) -> Value {
    let identifiers: Vec<Value> = pids
        .iter()
        .map(|(path, pid)| {
            json!({
                "alternate_identifier": pid,
                "alternate_identifier_type": format!("EPIC;{}", path),
            })
        })
        .collect();
    json!([{"op": "add", "path": "/alternate_identifiers", "value": identifiers}])
}

#[async_trait]
impl Draft for B2ShareDraft {
    fn repo_name(&self) -> &str {
        REPO_NAME
    }

    fn uri(&self) -> String {
        self.draft_endpoint()
            .unwrap_or_else(|_| self.client.endpoint("records/"))
    }

    fn url(&self) -> String {
        match &self.record_id {
            Some(id) => {
                let site = self
                    .client
                    .base_url()
                    .trim_end_matches("/api")
                    .to_string();
                format!("{}/records/{}", site, id)
            }
            None => String::new(),
        }
    }

    fn doi(&self) -> String {
        self.doi.clone()
    }

    fn required_keys(&self) -> &[&'static str] {
        REQUIRED_KEYS
    }

    fn has_data(&self) -> bool {
        true
    }

    fn state(&self) -> DraftState {
        self.lifecycle.state()
    }

    async fn create(&mut self, title: &str) -> Result<(), PublishError> {
        self.lifecycle.ensure_can_create(&self.uri())?;
        if title.trim().is_empty() {
            return Err(PublishError::Validation {
                repository: REPO_NAME.to_string(),
                message: "draft title is empty".to_string(),
            });
        }

        let request = self
            .client
            .http()
            .post(self.client.endpoint("records/"))
            .json(&create_payload(title, &self.community));
        let record = self.client.call(request).await?;

        let id = json_str(&record, "/id").ok_or_else(|| PublishError::RemoteRejected {
            repository: REPO_NAME.to_string(),
            status: 201,
            message: "response carries no record id".to_string(),
        })?;
        self.record_id = Some(id.to_string());
        self.files_bucket = json_str(&record, "/links/files").map(str::to_string);
        self.lifecycle.advance(DraftState::Created)?;
        self.log.info(format!("B2SHARE: draft created {}", self.uri()));
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

        self.apply_patch(metadata_patch(metadata)).await?;
        self.lifecycle.advance(DraftState::Patched)?;
        self.log
            .info(format!("B2SHARE: draft patched with metadata of {}", collection_path));
        Ok(())
    }

    async fn patch_tickets(&mut self, tickets: &Identifiers) -> Result<(), PublishError> {
        if tickets.is_empty() {
            return Ok(());
        }
        self.lifecycle.ensure_can_patch_references()?;
        self.apply_patch(tickets_patch(tickets)).await?;
        self.log
            .info(format!("B2SHARE: draft patched with {} tickets", tickets.len()));
        Ok(())
    }

    async fn patch_pids(&mut self, pids: &Identifiers) -> Result<(), PublishError> {
        if pids.is_empty() {
            return Ok(());
        }
        self.lifecycle.ensure_can_patch_references()?;
        self.apply_patch(pids_patch(pids)).await?;
        self.log
            .info(format!("B2SHARE: draft patched with {} PIDs", pids.len()));
        Ok(())
    }

    async fn upload_file(&mut self, path: &Path) -> Result<(), PublishError> {
        self.lifecycle.ensure_can_upload()?;
        let name = file_name(path)?;
        let bucket = self.files_bucket().await?;
        let file = tokio::fs::File::open(path).await?;

        let request = self
            .client
            .http()
            .put(format!("{}/{}", bucket.trim_end_matches('/'), name))
            .header("Content-Type", "application/octet-stream")
            .body(Body::from(file));
        self.client.call(request).await?;
        self.lifecycle.advance(DraftState::Uploaded)?;
        self.log.info(format!("B2SHARE: uploaded {}", name));
        Ok(())
    }

    async fn publish(&mut self) -> Result<(), PublishError> {
        self.lifecycle.ensure_can_publish()?;
        let record = self
            .apply_patch(json!([
                {"op": "add", "path": "/publication_state", "value": "submitted"}
            ]))
            .await?;

        let doi = match doi_of(&record) {
            Some(doi) => doi,
            None => self.fetch_doi().await?,
        };
        self.doi = doi;
        self.lifecycle.advance(DraftState::Published)?;
        self.log.info(format!("B2SHARE: published {} ({})", self.url(), self.doi));
        Ok(())
    }
}
