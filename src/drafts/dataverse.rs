//! Dataverse draft backend (native API)
//!
//! A dataset is created inside a dataverse alias with placeholder citation
//! fields, then edited through `editMetadata`. The persistent id of the
//! dataset is both its locator and, once published, its DOI.

use super::http::{ApiClient, TokenHeader, file_name, json_str};
use crate::core::error::PublishError;
use crate::core::logging::PublishLog;
use crate::core::state_machine::{DraftLifecycle, DraftState};
use crate::core::traits::{Draft, Identifiers, Metadata, missing_keys};
use async_trait::async_trait;
use reqwest::Body;
use reqwest::multipart::{Form, Part};
use secrecy::SecretString;
use serde_json::{Value, json};
use std::path::Path;

const REPO_NAME: &str = "Dataverse";
const REQUIRED_KEYS: &[&str] = &["TITLE", "ABSTRACT", "CREATOR", "SUBJECT"];
const HANDLE_PREFIX: &str = "hdl.handle.net/";
const PLACEHOLDER_CREATOR: &str = "collection-publisher";

pub struct DataverseDraft {
    client: ApiClient,
    alias: String,
    persistent_id: Option<String>,
    lifecycle: DraftLifecycle,
    published: bool,
    log: PublishLog,
}

impl DataverseDraft {
    /// `draft_url` resumes an existing dataset, given as persistent id or
    /// landing page (`dataset.xhtml?persistentId=...`)
    pub fn new(
        api_url: &str,
        token: Option<SecretString>,
        alias: &str,
        draft_url: Option<&str>,
        log: PublishLog,
    ) -> Result<Self, PublishError> {
        let client = ApiClient::new(
            REPO_NAME,
            api_url,
            token.as_ref(),
            TokenHeader::Named("x-dataverse-key"),
        )?;

        let persistent_id = draft_url.and_then(persistent_id_from_url);
        let lifecycle = match &persistent_id {
            Some(_) => DraftLifecycle::resumed(REPO_NAME),
            None => DraftLifecycle::new(REPO_NAME),
        };

        Ok(Self {
            client,
            alias: alias.to_string(),
            persistent_id,
            lifecycle,
            published: false,
            log,
        })
    }

    fn require_pid(&self) -> Result<&str, PublishError> {
        self.persistent_id
            .as_deref()
            .ok_or_else(|| PublishError::Publish {
                repository: REPO_NAME.to_string(),
                message: "draft was never created".to_string(),
            })
    }

    async fn edit_metadata(&self, fields: Vec<Value>, replace: bool) -> Result<(), PublishError> {
        let pid = self.require_pid()?;
        let mut query = vec![("persistentId", pid)];
        if replace {
            query.push(("replace", "true"));
        }
        let request = self
            .client
            .http()
            .put(self.client.endpoint("datasets/:persistentId/editMetadata"))
            .query(&query)
            .json(&json!({ "fields": fields }));
        self.client.call(request).await?;
        Ok(())
    }

    async fn patch_refs(&mut self, refs: &Identifiers, prefix: &str) -> Result<(), PublishError> {
        self.lifecycle.ensure_can_patch_references()?;
        self.edit_metadata(vec![references_field(refs, prefix)], false)
            .await
    }
}

fn persistent_id_from_url(url: &str) -> Option<String> {
    let pid = match url.split_once("persistentId=") {
        Some((_, rest)) => rest.split('&').next().unwrap_or(rest),
        None => url,
    };
    let pid = pid.trim();
    if pid.is_empty() {
        None
    } else {
        Some(pid.to_string())
    }
}

fn primitive(type_name: &str, multiple: bool, value: Value) -> Value {
    json!({
        "typeName": type_name,
        "multiple": multiple,
        "typeClass": "primitive",
        "value": value,
    })
}

fn controlled(type_name: &str, values: Vec<&str>) -> Value {
    json!({
        "typeName": type_name,
        "multiple": true,
        "typeClass": "controlledVocabulary",
        "value": values,
    })
}

fn compound(type_name: &str, entries: Vec<Value>) -> Value {
    json!({
        "typeName": type_name,
        "multiple": true,
        "typeClass": "compound",
        "value": entries,
    })
}

fn other_id(agency: &str, value: &str) -> Value {
    json!({
        "otherIdAgency": primitive("otherIdAgency", false, json!(agency)),
        "otherIdValue": primitive("otherIdValue", false, json!(value)),
    })
}

/// Dataset version with the minimal citation block Dataverse accepts
pub(crate) fn create_payload(title: &str) -> Value {
    let fields = vec![
        primitive("title", false, json!(title)),
        compound(
            "author",
            vec![json!({"authorName": primitive("authorName", false, json!(PLACEHOLDER_CREATOR))})],
        ),
        compound(
            "dsDescription",
            vec![json!({"dsDescriptionValue": primitive("dsDescriptionValue", false, json!("Description"))})],
        ),
        controlled("subject", vec!["Other"]),
    ];
    json!({
        "datasetVersion": {
            "metadataBlocks": {
                "citation": {"displayName": "Citation Metadata", "fields": fields}
            }
        }
    })
}

/// Citation fields replacing the placeholders of `create_payload`
pub(crate) fn metadata_fields(metadata: &Metadata, collection_path: &str) -> Vec<Value> {
    let mut fields = Vec::new();
    if let Some(creator) = metadata.get("CREATOR") {
        fields.push(compound(
            "author",
            vec![json!({"authorName": primitive("authorName", false, json!(creator))})],
        ));
    }
    if let Some(abstract_text) = metadata.get("ABSTRACT") {
        fields.push(compound(
            "dsDescription",
            vec![json!({"dsDescriptionValue": primitive("dsDescriptionValue", false, json!(abstract_text))})],
        ));
    }
    if let Some(subject) = metadata.get("SUBJECT") {
        fields.push(controlled("subject", vec![subject.as_str()]));
    }
    if let Some(info) = metadata.get("TECHNICALINFO") {
        fields.push(primitive("dataSources", true, json!([info])));
    }
    if let Some(other) = metadata.get("OTHER") {
        fields.push(primitive("alternativeURL", false, json!(other)));
    }

    let mut ids = vec![other_id("Collection", collection_path)];
    if let Some(pid) = metadata.get("PID") {
        ids.push(other_id("Handle", &format!("{}{}", HANDLE_PREFIX, pid)));
    }
    if let Some(ticket) = metadata.get("TICKET") {
        ids.push(other_id("Ticket", ticket));
    }
    fields.push(compound("otherId", ids));
    fields
}

/// `otherReferences` entry listing `<file name>: <prefix><identifier>`
pub(crate) fn references_field(refs: &Identifiers, prefix: &str) -> Value {
    let values: Vec<String> = refs
        .iter()
        .map(|(path, id)| {
            let name = path.rsplit('/').next().unwrap_or(path);
            format!("{}: {}{}", name, prefix, id)
        })
        .collect();
    primitive("otherReferences", true, json!(values))
}

#[async_trait]
impl Draft for DataverseDraft {
    fn repo_name(&self) -> &str {
        REPO_NAME
    }

    fn uri(&self) -> String {
        self.client.endpoint(&format!("dataverses/{}", self.alias))
    }

    fn url(&self) -> String {
        let Some(pid) = &self.persistent_id else {
            return String::new();
        };
        let site = match self.client.base_url().split_once("/api") {
            Some((site, _)) => site,
            None => self.client.base_url(),
        };
        format!("{}/dataset.xhtml?persistentId={}", site, pid)
    }

    fn doi(&self) -> String {
        match (&self.persistent_id, self.published) {
            (Some(pid), true) => pid.clone(),
            _ => String::new(),
        }
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
        self.lifecycle.ensure_can_create(&self.url())?;
        if title.trim().is_empty() {
            return Err(PublishError::Validation {
                repository: REPO_NAME.to_string(),
                message: "draft title is empty".to_string(),
            });
        }

        self.log.debug(format!("Dataverse: connect to {}", self.uri()));
        let request = self
            .client
            .http()
            .post(self.client.endpoint(&format!("dataverses/{}/datasets", self.alias)))
            .json(&create_payload(title));
        let response = self.client.call(request).await?;

        let pid = json_str(&response, "/data/persistentId").ok_or_else(|| {
            PublishError::RemoteRejected {
                repository: REPO_NAME.to_string(),
                status: 201,
                message: "response carries no persistent id".to_string(),
            }
        })?;
        self.persistent_id = Some(pid.to_string());
        self.lifecycle.advance(DraftState::Created)?;
        self.log.info(format!("Dataverse: draft created {}", self.url()));
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

        if let Err(e) = self
            .edit_metadata(metadata_fields(metadata, collection_path), true)
            .await
        {
            self.log
                .error("Dataverse: draft not patched with CREATOR, ABSTRACT, TECHNICALINFO, OTHER, PID or TICKET");
            return Err(e);
        }
        self.lifecycle.advance(DraftState::Patched)?;
        self.log.info("Dataverse: draft patched");
        Ok(())
    }

    async fn patch_tickets(&mut self, tickets: &Identifiers) -> Result<(), PublishError> {
        if tickets.is_empty() {
            return Ok(());
        }
        self.patch_refs(tickets, "Ticket: ").await?;
        self.log
            .info(format!("Dataverse: draft patched with {} tickets", tickets.len()));
        Ok(())
    }

    async fn patch_pids(&mut self, pids: &Identifiers) -> Result<(), PublishError> {
        if pids.is_empty() {
            return Ok(());
        }
        self.patch_refs(pids, HANDLE_PREFIX).await?;
        self.log
            .info(format!("Dataverse: draft patched with {} PIDs", pids.len()));
        Ok(())
    }

    async fn upload_file(&mut self, path: &Path) -> Result<(), PublishError> {
        self.lifecycle.ensure_can_upload()?;
        let pid = self.require_pid()?.to_string();
        let name = file_name(path)?;
        let file = tokio::fs::File::open(path).await?;
        let length = file.metadata().await?.len();

        let part = Part::stream_with_length(Body::from(file), length).file_name(name.clone());
        let request = self
            .client
            .http()
            .post(self.client.endpoint("datasets/:persistentId/add"))
            .query(&[("persistentId", pid.as_str())])
            .multipart(Form::new().part("file", part));
        self.client.call(request).await?;
        self.lifecycle.advance(DraftState::Uploaded)?;
        self.log.info(format!("Dataverse: uploaded {} ({} bytes)", name, length));
        Ok(())
    }

    async fn publish(&mut self) -> Result<(), PublishError> {
        self.lifecycle.ensure_can_publish()?;
        let pid = self.require_pid()?.to_string();

        let request = self
            .client
            .http()
            .post(self.client.endpoint("datasets/:persistentId/actions/:publish"))
            .query(&[("persistentId", pid.as_str()), ("type", "major")]);
        self.client.call(request).await?;

        self.published = true;
        self.lifecycle.advance(DraftState::Published)?;
        self.log.info(format!("Dataverse: published {} ({})", self.url(), pid));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drafts::test_server::TestServer;

    const PID: &str = "doi:10.5072/FK2/X";
    const PID_QUERY: &str = "persistentId=doi%3A10.5072%2FFK2%2FX";

    fn metadata(pairs: &[(&str, &str)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn offline_draft(draft_url: Option<&str>) -> DataverseDraft {
        DataverseDraft::new("http://127.0.0.1:9/api", None, "demo", draft_url, PublishLog::default())
            .unwrap()
    }

    fn full_metadata() -> Metadata {
        metadata(&[
            ("TITLE", "Demo"),
            ("CREATOR", "Alice"),
            ("ABSTRACT", "About"),
            ("SUBJECT", "Other"),
        ])
    }

    fn served_draft(server: &TestServer) -> DataverseDraft {
        DataverseDraft::new(&server.url("/api"), None, "demo", None, PublishLog::default()).unwrap()
    }

    fn field<'a>(fields: &'a [Value], name: &str) -> &'a Value {
        fields
            .iter()
            .find(|f| f["typeName"] == name)
            .unwrap_or_else(|| panic!("no field {name}"))
    }

    #[test]
    fn test_create_payload_has_placeholders() {
        let payload = create_payload("Demo");
        let fields = payload["datasetVersion"]["metadataBlocks"]["citation"]["fields"]
            .as_array()
            .unwrap();

        assert_eq!(field(fields, "title")["value"], "Demo");
        assert_eq!(field(fields, "subject")["value"][0], "Other");
        assert_eq!(
            field(fields, "author")["value"][0]["authorName"]["value"],
            PLACEHOLDER_CREATOR
        );
    }

    #[test]
    fn test_metadata_fields_map_keys() {
        let fields = metadata_fields(
            &metadata(&[
                ("CREATOR", "Alice"),
                ("ABSTRACT", "About"),
                ("SUBJECT", "Earth and Environmental Sciences"),
                ("TECHNICALINFO", "ticket access"),
                ("PID", "21.T/1"),
            ]),
            "/zoneA/home/pub/demo",
        );

        assert_eq!(field(&fields, "author")["value"][0]["authorName"]["value"], "Alice");
        assert_eq!(field(&fields, "dataSources")["value"][0], "ticket access");
        let ids = field(&fields, "otherId")["value"].as_array().unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0]["otherIdValue"]["value"], "/zoneA/home/pub/demo");
        assert_eq!(ids[1]["otherIdValue"]["value"], "hdl.handle.net/21.T/1");
        assert!(fields.iter().all(|f| f["typeName"] != "alternativeURL"));
    }

    #[test]
    fn test_references_use_file_names() {
        let mut refs = Identifiers::new();
        refs.insert("/z/c/a.txt".to_string(), "t1".to_string());
        refs.insert("/z/c/b.txt".to_string(), "t2".to_string());

        let field = references_field(&refs, "Ticket: ");
        assert_eq!(field["typeName"], "otherReferences");
        assert_eq!(field["value"][0], "a.txt: Ticket: t1");
        assert_eq!(field["value"][1], "b.txt: Ticket: t2");
    }

    #[test]
    fn test_persistent_id_from_url() {
        assert_eq!(
            persistent_id_from_url("https://dv.example.org/dataset.xhtml?persistentId=doi:10.5072/FK2/X&version=DRAFT")
                .as_deref(),
            Some("doi:10.5072/FK2/X")
        );
        assert_eq!(
            persistent_id_from_url("doi:10.5072/FK2/X").as_deref(),
            Some("doi:10.5072/FK2/X")
        );
        assert_eq!(persistent_id_from_url(" "), None);
    }

    #[tokio::test]
    async fn test_resumed_draft_rejects_create() {
        let mut draft = offline_draft(Some("doi:10.5072/FK2/X"));

        let err = draft.create("Demo").await.unwrap_err();
        assert!(matches!(err, PublishError::AlreadyExists { .. }));
        assert_eq!(
            draft.url(),
            "http://127.0.0.1:9/dataset.xhtml?persistentId=doi:10.5072/FK2/X"
        );
        assert!(draft.doi().is_empty());
    }

    #[tokio::test]
    async fn test_publish_before_create() {
        let mut draft = offline_draft(None);

        let err = draft.publish().await.unwrap_err();
        assert!(matches!(err, PublishError::Publish { .. }));
        assert!(draft.url().is_empty());
    }

    #[tokio::test]
    async fn test_patch_requires_subject() {
        let mut draft = offline_draft(Some("doi:10.5072/FK2/X"));

        let err = draft
            .patch(
                &metadata(&[("TITLE", "Demo"), ("CREATOR", "Alice"), ("ABSTRACT", "About")]),
                "/z/c",
            )
            .await
            .unwrap_err();
        match err {
            PublishError::MissingMetadata { keys, .. } => assert_eq!(keys, vec!["SUBJECT"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_upload_before_patch_is_invalid() {
        let mut draft = offline_draft(Some("doi:10.5072/FK2/X"));
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"data").unwrap();

        let err = draft.upload_file(&file).await.unwrap_err();
        assert!(matches!(err, PublishError::InvalidState { .. }));
        assert_eq!(draft.state(), DraftState::Created);
    }

    #[tokio::test]
    async fn test_create_patch_upload_publish() {
        let server = TestServer::start().await;
        server.reply(
            "POST",
            "/api/dataverses/demo/datasets",
            201,
            json!({"status": "OK", "data": {"id": 42, "persistentId": PID}}),
        );
        server.reply("PUT", "/api/datasets/:persistentId/editMetadata", 200, json!({"status": "OK"}));
        server.reply("POST", "/api/datasets/:persistentId/add", 200, json!({"status": "OK"}));
        server.reply(
            "POST",
            "/api/datasets/:persistentId/actions/:publish",
            200,
            json!({"status": "OK"}),
        );
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"payload").unwrap();

        let mut draft = served_draft(&server);
        draft.create("Demo").await.unwrap();
        assert!(draft.doi().is_empty());
        draft.patch(&full_metadata(), "/zoneA/home/pub/demo").await.unwrap();
        draft.upload_file(&file).await.unwrap();
        draft.publish().await.unwrap();

        assert_eq!(draft.state(), DraftState::Published);
        assert_eq!(draft.doi(), PID);
        assert_eq!(
            draft.url(),
            server.url(&format!("/dataset.xhtml?persistentId={}", PID))
        );

        let requests = server.requests();
        assert_eq!(requests.len(), 4);
        let created: Value = serde_json::from_str(&requests[0].body).unwrap();
        assert_eq!(
            created["datasetVersion"]["metadataBlocks"]["citation"]["fields"][0]["value"],
            "Demo"
        );
        assert!(requests[1].query.contains(PID_QUERY));
        assert!(requests[1].query.contains("replace=true"));
        assert!(requests[1].body.contains("Alice"));
        assert!(requests[2].body.contains("filename=\"a.txt\""));
        assert!(requests[2].body.contains("payload"));
        assert!(requests[3].query.contains(PID_QUERY));
        assert!(requests[3].query.contains("type=major"));
    }

    #[tokio::test]
    async fn test_rejected_requests_keep_state() {
        let server = TestServer::start().await;
        server.reply(
            "POST",
            "/api/dataverses/demo/datasets",
            403,
            json!({"status": "ERROR", "message": "User is not permitted"}),
        );

        let mut draft = served_draft(&server);
        let err = draft.create("Demo").await.unwrap_err();
        match &err {
            PublishError::RemoteRejected { status, message, .. } => {
                assert_eq!(*status, 403);
                assert!(message.contains("not permitted"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(draft.state(), DraftState::Unset);
        assert!(draft.url().is_empty());

        server.reply(
            "POST",
            "/api/dataverses/demo/datasets",
            201,
            json!({"status": "OK", "data": {"persistentId": PID}}),
        );
        server.reply(
            "PUT",
            "/api/datasets/:persistentId/editMetadata",
            400,
            json!({"status": "ERROR", "message": "invalid subject"}),
        );
        draft.create("Demo").await.unwrap();
        let err = draft.patch(&full_metadata(), "/z/c").await.unwrap_err();
        assert!(matches!(err, PublishError::RemoteRejected { status: 400, .. }));
        assert_eq!(draft.state(), DraftState::Created);
    }
}
