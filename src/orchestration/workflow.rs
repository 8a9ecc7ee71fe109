//! Publish workflow - drives one draft through the publish protocol
//!
//! Manages the complete publishing run:
//! - Collection lock around the protected region, released on every path
//! - Idempotency guard on `<repo>/DOI`
//! - Validation of structure and required metadata
//! - Ticket and PID assignment
//! - Draft creation, metadata steps and data upload under a `StepRunner`
//! - Confirmation, publication and write-back of DOI and URL
//! - Report written back into storage

use super::prompt::StdinPrompt;
use super::report::{AbortReason, PublishStatus, Report};
use super::step_runner::{FailurePolicy, StepRunner, StepTarget};
use crate::core::error::PublishError;
use crate::core::logging::PublishLog;
use crate::core::state_machine::{WorkflowState, WorkflowStateMachine};
use crate::core::traits::{Draft, IdentifierAuthority, Identifiers, Prompt, missing_keys};
use crate::lock::CollectionLock;
use crate::security::SecureTokenManager;
use crate::storage::Collection;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Options of one publish run
#[derive(Debug, Clone)]
pub struct WorkflowOptions {
    pub policy: FailurePolicy,
    /// Upload data when the backend accepts it; decided by the caller
    pub upload: bool,
    /// Remove downloaded temporary files
    pub cleanup: bool,
    /// Leave the collection read-only after a successful publish
    pub keep_closed: bool,
    pub assign_pids: bool,
    /// Prefix turning the collection path into a public URL
    pub http_endpoint: Option<String>,
    /// Defaults to `/<zone>/home/public`
    pub report_collection: Option<String>,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            policy: FailurePolicy::Strict,
            upload: true,
            cleanup: true,
            keep_closed: false,
            assign_pids: false,
            http_endpoint: None,
            report_collection: None,
        }
    }
}

/// Steps executed by the `StepRunner` after the draft exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStep {
    PatchDraft,
    PatchDraftTickets,
    PatchDraftPids,
    UploadToRepo,
}

impl WorkflowStep {
    pub const ALL: [WorkflowStep; 4] = [
        WorkflowStep::PatchDraft,
        WorkflowStep::PatchDraftTickets,
        WorkflowStep::PatchDraftPids,
        WorkflowStep::UploadToRepo,
    ];
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowStep::PatchDraft => "patch_draft",
            WorkflowStep::PatchDraftTickets => "patch_draft_tickets",
            WorkflowStep::PatchDraftPids => "patch_draft_pids",
            WorkflowStep::UploadToRepo => "upload_to_repo",
        };
        f.write_str(name)
    }
}

type Abort = (AbortReason, PublishError);

pub struct PublishWorkflow {
    collection: Collection,
    draft: Box<dyn Draft>,
    authority: Arc<dyn IdentifierAuthority>,
    prompt: Arc<dyn Prompt>,
    tokens: SecureTokenManager,
    principal: String,
    options: WorkflowOptions,
    tickets: Identifiers,
    pids: Identifiers,
    state: WorkflowStateMachine,
    log: PublishLog,
}

impl PublishWorkflow {
    /// Build a workflow; existing `PID` and `TICKET` entries are picked up
    pub async fn new(
        collection: Collection,
        draft: Box<dyn Draft>,
        authority: Arc<dyn IdentifierAuthority>,
        principal: impl Into<String>,
        options: WorkflowOptions,
        log: PublishLog,
    ) -> Result<Self, PublishError> {
        let pids = collection.metadata_all("PID").await?;
        let tickets = collection.metadata_all("TICKET").await?;

        log.info(format!("Publish collection: {}", collection.uri()));
        log.info(format!("Draft type: {}", draft.repo_name()));
        log.info(format!("Draft uri: {}", draft.uri()));

        Ok(Self {
            collection,
            draft,
            authority,
            prompt: Arc::new(StdinPrompt),
            tokens: SecureTokenManager::default(),
            principal: principal.into(),
            options,
            tickets,
            pids,
            state: WorkflowStateMachine::new(),
            log,
        })
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn Prompt>) -> Self {
        self.prompt = prompt;
        self
    }

    /// Tokens to mask in the written report
    pub fn with_tokens(mut self, tokens: SecureTokenManager) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn draft(&self) -> &dyn Draft {
        self.draft.as_ref()
    }

    pub fn tickets(&self) -> &Identifiers {
        &self.tickets
    }

    pub fn pids(&self) -> &Identifiers {
        &self.pids
    }

    pub fn state(&self) -> WorkflowState {
        self.state.get_state()
    }

    /// `<repo>/<key>` metadata key
    pub fn repo_key(&self, key: &str) -> String {
        format!("{}/{}", self.draft.repo_name(), key)
    }

    pub fn repo_value(&self, key: &str) -> Option<&str> {
        self.collection
            .metadata()
            .get(&self.repo_key(key))
            .map(String::as_str)
    }

    pub fn is_published(&self) -> bool {
        self.repo_value("DOI").is_some_and(|doi| !doi.is_empty())
    }

    /// Structure and required metadata; logs what is missing
    pub fn check_collection(&self) -> bool {
        let mut ok = self.collection.validate().is_empty();
        let repo = self.draft.repo_name();
        let missing = missing_keys(self.draft.required_keys(), self.collection.metadata());

        if missing.is_empty() {
            self.log.info(format!(
                "{} PUBLISH NOTE: all metadata defined: {}",
                repo,
                self.draft.required_keys().join(", ")
            ));
        } else {
            self.log.error(format!(
                "{} PUBLISH ERROR: keys not defined: {}",
                repo,
                missing.join(", ")
            ));
            ok = false;
        }
        ok
    }

    pub async fn assign_series_information(&mut self) -> Result<(), PublishError> {
        if self.collection.metadata().contains_key("SERIESINFORMATION") {
            return Ok(());
        }
        let info = format!("Collection {}", self.collection.uri());
        self.collection
            .update_metadata("SERIESINFORMATION", &info)
            .await
    }

    /// Mint tickets for the collection and its members unless present
    pub async fn assign_tickets(&mut self) -> Result<(), PublishError> {
        if self.tickets.is_empty() {
            let mut tickets = Identifiers::new();
            let path = self.collection.path().to_string();

            let ticket = self.authority.mint_ticket(&path).await?;
            self.collection.update_metadata("TICKET", &ticket).await?;
            let info = technical_info(&self.collection, &ticket);
            self.collection.update_metadata("TECHNICALINFO", &info).await?;
            tickets.insert(path, ticket);

            for member in self.collection.members() {
                let ticket = self.authority.mint_ticket(&member.path).await?;
                self.collection
                    .set_member_metadata(member, "TICKET", &ticket)
                    .await?;
                tickets.insert(member.path.clone(), ticket);
            }
            self.tickets = tickets;
            self.log.info("Tickets for collection created:");
        }
        for (path, ticket) in &self.tickets {
            self.log.info(format!(" {}: {}", path, ticket));
        }
        Ok(())
    }

    /// Mint PIDs for the collection and its members when enabled and absent
    pub async fn assign_pids(&mut self) -> Result<(), PublishError> {
        if !self.options.assign_pids || !self.pids.is_empty() {
            return Ok(());
        }
        let mut pids = Identifiers::new();
        let path = self.collection.path().to_string();

        let pid = self.authority.mint_pid(&path).await?;
        self.collection.update_metadata("PID", &pid).await?;
        pids.insert(path, pid);

        for member in self.collection.members() {
            let pid = self.authority.mint_pid(&member.path).await?;
            self.collection.set_member_metadata(member, "PID", &pid).await?;
            pids.insert(member.path.clone(), pid);
        }
        self.log
            .info(format!("PIDs for collection created: {}", pids.len()));
        self.pids = pids;
        Ok(())
    }

    async fn assign_identifiers(&mut self) -> Result<(), PublishError> {
        self.assign_series_information().await?;
        self.assign_tickets().await?;
        self.assign_pids().await
    }

    pub async fn create_draft(&mut self) -> Result<(), PublishError> {
        self.draft.create(self.collection.title()).await
    }

    pub async fn patch_draft(&mut self) -> Result<(), PublishError> {
        let path = match self.options.http_endpoint.as_deref() {
            Some(endpoint) if !endpoint.is_empty() => {
                format!("{}{}", endpoint.trim_end_matches('/'), self.collection.path())
            }
            _ => self.collection.path().to_string(),
        };
        self.draft.patch(self.collection.metadata(), &path).await
    }

    pub async fn patch_draft_tickets(&mut self) -> Result<(), PublishError> {
        self.draft.patch_tickets(&self.tickets).await
    }

    pub async fn patch_draft_pids(&mut self) -> Result<(), PublishError> {
        self.draft.patch_pids(&self.pids).await
    }

    /// Download each member into a temporary directory and upload it
    ///
    /// Skipped when the backend takes no data or upload was turned off.
    pub async fn upload_to_repo(&mut self) -> Result<(), PublishError> {
        if !self.draft.has_data() {
            self.log.info(format!(
                "draft {} does not support data upload",
                self.draft.repo_name()
            ));
            return Ok(());
        }
        if !self.options.upload {
            self.log.info("data upload skipped");
            return Ok(());
        }

        let dir = tempfile::Builder::new()
            .prefix("collection-publisher-")
            .tempdir()?;
        let result = self.upload_members(dir.path()).await;

        if self.options.cleanup {
            if let Err(e) = dir.close() {
                self.log
                    .warn(format!("cannot remove temporary directory: {}", e));
            }
        } else {
            let kept = dir.keep();
            self.log
                .info(format!("temporary files kept in {}", kept.display()));
        }
        result
    }

    async fn upload_members(&mut self, dir: &Path) -> Result<(), PublishError> {
        for member in self.collection.members() {
            let local = self.collection.download_member(member, dir).await?;
            self.draft.upload_file(&local).await?;
            if self.options.cleanup {
                tokio::fs::remove_file(&local).await?;
            }
        }
        Ok(())
    }

    /// Publish the draft and record `<repo>/DOI` and `<repo>/URL`
    pub async fn publish_draft(&mut self) -> Result<(), PublishError> {
        self.draft.publish().await?;
        let doi = self.draft.doi();
        let url = self.draft.url();
        let doi_key = self.repo_key("DOI");
        let url_key = self.repo_key("URL");
        self.collection.update_metadata(&doi_key, &doi).await?;
        self.collection.update_metadata(&url_key, &url).await?;
        Ok(())
    }

    /// Run the whole protocol and return the report
    ///
    /// The lock is released on every path; the report is written before the
    /// release and a failure to write it is only logged.
    pub async fn run(&mut self) -> Report {
        let started_at = Utc::now();
        let mut lock = CollectionLock::new(
            self.collection.store().clone(),
            self.principal.clone(),
            self.log.clone(),
        );

        let outcome = match lock.lock(&self.collection).await {
            Ok(()) => {
                self.state.transition(WorkflowState::Locked, None);
                self.protected().await
            }
            Err(e) => Err((AbortReason::LockFailed, e)),
        };

        let (status, step_failures, error) = match outcome {
            Ok(step_failures) => (PublishStatus::Published, step_failures, None),
            Err((reason, e)) => {
                self.log
                    .error(format!("{} [{}]: {}", reason.as_str(), e.code(), e));
                (PublishStatus::Aborted(reason), 0, Some(e))
            }
        };
        if status.is_success() && self.options.keep_closed {
            lock.finalize();
        }

        self.state.transition(WorkflowState::Reporting, None);
        let mut report = self.build_report(status, step_failures, error, started_at);
        self.emit_report(&mut report).await;

        let failures = lock.release().await;
        if !failures.is_empty() {
            self.log.error(format!(
                "{} permission changes could not be restored",
                failures.len()
            ));
        }

        match status {
            PublishStatus::Published => self.state.transition(WorkflowState::Published, None),
            PublishStatus::Aborted(reason) => self
                .state
                .transition(WorkflowState::Aborted, Some(reason.as_str().to_string())),
        }
        report.history = self.state.get_history();
        report.finished_at = Utc::now();
        report
    }

    /// Everything between lock and release; returns the step failure count
    async fn protected(&mut self) -> Result<usize, Abort> {
        self.state.transition(WorkflowState::Validating, None);
        if self.is_published() {
            let doi = self.repo_value("DOI").unwrap_or_default().to_string();
            self.log.error(format!(
                "Data already published {{{}={}}}",
                self.repo_key("URL"),
                self.repo_value("URL").unwrap_or("?")
            ));
            return Err((
                AbortReason::AlreadyPublished,
                PublishError::AlreadyPublished {
                    repository: self.draft.repo_name().to_string(),
                    key: self.repo_key("DOI"),
                    value: doi,
                },
            ));
        }
        if !self.check_collection() {
            return Err((
                AbortReason::ValidationFailed,
                PublishError::Validation {
                    repository: self.draft.repo_name().to_string(),
                    message: "metadata validation error".to_string(),
                },
            ));
        }

        self.state
            .transition(WorkflowState::AssigningIdentifiers, None);
        self.assign_identifiers()
            .await
            .map_err(|e| (AbortReason::IdentifiersFailed, e))?;

        self.state.transition(WorkflowState::CreatingDraft, None);
        self.create_draft()
            .await
            .map_err(|e| (AbortReason::DraftCreateFailed, e))?;

        self.state.transition(WorkflowState::RunningSteps, None);
        let runner = StepRunner::new(self.options.policy, self.prompt.clone(), self.log.clone());
        let summary = runner
            .run(self, &WorkflowStep::ALL)
            .await
            .map_err(|e| match e {
                PublishError::Cancelled => (AbortReason::Cancelled, e),
                e => (AbortReason::StepsFailed, e),
            })?;

        if self.options.policy == FailurePolicy::Interactive {
            self.state.transition(WorkflowState::Confirming, None);
            let question = format!("Publish draft {}?", self.draft.url());
            match self.prompt.confirm(&question).await {
                Ok(true) => {}
                Ok(false) => {
                    self.log.warn("publishing cancelled by operator");
                    return Err((AbortReason::Cancelled, PublishError::Cancelled));
                }
                Err(e) => return Err((AbortReason::Cancelled, e)),
            }
        }

        self.state.transition(WorkflowState::Publishing, None);
        self.publish_draft()
            .await
            .map_err(|e| (AbortReason::PublishFailed, e))?;
        self.log.info(format!(
            "{} PUBLISHED: {} ({})",
            self.draft.repo_name(),
            self.draft.url(),
            self.draft.doi()
        ));
        Ok(summary.failures.len())
    }

    fn build_report(
        &self,
        status: PublishStatus,
        step_failures: usize,
        error: Option<PublishError>,
        started_at: DateTime<Utc>,
    ) -> Report {
        let published = status.is_success();
        let non_empty = |s: String| if s.is_empty() { None } else { Some(s) };
        Report {
            status,
            repository: self.draft.repo_name().to_string(),
            collection: self.collection.path().to_string(),
            doi: if published { non_empty(self.draft.doi()) } else { None },
            url: non_empty(self.draft.url()),
            lines: self.log.lines(),
            history: self.state.get_history(),
            step_failures,
            started_at,
            finished_at: Utc::now(),
            location: None,
            error,
        }
    }

    async fn emit_report(&self, report: &mut Report) {
        let store = self.collection.store();
        let directory = match &self.options.report_collection {
            Some(dir) if !dir.is_empty() => dir.clone(),
            _ => format!("/{}/home/public", store.zone()),
        };
        let owners = match self.collection.owners().await {
            Ok(owners) => owners,
            Err(e) => {
                self.log.warn(format!("REPORT: cannot read owners: {}", e));
                BTreeSet::new()
            }
        };

        if let Err(e) = report
            .write(store.as_ref(), &directory, &owners, &self.tokens, &self.log)
            .await
        {
            self.log.error(format!("REPORT: cannot write report: {}", e));
        }
    }
}

#[async_trait]
impl StepTarget for PublishWorkflow {
    type Step = WorkflowStep;

    async fn run_step(&mut self, step: WorkflowStep) -> Result<(), PublishError> {
        match step {
            WorkflowStep::PatchDraft => self.patch_draft().await,
            WorkflowStep::PatchDraftTickets => self.patch_draft_tickets().await,
            WorkflowStep::PatchDraftPids => self.patch_draft_pids().await,
            WorkflowStep::UploadToRepo => self.upload_to_repo().await,
        }
    }
}

/// How to fetch the collection anonymously with its ticket
fn technical_info(collection: &Collection, ticket: &str) -> String {
    let store = collection.store();
    let endpoint = json!({
        "endpoint": store.uri(collection.path()),
        "user_name": "anonymous",
        "zone_name": store.zone(),
    });
    format!("{}; read with ticket: {}", endpoint, ticket)
}
