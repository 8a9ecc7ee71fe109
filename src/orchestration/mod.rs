//! Orchestration layer for collection publishing
//!
//! This module drives one draft through the publish protocol and keeps the
//! records of finished runs.

pub mod history;
pub mod prompt;
pub mod report;
pub mod step_runner;
pub mod workflow;

pub use history::{HistoryFilter, HistoryStatistics, PublishHistory, PublishRecord};
pub use prompt::StdinPrompt;
pub use report::{AbortReason, PublishStatus, Report};
pub use step_runner::{FailurePolicy, StepRunner, StepSummary, StepTarget};
pub use workflow::{PublishWorkflow, WorkflowOptions, WorkflowStep};
