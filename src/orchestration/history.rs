//! PublishHistory - local record of publish attempts
//!
//! Features:
//! - Record every finished run from its report
//! - Filter records by repository, collection, outcome and date
//! - Statistics per repository (success rate, duration)
//! - Markdown summary for the `history` command
//! - Persistent storage in JSON format

use super::report::Report;
use crate::core::error::PublishError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Default history location below the working directory
pub const DEFAULT_HISTORY_FILE: &str = ".collection-publisher/history.json";

/// One publish attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRecord {
    pub id: String,
    pub repository: String,
    pub collection: String,
    /// `PUBLISHED` or `ABORTED(<reason>)`
    pub status: String,
    pub success: bool,
    pub doi: Option<String>,
    pub url: Option<String>,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub timestamp: DateTime<Utc>,
    pub report_path: Option<String>,
}

/// Options for filtering history records
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub repository: Option<String>,
    pub collection: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub success_only: bool,
    pub failures_only: bool,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryStatistics {
    pub repository: String,
    pub attempts: usize,
    pub successes: usize,
    pub failures: usize,
    pub success_rate: f64,
    pub average_duration_ms: f64,
    pub last_attempt: DateTime<Utc>,
    pub last_collection: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryStatistics {
    pub total_attempts: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub success_rate: f64,
    pub average_duration_ms: f64,
    pub by_repository: BTreeMap<String, RepositoryStatistics>,
    pub time_range: Option<TimeRange>,
}

#[derive(Debug, Serialize, Deserialize)]
struct HistoryFile {
    version: String,
    records: Vec<PublishRecord>,
    last_updated: String,
}

pub struct PublishHistory {
    records: Vec<PublishRecord>,
    path: PathBuf,
}

impl PublishHistory {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            records: Vec::new(),
            path: path.into(),
        }
    }

    /// Open the history at `path`; a missing file is an empty history
    pub async fn load<P: Into<PathBuf>>(path: P) -> Result<Self, PublishError> {
        let mut history = Self::new(path);
        if !fs::try_exists(&history.path).await? {
            return Ok(history);
        }
        let data = fs::read_to_string(&history.path).await?;
        let parsed: HistoryFile = serde_json::from_str(&data).map_err(|e| {
            PublishError::storage(format!("corrupt history {}: {}", history.path.display(), e))
        })?;
        history.records = parsed.records;
        Ok(history)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append a finished run and save
    pub async fn record(&mut self, report: &Report) -> Result<PublishRecord, PublishError> {
        let record = PublishRecord {
            id: format!(
                "{}-{}",
                report.finished_at.timestamp_millis(),
                uuid::Uuid::new_v4().simple()
            ),
            repository: report.repository.clone(),
            collection: report.collection.clone(),
            status: report.status.to_string(),
            success: report.is_success(),
            doi: report.doi.clone(),
            url: report.url.clone(),
            error: report.error.as_ref().map(|e| e.to_string()),
            duration_ms: report.duration_ms(),
            timestamp: report.finished_at,
            report_path: report.location.clone(),
        };

        self.records.push(record.clone());
        self.save().await?;
        Ok(record)
    }

    /// Matching records, most recent first
    pub fn get_records(&self, filter: &HistoryFilter) -> Vec<PublishRecord> {
        let mut filtered: Vec<_> = self
            .records
            .iter()
            .filter(|r| {
                if let Some(ref repository) = filter.repository
                    && !r.repository.eq_ignore_ascii_case(repository)
                {
                    return false;
                }
                if let Some(ref collection) = filter.collection
                    && &r.collection != collection
                {
                    return false;
                }
                if let Some(start) = filter.start_date
                    && r.timestamp < start
                {
                    return false;
                }
                if let Some(end) = filter.end_date
                    && r.timestamp > end
                {
                    return false;
                }
                if filter.success_only && !r.success {
                    return false;
                }
                if filter.failures_only && r.success {
                    return false;
                }
                true
            })
            .cloned()
            .collect();

        filtered.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = filter.limit {
            filtered.truncate(limit);
        }
        filtered
    }

    pub fn get_statistics(&self, filter: &HistoryFilter) -> HistoryStatistics {
        let records = self.get_records(&HistoryFilter {
            limit: None,
            ..filter.clone()
        });
        let total = records.len();
        let success_count = records.iter().filter(|r| r.success).count();

        let time_range = match (
            records.iter().map(|r| r.timestamp).min(),
            records.iter().map(|r| r.timestamp).max(),
        ) {
            (Some(start), Some(end)) => Some(TimeRange { start, end }),
            _ => None,
        };

        HistoryStatistics {
            total_attempts: total,
            success_count,
            failure_count: total - success_count,
            success_rate: percentage(success_count, total),
            average_duration_ms: average(records.iter().map(|r| r.duration_ms), total),
            by_repository: repository_statistics(&records),
            time_range,
        }
    }

    /// Markdown summary of the statistics and the `recent` latest attempts
    pub fn markdown_summary(&self, filter: &HistoryFilter, recent: usize) -> String {
        let statistics = self.get_statistics(filter);
        let records = self.get_records(&HistoryFilter {
            limit: Some(recent),
            ..filter.clone()
        });

        let mut lines = Vec::new();
        lines.push("# Publish History\n".to_string());
        lines.push(format!("- **Total Attempts**: {}", statistics.total_attempts));
        lines.push(format!("- **Published**: {}", statistics.success_count));
        lines.push(format!("- **Aborted**: {}", statistics.failure_count));
        lines.push(format!("- **Success Rate**: {:.2}%", statistics.success_rate));
        lines.push(format!(
            "- **Average Duration**: {:.2}s\n",
            statistics.average_duration_ms / 1000.0
        ));

        if let Some(range) = &statistics.time_range {
            lines.push(format!(
                "Recorded from {} to {}\n",
                range.start.to_rfc3339(),
                range.end.to_rfc3339()
            ));
        }

        if !statistics.by_repository.is_empty() {
            lines.push("## Repositories\n".to_string());
            lines.push("| Repository | Attempts | Published | Aborted | Success Rate |".to_string());
            lines.push("|------------|----------|-----------|---------|--------------|".to_string());
            for stats in statistics.by_repository.values() {
                lines.push(format!(
                    "| {} | {} | {} | {} | {:.1}% |",
                    stats.repository, stats.attempts, stats.successes, stats.failures, stats.success_rate
                ));
            }
            lines.push(String::new());
        }

        if !records.is_empty() {
            lines.push("## Recent Attempts\n".to_string());
            lines.push("| Timestamp | Repository | Collection | Status | DOI |".to_string());
            lines.push("|-----------|------------|------------|--------|-----|".to_string());
            for record in &records {
                lines.push(format!(
                    "| {} | {} | {} | {} | {} |",
                    record.timestamp.format("%Y-%m-%d %H:%M"),
                    record.repository,
                    record.collection,
                    record.status,
                    record.doi.as_deref().unwrap_or("-")
                ));
            }
            lines.push(String::new());
        }

        lines.join("\n")
    }

    async fn save(&self) -> Result<(), PublishError> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir).await?;
        }

        let data = HistoryFile {
            version: "1.0".to_string(),
            records: self.records.clone(),
            last_updated: Utc::now().to_rfc3339(),
        };
        let json = serde_json::to_string_pretty(&data)
            .map_err(|e| PublishError::storage(format!("cannot encode history: {}", e)))?;
        fs::write(&self.path, json).await?;
        Ok(())
    }
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

fn average(values: impl Iterator<Item = i64>, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        values.sum::<i64>() as f64 / count as f64
    }
}

fn repository_statistics(records: &[PublishRecord]) -> BTreeMap<String, RepositoryStatistics> {
    let mut grouped: BTreeMap<String, Vec<&PublishRecord>> = BTreeMap::new();
    for record in records {
        grouped.entry(record.repository.clone()).or_default().push(record);
    }

    grouped
        .into_iter()
        .filter_map(|(repository, group)| {
            let latest = group.iter().max_by_key(|r| r.timestamp)?;
            let attempts = group.len();
            let successes = group.iter().filter(|r| r.success).count();
            let stats = RepositoryStatistics {
                repository: repository.clone(),
                attempts,
                successes,
                failures: attempts - successes,
                success_rate: percentage(successes, attempts),
                average_duration_ms: average(group.iter().map(|r| r.duration_ms), attempts),
                last_attempt: latest.timestamp,
                last_collection: latest.collection.clone(),
            };
            Some((repository, stats))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::report::{AbortReason, PublishStatus};
    use chrono::Duration;

    fn report(repository: &str, status: PublishStatus, minutes_ago: i64) -> Report {
        let finished_at = Utc::now() - Duration::minutes(minutes_ago);
        Report {
            status,
            repository: repository.to_string(),
            collection: "/zoneA/home/pub/demo".to_string(),
            doi: status.is_success().then(|| "10.1234/demo".to_string()),
            url: None,
            lines: Vec::new(),
            history: Vec::new(),
            step_failures: 0,
            started_at: finished_at - Duration::milliseconds(1500),
            finished_at,
            location: Some("/zoneA/home/public/alice_demo.status_16-10-26_10:00".to_string()),
            error: None,
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let history = PublishHistory::load(dir.path().join("history.json")).await.unwrap();
        assert!(history.is_empty());
        assert_eq!(history.get_statistics(&HistoryFilter::default()).total_attempts, 0);
    }

    #[tokio::test]
    async fn test_record_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.json");

        let mut history = PublishHistory::load(&path).await.unwrap();
        let record = history
            .record(&report("B2SHARE", PublishStatus::Published, 5))
            .await
            .unwrap();
        history
            .record(&report("CKAN", PublishStatus::Aborted(AbortReason::ValidationFailed), 1))
            .await
            .unwrap();

        let reloaded = PublishHistory::load(&path).await.unwrap();
        assert_eq!(reloaded.len(), 2);
        let records = reloaded.get_records(&HistoryFilter::default());
        assert_eq!(records[0].status, "ABORTED(ValidationFailed)");
        assert_eq!(records[1], record);
        assert_eq!(records[1].duration_ms, 1500);
    }

    #[tokio::test]
    async fn test_statistics_by_repository() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = PublishHistory::new(dir.path().join("history.json"));
        history.record(&report("B2SHARE", PublishStatus::Published, 30)).await.unwrap();
        history
            .record(&report("B2SHARE", PublishStatus::Aborted(AbortReason::StepsFailed), 20))
            .await
            .unwrap();
        history.record(&report("CKAN", PublishStatus::Published, 10)).await.unwrap();

        let stats = history.get_statistics(&HistoryFilter::default());
        assert_eq!(stats.total_attempts, 3);
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.by_repository["B2SHARE"].success_rate, 50.0);
        assert!(stats.time_range.is_some());

        let failures = history.get_records(&HistoryFilter {
            failures_only: true,
            ..Default::default()
        });
        assert_eq!(failures.len(), 1);

        let ckan = history.get_records(&HistoryFilter {
            repository: Some("ckan".to_string()),
            ..Default::default()
        });
        assert_eq!(ckan.len(), 1);

        let summary = history.markdown_summary(&HistoryFilter::default(), 2);
        assert!(summary.contains("| B2SHARE | 2 | 1 | 1 | 50.0% |"));
        assert_eq!(summary.matches("/zoneA/home/pub/demo").count(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        tokio::fs::write(&path, "not json").await.unwrap();

        let err = PublishHistory::load(&path).await.err().unwrap();
        assert_eq!(err.code(), "STORAGE_ERROR");
    }
}
