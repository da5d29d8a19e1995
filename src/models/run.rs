use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::CanonicalJob;
use crate::models::spec::FilterSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Per-adapter discovery counts reported on the run result.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCounts {
    pub primary: usize,
    pub fallback: usize,
}

/// Counts per drop reason, accumulated across discovery and validation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterStats {
    pub total_found: usize,
    pub passed: usize,
    pub filtered_location: usize,
    pub filtered_applicants: usize,
    pub filtered_age: usize,
    pub filtered_closed: usize,
    pub filtered_reposted: usize,
    pub errors: usize,
}

impl FilterStats {
    /// Bucket a machine-readable drop reason into the matching counter.
    pub fn record_drop(&mut self, reason: &str) {
        if reason.contains("closed") {
            self.filtered_closed += 1;
        } else if reason.contains("reposted") {
            self.filtered_reposted += 1;
        } else if reason.contains("applicants") {
            self.filtered_applicants += 1;
        } else if reason.contains("old") {
            self.filtered_age += 1;
        } else if reason.contains("location") {
            self.filtered_location += 1;
        } else {
            self.errors += 1;
        }
    }

    pub fn absorb(&mut self, other: FilterStats) {
        self.total_found += other.total_found;
        self.passed += other.passed;
        self.filtered_location += other.filtered_location;
        self.filtered_applicants += other.filtered_applicants;
        self.filtered_age += other.filtered_age;
        self.filtered_closed += other.filtered_closed;
        self.filtered_reposted += other.filtered_reposted;
        self.errors += other.errors;
    }
}

/// Mutable state of one scrape, stored in the run registry and owned by
/// the caller that started it for its whole life.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeRun {
    pub run_id: Uuid,
    #[serde(skip)]
    pub owner_id: String,
    pub spec: FilterSpec,
    pub status: RunStatus,
    pub progress: u8,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub jobs_found: usize,
    pub jobs: Vec<CanonicalJob>,
    pub sources: SourceCounts,
    pub filter_stats: FilterStats,
    pub search_method: Option<String>,
    pub fallback_used: bool,
    pub error: Option<String>,
}

impl ScrapeRun {
    pub fn new(owner_id: String, spec: FilterSpec) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            owner_id,
            spec,
            status: RunStatus::Queued,
            progress: 0,
            started_at: Utc::now(),
            completed_at: None,
            jobs_found: 0,
            jobs: Vec::new(),
            sources: SourceCounts::default(),
            filter_stats: FilterStats::default(),
            search_method: None,
            fallback_used: false,
            error: None,
        }
    }

    /// Progress is monotonically non-decreasing.
    pub fn advance_progress(&mut self, to: u8) {
        if to > self.progress {
            self.progress = to.min(100);
        }
    }
}

/// Listing view of a run: everything except the job payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub progress: u8,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub jobs_found: usize,
    pub search_method: Option<String>,
    pub fallback_used: bool,
    pub error: Option<String>,
}

impl From<&ScrapeRun> for RunSummary {
    fn from(run: &ScrapeRun) -> Self {
        Self {
            run_id: run.run_id,
            status: run.status,
            progress: run.progress,
            started_at: run.started_at,
            completed_at: run.completed_at,
            jobs_found: run.jobs_found,
            search_method: run.search_method.clone(),
            fallback_used: run.fallback_used,
            error: run.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_monotone() {
        let spec: FilterSpec =
            serde_json::from_value(serde_json::json!({ "keywords": "qa" })).unwrap();
        let mut run = ScrapeRun::new("user-1".into(), spec);
        run.advance_progress(30);
        run.advance_progress(10);
        assert_eq!(run.progress, 30);
        run.advance_progress(120);
        assert_eq!(run.progress, 100);
    }

    #[test]
    fn drop_reasons_bucket_correctly() {
        let mut stats = FilterStats::default();
        stats.record_drop("too_many_applicants:45");
        stats.record_drop("too_old:336h");
        stats.record_drop("closed");
        stats.record_drop("reposted");
        stats.record_drop("error:timeout");
        assert_eq!(stats.filtered_applicants, 1);
        assert_eq!(stats.filtered_age, 1);
        assert_eq!(stats.filtered_closed, 1);
        assert_eq!(stats.filtered_reposted, 1);
        assert_eq!(stats.errors, 1);
    }
}
