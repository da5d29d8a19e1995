use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::sanitize;

/// Experience-level facet; codes follow the listing endpoint's `f_E` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExperienceLevel {
    Internship,
    Entry,
    Associate,
    MidSenior,
    Director,
    Executive,
}

impl ExperienceLevel {
    pub fn code(self) -> &'static str {
        match self {
            Self::Internship => "1",
            Self::Entry => "2",
            Self::Associate => "3",
            Self::MidSenior => "4",
            Self::Director => "5",
            Self::Executive => "6",
        }
    }
}

/// Job-type facet; codes follow the listing endpoint's `f_JT` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    FullTime,
    PartTime,
    Contract,
    Temporary,
    Internship,
    Volunteer,
}

impl JobType {
    pub fn code(self) -> &'static str {
        match self {
            Self::FullTime => "F",
            Self::PartTime => "P",
            Self::Contract => "C",
            Self::Temporary => "T",
            Self::Internship => "I",
            Self::Volunteer => "V",
        }
    }
}

/// Workplace facet; codes follow the listing endpoint's `f_WT` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkplaceType {
    OnSite,
    Remote,
    Hybrid,
}

impl WorkplaceType {
    pub fn code(self) -> &'static str {
        match self {
            Self::OnSite => "1",
            Self::Remote => "2",
            Self::Hybrid => "3",
        }
    }
}

fn default_max_results() -> u32 {
    20
}

fn default_posted_within_days() -> u32 {
    7
}

fn default_max_applicants() -> u32 {
    100
}

fn default_validate_top_n() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

/// Immutable input to a scrape run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSpec {
    pub keywords: String,
    #[serde(default)]
    pub location: String,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default = "default_posted_within_days")]
    pub posted_within_days: u32,
    #[serde(default = "default_max_applicants")]
    pub max_applicants: u32,
    #[serde(default)]
    pub experience_levels: Vec<ExperienceLevel>,
    #[serde(default)]
    pub job_types: Vec<JobType>,
    #[serde(default)]
    pub workplace_types: Vec<WorkplaceType>,
    #[serde(default)]
    pub easy_apply: bool,
    #[serde(default = "default_true")]
    pub validate_html: bool,
    #[serde(default)]
    pub validate_browser: bool,
    #[serde(default = "default_validate_top_n")]
    pub validate_top_n: u32,
    #[serde(default)]
    pub user_skills: Vec<String>,
}

impl FilterSpec {
    /// Validate string fields and clamp numeric ones into their documented
    /// ranges. Returns the sanitized spec ready for a run.
    pub fn sanitized(mut self) -> Result<Self, AppError> {
        self.keywords = sanitize::clean_query_field("keywords", &self.keywords, 100)?;
        if self.keywords.is_empty() {
            return Err(AppError::InvalidInput("keywords must not be empty".into()));
        }
        self.location = sanitize::clean_query_field("location", &self.location, 100)?;
        self.max_results = self.max_results.clamp(1, 100);
        self.posted_within_days = self.posted_within_days.clamp(1, 30);
        self.validate_top_n = self.validate_top_n.clamp(1, self.max_results);
        self.user_skills = sanitize::clean_skills(self.user_skills);
        Ok(self)
    }

    pub fn max_hours_old(&self) -> u32 {
        self.posted_within_days * 24
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(keywords: &str) -> FilterSpec {
        serde_json::from_value(serde_json::json!({ "keywords": keywords })).unwrap()
    }

    #[test]
    fn days_clamped_into_range() {
        let mut s = spec("Software Engineer");
        s.posted_within_days = 0;
        assert_eq!(s.clone().sanitized().unwrap().posted_within_days, 1);
        s.posted_within_days = 90;
        assert_eq!(s.sanitized().unwrap().posted_within_days, 30);
    }

    #[test]
    fn top_n_never_exceeds_max_results() {
        let mut s = spec("Rust Developer");
        s.max_results = 5;
        s.validate_top_n = 50;
        assert_eq!(s.sanitized().unwrap().validate_top_n, 5);
    }

    #[test]
    fn rejects_markup_in_keywords() {
        assert!(spec("<script>alert(1)</script>").sanitized().is_err());
        assert!(spec("dev{ops}").sanitized().is_err());
    }

    #[test]
    fn facet_codes_are_stable() {
        assert_eq!(ExperienceLevel::MidSenior.code(), "4");
        assert_eq!(JobType::Contract.code(), "C");
        assert_eq!(WorkplaceType::Remote.code(), "2");
    }

    #[test]
    fn kebab_case_wire_names() {
        let lvl: ExperienceLevel = serde_json::from_str("\"mid-senior\"").unwrap();
        assert_eq!(lvl, ExperienceLevel::MidSenior);
        let jt: JobType = serde_json::from_str("\"full-time\"").unwrap();
        assert_eq!(jt, JobType::FullTime);
        let wt: WorkplaceType = serde_json::from_str("\"on-site\"").unwrap();
        assert_eq!(wt, WorkplaceType::OnSite);
    }
}
