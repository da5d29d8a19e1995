use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which adapter discovered a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobSource {
    Primary,
    Fallback,
}

/// Validation stages, ordered by cost and authority. A job's tier only
/// ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationTier {
    None,
    Snippet,
    Html,
    Browser,
}

/// Unified job record produced by any source and progressively enriched
/// by the validation tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalJob {
    /// Stable id across sources when parseable from the listing URL or URN.
    pub external_id: Option<String>,
    pub url: String,
    pub title: String,
    pub company: String,
    pub location: Option<String>,
    pub snippet: Option<String>,
    pub description: Option<String>,
    /// Original textual posted form, e.g. "3 days ago".
    pub posted_label: Option<String>,
    /// 0 means "early applicant" and passes any cap; None means unknown.
    pub applicants: Option<u32>,
    pub posted_hours_ago: Option<u32>,
    pub easy_apply: bool,
    pub source: JobSource,
    pub discovered_at: DateTime<Utc>,
    pub validation_tier: ValidationTier,
    /// Tri-valued: None = unchecked, Some(false) = confirmed open.
    pub is_closed: Option<bool>,
    pub is_reposted: Option<bool>,
    /// Meaningful only once `validation_tier` is past `None`.
    pub passes_validation: Option<bool>,
    pub validation_reason: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub required_skills: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub matched_skills: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub missing_skills: Vec<String>,
    pub match_score: u8,
}

impl CanonicalJob {
    pub fn new(url: String, title: String, company: String, source: JobSource) -> Self {
        Self {
            external_id: None,
            url,
            title,
            company,
            location: None,
            snippet: None,
            description: None,
            posted_label: None,
            applicants: None,
            posted_hours_ago: None,
            easy_apply: false,
            source,
            discovered_at: Utc::now(),
            validation_tier: ValidationTier::None,
            is_closed: None,
            is_reposted: None,
            passes_validation: None,
            validation_reason: None,
            required_skills: Vec::new(),
            matched_skills: Vec::new(),
            missing_skills: Vec::new(),
            match_score: 0,
        }
    }

    /// Record a validation verdict, never moving the tier backwards.
    pub fn mark_validated(&mut self, tier: ValidationTier, passes: bool, reason: &str) {
        if tier > self.validation_tier {
            self.validation_tier = tier;
        }
        self.passes_validation = Some(passes);
        self.validation_reason = Some(reason.to_string());
    }

    /// A job is dropped from final output once any tier confirmed it
    /// closed, reposted, or otherwise failing.
    pub fn is_rejected(&self) -> bool {
        self.is_closed == Some(true)
            || self.is_reposted == Some(true)
            || self.passes_validation == Some(false)
    }

    /// Field-completeness score used as a merge tie-break: the record
    /// with the higher validation tier wins, then the one with more
    /// populated optional fields.
    pub fn richness(&self) -> (ValidationTier, u32) {
        let filled = [
            self.external_id.is_some(),
            self.location.is_some(),
            self.snippet.is_some(),
            self.description.is_some(),
            self.posted_label.is_some(),
            self.applicants.is_some(),
            self.posted_hours_ago.is_some(),
            self.is_closed.is_some(),
            self.is_reposted.is_some(),
        ]
        .iter()
        .filter(|&&f| f)
        .count() as u32;
        (self.validation_tier, filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> CanonicalJob {
        CanonicalJob::new(
            "https://www.linkedin.com/jobs/view/123".into(),
            "Engineer".into(),
            "Acme".into(),
            JobSource::Fallback,
        )
    }

    #[test]
    fn tier_never_moves_backwards() {
        let mut j = job();
        j.mark_validated(ValidationTier::Html, true, "passed");
        assert_eq!(j.validation_tier, ValidationTier::Html);
        j.mark_validated(ValidationTier::Snippet, false, "closed");
        assert_eq!(j.validation_tier, ValidationTier::Html);
        assert_eq!(j.passes_validation, Some(false));
    }

    #[test]
    fn richer_record_wins_on_tier_then_fields() {
        let mut a = job();
        let mut b = job();
        a.mark_validated(ValidationTier::Browser, true, "passed");
        b.applicants = Some(3);
        b.location = Some("London".into());
        assert!(a.richness() > b.richness());

        let mut c = job();
        c.applicants = Some(3);
        assert!(b.richness() > c.richness());
    }

    #[test]
    fn closed_or_reposted_is_rejected() {
        let mut j = job();
        assert!(!j.is_rejected());
        j.is_closed = Some(true);
        assert!(j.is_rejected());
    }
}
