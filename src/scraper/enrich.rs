//! Enrichment contract: a pure async pass that annotates a candidate
//! job with required/matched/missing skills and a 0-100 match score.
//! The production collaborator is an external structured parser; the
//! built-in matcher keeps the pipeline useful without it.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::AppError;
use crate::models::job::CanonicalJob;

/// Skill vocabulary scanned out of listing text when no external parser
/// is wired in.
const SKILL_LEXICON: &[&str] = &[
    "python", "rust", "java", "javascript", "typescript", "go", "c++", "c#", "sql", "nosql",
    "react", "angular", "vue", "node.js", "django", "flask", "spring", "kubernetes", "docker",
    "terraform", "aws", "azure", "gcp", "linux", "git", "ci/cd", "graphql", "rest", "grpc",
    "kafka", "redis", "postgresql", "mysql", "mongodb", "elasticsearch", "spark", "airflow",
    "machine learning", "data engineering", "devops", "agile", "microservices",
];

/// Annotates one candidate at a time; implementations must be cheap to
/// call repeatedly and safe to fail.
#[async_trait]
pub trait JobEnricher: Send + Sync {
    async fn enrich(
        &self,
        job: CanonicalJob,
        user_skills: &[String],
    ) -> Result<CanonicalJob, AppError>;
}

/// Deterministic overlap scorer: required skills are the lexicon terms
/// (plus the user's own skills) found in the listing text; the score is
/// `floor(|required ∩ user| / |required| * 100)` after lowercasing.
pub struct SkillMatcher;

#[async_trait]
impl JobEnricher for SkillMatcher {
    async fn enrich(
        &self,
        mut job: CanonicalJob,
        user_skills: &[String],
    ) -> Result<CanonicalJob, AppError> {
        let text = job
            .description
            .as_deref()
            .or(job.snippet.as_deref())
            .unwrap_or("")
            .to_lowercase();
        if text.is_empty() {
            job.match_score = 0;
            return Ok(job);
        }

        let user: BTreeSet<String> = user_skills.iter().map(|s| s.trim().to_lowercase()).collect();

        let mut required: BTreeSet<String> = SKILL_LEXICON
            .iter()
            .filter(|skill| contains_term(&text, skill))
            .map(|skill| skill.to_string())
            .collect();
        for skill in &user {
            if !skill.is_empty() && contains_term(&text, skill) {
                required.insert(skill.clone());
            }
        }

        let matched: Vec<String> = required.intersection(&user).cloned().collect();
        let missing: Vec<String> = required.difference(&user).cloned().collect();

        job.match_score = if required.is_empty() {
            0
        } else {
            ((matched.len() * 100) / required.len()) as u8
        };
        job.required_skills = required.into_iter().collect();
        job.matched_skills = matched;
        job.missing_skills = missing;
        Ok(job)
    }
}

/// Substring search that refuses matches embedded in a longer word, so
/// "sql" does not match inside "postgresql".
fn contains_term(text: &str, term: &str) -> bool {
    for (start, _) in text.match_indices(term) {
        let before_ok = start == 0
            || !text[..start]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_ascii_alphanumeric());
        let end = start + term.len();
        let after_ok = end >= text.len()
            || !text[end..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
    }
    false
}
