//! Filter model: converts user-level filters into source-specific
//! parameters and owns every pattern used to read applicant counts,
//! posted times, and closed/reposted wording out of listing text.
//!
//! Pure functions only; no I/O. Pattern lists are data so a new language
//! variant is one more entry, not new control flow.

use std::sync::OnceLock;

use regex::{Regex, RegexSet, RegexSetBuilder};

use crate::models::job::CanonicalJob;
use crate::models::spec::FilterSpec;

/// Wording that means a listing stopped accepting applications (EN/FR/ES).
const CLOSED_PATTERNS: &[&str] = &[
    r"no longer accepting",
    r"applications?\s+(?:are\s+)?closed",
    r"(?:this\s+)?job\s+(?:is\s+)?no longer available",
    r"posting\s+(?:has\s+)?expired",
    r"plus\s+d.applications?\s+accept[ée]es",
    r"candidatures?\s+ferm[ée]es",
    r"ya no acepta",
];

/// Wording that marks a listing as a re-publication of an older one.
const REPOSTED_PATTERNS: &[&str] = &[
    r"reposted\s+\d+\s*(?:day|week|month|year)s?\s*ago",
    r"repost[ée]",
    r"reposted",
    r"republished",
];

/// Search terms excluded up front in the fallback query. The search
/// engine honors these only partially; tiers 1-2 re-check.
const FALLBACK_EXCLUDE_TERMS: &[&str] = &["no longer accepting", "reposted", "closed", "expired"];

const APPLICANT_WORDS: &str = r"applicants?|candidats?|candidatures?|candidaturas?|postulantes?";

fn closed_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSetBuilder::new(CLOSED_PATTERNS)
            .case_insensitive(true)
            .build()
            .expect("closed pattern set must compile")
    })
}

fn reposted_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSetBuilder::new(REPOSTED_PATTERNS)
            .case_insensitive(true)
            .build()
            .expect("reposted pattern set must compile")
    })
}

fn over_applicants_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?i)(?:over|plus de)\s*(\d+(?:,\d+)*)\s*(?:{APPLICANT_WORDS})"
        ))
        .expect("over-applicants regex must compile")
    })
}

fn plus_applicants_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"(?i)(\d+(?:,\d+)*)\+\s*(?:{APPLICANT_WORDS})?"))
            .expect("plus-applicants regex must compile")
    })
}

fn count_applicants_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"(?i)(\d+(?:,\d+)*)\s*(?:{APPLICANT_WORDS})"))
            .expect("applicant-count regex must compile")
    })
}

fn posted_ago_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\d+)\s*(hour|day|week|month)s?\s*ago")
            .expect("posted-ago regex must compile")
    })
}

/// Job id inside an entity URN, e.g. "urn:li:jobPosting:4012345678".
pub fn job_posting_urn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"jobPosting:(\d+)").expect("job URN regex must compile"))
}

/// Job id inside a canonical listing link.
pub fn jobs_view_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/jobs/view/(\d+)").expect("jobs view regex must compile"))
}

/// True when the text contains any closed-listing wording.
pub fn detect_closed(text: &str) -> bool {
    closed_set().is_match(text)
}

/// True when the text contains any reposted-listing wording.
pub fn detect_reposted(text: &str) -> bool {
    reposted_set().is_match(text)
}

/// Parse an applicant count out of free text.
///
/// "Be an early applicant" reads as 0, which is distinct from unknown
/// and passes any cap. "Over 100" and "100+" read as 101. Thousands
/// separators are accepted.
pub fn parse_applicants(text: &str) -> Option<u32> {
    if text.is_empty() {
        return None;
    }
    let lower = text.to_lowercase();

    if lower.contains("early applicant") || lower.contains("be among the first") {
        return Some(0);
    }

    if let Some(caps) = over_applicants_re().captures(&lower) {
        return parse_grouped_number(&caps[1]).map(|n| n + 1);
    }
    if let Some(caps) = plus_applicants_re().captures(&lower) {
        return parse_grouped_number(&caps[1]).map(|n| n + 1);
    }
    if let Some(caps) = count_applicants_re().captures(&lower) {
        return parse_grouped_number(&caps[1]);
    }

    None
}

fn parse_grouped_number(raw: &str) -> Option<u32> {
    raw.replace(',', "").parse().ok()
}

/// The literal "N units ago" phrase as it appeared in the text.
pub fn posted_phrase(text: &str) -> Option<String> {
    posted_ago_re()
        .find(&text.to_lowercase())
        .map(|m| m.as_str().trim().to_string())
}

/// Heuristic location hint inside a snippet: "in <place>", "at <place>",
/// or "location: <place>" up to the next punctuation.
pub fn location_hint_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:\bin|\bat|location:)\s+([^.·,;]+)").expect("location hint regex must compile")
    })
}

/// Parse "N (hour|day|week|month)s ago" into hours.
pub fn parse_posted_hours(text: &str) -> Option<u32> {
    let caps = posted_ago_re().captures(text)?;
    let n: u32 = caps[1].parse().ok()?;
    let per_unit = match caps[2].to_lowercase().as_str() {
        "hour" => 1,
        "day" => 24,
        "week" => 168,
        "month" => 720,
        _ => return None,
    };
    Some(n * per_unit)
}

/// Clamp the recency window to the endpoint's supported range.
pub fn clamp_days(days: u32) -> u32 {
    days.clamp(1, 30)
}

/// Build the exact parameter set the native listings endpoint accepts.
///
/// Day buckets convert to an `r<seconds>` value; facet lists comma-join
/// their codes and an empty list leaves the parameter unset entirely.
pub fn primary_params(spec: &FilterSpec, start: u32) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("keywords", spec.keywords.clone()),
        ("sortBy", "DD".to_string()),
    ];

    if !spec.location.is_empty() {
        params.push(("location", spec.location.clone()));
    }

    let seconds = u64::from(clamp_days(spec.posted_within_days)) * 86_400;
    params.push(("f_TPR", format!("r{seconds}")));

    let experience: Vec<&str> = spec.experience_levels.iter().map(|e| e.code()).collect();
    if !experience.is_empty() {
        params.push(("f_E", experience.join(",")));
    }
    let job_types: Vec<&str> = spec.job_types.iter().map(|t| t.code()).collect();
    if !job_types.is_empty() {
        params.push(("f_JT", job_types.join(",")));
    }
    let workplace: Vec<&str> = spec.workplace_types.iter().map(|w| w.code()).collect();
    if !workplace.is_empty() {
        params.push(("f_WT", workplace.join(",")));
    }

    if spec.easy_apply {
        params.push(("f_AL", "true".to_string()));
    }
    if start > 0 {
        params.push(("start", start.to_string()));
    }

    params
}

/// Compose the site-restricted fallback search query: literal keyword
/// phrase, location hint terms, boolean exclusions, and recency hints
/// for short windows.
pub fn fallback_query(spec: &FilterSpec) -> String {
    let mut query = format!(
        "site:linkedin.com/jobs \"{}\" {}",
        spec.keywords,
        location_search_terms(&spec.location)
    );

    for term in FALLBACK_EXCLUDE_TERMS {
        query.push_str(&format!(" -\"{term}\""));
    }

    if spec.posted_within_days <= 1 {
        query.push_str(" \"posted today\" OR \"1 day ago\"");
    } else if spec.posted_within_days <= 7 {
        query.push_str(" \"posted this week\" OR \"days ago\"");
    }

    query
}

/// Curated synonym phrases for common location shorthands.
fn location_search_terms(location: &str) -> String {
    let lower = location.trim().to_lowercase();
    match lower.as_str() {
        "" | "remote" => "remote".to_string(),
        "uk" | "united kingdom" => "\"United Kingdom\" OR \"London\" OR \"UK\"".to_string(),
        "us" | "usa" | "united states" => "\"United States\" OR \"USA\"".to_string(),
        _ => format!("\"{location}\""),
    }
}

/// Applicant-cap and age checks against already-parsed fields. Unknown
/// (`None`) values never cause a drop.
pub fn passes_structural(
    job: &CanonicalJob,
    max_applicants: u32,
    max_hours: u32,
) -> Result<(), String> {
    if let Some(applicants) = job.applicants
        && applicants > max_applicants
    {
        return Err(format!("too_many_applicants:{applicants}"));
    }
    if let Some(hours) = job.posted_hours_ago
        && hours > max_hours
    {
        return Err(format!("too_old:{hours}h"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobSource;

    fn spec_json(value: serde_json::Value) -> FilterSpec {
        serde_json::from_value(value).unwrap()
    }

    fn job_with(applicants: Option<u32>, hours: Option<u32>) -> CanonicalJob {
        let mut job = CanonicalJob::new(
            "https://www.linkedin.com/jobs/view/1".into(),
            "Engineer".into(),
            "Acme".into(),
            JobSource::Fallback,
        );
        job.applicants = applicants;
        job.posted_hours_ago = hours;
        job
    }

    #[test]
    fn applicant_surface_forms_round_trip() {
        for n in [0u32, 1, 42, 100, 1234] {
            if n == 0 {
                assert_eq!(parse_applicants("Be an early applicant"), Some(0));
                continue;
            }
            let plain = format!("{n} applicants");
            assert_eq!(parse_applicants(&plain), Some(n), "{plain}");
            let grouped = format!(
                "{} applicants",
                if n >= 1000 {
                    format!("{},{:03}", n / 1000, n % 1000)
                } else {
                    n.to_string()
                }
            );
            assert_eq!(parse_applicants(&grouped), Some(n), "{grouped}");
        }
    }

    #[test]
    fn over_and_plus_forms_read_one_past() {
        assert_eq!(parse_applicants("Over 100 applicants"), Some(101));
        assert_eq!(parse_applicants("plus de 200 candidats"), Some(201));
        assert_eq!(parse_applicants("100+ applicants"), Some(101));
    }

    #[test]
    fn multilingual_applicant_words() {
        assert_eq!(parse_applicants("45 candidats"), Some(45));
        assert_eq!(parse_applicants("12 candidaturas"), Some(12));
        assert_eq!(parse_applicants("7 postulantes"), Some(7));
    }

    #[test]
    fn no_applicant_info_is_none() {
        assert_eq!(parse_applicants(""), None);
        assert_eq!(parse_applicants("great benefits, hybrid role"), None);
    }

    #[test]
    fn posted_time_unit_multipliers() {
        assert_eq!(parse_posted_hours("1 hour ago"), Some(1));
        assert_eq!(parse_posted_hours("2 days ago"), Some(48));
        assert_eq!(parse_posted_hours("2 weeks ago"), Some(336));
        assert_eq!(parse_posted_hours("1 month ago"), Some(720));
        assert_eq!(parse_posted_hours("recently"), None);
    }

    #[test]
    fn closed_detection_is_multilingual() {
        assert!(detect_closed("No longer accepting applications"));
        assert!(detect_closed("applications are closed"));
        assert!(detect_closed("Plus d'applications acceptées"));
        assert!(detect_closed("ya no acepta solicitudes"));
        assert!(!detect_closed("now accepting applications"));
    }

    #[test]
    fn reposted_detection() {
        assert!(detect_reposted("Reposted 5 years ago - 200+ applicants"));
        assert!(detect_reposted("Reposté il y a 2 semaines"));
        assert!(!detect_reposted("posted 3 days ago"));
    }

    #[test]
    fn primary_params_day_buckets_and_facets() {
        let spec = spec_json(serde_json::json!({
            "keywords": "Software Engineer",
            "location": "London",
            "postedWithinDays": 7,
            "experienceLevels": ["entry", "mid-senior"],
            "jobTypes": ["full-time", "contract"],
            "workplaceTypes": ["remote"],
            "easyApply": true,
        }));
        let params = primary_params(&spec, 0);
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("f_TPR"), Some("r604800"));
        assert_eq!(get("f_E"), Some("2,4"));
        assert_eq!(get("f_JT"), Some("F,C"));
        assert_eq!(get("f_WT"), Some("2"));
        assert_eq!(get("f_AL"), Some("true"));
        assert_eq!(get("start"), None);
    }

    #[test]
    fn empty_facet_lists_leave_params_unset() {
        let spec = spec_json(serde_json::json!({ "keywords": "qa" }));
        let params = primary_params(&spec, 25);
        assert!(!params.iter().any(|(k, _)| *k == "f_E"));
        assert!(!params.iter().any(|(k, _)| *k == "f_JT"));
        assert!(!params.iter().any(|(k, _)| *k == "f_WT"));
        assert!(params.contains(&("start", "25".to_string())));
    }

    #[test]
    fn primary_params_idempotent() {
        let spec = spec_json(serde_json::json!({
            "keywords": "Data Engineer",
            "experienceLevels": ["associate"],
        }));
        assert_eq!(primary_params(&spec, 0), primary_params(&spec, 0));
    }

    #[test]
    fn day_bucket_boundaries_clamp() {
        assert_eq!(clamp_days(0), 1);
        assert_eq!(clamp_days(31), 30);
    }

    #[test]
    fn fallback_query_has_exclusions_and_hints() {
        let spec = spec_json(serde_json::json!({
            "keywords": "Software Engineer",
            "location": "UK",
            "postedWithinDays": 7,
        }));
        let q = fallback_query(&spec);
        assert!(q.starts_with("site:linkedin.com/jobs \"Software Engineer\""));
        assert!(q.contains("\"United Kingdom\" OR \"London\" OR \"UK\""));
        assert!(q.contains("-\"no longer accepting\""));
        assert!(q.contains("-\"reposted\""));
        assert!(q.contains("\"posted this week\" OR \"days ago\""));
    }

    #[test]
    fn fallback_query_skips_hints_for_long_windows() {
        let spec = spec_json(serde_json::json!({
            "keywords": "SRE",
            "postedWithinDays": 30,
        }));
        let q = fallback_query(&spec);
        assert!(!q.contains("posted today"));
        assert!(!q.contains("posted this week"));
        assert!(q.contains("remote"));
    }

    #[test]
    fn structural_filter_applicant_and_age_caps() {
        assert_eq!(
            passes_structural(&job_with(Some(45), None), 30, 168),
            Err("too_many_applicants:45".to_string())
        );
        assert_eq!(
            passes_structural(&job_with(None, Some(336)), 30, 168),
            Err("too_old:336h".to_string())
        );
        assert!(passes_structural(&job_with(None, None), 0, 1).is_ok());
    }

    #[test]
    fn early_applicant_passes_zero_cap() {
        assert!(passes_structural(&job_with(Some(0), None), 0, 168).is_ok());
        assert_eq!(
            passes_structural(&job_with(Some(1), None), 0, 168),
            Err("too_many_applicants:1".to_string())
        );
    }
}
