//! Fallback source adapter: an aggregated web search restricted to the
//! target site with boolean exclusions. Results are heterogeneous
//! snippets, so everything structured is recovered by pattern matching
//! and the tier-1 snippet filter sheds closed/reposted listings before
//! any per-listing network spend.

use std::sync::Arc;
use std::time::Duration;

use scraper::{ElementRef, Html, Selector};
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::models::job::{CanonicalJob, JobSource, ValidationTier};
use crate::models::run::FilterStats;
use crate::models::spec::FilterSpec;
use crate::sanitize;
use crate::scraper::filters;
use crate::scraper::pacing::{Pacer, browser_headers};

const SEARCH_BASE: &str = "https://html.duckduckgo.com/html/";
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const OVERSAMPLE_CAP: u32 = 60;

/// Geographic tokens that disqualify a result for a UK-targeted search.
const UK_EXCLUSIONS: &[&str] = &[
    "united states", "usa", "u.s.", "california", "new york", "texas", "florida",
    "san francisco", "seattle", "boston", "chicago", "los angeles", "denver",
    "austin", "atlanta", "new jersey", "ohio", "pennsylvania", "michigan",
    "india", "bangalore", "hyderabad", "mumbai", "delhi", "pune",
];

/// And symmetrically for a US-targeted search.
const US_EXCLUSIONS: &[&str] = &[
    "united kingdom", "london", "manchester", "birmingham", "uk", "england",
    "india", "bangalore", "hyderabad", "mumbai",
];

#[derive(Debug)]
pub struct FallbackOutcome {
    pub jobs: Vec<CanonicalJob>,
    pub stats: FilterStats,
}

pub struct WebSearchClient {
    http: reqwest::Client,
    base_url: String,
    pacer: Arc<Pacer>,
}

impl WebSearchClient {
    pub fn new(pacer: Arc<Pacer>) -> Result<Self, AppError> {
        Self::with_base_url(pacer, SEARCH_BASE.to_string())
    }

    pub fn with_base_url(pacer: Arc<Pacer>, base_url: String) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url,
            pacer,
        })
    }

    /// One oversampled query, then tier-1 filtering over every result.
    pub async fn search(&self, spec: &FilterSpec, cancel: &CancellationToken) -> FallbackOutcome {
        let mut stats = FilterStats::default();

        let admitted = tokio::select! {
            _ = cancel.cancelled() => false,
            admitted = self.pacer.acquire() => admitted,
        };
        if !admitted {
            return FallbackOutcome {
                jobs: Vec::new(),
                stats,
            };
        }

        let query = filters::fallback_query(spec);
        let fetch = spec.max_results.saturating_mul(4).min(OVERSAMPLE_CAP);
        tracing::info!(%query, fetch, "fallback search");

        let response = tokio::select! {
            _ = cancel.cancelled() => return FallbackOutcome { jobs: Vec::new(), stats },
            resp = self
                .http
                .get(&self.base_url)
                .headers(browser_headers())
                .query(&[("q", query.as_str())])
                .send() => resp,
        };

        let html = match response {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(body) => body,
                Err(e) => {
                    tracing::error!("fallback body read failed: {e}");
                    return FallbackOutcome {
                        jobs: Vec::new(),
                        stats,
                    };
                }
            },
            Ok(resp) => {
                tracing::error!("fallback search returned {}", resp.status());
                return FallbackOutcome {
                    jobs: Vec::new(),
                    stats,
                };
            }
            Err(e) => {
                tracing::error!("fallback search failed: {e}");
                return FallbackOutcome {
                    jobs: Vec::new(),
                    stats,
                };
            }
        };

        let results = parse_results(&html, fetch as usize);
        stats.total_found = results.len();

        let max_hours = spec.max_hours_old();
        let mut jobs: Vec<CanonicalJob> = Vec::new();
        for result in results {
            if jobs.len() as u32 >= spec.max_results {
                break;
            }
            let Some(mut job) = canonicalize(&result) else {
                continue;
            };

            let snippet = job.snippet.clone().unwrap_or_default();

            // Tier 1: snippet text rules out closed/reposted before any
            // per-listing fetch.
            if filters::detect_closed(&snippet) {
                stats.record_drop("closed");
                tracing::debug!(title = %job.title, "dropped: closed in snippet");
                continue;
            }
            if filters::detect_reposted(&snippet) {
                stats.record_drop("reposted");
                tracing::debug!(title = %job.title, "dropped: reposted in snippet");
                continue;
            }

            if !matches_location(&job, &spec.location) {
                stats.record_drop("location");
                tracing::debug!(title = %job.title, "dropped: location mismatch");
                continue;
            }

            if let Err(reason) = filters::passes_structural(&job, spec.max_applicants, max_hours) {
                stats.record_drop(&reason);
                tracing::debug!(title = %job.title, %reason, "dropped: structural");
                continue;
            }

            job.mark_validated(ValidationTier::Snippet, true, "passed");
            stats.passed += 1;
            jobs.push(job);
        }

        FallbackOutcome { jobs, stats }
    }
}

#[derive(Debug)]
struct RawResult {
    title: String,
    url: String,
    snippet: String,
}

fn sel(source: &str) -> Selector {
    Selector::parse(source).expect("static selector must parse")
}

fn parse_results(html: &str, fetch: usize) -> Vec<RawResult> {
    let document = Html::parse_document(html);
    document
        .select(&sel(".result"))
        .filter_map(parse_result)
        .take(fetch)
        .collect()
}

fn parse_result(block: ElementRef<'_>) -> Option<RawResult> {
    let anchor = block.select(&sel("a.result__a")).next()?;
    let title = collapse_text(anchor);
    let href = anchor.value().attr("href")?;
    let url = resolve_redirect(href)?;
    let snippet = block
        .select(&sel(".result__snippet"))
        .next()
        .map(collapse_text)
        .unwrap_or_default();
    Some(RawResult {
        title,
        url,
        snippet,
    })
}

fn collapse_text(el: ElementRef<'_>) -> String {
    el.text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// The search engine wraps outbound links in a redirect carrying the
/// destination in a `uddg` parameter; unwrap it when present.
fn resolve_redirect(href: &str) -> Option<String> {
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };
    let parsed = reqwest::Url::parse(&absolute).ok()?;
    if parsed.path().starts_with("/l/") {
        return parsed
            .query_pairs()
            .find(|(k, _)| k == "uddg")
            .map(|(_, v)| v.into_owned());
    }
    Some(absolute)
}

/// Turn one search result into a canonical record, or reject it when it
/// is not a single-listing page.
fn canonicalize(result: &RawResult) -> Option<CanonicalJob> {
    let url = &result.url;
    if !url.contains("linkedin.com/jobs") {
        return None;
    }
    // Listing-index pages, not individual jobs.
    if url.contains("/jobs/search") || url.contains("/jobs/collections") {
        return None;
    }
    sanitize::clean_url(url).ok()?;

    let (company, job_title) = split_title(&result.title);
    let mut job = CanonicalJob::new(
        url.clone(),
        sanitize::truncate(&job_title, 200),
        sanitize::truncate(&company, 100),
        JobSource::Fallback,
    );

    job.external_id = filters::jobs_view_re()
        .captures(url)
        .map(|caps| format!("linkedin-{}", &caps[1]));
    job.snippet = Some(sanitize::truncate(&result.snippet, sanitize::SNIPPET_MAX_LEN));
    job.location = extract_location(&result.snippet);
    job.applicants = filters::parse_applicants(&result.snippet);
    job.posted_label = filters::posted_phrase(&result.snippet);
    job.posted_hours_ago = filters::parse_posted_hours(&result.snippet);
    Some(job)
}

fn hiring_title_re() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"(?i)^(?P<company>.+?)\s+hiring\s+(?P<title>.+)$")
            .expect("hiring title regex must compile")
    })
}

/// Recognize the three textual title shapes: "X hiring Y in Z",
/// "Y at X", and "Y - X"; strip trailing source-brand suffixes.
fn split_title(title: &str) -> (String, String) {
    let cleaned = title.trim();

    let (company, job_title) = if let Some(caps) = hiring_title_re().captures(cleaned) {
        let rest = caps.name("title").map(|m| m.as_str()).unwrap_or(cleaned);
        let job_title = rest.split(" in ").next().unwrap_or(rest);
        (
            caps.name("company")
                .map(|m| m.as_str())
                .unwrap_or("Unknown")
                .to_string(),
            job_title.to_string(),
        )
    } else if let Some((left, right)) = cleaned.split_once(" at ") {
        let company = right.split(" - ").next().unwrap_or(right);
        (company.to_string(), left.to_string())
    } else if let Some((left, right)) = cleaned.split_once(" - ") {
        (right.to_string(), left.to_string())
    } else {
        ("Unknown".to_string(), cleaned.to_string())
    };

    (strip_brand(&company), strip_brand(&job_title))
}

fn strip_brand(text: &str) -> String {
    text.split(" | ")
        .next()
        .unwrap_or(text)
        .replace(" | LinkedIn", "")
        .trim()
        .to_string()
}

fn extract_location(snippet: &str) -> Option<String> {
    let lowered = snippet.to_lowercase();
    let caps = filters::location_hint_re().captures(&lowered)?;
    let loc = caps[1].trim().to_string();
    if loc.is_empty() {
        None
    } else {
        Some(sanitize::truncate(&loc, 50))
    }
}

/// Curated geographic exclusion: a UK-targeted search drops results
/// whose combined text names US/India locations, and symmetrically for
/// the US. Remote targets are unconstrained.
fn matches_location(job: &CanonicalJob, target: &str) -> bool {
    let target = target.trim().to_lowercase();
    if target.is_empty() || target == "remote" {
        return true;
    }

    let exclusions: &[&str] = match target.as_str() {
        "uk" | "united kingdom" | "london" | "england" => UK_EXCLUSIONS,
        "us" | "usa" | "united states" => US_EXCLUSIONS,
        _ => return true,
    };

    let haystack = format!(
        "{} {} {}",
        job.title.to_lowercase(),
        job.snippet.as_deref().unwrap_or("").to_lowercase(),
        job.company.to_lowercase()
    );
    !exclusions.iter().any(|token| haystack.contains(token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_pacer() -> Arc<Pacer> {
        Arc::new(Pacer::new(50, Duration::ZERO, Duration::ZERO))
    }

    fn result_html(title: &str, url: &str, snippet: &str) -> String {
        format!(
            r#"<div class="result">
              <a class="result__a" href="{url}">{title}</a>
              <a class="result__snippet">{snippet}</a>
            </div>"#
        )
    }

    fn serp(results: &[String]) -> String {
        format!("<html><body>{}</body></html>", results.join("\n"))
    }

    async fn search_with(server: &MockServer, spec: &FilterSpec) -> FallbackOutcome {
        WebSearchClient::with_base_url(fast_pacer(), format!("{}/html/", server.uri()))
            .unwrap()
            .search(spec, &CancellationToken::new())
            .await
    }

    fn spec(value: serde_json::Value) -> FilterSpec {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn parses_title_shapes_and_extracts_fields() {
        let server = MockServer::start().await;
        let body = serp(&[
            result_html(
                "Acme Ltd hiring Software Engineer in London | LinkedIn",
                "https://www.linkedin.com/jobs/view/1111",
                "Be an early applicant. Posted 3 days ago in London.",
            ),
            result_html(
                "Platform Engineer at Globex - London | LinkedIn",
                "https://www.linkedin.com/jobs/view/2222",
                "12 applicants. 1 day ago.",
            ),
        ]);
        Mock::given(method("GET"))
            .and(path("/html/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let outcome = search_with(
            &server,
            &spec(serde_json::json!({ "keywords": "engineer", "location": "UK" })),
        )
        .await;
        assert_eq!(outcome.jobs.len(), 2);

        let first = &outcome.jobs[0];
        assert_eq!(first.company, "Acme Ltd");
        assert_eq!(first.title, "Software Engineer");
        assert_eq!(first.external_id.as_deref(), Some("linkedin-1111"));
        assert_eq!(first.applicants, Some(0));
        assert_eq!(first.posted_hours_ago, Some(72));
        assert_eq!(first.validation_tier, ValidationTier::Snippet);

        let second = &outcome.jobs[1];
        assert_eq!(second.company, "Globex");
        assert_eq!(second.title, "Platform Engineer");
        assert_eq!(second.applicants, Some(12));
    }

    #[tokio::test]
    async fn closed_and_reposted_snippets_drop_pre_network() {
        let server = MockServer::start().await;
        let body = serp(&[
            result_html(
                "Engineer at Acme | LinkedIn",
                "https://www.linkedin.com/jobs/view/1",
                "No longer accepting applications",
            ),
            result_html(
                "Engineer at Globex | LinkedIn",
                "https://www.linkedin.com/jobs/view/2",
                "Reposted 5 years ago - 200+ applicants",
            ),
            result_html(
                "Engineer at Initech | LinkedIn",
                "https://www.linkedin.com/jobs/view/3",
                "Be an early applicant",
            ),
        ]);
        Mock::given(method("GET"))
            .and(path("/html/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let outcome = search_with(&server, &spec(serde_json::json!({ "keywords": "engineer" }))).await;
        assert_eq!(outcome.jobs.len(), 1);
        assert_eq!(outcome.jobs[0].company, "Initech");
        assert_eq!(outcome.stats.filtered_closed, 1);
        assert_eq!(outcome.stats.filtered_reposted, 1);
        assert_eq!(outcome.stats.passed, 1);
    }

    #[tokio::test]
    async fn applicant_and_age_caps_enforced_from_snippet() {
        let server = MockServer::start().await;
        let body = serp(&[
            result_html(
                "Engineer at Acme | LinkedIn",
                "https://www.linkedin.com/jobs/view/1",
                "45 applicants",
            ),
            result_html(
                "Engineer at Globex | LinkedIn",
                "https://www.linkedin.com/jobs/view/2",
                "2 weeks ago",
            ),
            result_html(
                "Engineer at Initech | LinkedIn",
                "https://www.linkedin.com/jobs/view/3",
                "3 days ago",
            ),
        ]);
        Mock::given(method("GET"))
            .and(path("/html/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let outcome = search_with(
            &server,
            &spec(serde_json::json!({
                "keywords": "engineer",
                "maxApplicants": 30,
                "postedWithinDays": 7,
            })),
        )
        .await;
        assert_eq!(outcome.jobs.len(), 1);
        assert_eq!(outcome.jobs[0].posted_hours_ago, Some(72));
        assert_eq!(outcome.stats.filtered_applicants, 1);
        assert_eq!(outcome.stats.filtered_age, 1);
    }

    #[tokio::test]
    async fn rejects_listing_index_pages_and_foreign_urls() {
        let server = MockServer::start().await;
        let body = serp(&[
            result_html(
                "Search results | LinkedIn",
                "https://www.linkedin.com/jobs/search?keywords=x",
                "lots of jobs",
            ),
            result_html(
                "Collections | LinkedIn",
                "https://www.linkedin.com/jobs/collections/top",
                "curated jobs",
            ),
            result_html(
                "Engineer at Acme",
                "https://example.com/job/1",
                "not the target site",
            ),
        ]);
        Mock::given(method("GET"))
            .and(path("/html/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let outcome = search_with(&server, &spec(serde_json::json!({ "keywords": "engineer" }))).await;
        assert!(outcome.jobs.is_empty());
        assert_eq!(outcome.stats.total_found, 3);
    }

    #[tokio::test]
    async fn uk_target_excludes_us_locations() {
        let server = MockServer::start().await;
        let body = serp(&[
            result_html(
                "Engineer at Acme | LinkedIn",
                "https://www.linkedin.com/jobs/view/1",
                "Great role in San Francisco, California",
            ),
            result_html(
                "Engineer at Globex | LinkedIn",
                "https://www.linkedin.com/jobs/view/2",
                "Hybrid role in London",
            ),
        ]);
        Mock::given(method("GET"))
            .and(path("/html/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let outcome = search_with(
            &server,
            &spec(serde_json::json!({ "keywords": "engineer", "location": "UK" })),
        )
        .await;
        assert_eq!(outcome.jobs.len(), 1);
        assert_eq!(outcome.jobs[0].company, "Globex");
        assert_eq!(outcome.stats.filtered_location, 1);
    }

    #[test]
    fn redirect_links_unwrap_destination() {
        let wrapped = "//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.linkedin.com%2Fjobs%2Fview%2F99&rut=abc";
        assert_eq!(
            resolve_redirect(wrapped).as_deref(),
            Some("https://www.linkedin.com/jobs/view/99")
        );
        assert_eq!(
            resolve_redirect("https://example.com/x").as_deref(),
            Some("https://example.com/x")
        );
    }

    #[test]
    fn dash_title_shape_splits() {
        let (company, title) = split_title("Senior Engineer - Initech | LinkedIn");
        assert_eq!(company, "Initech");
        assert_eq!(title, "Senior Engineer");
    }
}
