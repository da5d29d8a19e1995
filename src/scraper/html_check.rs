//! Tier-2 validation: fetch each candidate's landing page without a
//! browser and re-read applicant count, age, and open/closed/reposted
//! status from the markup. Network trouble fails open; a candidate is
//! never dropped solely because it could not be checked.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use scraper::{Html, Selector};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::models::job::{CanonicalJob, ValidationTier};
use crate::models::run::FilterStats;
use crate::sanitize;
use crate::scraper::filters;
use crate::scraper::pacing::{Pacer, browser_headers};

const FETCH_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_CONCURRENT: usize = 5;

/// Containers the listing description usually lives in.
const DESCRIPTION_SELECTORS: &[&str] = &[
    ".show-more-less-html__markup",
    ".description__text",
    ".jobs-description__content",
    ".jobs-box__html-content",
];

pub struct HtmlValidator {
    http: reqwest::Client,
    pacer: Arc<Pacer>,
    semaphore: Arc<Semaphore>,
}

impl HtmlValidator {
    pub fn new(pacer: Arc<Pacer>) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            pacer,
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT)),
        })
    }

    /// Validate every candidate below tier `html`, preserving input
    /// order. Returns the jobs that passed and the drop statistics.
    pub async fn validate_batch(
        self: &Arc<Self>,
        jobs: Vec<CanonicalJob>,
        max_applicants: u32,
        max_hours: u32,
        cancel: &CancellationToken,
    ) -> (Vec<CanonicalJob>, FilterStats) {
        let mut stats = FilterStats::default();
        let mut tasks: JoinSet<(usize, CanonicalJob)> = JoinSet::new();

        let total = jobs.len();
        for (idx, mut job) in jobs.into_iter().enumerate() {
            if job.validation_tier >= ValidationTier::Html || cancel.is_cancelled() {
                tasks.spawn(async move { (idx, job) });
                continue;
            }
            let validator = Arc::clone(self);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = validator.semaphore.acquire().await;
                let pause = {
                    let mut rng = rand::rng();
                    Duration::from_millis(rng.random_range(500..1500))
                };
                tokio::select! {
                    _ = cancel.cancelled() => return (idx, job),
                    _ = tokio::time::sleep(pause) => {}
                }
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = validator.validate_one(&mut job, max_applicants, max_hours) => {}
                }
                (idx, job)
            });
        }

        let mut ordered: Vec<(usize, CanonicalJob)> = Vec::with_capacity(total);
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(pair) => ordered.push(pair),
                Err(e) => {
                    tracing::error!("tier-2 validation task failed: {e}");
                    stats.errors += 1;
                }
            }
        }
        ordered.sort_by_key(|(idx, _)| *idx);

        let mut passed = Vec::with_capacity(ordered.len());
        for (_, job) in ordered {
            if job.passes_validation == Some(false) {
                let reason = job.validation_reason.as_deref().unwrap_or("unknown");
                stats.record_drop(reason);
                tracing::debug!(title = %job.title, %reason, "tier-2 dropped");
            } else {
                stats.passed += 1;
                passed.push(job);
            }
        }
        (passed, stats)
    }

    /// Fetch and judge one listing page. The filter order is fixed:
    /// closed, reposted, applicant cap, age cap.
    async fn validate_one(&self, job: &mut CanonicalJob, max_applicants: u32, max_hours: u32) {
        if !self.pacer.acquire().await {
            job.mark_validated(ValidationTier::Html, true, "rate_limit_exceeded");
            return;
        }

        let response = match self
            .http
            .get(&job.url)
            .headers(browser_headers())
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => {
                job.mark_validated(ValidationTier::Html, true, "timeout");
                return;
            }
            Err(e) => {
                let short = sanitize::truncate(&e.to_string(), 30);
                job.mark_validated(ValidationTier::Html, true, &format!("error:{short}"));
                return;
            }
        };

        let status = response.status().as_u16();
        if status == 429 {
            // Blocked upstream says nothing about the listing itself.
            job.mark_validated(ValidationTier::Html, true, "http_429");
            return;
        }
        if !(200..300).contains(&status) {
            job.mark_validated(ValidationTier::Html, false, &format!("http_{status}"));
            return;
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                let short = sanitize::truncate(&e.to_string(), 30);
                job.mark_validated(ValidationTier::Html, true, &format!("error:{short}"));
                return;
            }
        };

        let document = Html::parse_document(&body);
        let page_text = visible_text(&document);

        if filters::detect_closed(&page_text) {
            job.is_closed = Some(true);
            job.mark_validated(ValidationTier::Html, false, "closed");
            return;
        }
        job.is_closed = Some(false);

        if filters::detect_reposted(&page_text) {
            job.is_reposted = Some(true);
            job.mark_validated(ValidationTier::Html, false, "reposted");
            return;
        }
        job.is_reposted = Some(false);

        if let Some(applicants) = filters::parse_applicants(&page_text) {
            job.applicants = Some(applicants);
            if applicants > max_applicants {
                job.mark_validated(
                    ValidationTier::Html,
                    false,
                    &format!("too_many_applicants:{applicants}"),
                );
                return;
            }
        }

        if let Some(hours) = filters::parse_posted_hours(&page_text) {
            job.posted_hours_ago = Some(hours);
            if hours > max_hours {
                job.mark_validated(ValidationTier::Html, false, &format!("too_old:{hours}h"));
                return;
            }
        }

        if job.description.is_none() {
            job.description = extract_description(&document);
        }
        job.mark_validated(ValidationTier::Html, true, "passed");
    }
}

/// Lowercased visible text of the whole document.
fn visible_text(document: &Html) -> String {
    document
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn extract_description(document: &Html) -> Option<String> {
    for source in DESCRIPTION_SELECTORS {
        let selector = Selector::parse(source).expect("static selector must parse");
        if let Some(el) = document.select(&selector).next() {
            let text = el
                .text()
                .collect::<Vec<_>>()
                .join(" ")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            if !text.is_empty() {
                return Some(sanitize::truncate(&text, sanitize::DESCRIPTION_MAX_LEN));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobSource;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_pacer(max: u32) -> Arc<Pacer> {
        Arc::new(Pacer::new(max, Duration::ZERO, Duration::ZERO))
    }

    fn validator(pacer: Arc<Pacer>) -> Arc<HtmlValidator> {
        Arc::new(HtmlValidator::new(pacer).unwrap())
    }

    fn job_at(server: &MockServer, route: &str) -> CanonicalJob {
        CanonicalJob::new(
            format!("{}{route}", server.uri()),
            "Engineer".into(),
            "Acme".into(),
            JobSource::Fallback,
        )
    }

    async fn mount_page(server: &MockServer, route: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!("<html><body>{body}</body></html>")),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn open_listing_passes_with_fields_extracted() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            "/jobs/view/1",
            r#"<div class="show-more-less-html__markup">Build services in Rust.</div>
               <span>12 applicants</span><span>3 days ago</span>"#,
        )
        .await;

        let (passed, stats) = validator(fast_pacer(50))
            .validate_batch(
                vec![job_at(&server, "/jobs/view/1")],
                100,
                168,
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(passed.len(), 1);
        let job = &passed[0];
        assert_eq!(job.validation_tier, ValidationTier::Html);
        assert_eq!(job.passes_validation, Some(true));
        assert_eq!(job.applicants, Some(12));
        assert_eq!(job.posted_hours_ago, Some(72));
        assert_eq!(job.is_closed, Some(false));
        assert_eq!(job.description.as_deref(), Some("Build services in Rust."));
        assert_eq!(stats.passed, 1);
    }

    #[tokio::test]
    async fn closed_listing_is_dropped() {
        let server = MockServer::start().await;
        mount_page(&server, "/jobs/view/2", "No longer accepting applications").await;

        let (passed, stats) = validator(fast_pacer(50))
            .validate_batch(
                vec![job_at(&server, "/jobs/view/2")],
                100,
                168,
                &CancellationToken::new(),
            )
            .await;
        assert!(passed.is_empty());
        assert_eq!(stats.filtered_closed, 1);
    }

    #[tokio::test]
    async fn applicant_cap_applies_in_order_after_closed() {
        let server = MockServer::start().await;
        mount_page(&server, "/jobs/view/3", "<span>450 applicants</span>").await;

        let (passed, stats) = validator(fast_pacer(50))
            .validate_batch(
                vec![job_at(&server, "/jobs/view/3")],
                100,
                168,
                &CancellationToken::new(),
            )
            .await;
        assert!(passed.is_empty());
        assert_eq!(stats.filtered_applicants, 1);
    }

    #[tokio::test]
    async fn stale_listing_is_dropped_with_age_reason() {
        let server = MockServer::start().await;
        mount_page(&server, "/jobs/view/4", "<span>2 weeks ago</span>").await;

        let (passed, _) = validator(fast_pacer(50))
            .validate_batch(
                vec![job_at(&server, "/jobs/view/4")],
                100,
                168,
                &CancellationToken::new(),
            )
            .await;
        assert!(passed.is_empty());
    }

    #[tokio::test]
    async fn http_error_drops_with_status_reason() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jobs/view/5"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (passed, stats) = validator(fast_pacer(50))
            .validate_batch(
                vec![job_at(&server, "/jobs/view/5")],
                100,
                168,
                &CancellationToken::new(),
            )
            .await;
        assert!(passed.is_empty());
        assert_eq!(stats.errors, 1);
    }

    #[tokio::test]
    async fn upstream_rate_limit_fails_open() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jobs/view/6"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let (passed, _) = validator(fast_pacer(50))
            .validate_batch(
                vec![job_at(&server, "/jobs/view/6")],
                100,
                168,
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(passed.len(), 1);
        assert_eq!(passed[0].validation_reason.as_deref(), Some("http_429"));
    }

    #[tokio::test]
    async fn exhausted_budget_fails_open_without_fetching() {
        let server = MockServer::start().await;
        let pacer = fast_pacer(1);
        assert!(pacer.acquire().await);

        let (passed, _) = validator(pacer)
            .validate_batch(
                vec![job_at(&server, "/jobs/view/7")],
                100,
                168,
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(passed.len(), 1);
        assert_eq!(
            passed[0].validation_reason.as_deref(),
            Some("rate_limit_exceeded")
        );
    }

    #[tokio::test]
    async fn already_validated_jobs_pass_through_untouched() {
        let server = MockServer::start().await;
        let mut job = job_at(&server, "/jobs/view/8");
        job.mark_validated(ValidationTier::Browser, true, "passed");

        let (passed, _) = validator(fast_pacer(50))
            .validate_batch(vec![job], 100, 168, &CancellationToken::new())
            .await;
        assert_eq!(passed.len(), 1);
        assert_eq!(passed[0].validation_tier, ValidationTier::Browser);
    }
}
