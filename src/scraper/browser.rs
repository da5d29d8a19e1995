//! Tier-3 validation: a real browser render for the top candidates.
//!
//! Runs against a WebDriver-compatible endpoint (the process-wide
//! expensive resource; sessions against it are per-candidate). The
//! orchestrator treats this tier as optional equipment: environments
//! without a browser still run tiers 1-2.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fantoccini::{Client, ClientBuilder, Locator};
use rand::Rng;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::models::job::{CanonicalJob, ValidationTier};
use crate::models::run::FilterStats;
use crate::sanitize;
use crate::scraper::filters;
use crate::scraper::pacing::{self, Pacer};

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_CONCURRENT: usize = 5;

/// Prioritized applicant-count selectors; on miss the rendered text is
/// parsed as a whole.
const APPLICANT_SELECTORS: &[&str] = &[
    "[data-test-id='job-applicants']",
    "span.jobs-unified-top-card__applicant-count",
];

const APPLY_SELECTORS: &[&str] = &[
    "[data-test-id='job-apply-button']",
    "button.jobs-apply-button",
];

const POSTED_SELECTORS: &[&str] = &[
    "time[datetime]",
    "span.jobs-unified-top-card__posted-date",
];

const CLOSED_SELECTORS: &[&str] = &[".jobs-unified-top-card__capped-applications-badge"];

/// Literal closed wording checked against the rendered page (EN/FR/ES).
const CLOSED_TEXTS: &[&str] = &[
    "no longer accepting applications",
    "this job is no longer available",
    "applications are closed",
    "plus d'applications acceptées",
    "ya no acepta",
];

/// Patched into the page to hide the most obvious automation
/// fingerprints; the capability args below cover the pre-navigation
/// side.
const STEALTH_SCRIPT: &str = r#"
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
    Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
    Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
"#;

/// Per-candidate lifecycle; every phase after `Received` is terminal on
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Received,
    Navigating,
    Extracted,
}

pub struct BrowserValidator {
    webdriver_url: String,
    pacer: Arc<Pacer>,
    semaphore: Arc<Semaphore>,
}

impl BrowserValidator {
    pub fn new(webdriver_url: String, pacer: Arc<Pacer>) -> Self {
        Self {
            webdriver_url,
            pacer,
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT)),
        }
    }

    /// Render and judge the given candidates, preserving input order.
    pub async fn validate_batch(
        self: &Arc<Self>,
        jobs: Vec<CanonicalJob>,
        max_applicants: u32,
        max_hours: u32,
        cancel: &CancellationToken,
    ) -> (Vec<CanonicalJob>, FilterStats) {
        let mut stats = FilterStats::default();
        let mut tasks: JoinSet<(usize, CanonicalJob)> = JoinSet::new();

        for (idx, mut job) in jobs.into_iter().enumerate() {
            if cancel.is_cancelled() {
                tasks.spawn(async move { (idx, job) });
                continue;
            }
            let validator = Arc::clone(self);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = validator.semaphore.acquire().await;
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = validator.validate_one(&mut job, max_applicants, max_hours) => {}
                }
                (idx, job)
            });
        }

        let mut ordered: Vec<(usize, CanonicalJob)> = Vec::new();
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(pair) => ordered.push(pair),
                Err(e) => {
                    tracing::error!("tier-3 validation task failed: {e}");
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
                tracing::debug!(title = %job.title, %reason, "tier-3 dropped");
            } else {
                stats.passed += 1;
                passed.push(job);
            }
        }
        (passed, stats)
    }

    async fn validate_one(&self, job: &mut CanonicalJob, max_applicants: u32, max_hours: u32) {
        let mut phase = Phase::Received;
        tracing::debug!(url = %job.url, ?phase, "tier-3 candidate");
        if !self.pacer.acquire().await {
            job.mark_validated(ValidationTier::Browser, true, "rate_limit_exceeded");
            return;
        }

        let client = match self.new_session().await {
            Ok(client) => client,
            Err(e) => {
                let short = sanitize::truncate(&e, 30);
                job.mark_validated(ValidationTier::Browser, true, &format!("error:{short}"));
                return;
            }
        };

        phase = Phase::Navigating;
        let outcome = self
            .inspect(&client, job, max_applicants, max_hours, &mut phase)
            .await;
        if let Err(e) = client.close().await {
            tracing::debug!("browser session close failed: {e}");
        }

        if let Err(e) = outcome {
            let short = sanitize::truncate(&e, 30);
            // Navigation or extraction trouble is not evidence against
            // the listing.
            job.mark_validated(ValidationTier::Browser, true, &format!("error:{short}"));
            tracing::warn!(url = %job.url, ?phase, "tier-3 error: {e}");
        }
    }

    /// Fresh isolated session with a rotated user agent and viewport.
    async fn new_session(&self) -> Result<Client, String> {
        let (width, height) = pacing::random_viewport();
        let caps = json!({
            "goog:chromeOptions": {
                "args": [
                    "--headless=new",
                    "--disable-blink-features=AutomationControlled",
                    "--no-sandbox",
                    "--disable-dev-shm-usage",
                    "--disable-gpu",
                    format!("--window-size={width},{height}"),
                    format!("--user-agent={}", pacing::random_user_agent()),
                ],
            },
        });
        let caps = caps.as_object().cloned().unwrap_or_default();

        ClientBuilder::rustls()
            .map_err(|e| e.to_string())?
            .capabilities(caps)
            .connect(&self.webdriver_url)
            .await
            .map_err(|e| e.to_string())
    }

    async fn inspect(
        &self,
        client: &Client,
        job: &mut CanonicalJob,
        max_applicants: u32,
        max_hours: u32,
        phase: &mut Phase,
    ) -> Result<(), String> {
        tokio::time::timeout(NAVIGATION_TIMEOUT, client.goto(&job.url))
            .await
            .map_err(|_| "navigation timeout".to_string())?
            .map_err(|e| e.to_string())?;

        if let Err(e) = client.execute(STEALTH_SCRIPT, vec![]).await {
            tracing::debug!("stealth script failed: {e}");
        }

        // Short settle for dynamically injected content.
        let settle = {
            let mut rng = rand::rng();
            Duration::from_millis(rng.random_range(1000..2000))
        };
        tokio::time::sleep(settle).await;

        let rendered = client.source().await.map_err(|e| e.to_string())?;
        let page_text = rendered.to_lowercase();
        *phase = Phase::Extracted;

        if let Some(applicants) = self.extract_applicants(client, &page_text).await {
            job.applicants = Some(applicants);
        }
        let closed = self.detect_closed(client, &page_text).await;
        let reposted = filters::detect_reposted(&page_text);
        if let Some(hours) = self.extract_posted_hours(client, &page_text).await {
            job.posted_hours_ago = Some(hours);
        }

        job.is_closed = Some(closed);
        job.is_reposted = Some(reposted);

        // Stable filter order: closed, reposted, applicant cap, age cap.
        if closed {
            job.mark_validated(ValidationTier::Browser, false, "closed");
        } else if reposted {
            job.mark_validated(ValidationTier::Browser, false, "reposted");
        } else if job.applicants.is_some_and(|a| a > max_applicants) {
            let applicants = job.applicants.unwrap_or_default();
            job.mark_validated(
                ValidationTier::Browser,
                false,
                &format!("too_many_applicants:{applicants}"),
            );
        } else if job.posted_hours_ago.is_some_and(|h| h > max_hours) {
            let hours = job.posted_hours_ago.unwrap_or_default();
            job.mark_validated(ValidationTier::Browser, false, &format!("too_old:{hours}h"));
        } else {
            job.mark_validated(ValidationTier::Browser, true, "passed");
        }
        Ok(())
    }

    async fn extract_applicants(&self, client: &Client, page_text: &str) -> Option<u32> {
        for selector in APPLICANT_SELECTORS {
            if let Ok(el) = client.find(Locator::Css(selector)).await
                && let Ok(text) = el.text().await
                && let Some(count) = filters::parse_applicants(&text)
            {
                return Some(count);
            }
        }
        filters::parse_applicants(page_text)
    }

    /// Closed when any closed selector or literal wording is present;
    /// an apply button confirms active; otherwise assume active.
    async fn detect_closed(&self, client: &Client, page_text: &str) -> bool {
        for selector in CLOSED_SELECTORS {
            if client.find(Locator::Css(selector)).await.is_ok() {
                return true;
            }
        }
        if CLOSED_TEXTS.iter().any(|text| page_text.contains(text)) {
            return true;
        }
        for selector in APPLY_SELECTORS {
            if client.find(Locator::Css(selector)).await.is_ok() {
                return false;
            }
        }
        false
    }

    async fn extract_posted_hours(&self, client: &Client, page_text: &str) -> Option<u32> {
        for selector in POSTED_SELECTORS {
            let Ok(el) = client.find(Locator::Css(selector)).await else {
                continue;
            };
            // An ISO datetime attribute beats parsing rendered text.
            if let Ok(Some(datetime)) = el.attr("datetime").await
                && let Some(hours) = iso_hours_ago(&datetime)
            {
                return Some(hours);
            }
            if let Ok(text) = el.text().await
                && let Some(hours) = filters::parse_posted_hours(&text)
            {
                return Some(hours);
            }
        }
        filters::parse_posted_hours(page_text)
    }
}

/// Hours elapsed since an RFC 3339 timestamp.
fn iso_hours_ago(raw: &str) -> Option<u32> {
    let posted = DateTime::parse_from_rfc3339(raw.trim()).ok()?;
    let elapsed = Utc::now().signed_duration_since(posted.with_timezone(&Utc));
    u32::try_from(elapsed.num_hours().max(0)).ok()
}
