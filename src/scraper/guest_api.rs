//! Primary source adapter: the site-native guest listings endpoint.
//!
//! Consumed anonymously with server-side filters. Pages are 25 records;
//! each page costs one outbound permit. A 429 or any other non-200 is
//! reported as "blocked" so the orchestrator can fall back.

use std::sync::Arc;
use std::time::Duration;

use scraper::{ElementRef, Html, Selector};
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::models::job::{CanonicalJob, JobSource};
use crate::models::spec::FilterSpec;
use crate::scraper::filters;
use crate::scraper::pacing::{Pacer, browser_headers};

const GUEST_API_BASE: &str =
    "https://www.linkedin.com/jobs-guest/jobs/api/seeMoreJobPostings/search";
const PAGE_SIZE: u32 = 25;
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// One adapter invocation: discovered records plus whether the source
/// answered completely (false signals "blocked", triggering fallback).
#[derive(Debug)]
pub struct SourceBatch {
    pub jobs: Vec<CanonicalJob>,
    pub complete: bool,
}

pub struct GuestApiClient {
    http: reqwest::Client,
    base_url: String,
    pacer: Arc<Pacer>,
}

impl GuestApiClient {
    pub fn new(pacer: Arc<Pacer>) -> Result<Self, AppError> {
        Self::with_base_url(pacer, GUEST_API_BASE.to_string())
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

    /// Paginated filtered search. Stops at `max_results`, on the first
    /// page yielding no new records, or as soon as the endpoint blocks.
    pub async fn search(&self, spec: &FilterSpec, cancel: &CancellationToken) -> SourceBatch {
        let mut jobs: Vec<CanonicalJob> = Vec::new();
        let mut start = 0u32;

        while (jobs.len() as u32) < spec.max_results {
            let admitted = tokio::select! {
                _ = cancel.cancelled() => return SourceBatch { jobs, complete: true },
                admitted = self.pacer.acquire() => admitted,
            };
            if !admitted {
                tracing::warn!("outbound budget exhausted mid-pagination");
                let complete = !jobs.is_empty();
                return SourceBatch { jobs, complete };
            }

            let params = filters::primary_params(spec, start);
            let response = tokio::select! {
                _ = cancel.cancelled() => return SourceBatch { jobs, complete: true },
                resp = self
                    .http
                    .get(&self.base_url)
                    .headers(browser_headers())
                    .query(&params)
                    .send() => resp,
            };

            let response = match response {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::error!("guest API request failed: {e}");
                    let complete = !jobs.is_empty();
                    return SourceBatch { jobs, complete };
                }
            };

            if response.status().as_u16() == 429 {
                tracing::warn!("guest API rate limited (429), signalling fallback");
                return SourceBatch {
                    jobs,
                    complete: false,
                };
            }
            if !response.status().is_success() {
                tracing::error!("guest API returned {}", response.status());
                return SourceBatch {
                    jobs,
                    complete: false,
                };
            }
            // A redirect onto a login wall means the anonymous session
            // is blocked even though the status reads 200.
            let final_path = response.url().path().to_string();
            if final_path.contains("authwall") || final_path.contains("/login") {
                tracing::warn!("guest API redirected to login wall, signalling fallback");
                return SourceBatch {
                    jobs,
                    complete: false,
                };
            }

            let html = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    tracing::error!("guest API body read failed: {e}");
                    let complete = !jobs.is_empty();
                    return SourceBatch { jobs, complete };
                }
            };

            let page_new = absorb_page(&html, &mut jobs, spec.max_results);
            tracing::info!(
                page = start / PAGE_SIZE + 1,
                found = page_new,
                total = jobs.len(),
                "guest API page parsed"
            );
            if page_new == 0 {
                break;
            }
            start += PAGE_SIZE;
        }

        SourceBatch {
            jobs,
            complete: true,
        }
    }
}

fn sel(source: &str) -> Selector {
    Selector::parse(source).expect("static selector must parse")
}

/// Parse one response page of job cards into `jobs`, deduplicating by
/// external id. Returns how many new records the page contributed.
fn absorb_page(html: &str, jobs: &mut Vec<CanonicalJob>, max_results: u32) -> usize {
    let document = Html::parse_document(html);
    let card_selector = sel("li, div.base-card, div.job-search-card");

    let mut added = 0;
    for card in document.select(&card_selector) {
        if jobs.len() as u32 >= max_results {
            break;
        }
        let Some(job) = parse_card(card) else {
            continue;
        };
        if jobs.iter().any(|j| j.external_id == job.external_id) {
            continue;
        }
        // Cards occasionally carry closed/reposted wording in their
        // snippet; shed those before they consume result slots.
        let card_text = format!(
            "{} {}",
            job.snippet.as_deref().unwrap_or(""),
            job.posted_label.as_deref().unwrap_or("")
        );
        if filters::detect_closed(&card_text) || filters::detect_reposted(&card_text) {
            continue;
        }
        jobs.push(job);
        added += 1;
    }
    added
}

/// Extract one canonical record from a result card. Cards missing a
/// parseable job id are skipped.
fn parse_card(card: ElementRef<'_>) -> Option<CanonicalJob> {
    let job_id = card_job_id(card)?;

    let title = select_text(card, "h3.base-search-card__title, .job-search-card__title")
        .unwrap_or_else(|| "Unknown Title".to_string());
    let company = select_text(card, "h4.base-search-card__subtitle, .job-search-card__subtitle")
        .unwrap_or_else(|| "Unknown Company".to_string());

    let url = format!("https://www.linkedin.com/jobs/view/{job_id}");
    let mut job = CanonicalJob::new(url, title, company, JobSource::Primary);
    job.external_id = Some(format!("linkedin-{job_id}"));

    job.location = select_text(card, ".job-search-card__location, .base-search-card__metadata");
    job.posted_label = select_text(card, "time, .job-search-card__listdate");
    job.posted_hours_ago = job
        .posted_label
        .as_deref()
        .and_then(filters::parse_posted_hours);
    job.easy_apply = card.select(&sel(".job-search-card__easy-apply-label")).next().is_some();
    job.applicants = select_text(card, ".job-search-card__num-applicants")
        .as_deref()
        .and_then(filters::parse_applicants);
    job.snippet = select_text(card, ".job-search-card__snippet, .job-search-card__benefits")
        .or_else(|| Some(format!("{} at {}", job.title, job.company)));

    Some(job)
}

/// Job id from the card's entity URN, falling back to the listing link.
fn card_job_id(card: ElementRef<'_>) -> Option<String> {
    let urn_re = filters::job_posting_urn_re();
    let urn = card
        .value()
        .attr("data-entity-urn")
        .map(str::to_string)
        .or_else(|| {
            card.select(&sel("[data-entity-urn]"))
                .next()
                .and_then(|el| el.value().attr("data-entity-urn"))
                .map(str::to_string)
        });
    if let Some(urn) = urn
        && let Some(caps) = urn_re.captures(&urn)
    {
        return Some(caps[1].to_string());
    }

    let link_re = filters::jobs_view_re();
    card.select(&sel("a.base-card__full-link, a"))
        .find_map(|a| a.value().attr("href"))
        .and_then(|href| link_re.captures(href))
        .map(|caps| caps[1].to_string())
}

fn select_text(card: ElementRef<'_>, selector: &str) -> Option<String> {
    card.select(&sel(selector)).next().map(|el| {
        el.text()
            .collect::<Vec<_>>()
            .join(" ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    })
    .filter(|t| !t.is_empty())
}
