//! Scrape orchestration: composes the source adapters, validation
//! tiers, and enrichment into one cancellable background run, then
//! publishes progress and the final result through the run registry.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::job::{CanonicalJob, ValidationTier};
use crate::models::run::{FilterStats, RunStatus, ScrapeRun, SourceCounts};
use crate::models::spec::FilterSpec;
use crate::registry::ScrapeRegistry;
use crate::scraper::enrich::{JobEnricher, SkillMatcher};
use crate::scraper::filters;
use crate::scraper::guest_api::GuestApiClient;
use crate::scraper::html_check::HtmlValidator;
use crate::scraper::pacing::Pacer;
use crate::scraper::web_search::WebSearchClient;

#[cfg(feature = "browser-validation")]
use crate::scraper::browser::BrowserValidator;

const ENRICH_PACING: Duration = Duration::from_millis(500);

/// Result of the synchronous quick-discovery path: no registry entry,
/// no browser tier, no enrichment.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickScrapeResult {
    pub jobs: Vec<CanonicalJob>,
    pub jobs_found: usize,
    pub search_method: String,
    pub fallback_used: bool,
}

pub struct Orchestrator {
    registry: Arc<ScrapeRegistry>,
    guest: GuestApiClient,
    search: WebSearchClient,
    html: Arc<HtmlValidator>,
    #[cfg(feature = "browser-validation")]
    browser: Option<Arc<BrowserValidator>>,
    enricher: Arc<dyn JobEnricher>,
    enrich_pacing: Duration,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ScrapeRegistry>,
        pacer: Arc<Pacer>,
        #[allow(unused_variables)] webdriver_url: Option<String>,
    ) -> Result<Self, AppError> {
        Ok(Self {
            registry,
            guest: GuestApiClient::new(Arc::clone(&pacer))?,
            search: WebSearchClient::new(Arc::clone(&pacer))?,
            html: Arc::new(HtmlValidator::new(Arc::clone(&pacer))?),
            #[cfg(feature = "browser-validation")]
            browser: webdriver_url
                .map(|url| Arc::new(BrowserValidator::new(url, Arc::clone(&pacer)))),
            enricher: Arc::new(SkillMatcher),
            enrich_pacing: ENRICH_PACING,
        })
    }

    /// Assembly seam for tests: adapters pointed at mock servers and a
    /// zero enrichment delay.
    pub fn with_clients(
        registry: Arc<ScrapeRegistry>,
        guest: GuestApiClient,
        search: WebSearchClient,
        html: Arc<HtmlValidator>,
        enricher: Arc<dyn JobEnricher>,
        enrich_pacing: Duration,
    ) -> Self {
        Self {
            registry,
            guest,
            search,
            html,
            #[cfg(feature = "browser-validation")]
            browser: None,
            enricher,
            enrich_pacing,
        }
    }

    /// Register a run for the owner and start its background task.
    /// Returns immediately with the run id.
    pub fn start_scrape(self: &Arc<Self>, spec: FilterSpec, owner: String) -> Uuid {
        let run = ScrapeRun::new(owner, spec.clone());
        let run_id = run.run_id;
        let cancel = self.registry.register(run);

        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = orchestrator.run_scrape(run_id, spec, &cancel).await {
                tracing::error!(%run_id, "scrape failed: {e}");
                orchestrator.registry.update(run_id, |run| {
                    run.status = RunStatus::Failed;
                    run.error = Some("Scrape failed".to_string());
                    run.completed_at = Some(Utc::now());
                });
            }
        });
        run_id
    }

    /// The background body of one run. Cancellation is observed at
    /// every stage boundary and inside every adapter's suspension
    /// points; a cancelled run keeps its partial jobs but never
    /// completes.
    async fn run_scrape(
        &self,
        run_id: Uuid,
        spec: FilterSpec,
        cancel: &CancellationToken,
    ) -> Result<(), AppError> {
        self.registry.update(run_id, |run| {
            run.status = RunStatus::Running;
            run.advance_progress(10);
        });

        let mut stats = FilterStats::default();
        let mut sources = SourceCounts::default();
        let max_hours = spec.max_hours_old();

        // Discovery: primary first, fallback when it is blocked or dry.
        let primary = self.guest.search(&spec, cancel).await;
        if cancel.is_cancelled() {
            return Ok(());
        }
        sources.primary = primary.jobs.len();
        stats.total_found += primary.jobs.len();

        let (mut jobs, search_method, fallback_used) =
            if primary.complete && !primary.jobs.is_empty() {
                let mut kept = Vec::with_capacity(primary.jobs.len());
                for job in primary.jobs {
                    match filters::passes_structural(&job, spec.max_applicants, max_hours) {
                        Ok(()) => {
                            stats.passed += 1;
                            kept.push(job);
                        }
                        Err(reason) => stats.record_drop(&reason),
                    }
                }
                (kept, "primary", false)
            } else {
                tracing::info!(%run_id, "primary source blocked or empty, using fallback");
                let outcome = self.search.search(&spec, cancel).await;
                if cancel.is_cancelled() {
                    return Ok(());
                }
                sources.fallback = outcome.jobs.len();
                stats.absorb(outcome.stats);

                // Tier 2 across all fallback survivors.
                let (validated, tier2_stats) = self
                    .html
                    .validate_batch(outcome.jobs, spec.max_applicants, max_hours, cancel)
                    .await;
                stats.absorb(tier2_stats);

                // The primary source may have yielded partial records
                // before it was blocked; keep the ones passing the
                // structural caps in the merge, with the richer record
                // winning on collision.
                let mut merged = validated;
                for job in primary.jobs {
                    match filters::passes_structural(&job, spec.max_applicants, max_hours) {
                        Ok(()) => merged.push(job),
                        Err(reason) => stats.record_drop(&reason),
                    }
                }
                (merged, "fallback", true)
            };

        jobs = dedup_jobs(jobs);
        let discovery_snapshot = jobs.len();
        self.registry.update(run_id, |run| {
            run.search_method = Some(search_method.to_string());
            run.fallback_used = fallback_used;
            run.sources = sources;
            run.jobs_found = discovery_snapshot;
            run.advance_progress(30);
        });
        if cancel.is_cancelled() {
            return Ok(());
        }

        // Tier 2 over anything still unvalidated, when requested.
        if spec.validate_html
            && jobs
                .iter()
                .any(|job| job.validation_tier < ValidationTier::Html)
        {
            let (validated, tier2_stats) = self
                .html
                .validate_batch(jobs, spec.max_applicants, max_hours, cancel)
                .await;
            jobs = validated;
            stats.absorb(tier2_stats);
        }
        self.registry.update(run_id, |run| run.advance_progress(60));
        if cancel.is_cancelled() {
            return Ok(());
        }

        // Tier 3 over the strongest candidates, when available.
        #[cfg(feature = "browser-validation")]
        if spec.validate_browser
            && let Some(browser) = &self.browser
        {
            jobs.sort_by_key(signal_strength);
            let top: Vec<CanonicalJob> = jobs
                .drain(..jobs.len().min(spec.validate_top_n as usize))
                .collect();
            let (validated, tier3_stats) = browser
                .validate_batch(top, spec.max_applicants, max_hours, cancel)
                .await;
            stats.absorb(tier3_stats);
            let mut rejoined = validated;
            rejoined.append(&mut jobs);
            jobs = rejoined;
        }
        self.registry.update(run_id, |run| run.advance_progress(85));
        if cancel.is_cancelled() {
            return Ok(());
        }

        // Enrichment: per-candidate, paced, and never fatal.
        let mut enriched = Vec::with_capacity(jobs.len());
        for (i, job) in jobs.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Ok(());
            }
            if i > 0 {
                tokio::time::sleep(self.enrich_pacing).await;
            }
            let has_text = job
                .description
                .as_deref()
                .or(job.snippet.as_deref())
                .is_some_and(|t| !t.is_empty());
            if !has_text {
                enriched.push(job);
                continue;
            }
            match self.enricher.enrich(job.clone(), &spec.user_skills).await {
                Ok(job) => enriched.push(job),
                Err(e) => {
                    tracing::warn!("enrichment failed, keeping candidate unenriched: {e}");
                    enriched.push(job);
                }
            }
        }
        let mut jobs = enriched;

        jobs.retain(|job| !job.is_rejected());
        // Stable: equal scores keep their relative order.
        jobs.sort_by(|a, b| b.match_score.cmp(&a.match_score));
        jobs.truncate(spec.max_results as usize);

        self.registry.update(run_id, |run| {
            run.status = RunStatus::Completed;
            run.advance_progress(100);
            run.jobs_found = jobs.len();
            run.jobs = jobs;
            run.filter_stats = stats;
            run.completed_at = Some(Utc::now());
        });
        tracing::info!(%run_id, "scrape completed");
        Ok(())
    }

    /// Discovery-only path for the quick endpoint: primary with
    /// fallback, tier-2 on fallback survivors, no registry entry.
    pub async fn quick_scrape(&self, spec: FilterSpec) -> QuickScrapeResult {
        let cancel = CancellationToken::new();
        let max_hours = spec.max_hours_old();

        let primary = self.guest.search(&spec, &cancel).await;
        if primary.complete && !primary.jobs.is_empty() {
            let jobs: Vec<CanonicalJob> = primary
                .jobs
                .into_iter()
                .filter(|job| {
                    filters::passes_structural(job, spec.max_applicants, max_hours).is_ok()
                })
                .collect();
            return QuickScrapeResult {
                jobs_found: jobs.len(),
                jobs,
                search_method: "primary".to_string(),
                fallback_used: false,
            };
        }

        let outcome = self.search.search(&spec, &cancel).await;
        let (jobs, _) = self
            .html
            .validate_batch(outcome.jobs, spec.max_applicants, max_hours, &cancel)
            .await;
        QuickScrapeResult {
            jobs_found: jobs.len(),
            jobs,
            search_method: "fallback".to_string(),
            fallback_used: true,
        }
    }
}

/// Merge-order key for the browser tier: known-low applicant counts
/// first, newest next, unknowns last.
#[cfg(feature = "browser-validation")]
fn signal_strength(job: &CanonicalJob) -> (u8, u32, u8, u32) {
    (
        u8::from(job.applicants.is_none()),
        job.applicants.unwrap_or(u32::MAX),
        u8::from(job.posted_hours_ago.is_none()),
        job.posted_hours_ago.unwrap_or(u32::MAX),
    )
}

/// Deduplicate by external id first, then by URL. First writer wins
/// unless a later record is richer (higher tier, then more fields).
fn dedup_jobs(jobs: Vec<CanonicalJob>) -> Vec<CanonicalJob> {
    let mut out: Vec<CanonicalJob> = Vec::new();
    for job in jobs {
        let slot = out.iter_mut().find(|existing| {
            (job.external_id.is_some() && existing.external_id == job.external_id)
                || existing.url == job.url
        });
        match slot {
            Some(existing) => {
                if job.richness() > existing.richness() {
                    *existing = job;
                }
            }
            None => out.push(job),
        }
    }
    out
}
