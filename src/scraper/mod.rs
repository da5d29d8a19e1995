// Scrape engine: tiered discovery, validation, and enrichment of job
// listings from a native endpoint with a web-search fallback.

pub mod enrich;
pub mod filters;
pub mod guest_api;
pub mod html_check;
pub mod orchestrator;
pub mod pacing;
pub mod web_search;

#[cfg(feature = "browser-validation")]
pub mod browser;
