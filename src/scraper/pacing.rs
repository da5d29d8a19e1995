//! Outbound pacing: a per-session request budget, randomized spacing
//! between fetches, and header/viewport rotation so requests look like
//! an ordinary desktop browser.

use std::time::{Duration, Instant};

use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, USER_AGENT};
use tokio::sync::Mutex;

/// Conservative per-session ceiling on outbound fetches.
pub const MAX_REQUESTS_PER_SESSION: u32 = 50;

const DELAY_MIN: Duration = Duration::from_secs(2);
const DELAY_MAX: Duration = Duration::from_secs(5);

/// Modern desktop browser strings, drawn uniformly per request.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
];

/// Common desktop sizes, rotated to vary the browser fingerprint.
pub const VIEWPORTS: &[(u32, u32)] = &[(1920, 1080), (1680, 1050), (1440, 900), (1536, 864)];

pub fn random_user_agent() -> &'static str {
    let mut rng = rand::rng();
    USER_AGENTS[rng.random_range(0..USER_AGENTS.len())]
}

pub fn random_viewport() -> (u32, u32) {
    let mut rng = rand::rng();
    VIEWPORTS[rng.random_range(0..VIEWPORTS.len())]
}

/// Headers mimicking a real desktop browser navigation.
pub fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(random_user_agent()),
    );
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate"));
    headers.insert("DNT", HeaderValue::from_static("1"));
    headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));
    headers.insert("Sec-Fetch-Dest", HeaderValue::from_static("document"));
    headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("navigate"));
    headers.insert("Sec-Fetch-Site", HeaderValue::from_static("none"));
    headers.insert("Cache-Control", HeaderValue::from_static("max-age=0"));
    headers
}

#[derive(Debug, Default)]
struct PacerState {
    request_count: u32,
    last_request: Option<Instant>,
}

/// Session-scoped outbound limiter shared by every adapter and validator.
///
/// `acquire` suspends until the minimum spacing plus a uniform jitter has
/// elapsed since the previous request, then claims one permit. The
/// counter is a soft signal; no exactly-N guarantee is made.
#[derive(Debug)]
pub struct Pacer {
    max_requests: u32,
    delay_min: Duration,
    delay_max: Duration,
    state: Mutex<PacerState>,
}

impl Default for Pacer {
    fn default() -> Self {
        Self::new(MAX_REQUESTS_PER_SESSION, DELAY_MIN, DELAY_MAX)
    }
}

impl Pacer {
    pub fn new(max_requests: u32, delay_min: Duration, delay_max: Duration) -> Self {
        Self {
            max_requests,
            delay_min,
            delay_max,
            state: Mutex::new(PacerState::default()),
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Non-blocking budget check.
    pub async fn can_request(&self) -> bool {
        self.state.lock().await.request_count < self.max_requests
    }

    pub async fn requests_remaining(&self) -> u32 {
        let state = self.state.lock().await;
        self.max_requests.saturating_sub(state.request_count)
    }

    /// Wait out the pacing window, then claim a permit. Returns false
    /// without waiting when the session budget is exhausted.
    pub async fn acquire(&self) -> bool {
        {
            let state = self.state.lock().await;
            if state.request_count >= self.max_requests {
                return false;
            }
            if let Some(last) = state.last_request {
                let elapsed = last.elapsed();
                if elapsed < self.delay_min {
                    let wait = self.delay_min - elapsed;
                    drop(state);
                    tokio::time::sleep(wait).await;
                }
            }
        }

        self.jitter().await;

        let mut state = self.state.lock().await;
        state.request_count += 1;
        state.last_request = Some(Instant::now());
        true
    }

    /// Sleep a uniform random duration inside the configured window.
    pub async fn jitter(&self) {
        let range = self.delay_max.saturating_sub(self.delay_min);
        let extra = if range.is_zero() {
            Duration::ZERO
        } else {
            let mut rng = rand::rng();
            range.mul_f64(rng.random_range(0.0..1.0))
        };
        tokio::time::sleep(self.delay_min + extra).await;
    }

    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.request_count = 0;
        state.last_request = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_pacer(max: u32) -> Pacer {
        Pacer::new(max, Duration::ZERO, Duration::ZERO)
    }

    #[tokio::test]
    async fn budget_exhausts_and_resets() {
        let pacer = fast_pacer(2);
        assert!(pacer.acquire().await);
        assert!(pacer.acquire().await);
        assert!(!pacer.acquire().await);
        assert!(!pacer.can_request().await);
        assert_eq!(pacer.requests_remaining().await, 0);

        pacer.reset().await;
        assert_eq!(pacer.requests_remaining().await, 2);
        assert!(pacer.acquire().await);
    }

    #[tokio::test]
    async fn remaining_never_goes_negative() {
        let pacer = fast_pacer(1);
        assert!(pacer.acquire().await);
        assert!(!pacer.acquire().await);
        assert_eq!(pacer.requests_remaining().await, 0);
    }

    #[test]
    fn rotation_pools_are_nonempty() {
        assert!(!random_user_agent().is_empty());
        let (w, h) = random_viewport();
        assert!(w >= 1280 && h >= 800);
    }
}
