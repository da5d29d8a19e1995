//! Inbound per-client rate limiting: a sliding 60-second window keyed by
//! a short digest of the caller's address and user agent (or the auth
//! subject once authenticated).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

/// General API limit per client per window.
pub const DEFAULT_LIMIT: u32 = 100;
/// Stricter limit on scrape initiation per client per window.
pub const SCRAPER_LIMIT: u32 = 10;

const WINDOW: Duration = Duration::from_secs(60);
/// Cap on tracked clients; oldest-idle entries go first.
const MAX_TRACKED_CLIENTS: usize = 10_000;

/// Derive the 16-hex-char client key. Anonymous callers hash to
/// ip + user-agent; authenticated callers substitute their subject.
pub fn client_key(ip: &str, user_agent: &str, subject: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    match subject {
        Some(sub) => hasher.update(sub.as_bytes()),
        None => {
            hasher.update(ip.as_bytes());
            hasher.update(b"\x00");
            hasher.update(user_agent.as_bytes());
        }
    }
    hex::encode(hasher.finalize())[..16].to_string()
}

/// Sliding-window limiter over all inbound API calls.
#[derive(Debug, Default)]
pub struct ClientRateLimiter {
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl ClientRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one hit for the client and check it against `limit`.
    ///
    /// Ok carries the requests remaining in the window; Err carries the
    /// retry-after hint in seconds (one full window).
    pub fn hit(&self, key: &str, limit: u32) -> Result<u32, u64> {
        let now = Instant::now();
        let mut windows = self.windows.lock().expect("rate limiter lock poisoned");

        if windows.len() >= MAX_TRACKED_CLIENTS && !windows.contains_key(key) {
            Self::evict_idle(&mut windows, now);
        }

        let hits = windows.entry(key.to_string()).or_default();
        while let Some(front) = hits.front() {
            if now.duration_since(*front) >= WINDOW {
                hits.pop_front();
            } else {
                break;
            }
        }

        if hits.len() as u32 >= limit {
            return Err(WINDOW.as_secs());
        }
        hits.push_back(now);
        Ok(limit - hits.len() as u32)
    }

    /// Read-only view of the remaining default-limit budget, used for
    /// the `X-RateLimit-Remaining` response header.
    pub fn remaining(&self, key: &str, limit: u32) -> u32 {
        let now = Instant::now();
        let windows = self.windows.lock().expect("rate limiter lock poisoned");
        let used = windows
            .get(key)
            .map(|hits| {
                hits.iter()
                    .filter(|t| now.duration_since(**t) < WINDOW)
                    .count() as u32
            })
            .unwrap_or(0);
        limit.saturating_sub(used)
    }

    fn evict_idle(windows: &mut HashMap<String, VecDeque<Instant>>, now: Instant) {
        windows.retain(|_, hits| {
            hits.back()
                .is_some_and(|last| now.duration_since(*last) < WINDOW)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_16_hex_chars() {
        let key = client_key("203.0.113.9", "Mozilla/5.0", None);
        assert_eq!(key.len(), 16);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn subject_overrides_ip_identity() {
        let anon = client_key("203.0.113.9", "Mozilla/5.0", None);
        let authed = client_key("203.0.113.9", "Mozilla/5.0", Some("user-1"));
        assert_ne!(anon, authed);
        let same_user_other_ip = client_key("198.51.100.4", "curl/8", Some("user-1"));
        assert_eq!(authed, same_user_other_ip);
    }

    #[test]
    fn limit_exceedance_returns_retry_after() {
        let limiter = ClientRateLimiter::new();
        for _ in 0..SCRAPER_LIMIT {
            assert!(limiter.hit("abc", SCRAPER_LIMIT).is_ok());
        }
        assert_eq!(limiter.hit("abc", SCRAPER_LIMIT), Err(60));
    }

    #[test]
    fn limits_are_per_client() {
        let limiter = ClientRateLimiter::new();
        for _ in 0..SCRAPER_LIMIT {
            limiter.hit("alice", SCRAPER_LIMIT).unwrap();
        }
        assert!(limiter.hit("bob", SCRAPER_LIMIT).is_ok());
    }

    #[test]
    fn remaining_does_not_consume() {
        let limiter = ClientRateLimiter::new();
        limiter.hit("abc", DEFAULT_LIMIT).unwrap();
        assert_eq!(limiter.remaining("abc", DEFAULT_LIMIT), DEFAULT_LIMIT - 1);
        assert_eq!(limiter.remaining("abc", DEFAULT_LIMIT), DEFAULT_LIMIT - 1);
        assert_eq!(limiter.remaining("unseen", DEFAULT_LIMIT), DEFAULT_LIMIT);
    }
}
