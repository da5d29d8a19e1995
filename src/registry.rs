//! Ownership-scoped in-memory registry of scrape runs.
//!
//! Each run has one writer (its orchestrator task); user-facing reads
//! get cloned snapshots so status and progress are always consistent.
//! Cross-owner access answers "not found" so run existence is never
//! disclosed to other callers.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::run::{RunStatus, RunSummary, ScrapeRun};

/// Terminal runs beyond this count are evicted oldest-first.
const DEFAULT_MAX_RUNS: usize = 100;

struct RunEntry {
    run: ScrapeRun,
    cancel: CancellationToken,
}

pub struct ScrapeRegistry {
    max_runs: usize,
    inner: RwLock<HashMap<Uuid, RunEntry>>,
}

impl Default for ScrapeRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RUNS)
    }
}

impl ScrapeRegistry {
    pub fn new(max_runs: usize) -> Self {
        Self {
            max_runs: max_runs.max(1),
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a new run and hand back its cancellation token.
    pub fn register(&self, run: ScrapeRun) -> CancellationToken {
        let token = CancellationToken::new();
        let mut inner = self.inner.write().expect("registry lock poisoned");
        inner.insert(
            run.run_id,
            RunEntry {
                run,
                cancel: token.clone(),
            },
        );
        Self::evict_terminal(&mut inner, self.max_runs);
        token
    }

    /// Apply a mutation to a non-terminal run. Terminal runs are
    /// immutable; the closure is not invoked for them.
    pub fn update<F>(&self, run_id: Uuid, mutate: F) -> bool
    where
        F: FnOnce(&mut ScrapeRun),
    {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        match inner.get_mut(&run_id) {
            Some(entry) if !entry.run.status.is_terminal() => {
                mutate(&mut entry.run);
                true
            }
            _ => false,
        }
    }

    /// Owner-scoped snapshot of a run.
    pub fn get(&self, run_id: Uuid, caller: &str) -> Option<ScrapeRun> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner
            .get(&run_id)
            .filter(|entry| entry.run.owner_id == caller)
            .map(|entry| entry.run.clone())
    }

    /// All of the caller's runs, newest first, without job payloads.
    pub fn list(&self, caller: &str) -> Vec<RunSummary> {
        let inner = self.inner.read().expect("registry lock poisoned");
        let mut runs: Vec<RunSummary> = inner
            .values()
            .filter(|entry| entry.run.owner_id == caller)
            .map(|entry| RunSummary::from(&entry.run))
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs
    }

    /// Owner-scoped cancellation. Fires the run's token and moves a
    /// non-terminal run to `cancelled`; in-flight work stops at its
    /// next suspension point.
    pub fn cancel(&self, run_id: Uuid, caller: &str) -> bool {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        let Some(entry) = inner.get_mut(&run_id) else {
            return false;
        };
        if entry.run.owner_id != caller {
            return false;
        }
        entry.cancel.cancel();
        if !entry.run.status.is_terminal() {
            entry.run.status = RunStatus::Cancelled;
            entry.run.completed_at = Some(Utc::now());
        }
        true
    }

    fn evict_terminal(inner: &mut HashMap<Uuid, RunEntry>, max_runs: usize) {
        while inner.len() > max_runs {
            let oldest = inner
                .iter()
                .filter(|(_, entry)| entry.run.status.is_terminal())
                .min_by_key(|(_, entry)| entry.run.started_at)
                .map(|(id, _)| *id);
            match oldest {
                Some(id) => {
                    inner.remove(&id);
                }
                // Only live runs left; let the map grow rather than
                // evicting work in flight.
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::spec::FilterSpec;

    fn spec() -> FilterSpec {
        serde_json::from_value(serde_json::json!({ "keywords": "rust" })).unwrap()
    }

    fn registry_with(owner: &str) -> (ScrapeRegistry, Uuid) {
        let registry = ScrapeRegistry::default();
        let run = ScrapeRun::new(owner.into(), spec());
        let id = run.run_id;
        registry.register(run);
        (registry, id)
    }

    #[test]
    fn cross_owner_access_is_not_found() {
        let (registry, id) = registry_with("bob");
        assert!(registry.get(id, "alice").is_none());
        assert!(!registry.cancel(id, "alice"));
        // Bob's run is untouched by Alice's attempt.
        let run = registry.get(id, "bob").unwrap();
        assert_eq!(run.status, RunStatus::Queued);
    }

    #[test]
    fn cancel_moves_run_terminal_and_fires_token() {
        let registry = ScrapeRegistry::default();
        let run = ScrapeRun::new("bob".into(), spec());
        let id = run.run_id;
        let token = registry.register(run);

        assert!(registry.cancel(id, "bob"));
        assert!(token.is_cancelled());
        let run = registry.get(id, "bob").unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
        assert!(run.completed_at.is_some());
    }

    #[test]
    fn terminal_runs_are_immutable() {
        let (registry, id) = registry_with("bob");
        registry.cancel(id, "bob");
        assert!(!registry.update(id, |run| run.progress = 99));
        assert_eq!(registry.get(id, "bob").unwrap().progress, 0);
    }

    #[test]
    fn eviction_spares_live_runs() {
        let registry = ScrapeRegistry::new(2);
        let live = ScrapeRun::new("bob".into(), spec());
        let live_id = live.run_id;
        registry.register(live);

        let mut terminal_ids = Vec::new();
        for _ in 0..3 {
            let mut run = ScrapeRun::new("bob".into(), spec());
            run.status = RunStatus::Completed;
            terminal_ids.push(run.run_id);
            registry.register(run);
        }

        // The live run survives even though it is oldest.
        assert!(registry.get(live_id, "bob").is_some());
        let surviving = registry.list("bob").len();
        assert!(surviving <= 2 || registry.get(live_id, "bob").is_some());
    }

    #[test]
    fn list_excludes_other_owners_and_sorts_newest_first() {
        let registry = ScrapeRegistry::default();
        let first = ScrapeRun::new("bob".into(), spec());
        registry.register(first);
        let second = ScrapeRun::new("bob".into(), spec());
        let second_id = second.run_id;
        registry.register(second);
        let other = ScrapeRun::new("alice".into(), spec());
        registry.register(other);

        let runs = registry.list("bob");
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, second_id);
    }
}
