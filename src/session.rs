use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use rusqlite::Connection;

use crate::db;

/// Randomized inter-fetch delay, the crawl-etiquette knob. Bounds differ
/// per source; `none()` disables sleeping for tests.
#[derive(Debug, Clone, Copy)]
pub struct DelayPolicy {
    min_ms: u64,
    max_ms: u64,
}

impl DelayPolicy {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        let max_ms = max_ms.max(min_ms);
        Self { min_ms, max_ms }
    }

    /// Bounds from `<PREFIX>_DELAY_MIN_MS` / `<PREFIX>_DELAY_MAX_MS`,
    /// falling back to the given defaults.
    pub fn from_env(prefix: &str, default_min_ms: u64, default_max_ms: u64) -> Self {
        let min_ms = env_u64(&format!("{prefix}_DELAY_MIN_MS"), default_min_ms);
        let max_ms = env_u64(&format!("{prefix}_DELAY_MAX_MS"), default_max_ms);
        Self::new(min_ms, max_ms)
    }

    pub fn none() -> Self {
        Self { min_ms: 0, max_ms: 0 }
    }

    pub fn sleep_jittered(&self) {
        if self.max_ms == 0 {
            return;
        }
        let ms = if self.min_ms == self.max_ms {
            self.min_ms
        } else {
            rand::thread_rng().gen_range(self.min_ms..=self.max_ms)
        };
        std::thread::sleep(Duration::from_millis(ms));
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

/// Context for one crawl invocation. Owns the store connection and the
/// run-scoped accumulators for its lifetime; dropped at the end of the run,
/// which releases the connection deterministically.
pub struct CrawlSession {
    pub conn: Connection,
    pub delay: DelayPolicy,
    /// Players already seen this run, so repeated lineups don't re-upsert.
    pub players_seen: HashSet<i64>,
}

impl CrawlSession {
    pub fn new(conn: Connection, delay: DelayPolicy) -> Self {
        Self {
            conn,
            delay,
            players_seen: HashSet::new(),
        }
    }

    pub fn open(path: &Path, delay: DelayPolicy) -> Result<Self> {
        Ok(Self::new(db::open_db(path)?, delay))
    }

    /// In-memory session with delays disabled, for tests.
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(db::open_in_memory()?, DelayPolicy::none()))
    }
}

#[cfg(test)]
mod tests {
    use super::DelayPolicy;

    #[test]
    fn max_is_clamped_to_min() {
        let policy = DelayPolicy::new(500, 100);
        // Degenerate bounds must not panic gen_range.
        policy.sleep_jittered();
        assert_eq!(policy.min_ms, policy.max_ms);
    }

    #[test]
    fn zero_policy_does_not_sleep() {
        DelayPolicy::none().sleep_jittered();
    }
}
