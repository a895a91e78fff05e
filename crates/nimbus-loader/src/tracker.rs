use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadOutcome {
    Pending,
    Loaded,
    Failed,
}

/// Per-URL load bookkeeping. `attempts` counts failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadRecord {
    pub attempts: u32,
    pub outcome: LoadOutcome,
}

impl LoadRecord {
    const fn pending() -> Self {
        Self {
            attempts: 0,
            outcome: LoadOutcome::Pending,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.outcome != LoadOutcome::Pending
    }
}

/// What the caller should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Still under the retry budget; the caller schedules the next attempt.
    Retry { attempts: u32 },
    /// Budget exhausted; the record is now permanently `Failed`.
    Exhausted { attempts: u32 },
    /// The URL had already resolved; nothing changed.
    AlreadyResolved,
}

/// Load records for the images of one frame set. Pure bookkeeping: it never
/// schedules anything itself.
#[derive(Debug, Clone)]
pub struct LoadTracker {
    records: HashMap<String, LoadRecord>,
    max_retries: u32,
}

impl LoadTracker {
    pub fn new(max_retries: u32) -> Self {
        Self {
            records: HashMap::new(),
            max_retries: max_retries.max(1),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn record_attempt_start(&mut self, url: &str) {
        self.records
            .entry(url.to_string())
            .or_insert_with(LoadRecord::pending);
    }

    /// Returns true when this call moved the URL out of `Pending`.
    pub fn record_success(&mut self, url: &str) -> bool {
        let record = self
            .records
            .entry(url.to_string())
            .or_insert_with(LoadRecord::pending);
        if record.is_resolved() {
            return false;
        }
        record.outcome = LoadOutcome::Loaded;
        true
    }

    pub fn record_failure(&mut self, url: &str) -> FailureDisposition {
        let record = self
            .records
            .entry(url.to_string())
            .or_insert_with(LoadRecord::pending);
        if record.is_resolved() {
            return FailureDisposition::AlreadyResolved;
        }
        record.attempts += 1;
        if record.attempts < self.max_retries {
            FailureDisposition::Retry {
                attempts: record.attempts,
            }
        } else {
            record.outcome = LoadOutcome::Failed;
            FailureDisposition::Exhausted {
                attempts: record.attempts,
            }
        }
    }

    /// Resolve a still-pending URL without an attempt result (safety timeout).
    pub fn force_resolve(&mut self, url: &str, outcome: LoadOutcome) -> bool {
        match self.records.get_mut(url) {
            Some(record) if !record.is_resolved() && outcome != LoadOutcome::Pending => {
                record.outcome = outcome;
                true
            }
            _ => false,
        }
    }

    pub fn record(&self, url: &str) -> Option<&LoadRecord> {
        self.records.get(url)
    }

    pub fn is_ready(&self, url: &str) -> bool {
        matches!(
            self.records.get(url),
            Some(LoadRecord {
                outcome: LoadOutcome::Loaded,
                ..
            })
        )
    }

    pub fn is_resolved(&self, url: &str) -> bool {
        self.records
            .get(url)
            .map(LoadRecord::is_resolved)
            .unwrap_or(false)
    }

    pub fn all_resolved<'a, I>(&self, urls: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        urls.into_iter().all(|url| self.is_resolved(url))
    }

    pub fn pending_urls(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|(_, record)| !record.is_resolved())
            .map(|(url, _)| url.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_is_idempotent() {
        let mut tracker = LoadTracker::new(3);
        tracker.record_attempt_start("a");
        assert!(!tracker.is_ready("a"));
        assert!(tracker.record_success("a"));
        assert!(!tracker.record_success("a"));
        assert!(tracker.is_ready("a"));
        assert_eq!(tracker.record_failure("a"), FailureDisposition::AlreadyResolved);
        assert!(tracker.is_ready("a"));
    }

    #[test]
    fn failures_exhaust_after_max_retries() {
        let mut tracker = LoadTracker::new(3);
        tracker.record_attempt_start("a");
        assert_eq!(tracker.record_failure("a"), FailureDisposition::Retry { attempts: 1 });
        assert_eq!(tracker.record_failure("a"), FailureDisposition::Retry { attempts: 2 });
        assert_eq!(
            tracker.record_failure("a"),
            FailureDisposition::Exhausted { attempts: 3 }
        );
        let record = tracker.record("a").expect("record exists");
        assert_eq!(record.outcome, LoadOutcome::Failed);
        assert!(!tracker.is_ready("a"));
        assert!(tracker.is_resolved("a"));
    }

    #[test]
    fn all_resolved_counts_failures_as_resolved() {
        let mut tracker = LoadTracker::new(1);
        for url in ["a", "b"] {
            tracker.record_attempt_start(url);
        }
        assert!(!tracker.all_resolved(["a", "b"]));
        tracker.record_success("a");
        tracker.record_failure("b");
        assert!(tracker.all_resolved(["a", "b"]));
        assert!(!tracker.all_resolved(["a", "b", "unknown"]));
    }

    #[test]
    fn force_resolve_only_touches_pending() {
        let mut tracker = LoadTracker::new(3);
        tracker.record_attempt_start("a");
        tracker.record_attempt_start("b");
        tracker.record_success("a");
        assert!(!tracker.force_resolve("a", LoadOutcome::Failed));
        assert!(tracker.force_resolve("b", LoadOutcome::Loaded));
        assert!(!tracker.force_resolve("b", LoadOutcome::Loaded));
        assert!(tracker.pending_urls().is_empty());
    }
}
