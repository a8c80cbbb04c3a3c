//! Rate policy: two independent quotas gate every job submission.
//!
//! The hourly quota is backed by the `jobs` table (durable, survives
//! restarts); the concurrency quota is purely in-memory (slots are only
//! meaningful while a process is alive to run the jobs they count).

use std::collections::HashMap;

use bg_store::Db;
use chrono::{Duration, Utc};
use parking_lot::Mutex;

use bg_domain::error::Result;

/// Default hourly submission cap, used when a user has no override.
pub const DEFAULT_BENCHMARKS_PER_HOUR: i64 = 20;

/// Default concurrent-job cap, used when a user has no override.
pub const DEFAULT_MAX_CONCURRENT: i64 = 1;

/// Why a submission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDenial {
    /// Hourly submission quota exhausted.
    HourlyQuotaExceeded,
}

/// Tracks how many jobs each user currently has occupying a concurrency
/// slot (queued counts don't occupy a slot; only `running` does).
pub struct ConcurrencyTracker {
    active: Mutex<HashMap<String, i64>>,
}

impl Default for ConcurrencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ConcurrencyTracker {
    pub fn new() -> Self {
        Self { active: Mutex::new(HashMap::new()) }
    }

    pub fn active_count(&self, user_id: &str) -> i64 {
        *self.active.lock().get(user_id).unwrap_or(&0)
    }

    /// True if `user_id` has a free concurrency slot against `limit`.
    pub fn has_capacity(&self, user_id: &str, limit: i64) -> bool {
        self.active_count(user_id) < limit
    }

    /// Atomic check-and-decide: `submit`'s step 2 reads the active count and
    /// decides pending-vs-queued under the same lock, so two concurrent
    /// submissions for the same user can't both observe a free slot.
    pub fn try_acquire(&self, user_id: &str, limit: i64) -> bool {
        let mut guard = self.active.lock();
        let n = guard.entry(user_id.to_owned()).or_insert(0);
        if *n < limit {
            *n += 1;
            true
        } else {
            false
        }
    }

    pub fn increment(&self, user_id: &str) {
        *self.active.lock().entry(user_id.to_owned()).or_insert(0) += 1;
    }

    pub fn decrement(&self, user_id: &str) {
        let mut guard = self.active.lock();
        if let Some(n) = guard.get_mut(user_id) {
            *n = (*n - 1).max(0);
            if *n == 0 {
                guard.remove(user_id);
            }
        }
    }
}

/// Resolves the effective hourly/concurrency limits for `user_id`, applying
/// a stored override where present and falling back to the defaults.
pub fn effective_limits(db: &Db, user_id: &str) -> Result<(i64, i64)> {
    let over = db.get_rate_limit_override(user_id)?;
    let hourly = over.as_ref().and_then(|o| o.benchmarks_per_hour).unwrap_or(DEFAULT_BENCHMARKS_PER_HOUR);
    let concurrent = over.as_ref().and_then(|o| o.max_concurrent).unwrap_or(DEFAULT_MAX_CONCURRENT);
    Ok((hourly, concurrent))
}

/// Hourly quota check only — the concurrency check is a separate decision
/// made by the caller (the Job Registry) under the mutex that guards
/// `_start_job` vs queueing, since it decides start-now-or-queue rather
/// than allow-or-deny.
pub fn check_hourly_quota(db: &Db, user_id: &str) -> Result<std::result::Result<(), RateLimitDenial>> {
    let (hourly, _) = effective_limits(db, user_id)?;
    let since = Utc::now() - Duration::hours(1);
    let count = db.count_jobs_since(user_id, since)?;
    if count >= hourly {
        Ok(Err(RateLimitDenial::HourlyQuotaExceeded))
    } else {
        Ok(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bg_domain::user::{Role, User};
    use bg_store::RateLimitOverride;

    fn db_with_user() -> (Db, String) {
        let db = Db::open_in_memory().unwrap();
        let u = User::new("u@example.com", "h", Role::User);
        db.insert_user(&u).unwrap();
        (db, u.id)
    }

    #[test]
    fn defaults_apply_with_no_override() {
        let (db, user_id) = db_with_user();
        let (hourly, concurrent) = effective_limits(&db, &user_id).unwrap();
        assert_eq!(hourly, DEFAULT_BENCHMARKS_PER_HOUR);
        assert_eq!(concurrent, DEFAULT_MAX_CONCURRENT);
    }

    #[test]
    fn override_replaces_defaults() {
        let (db, user_id) = db_with_user();
        db.set_rate_limit_override(&RateLimitOverride {
            user_id: user_id.clone(),
            benchmarks_per_hour: Some(5),
            max_concurrent: Some(3),
        })
        .unwrap();

        let (hourly, concurrent) = effective_limits(&db, &user_id).unwrap();
        assert_eq!(hourly, 5);
        assert_eq!(concurrent, 3);
    }

    #[test]
    fn hourly_quota_denies_once_exhausted() {
        let (db, user_id) = db_with_user();
        db.set_rate_limit_override(&RateLimitOverride {
            user_id: user_id.clone(),
            benchmarks_per_hour: Some(1),
            max_concurrent: None,
        })
        .unwrap();

        assert!(check_hourly_quota(&db, &user_id).unwrap().is_ok());

        let j = bg_domain::job::Job::new(&user_id, bg_domain::job::JobType::Benchmark, serde_json::json!({}), 60, "queued");
        db.insert_job(&j).unwrap();

        assert_eq!(
            check_hourly_quota(&db, &user_id).unwrap().unwrap_err(),
            RateLimitDenial::HourlyQuotaExceeded
        );
    }

    #[test]
    fn concurrency_tracker_tracks_per_user_slots() {
        let tracker = ConcurrencyTracker::new();
        assert!(tracker.has_capacity("u1", 1));
        tracker.increment("u1");
        assert!(!tracker.has_capacity("u1", 1));
        assert!(tracker.has_capacity("u2", 1));

        tracker.decrement("u1");
        assert!(tracker.has_capacity("u1", 1));
    }

    #[test]
    fn decrement_never_goes_negative() {
        let tracker = ConcurrencyTracker::new();
        tracker.decrement("u1");
        assert_eq!(tracker.active_count("u1"), 0);
    }

    #[test]
    fn try_acquire_is_atomic_check_and_increment() {
        let tracker = ConcurrencyTracker::new();
        assert!(tracker.try_acquire("u1", 1));
        assert!(!tracker.try_acquire("u1", 1));
        tracker.decrement("u1");
        assert!(tracker.try_acquire("u1", 1));
    }
}
