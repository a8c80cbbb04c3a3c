//! One-shot cooperative cancellation signals for running jobs.
//!
//! A `CancelEvent` never kills in-flight work — it is a cheap flag handlers
//! poll at documented suspension points (between provider calls, inside
//! inner loops, before each LLM request) and return promptly once set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Clone)]
pub struct CancelEvent {
    fired: Arc<AtomicBool>,
}

impl CancelEvent {
    pub fn new() -> Self {
        Self { fired: Arc::new(AtomicBool::new(false)) }
    }

    pub fn set(&self) {
        self.fired.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

impl Default for CancelEvent {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks the cancel event for every in-flight job, keyed by `job_id`.
pub struct CancelMap {
    events: Mutex<HashMap<String, CancelEvent>>,
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelMap {
    pub fn new() -> Self {
        Self { events: Mutex::new(HashMap::new()) }
    }

    pub fn install(&self, job_id: &str) -> CancelEvent {
        let event = CancelEvent::new();
        self.events.lock().insert(job_id.to_owned(), event.clone());
        event
    }

    /// Sets the event for `job_id` if one is installed. Returns `true` if a
    /// live handler was found to signal (as opposed to a ghost job whose
    /// in-memory state was already lost).
    pub fn signal(&self, job_id: &str) -> bool {
        if let Some(event) = self.events.lock().get(job_id) {
            event.set();
            true
        } else {
            false
        }
    }

    pub fn remove(&self, job_id: &str) {
        self.events.lock().remove(job_id);
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.events.lock().contains_key(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_event_lifecycle() {
        let event = CancelEvent::new();
        assert!(!event.is_set());
        event.set();
        assert!(event.is_set());
    }

    #[test]
    fn cancel_map_install_and_signal() {
        let map = CancelMap::new();
        let event = map.install("job-1");
        assert!(!event.is_set());
        assert!(map.contains("job-1"));

        assert!(map.signal("job-1"));
        assert!(event.is_set());

        map.remove("job-1");
        assert!(!map.contains("job-1"));
    }

    #[test]
    fn signal_on_ghost_job_returns_false() {
        let map = CancelMap::new();
        assert!(!map.signal("does-not-exist"));
    }

    #[test]
    fn remove_is_idempotent() {
        let map = CancelMap::new();
        map.install("job-1");
        map.remove("job-1");
        map.remove("job-1");
        assert!(!map.contains("job-1"));
    }
}
