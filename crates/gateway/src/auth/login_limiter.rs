//! Per-IP login throttle: 5 failed attempts inside a 5-minute window locks
//! the IP out for 15 minutes. In-memory only, matching every other
//! per-process rate structure in this workspace (`bg_registry::rate`) —
//! a restart clears it, which is an acceptable cold-start cost for an
//! abuse guard.

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

const MAX_ATTEMPTS: usize = 5;
const WINDOW: Duration = Duration::minutes(5);
const LOCKOUT: Duration = Duration::minutes(15);

#[derive(Default)]
struct Window {
    failures: Vec<DateTime<Utc>>,
    locked_until: Option<DateTime<Utc>>,
}

pub struct LoginLimiter {
    windows: Mutex<HashMap<IpAddr, Window>>,
}

impl Default for LoginLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl LoginLimiter {
    pub fn new() -> Self {
        Self { windows: Mutex::new(HashMap::new()) }
    }

    /// `Err(locked_until)` if this IP is currently locked out.
    pub fn check(&self, ip: IpAddr) -> Result<(), DateTime<Utc>> {
        let windows = self.windows.lock();
        if let Some(w) = windows.get(&ip) {
            if let Some(until) = w.locked_until {
                if until > Utc::now() {
                    return Err(until);
                }
            }
        }
        Ok(())
    }

    /// Records a failed attempt; locks the IP out once `MAX_ATTEMPTS` land
    /// inside the trailing `WINDOW`.
    pub fn record_failure(&self, ip: IpAddr) {
        let now = Utc::now();
        let mut windows = self.windows.lock();
        let w = windows.entry(ip).or_default();
        w.failures.retain(|t| now - *t <= WINDOW);
        w.failures.push(now);
        if w.failures.len() >= MAX_ATTEMPTS {
            w.locked_until = Some(now + LOCKOUT);
            w.failures.clear();
        }
    }

    pub fn record_success(&self, ip: IpAddr) {
        self.windows.lock().remove(&ip);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[test]
    fn locks_out_after_five_failures() {
        let limiter = LoginLimiter::new();
        for _ in 0..4 {
            limiter.record_failure(ip());
            assert!(limiter.check(ip()).is_ok());
        }
        limiter.record_failure(ip());
        assert!(limiter.check(ip()).is_err());
    }

    #[test]
    fn success_clears_the_window() {
        let limiter = LoginLimiter::new();
        for _ in 0..3 {
            limiter.record_failure(ip());
        }
        limiter.record_success(ip());
        for _ in 0..3 {
            limiter.record_failure(ip());
        }
        assert!(limiter.check(ip()).is_ok());
    }
}
