//! Shared control-flow helpers every handler builds its loop from:
//! cooperative cancellation, provider-grouped scheduling, and truncated
//! error formatting for the registry's `HandlerResult`. A provider-scoped
//! unit of work, cancellable at every suspension point, with independent
//! units run concurrently.

use std::collections::BTreeMap;
use std::future::Future;

use bg_registry::CancelEvent;

pub const MAX_ERROR_CHARS: usize = 2000;

pub fn truncate_error(err: impl std::fmt::Display) -> String {
    err.to_string().chars().take(MAX_ERROR_CHARS).collect()
}

/// Groups items by a provider key so that calls against the same provider
/// credential run sequentially (most provider accounts are rate-limited per
/// key) while distinct providers proceed in parallel.
pub fn group_by_provider<T>(items: Vec<T>, key: impl Fn(&T) -> &str) -> BTreeMap<String, Vec<T>> {
    let mut groups: BTreeMap<String, Vec<T>> = BTreeMap::new();
    for item in items {
        groups.entry(key(&item).to_string()).or_default().push(item);
    }
    groups
}

/// Runs a collection of futures, one per provider group, concurrently. Each
/// group itself is expected to process its own items sequentially (a `for`
/// loop with an `.await` per call) since it shares one provider credential.
pub async fn join_provider_groups<Fut>(futures: Vec<Fut>) -> Vec<Fut::Output>
where
    Fut: Future,
{
    futures_util::future::join_all(futures).await
}

/// `Err` once `cancel` has fired; handlers call this at every suspension
/// point between sub-tasks and bail out promptly rather than waiting for
/// the registry to abort them.
pub fn check_cancelled(cancel: &CancelEvent) -> Result<(), String> {
    if cancel.is_set() {
        Err("cancelled".to_string())
    } else {
        Ok(())
    }
}
