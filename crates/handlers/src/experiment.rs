//! Experiment Coordinator wiring: every handler that can contribute a
//! baseline or a best score calls through here rather than mutating an
//! `Experiment` row directly. The actual scoring rules live in
//! `bg_domain::experiment` — this module only loads, calls, and persists.

use bg_domain::error::Result;
use bg_domain::experiment::{Experiment, TimelineSource};
use bg_store::Db;

/// Loads the experiment named by a job's `experiment_id`, if any. A missing
/// `experiment_id` means the run isn't tracked by any experiment, which is
/// not an error — most eval/tune/judge jobs are one-off.
pub fn load(db: &Db, experiment_id: Option<&str>) -> Result<Option<Experiment>> {
    match experiment_id {
        Some(id) => db.get_experiment(id),
        None => Ok(None),
    }
}

/// Pins a baseline if the experiment doesn't have one yet. No-op once a
/// baseline exists — only the first eligible run becomes the baseline.
pub fn maybe_pin_baseline(db: &Db, exp: &mut Experiment, eval_run_id: &str, suite_id: &str, score: f64) -> Result<bool> {
    if exp.baseline_run_id.is_some() {
        return Ok(false);
    }
    exp.pin_baseline(eval_run_id, suite_id, score)?;
    db.update_baseline(exp)?;
    Ok(true)
}

/// Updates the running best if `score` beats it, persisting the change.
/// Returns whether a promotion occurred.
pub fn maybe_promote(
    db: &Db,
    exp: &mut Experiment,
    score: f64,
    config_json: serde_json::Value,
    source: TimelineSource,
    source_id: &str,
) -> Result<bool> {
    let promoted = exp.maybe_update_best(score, config_json, source, source_id.to_string());
    if promoted {
        db.update_best(exp)?;
    }
    Ok(promoted)
}
