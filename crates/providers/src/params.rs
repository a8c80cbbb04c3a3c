//! Provider-aware parameter resolution.
//!
//! A plain-data conflict table, not type-system tricks. Grounded in
//! `provider_params.py`'s `PROVIDER_REGISTRY` (tier1/tier2 ranges, conflicts,
//! model_overrides by glob). The four actions are exhaustive; `warn` never
//! modifies the wire call.

use bg_domain::error::Error;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustAction {
    Drop,
    Rename,
    Clamp,
    Warn,
}

/// One requested parameter before resolution.
#[derive(Debug, Clone)]
pub struct RequestedParam {
    pub name: String,
    pub value: serde_json::Value,
}

/// `{param, original, adjusted, action}` per redesign notes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adjustment {
    pub param: String,
    pub original: serde_json::Value,
    pub adjusted: Option<serde_json::Value>,
    pub action: AdjustAction,
    pub message: String,
}

/// A single tier1/tier2 numeric range rule for one provider.
#[derive(Debug, Clone)]
pub struct RangeRule {
    pub param: String,
    pub min: f64,
    pub max: f64,
}

/// A model-glob-keyed lock, e.g. `gpt-5*` locking `temperature` to `1.0`.
#[derive(Debug, Clone)]
pub struct ModelOverride {
    pub model_glob: String,
    pub param: String,
    pub locked_value: serde_json::Value,
}

/// A hard mutual exclusion: when `if_present` is also in the request,
/// `drop` is removed rather than sent. Anthropic's temperature+top_p pair
/// is the motivating case.
#[derive(Debug, Clone)]
pub struct ConflictRule {
    pub if_present: String,
    pub drop: String,
}

/// A model-glob-keyed rename, value preserved. OpenAI's O-series
/// `max_tokens` → `max_completion_tokens` is the motivating case.
#[derive(Debug, Clone)]
pub struct RenameRule {
    pub model_glob: String,
    pub from: String,
    pub to: String,
}

/// A provider's full rule set: numeric ranges, unsupported params,
/// model-specific locks/renames, and mutual exclusions.
#[derive(Debug, Clone, Default)]
pub struct ProviderRules {
    pub ranges: Vec<RangeRule>,
    pub unsupported: Vec<String>,
    pub overrides: Vec<ModelOverride>,
    pub conflicts: Vec<ConflictRule>,
    pub renames: Vec<RenameRule>,
    pub requires_max_tokens: bool,
}

impl ProviderRules {
    /// `provider_params.py`'s OpenAI entry: temperature [0,2], max_tokens
    /// required=False but range-checked, `gpt-5*`/`o1*|o3*|o4*` lock
    /// temperature to 1.0.
    pub fn openai() -> Self {
        Self {
            ranges: vec![
                RangeRule { param: "temperature".into(), min: 0.0, max: 2.0 },
                RangeRule { param: "max_tokens".into(), min: 1.0, max: 128_000.0 },
            ],
            unsupported: vec!["top_k".into()],
            overrides: vec![
                ModelOverride {
                    model_glob: "gpt-5*".into(),
                    param: "temperature".into(),
                    locked_value: serde_json::json!(1.0),
                },
                ModelOverride {
                    model_glob: "o1*".into(),
                    param: "temperature".into(),
                    locked_value: serde_json::json!(1.0),
                },
                ModelOverride {
                    model_glob: "o3*".into(),
                    param: "temperature".into(),
                    locked_value: serde_json::json!(1.0),
                },
                ModelOverride {
                    model_glob: "o4*".into(),
                    param: "temperature".into(),
                    locked_value: serde_json::json!(1.0),
                },
            ],
            conflicts: vec![],
            renames: vec![
                RenameRule { model_glob: "o1*".into(), from: "max_tokens".into(), to: "max_completion_tokens".into() },
                RenameRule { model_glob: "o3*".into(), from: "max_tokens".into(), to: "max_completion_tokens".into() },
                RenameRule { model_glob: "o4*".into(), from: "max_tokens".into(), to: "max_completion_tokens".into() },
            ],
            requires_max_tokens: false,
        }
    }

    /// Anthropic: temperature [0,1], max_tokens REQUIRED, drop top_p when
    /// temperature is also set (hard mutual exclusion).
    pub fn anthropic() -> Self {
        Self {
            ranges: vec![
                RangeRule { param: "temperature".into(), min: 0.0, max: 1.0 },
                RangeRule { param: "max_tokens".into(), min: 1.0, max: 128_000.0 },
            ],
            unsupported: vec!["frequency_penalty".into(), "presence_penalty".into(), "seed".into()],
            overrides: vec![],
            conflicts: vec![ConflictRule { if_present: "temperature".into(), drop: "top_p".into() }],
            renames: vec![],
            requires_max_tokens: true,
        }
    }

    /// Gemini: temperature [0,2], no unsupported params or model overrides
    /// in the default catalog.
    pub fn gemini() -> Self {
        Self {
            ranges: vec![
                RangeRule { param: "temperature".into(), min: 0.0, max: 2.0 },
                RangeRule { param: "max_tokens".into(), min: 1.0, max: 65_536.0 },
            ],
            unsupported: vec![],
            overrides: vec![],
            conflicts: vec![],
            renames: vec![],
            requires_max_tokens: false,
        }
    }

    pub fn for_kind(kind: &str) -> Self {
        match kind {
            "anthropic" => Self::anthropic(),
            "google" | "gemini" => Self::gemini(),
            _ => Self::openai(),
        }
    }

    fn override_for(&self, model_id: &str, param: &str) -> Option<&ModelOverride> {
        self.overrides
            .iter()
            .find(|o| o.param == param && glob_match(&o.model_glob, model_id))
    }

    fn range_for(&self, param: &str) -> Option<&RangeRule> {
        self.ranges.iter().find(|r| r.param == param)
    }
}

/// Minimal `fnmatch`-style glob: only a trailing `*` wildcard, matching
/// `provider_params.py`'s `model_overrides` key shape (`"gpt-5*"`).
fn glob_match(pattern: &str, value: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => value.starts_with(prefix),
        None => pattern == value,
    }
}

/// Resolve a raw param list into a wire-ready set plus an adjustment log.
/// Order of precedence per param: hard conflict drop > model-specific
/// rename > model override lock > unsupported-drop > range clamp > pass
/// through unchanged.
pub fn resolve(
    rules: &ProviderRules,
    model_id: &str,
    requested: &[RequestedParam],
) -> (Vec<RequestedParam>, Vec<Adjustment>) {
    let mut resolved = Vec::with_capacity(requested.len());
    let mut adjustments = Vec::new();
    let present: std::collections::HashSet<&str> = requested.iter().map(|p| p.name.as_str()).collect();

    for p in requested {
        if let Some(conflict) = rules.conflicts.iter().find(|c| c.drop == p.name && present.contains(c.if_present.as_str())) {
            adjustments.push(Adjustment {
                param: p.name.clone(),
                original: p.value.clone(),
                adjusted: None,
                action: AdjustAction::Drop,
                message: format!("{} conflicts with {} and is dropped", p.name, conflict.if_present),
            });
            continue;
        }

        if let Some(rename) = rules.renames.iter().find(|r| r.from == p.name && glob_match(&r.model_glob, model_id)) {
            adjustments.push(Adjustment {
                param: p.name.clone(),
                original: p.value.clone(),
                adjusted: Some(p.value.clone()),
                action: AdjustAction::Rename,
                message: format!("{} renamed to {} for this model", p.name, rename.to),
            });
            resolved.push(RequestedParam { name: rename.to.clone(), value: p.value.clone() });
            continue;
        }

        if let Some(ov) = rules.override_for(model_id, &p.name) {
            if p.value != ov.locked_value {
                adjustments.push(Adjustment {
                    param: p.name.clone(),
                    original: p.value.clone(),
                    adjusted: Some(ov.locked_value.clone()),
                    action: AdjustAction::Clamp,
                    message: format!("{} is locked to {} for this model", p.name, ov.locked_value),
                });
            }
            resolved.push(RequestedParam {
                name: p.name.clone(),
                value: ov.locked_value.clone(),
            });
            continue;
        }

        if rules.unsupported.contains(&p.name) {
            adjustments.push(Adjustment {
                param: p.name.clone(),
                original: p.value.clone(),
                adjusted: None,
                action: AdjustAction::Drop,
                message: format!("{} is not supported by this provider", p.name),
            });
            continue;
        }

        if let Some(range) = rules.range_for(&p.name) {
            if let Some(n) = p.value.as_f64() {
                if n < range.min || n > range.max {
                    let clamped = n.clamp(range.min, range.max);
                    let clamped_value = if p.value.is_i64() {
                        serde_json::json!(clamped as i64)
                    } else {
                        serde_json::json!(clamped)
                    };
                    adjustments.push(Adjustment {
                        param: p.name.clone(),
                        original: p.value.clone(),
                        adjusted: Some(clamped_value.clone()),
                        action: AdjustAction::Clamp,
                        message: format!(
                            "{} clamped to [{}, {}]",
                            p.name, range.min, range.max
                        ),
                    });
                    resolved.push(RequestedParam {
                        name: p.name.clone(),
                        value: clamped_value,
                    });
                    continue;
                }
            }
        }

        resolved.push(p.clone());
    }

    (resolved, adjustments)
}

/// Anthropic requires `max_tokens` on every call; callers must check this
/// before dispatching, surfacing a validation error rather than a 502 from
/// upstream.
pub fn ensure_required(rules: &ProviderRules, requested: &[RequestedParam]) -> bg_domain::error::Result<()> {
    if rules.requires_max_tokens && !requested.iter().any(|p| p.name == "max_tokens") {
        return Err(Error::Validation(
            "max_tokens is required for this provider".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(name: &str, value: serde_json::Value) -> RequestedParam {
        RequestedParam { name: name.into(), value }
    }

    #[test]
    fn clamps_out_of_range_temperature() {
        let rules = ProviderRules::openai();
        let (resolved, adj) = resolve(&rules, "gpt-4o", &[param("temperature", serde_json::json!(3.5))]);
        assert_eq!(resolved[0].value, serde_json::json!(2.0));
        assert_eq!(adj.len(), 1);
        assert_eq!(adj[0].action, AdjustAction::Clamp);
    }

    #[test]
    fn drops_unsupported_param() {
        let rules = ProviderRules::openai();
        let (resolved, adj) = resolve(&rules, "gpt-4o", &[param("top_k", serde_json::json!(40))]);
        assert!(resolved.is_empty());
        assert_eq!(adj[0].action, AdjustAction::Drop);
    }

    #[test]
    fn model_override_locks_temperature_for_gpt5() {
        let rules = ProviderRules::openai();
        let (resolved, adj) = resolve(&rules, "gpt-5-preview", &[param("temperature", serde_json::json!(0.2))]);
        assert_eq!(resolved[0].value, serde_json::json!(1.0));
        assert_eq!(adj[0].action, AdjustAction::Clamp);
    }

    #[test]
    fn model_override_is_noop_when_already_correct() {
        let rules = ProviderRules::openai();
        let (resolved, adj) = resolve(&rules, "gpt-5-preview", &[param("temperature", serde_json::json!(1.0))]);
        assert_eq!(resolved[0].value, serde_json::json!(1.0));
        assert!(adj.is_empty());
    }

    #[test]
    fn in_range_param_passes_through_unchanged() {
        let rules = ProviderRules::openai();
        let (resolved, adj) = resolve(&rules, "gpt-4o", &[param("temperature", serde_json::json!(0.7))]);
        assert_eq!(resolved[0].value, serde_json::json!(0.7));
        assert!(adj.is_empty());
    }

    #[test]
    fn anthropic_requires_max_tokens() {
        let rules = ProviderRules::anthropic();
        let err = ensure_required(&rules, &[param("temperature", serde_json::json!(0.5))]).unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(ensure_required(&rules, &[param("max_tokens", serde_json::json!(1024))]).is_ok());
    }

    #[test]
    fn anthropic_drops_top_p_when_temperature_present() {
        let rules = ProviderRules::anthropic();
        let (resolved, adj) = resolve(
            &rules,
            "claude-3-opus",
            &[param("temperature", serde_json::json!(0.5)), param("top_p", serde_json::json!(0.9))],
        );
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name, "temperature");
        assert_eq!(adj.len(), 1);
        assert_eq!(adj[0].param, "top_p");
        assert_eq!(adj[0].action, AdjustAction::Drop);
    }

    #[test]
    fn anthropic_keeps_top_p_without_temperature() {
        let rules = ProviderRules::anthropic();
        let (resolved, adj) = resolve(&rules, "claude-3-opus", &[param("top_p", serde_json::json!(0.9))]);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name, "top_p");
        assert!(adj.is_empty());
    }

    #[test]
    fn openai_o_series_renames_max_tokens() {
        let rules = ProviderRules::openai();
        let (resolved, adj) = resolve(&rules, "o1-preview", &[param("max_tokens", serde_json::json!(500))]);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name, "max_completion_tokens");
        assert_eq!(resolved[0].value, serde_json::json!(500));
        assert_eq!(adj[0].action, AdjustAction::Rename);
        assert_eq!(adj[0].param, "max_tokens");
    }

    #[test]
    fn non_o_series_keeps_max_tokens_name() {
        let rules = ProviderRules::openai();
        let (resolved, adj) = resolve(&rules, "gpt-4o", &[param("max_tokens", serde_json::json!(500))]);
        assert_eq!(resolved[0].name, "max_tokens");
        assert!(adj.is_empty());
    }

    #[test]
    fn glob_match_handles_trailing_star_and_exact() {
        assert!(glob_match("gpt-5*", "gpt-5-preview"));
        assert!(!glob_match("gpt-5*", "gpt-4o"));
        assert!(glob_match("gpt-4o", "gpt-4o"));
    }
}
