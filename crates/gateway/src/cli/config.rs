use bg_domain::config::Config;

/// Parses and validates the config, printing any issues. Returns `true` when
/// there are no issues at all (unlike `doctor`, this subcommand has no notion
/// of a non-fatal warning).
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();

    if issues.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    for issue in &issues {
        println!("  - {issue}");
    }
    println!("\n{} issue(s) in {config_path}", issues.len());
    false
}

/// Dumps the resolved config (all defaults filled in, secrets excluded since
/// they're `#[serde(skip)]`) as TOML.
pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(output) => print!("{output}"),
        Err(e) => {
            eprintln!("failed to serialize config: {e}");
            std::process::exit(1);
        }
    }
}
