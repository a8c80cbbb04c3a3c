use bg_domain::config::Config;

#[test]
fn default_bind_addr_is_all_interfaces_on_8080() {
    let config = Config::default();
    assert_eq!(config.server.bind_addr, "0.0.0.0:8080");
}

#[test]
fn explicit_bind_addr_parses() {
    let toml_str = r#"
[server]
bind_addr = "127.0.0.1:3210"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.bind_addr, "127.0.0.1:3210");
}
