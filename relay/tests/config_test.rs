/// Integration tests for configuration files
///
/// Exercises loading and saving through the filesystem, partial files
/// falling back to defaults, and environment-style overrides.

use std::path::PathBuf;

use voice_relay_lib::config::{
    ConfigError, ConfigManager, DEFAULT_BIND, ENV_API_KEY, ENV_BIND, RelayConfig,
};
use voice_relay_lib::relay::PartRouting;

fn scratch_path(name: &str) -> PathBuf {
    std::env::temp_dir()
        .join(format!("voice-relay-test-{}", std::process::id()))
        .join(name)
}

#[test]
fn test_missing_file_gives_defaults() {
    let config = ConfigManager::load(scratch_path("does-not-exist.json")).unwrap();

    assert_eq!(config, RelayConfig::default());
    assert_eq!(config.server.bind, DEFAULT_BIND);
    assert_eq!(config.relay.part_routing, PartRouting::FirstOnly);
}

#[test]
fn test_saved_config_loads_back() {
    let path = scratch_path("nested/saved.json");

    let mut config = RelayConfig::default();
    config.upstream.api_key = "key-123".to_string();
    config.upstream.system_instruction = Some("Be brief.".to_string());
    config.relay.part_routing = PartRouting::All;
    config.audio.frame_size = 2048;

    ConfigManager::save(&path, &config).unwrap();
    let loaded = ConfigManager::load(&path).unwrap();

    assert_eq!(loaded, config);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_partial_file_fills_in_defaults() {
    let path = scratch_path("partial.json");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(
        &path,
        r#"{ "server": { "bind": "0.0.0.0:9000" }, "relay": { "part_routing": "all" } }"#,
    )
    .unwrap();

    let config = ConfigManager::load(&path).unwrap();

    assert_eq!(config.server.bind, "0.0.0.0:9000");
    assert_eq!(config.relay.part_routing, PartRouting::All);
    assert_eq!(config.audio, RelayConfig::default().audio);
    assert_eq!(config.upstream, RelayConfig::default().upstream);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_malformed_file_is_an_error() {
    let path = scratch_path("broken.json");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "{ server: ").unwrap();

    let err = ConfigManager::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Json(_)));
    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_overrides_make_default_config_valid() {
    let mut config = RelayConfig::default();
    assert!(matches!(config.validate(), Err(ConfigError::MissingApiKey)));

    config.apply_overrides(|key| match key {
        k if k == ENV_API_KEY => Some("from-env".to_string()),
        k if k == ENV_BIND => Some("127.0.0.1:0".to_string()),
        _ => None,
    });

    assert_eq!(config.upstream.api_key, "from-env");
    config.validate().unwrap();
    assert_eq!(config.bind_addr().unwrap().port(), 0);
}
