use std::{env, fs};

use tiercache::config::loader::load_config;
use tiercache::{LocalBackend, SentinelConfig, SerializerKind};

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    // Create a temporary TOML configuration file
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("tiercache.toml");

    let toml_content = r#"
[redis]
enabled = true
url = "redis://cache.internal:6380/2"
pool_size = 4
timeout_ms = 250
key_ttl_secs = 3600

[cache]
serializer = "json"
local = "moka"
default_region = "default"

[cache.regions.default]
max_entries = 500
ttl_secs = 60

[cache.regions.orders]
max_entries = 50
tti_secs = 30

[logging]
level = "debug"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert!(cfg.redis.enabled);
    assert_eq!(cfg.redis.url, "redis://cache.internal:6380/2");
    assert_eq!(cfg.redis.pool_size, 4);
    assert_eq!(cfg.redis.key_ttl_secs, Some(3600));
    assert_eq!(cfg.cache.serializer, SerializerKind::Json);
    assert_eq!(cfg.cache.local, LocalBackend::Moka);
    assert_eq!(cfg.cache.policy_for("orders").max_entries, 50);
    assert_eq!(cfg.cache.policy_for("orders").tti_secs, Some(30));
    assert_eq!(cfg.cache.policy_for("users").max_entries, 500);
    assert_eq!(cfg.logging.level.to_ascii_lowercase(), "debug");

    // 2) Env override should win over file
    unsafe {
        env::set_var("TIERCACHE__REDIS__POOL_SIZE", "9");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.redis.pool_size, 9);
    // cleanup env var
    unsafe {
        env::remove_var("TIERCACHE__REDIS__POOL_SIZE");
    }

    // 3) Invalid config (zero capacity) should error
    let invalid_path = dir.path().join("invalid.toml");
    let invalid_toml = r#"
[cache.regions.orders]
max_entries = 0
"#;
    fs::write(&invalid_path, invalid_toml).expect("write invalid toml");
    let err = load_config(invalid_path.to_str()).expect_err("expected validation error");
    assert!(err.to_string().contains("max_entries must be > 0"));
}

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("absent.toml");

    let cfg = load_config(path.to_str()).expect("defaults are valid");
    assert!(!cfg.redis.enabled);
    assert_eq!(cfg.cache.serializer, SerializerKind::Msgpack);
    assert_eq!(cfg.cache.default_region, "default");
}

#[test]
fn unknown_local_backend_is_rejected() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("bad_backend.toml");
    fs::write(&path, "[cache]\nlocal = \"ehcache\"\n").expect("write toml");

    assert!(load_config(path.to_str()).is_err());
}

#[test]
fn sentinel_section_is_parsed() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("sentinel.toml");
    let toml_content = r#"
[redis]
enabled = true
url = ""

[redis.sentinel]
master = "cache-master"
nodes = ["10.0.0.1:26379", "10.0.0.2:26379"]
password = "secret"
db = 3
"#;
    fs::write(&path, toml_content).expect("write toml");

    let cfg = load_config(path.to_str()).expect("should parse sentinel config");
    assert_eq!(
        cfg.redis.sentinel,
        Some(SentinelConfig {
            master: "cache-master".to_string(),
            nodes: vec!["10.0.0.1:26379".to_string(), "10.0.0.2:26379".to_string()],
            password: Some("secret".to_string()),
            db: 3,
        })
    );

    // A sentinel section without sentinels is rejected
    let invalid_path = dir.path().join("sentinel_invalid.toml");
    fs::write(
        &invalid_path,
        "[redis]\nenabled = true\n\n[redis.sentinel]\nmaster = \"cache-master\"\n",
    )
    .expect("write toml");
    let err = load_config(invalid_path.to_str()).expect_err("expected validation error");
    assert!(err.to_string().contains("redis.sentinel.nodes"));
}
