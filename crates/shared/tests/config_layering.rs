//! 配置分层加载集成测试
//!
//! 验证 default.toml -> {env}.toml -> {service}.toml 的覆盖顺序。
//! 环境变量覆盖在单独的进程级别测试中难以隔离，这里只覆盖文件层。

use std::fs;

use rules_shared::config::AppConfig;

// ==================== 文件分层 ====================

#[test]
fn test_layered_files_override_in_order() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("default.toml"),
        r#"
[engine]
watch_debounce_ms = 500
history_limit = 100
fact_channel_capacity = 64

[observability]
log_level = "debug"
"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("rules-engine.toml"),
        r#"
[engine]
catalog_path = "rulesets/catalog.json"
history_limit = 10
"#,
    )
    .unwrap();

    let config = AppConfig::load_from("rules-engine", dir.path()).unwrap();

    assert_eq!(config.service_name, "rules-engine");
    assert_eq!(config.engine.watch_debounce_ms, 500);
    assert_eq!(config.engine.history_limit, Some(10));
    assert_eq!(config.engine.fact_channel_capacity, 64);
    assert_eq!(
        config.engine.catalog_path.as_deref(),
        Some(std::path::Path::new("rulesets/catalog.json"))
    );
    assert_eq!(config.observability.log_level, "debug");
    // 未配置的字段保持默认值
    assert!(config.engine.watch_files);
    assert!(!config.engine.parallel_evaluation);
}

#[test]
fn test_missing_directory_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig::load_from("rules-engine", dir.path().join("absent")).unwrap();

    assert_eq!(config.engine.watch_debounce_ms, 200);
    assert!(config.engine.history_limit.is_none());
    assert_eq!(config.observability.metrics_port, 9090);
}

#[test]
fn test_malformed_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("default.toml"), "[engine\nbroken").unwrap();

    assert!(AppConfig::load_from("rules-engine", dir.path()).is_err());
}
