//! Application lifecycle against unreachable endpoints.

use mdstream_app::{AppConfig, Application};
use std::time::Duration;

fn offline_config() -> AppConfig {
    AppConfig::from_toml_str(
        r#"
        rest_url = "http://127.0.0.1:9/api/v3"
        ws_url = "ws://127.0.0.1:9"

        [[streams]]
        symbol = "btcusdt"
        interval = "1m"

        [[depth]]
        symbol = "btcusdt"
        depth = 5

        [websocket]
        connect_timeout_ms = 200
        reconnect_base_delay_ms = 50
        reconnect_max_delay_ms = 200
        grace_period_ms = 50

        [cache]
        enabled = false

        [telemetry]
        summary_interval_ms = 50
    "#,
    )
    .unwrap()
}

#[tokio::test]
async fn test_run_until_shutdown_with_unreachable_endpoints() {
    let app = Application::new(offline_config()).unwrap();
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        app.run_until(tokio::time::sleep(Duration::from_millis(300))),
    )
    .await
    .expect("shutdown should complete");
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_run_with_file_cache_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = offline_config();
    config.cache.enabled = true;
    config.cache.dir = dir.path().join("cache");

    let app = Application::new(config).unwrap();
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        app.run_until(tokio::time::sleep(Duration::from_millis(100))),
    )
    .await
    .expect("shutdown should complete");
    assert!(result.is_ok());
}
