//! Tests for stream configuration loading.

use std::io::Write;
use std::time::Duration;

use pretty_assertions::assert_eq;

use roci_stream::config::StreamConfig;
use roci_stream::error::RociError;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn defaults_match_the_documented_retry_policy() {
    let config = StreamConfig::default();
    let policy = config.retry_policy();
    assert_eq!(policy.max_retries, 2);
    assert_eq!(policy.initial_backoff, Duration::from_secs(2));
    assert_eq!(policy.multiplier, 2.0);
    assert_eq!(config.timeout(), None);
    assert_eq!(config.max_steps, None);
}

#[test]
fn file_values_override_defaults() {
    let file = write_config(
        r#"
max_retries = 0
timeout_ms = 30000
max_steps = 4
log_warn_threshold = 10
"#,
    );
    let config = StreamConfig::from_file(file.path()).unwrap();

    assert_eq!(config.max_retries, 0);
    assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
    assert_eq!(config.max_steps, Some(4));
    assert_eq!(config.log_warn_threshold, 10);
    assert_eq!(config.backoff_factor, 2.0);
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = StreamConfig::from_file(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, RociError::Io(_)));
}

#[test]
fn malformed_file_is_a_parse_error() {
    let file = write_config("max_retries = [1, 2]\n");
    let err = StreamConfig::from_file(file.path()).unwrap_err();
    assert!(matches!(err, RociError::ConfigParse(_)));
}

#[test]
fn overrides_layer_on_top_of_the_file() {
    let file = write_config("max_retries = 5\ninitial_retry_delay_ms = 10\n");
    let config = StreamConfig::from_file(file.path())
        .unwrap()
        .with_overrides(|key| (key == "MAX_RETRIES").then(|| "1".to_string()))
        .unwrap();

    assert_eq!(config.max_retries, 1);
    assert_eq!(config.initial_retry_delay_ms, 10);
}

#[test]
fn config_serializes_back_to_toml() {
    let config = StreamConfig {
        max_steps: Some(7),
        ..StreamConfig::default()
    };
    let text = toml::to_string(&config).unwrap();
    assert_eq!(StreamConfig::from_toml_str(&text).unwrap(), config);
}

#[test]
fn unusable_backoff_factors_are_rejected() {
    for raw in ["-1", "NaN", "inf", "0.5"] {
        let err = StreamConfig::default()
            .with_overrides(|key| (key == "BACKOFF_FACTOR").then(|| raw.to_string()))
            .unwrap_err();
        assert!(
            matches!(&err, RociError::Configuration(msg) if msg.contains("backoff_factor")),
            "{raw}: {err}"
        );
    }

    let file = write_config("backoff_factor = -2.0\n");
    assert!(matches!(
        StreamConfig::from_file(file.path()),
        Err(RociError::Configuration(_))
    ));
}
