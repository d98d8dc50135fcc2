//! Tests for logging configuration and span macros

use syncmqtt::observability::logging::{build_filter, parse_level, LogFormat};
use syncmqtt::observability::{init_logging, operation_span};
use tracing::Level;

#[test]
fn test_log_format_parse_whitespace_and_case() {
    assert_eq!(LogFormat::parse("  json  "), LogFormat::Json);
    assert_eq!(LogFormat::parse("Pretty\n"), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("\tCOMPACT"), LogFormat::Compact);
}

#[test]
fn test_log_format_invalid_defaults_to_json() {
    for input in ["yaml", "123", ""] {
        assert_eq!(LogFormat::parse(input), LogFormat::Json, "input: {input}");
    }
}

#[test]
fn test_log_level_defaults_to_info() {
    assert_eq!(parse_level("verbose"), Level::INFO);
    assert_eq!(parse_level(" debug "), Level::DEBUG);
}

#[test]
fn test_filter_level_and_quiet_targets() {
    let filter = build_filter(Level::TRACE, None).to_string();
    assert!(filter.contains("trace"), "{filter}");
    assert!(filter.contains("rumqttc=warn"), "{filter}");
}

#[test]
fn test_repeated_init_is_harmless() {
    init_logging(Level::INFO, LogFormat::Compact, false);
    init_logging(Level::DEBUG, LogFormat::Json, true);

    let span = operation_span!(operation = "publish", topic = "time");
    let _entered = span.enter();
    tracing::info!("logging after repeated init");
}
