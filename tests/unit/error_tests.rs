//! Unit tests for `AppError` display format and run classification.

use agent_relay::AppError;

#[test]
fn display_uses_kind_prefix() {
    let cases = [
        (AppError::Config("x".into()), "config: x"),
        (AppError::SessionNotFound("x".into()), "session not found: x"),
        (AppError::SessionCommand("x".into()), "session command failed: x"),
        (AppError::CaptureIncomplete("x".into()), "capture incomplete: x"),
        (AppError::RpcTimeout("x".into()), "rpc timeout: x"),
        (AppError::RpcProtocol("x".into()), "rpc protocol: x"),
        (AppError::Tool("x".into()), "tool: x"),
        (AppError::InvalidCommand("x".into()), "invalid command: x"),
        (AppError::Agent("x".into()), "agent: x"),
        (AppError::Io("x".into()), "io: x"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn messages_have_no_trailing_period() {
    let err = AppError::RpcTimeout("tools produced no complete response within 5s".into());
    let s = err.to_string();
    assert!(!s.ends_with('.'), "error message must not end with a period: {s}");
}

#[test]
fn only_session_failures_abort_a_run() {
    assert!(AppError::SessionNotFound("gone".into()).is_fatal_for_run());
    assert!(AppError::SessionCommand("send-keys".into()).is_fatal_for_run());
    assert!(!AppError::CaptureIncomplete("empty".into()).is_fatal_for_run());
    assert!(!AppError::RpcTimeout("slow".into()).is_fatal_for_run());
    assert!(!AppError::Io("disk".into()).is_fatal_for_run());
}

#[test]
fn toml_errors_become_config_errors() {
    let parse: Result<toml::Value, _> = toml::from_str("not = = toml");
    let err: AppError = parse.expect_err("invalid toml").into();
    assert!(err.to_string().starts_with("config: invalid config"));
}

#[test]
fn json_errors_become_protocol_errors() {
    let parse: Result<serde_json::Value, _> = serde_json::from_str("{oops");
    let err: AppError = parse.expect_err("invalid json").into();
    assert!(matches!(err, AppError::RpcProtocol(msg) if msg.starts_with("json:")));
}

#[test]
fn io_errors_become_io_errors() {
    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
    let err: AppError = io.into();
    assert_eq!(err.to_string(), "io: denied");
}
