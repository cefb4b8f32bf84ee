//! Integration tests for baseline counting and suffix capture.

use std::sync::Arc;

use agent_relay::session::differ::ScreenBufferDiffer;
use agent_relay::session::SessionHandle;
use agent_relay::AppError;

use super::test_helpers::{as_mux, FakeMultiplexer};

fn handle(name: &str) -> SessionHandle {
    SessionHandle {
        name: name.to_owned(),
        tty: None,
    }
}

fn numbered(count: usize) -> Vec<String> {
    (1..=count).map(|n| format!("row {n}")).collect()
}

#[tokio::test]
async fn returns_exactly_the_appended_lines() {
    let rows = numbered(42);
    let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
    let fake = Arc::new(FakeMultiplexer::new().with_session("agent", None).with_buffer(&refs));
    let differ = ScreenBufferDiffer::new(as_mux(&fake), 10_000);
    let session = handle("agent");

    let baseline = differ.line_count(&session).await.expect("count");
    assert_eq!(baseline, 42);

    let appended = ["43", "44", "45", "46", "47", "48", "49", "50"];
    fake.push_lines(&appended);

    let captured = differ.capture_since(&session, baseline).await.expect("capture");
    assert_eq!(captured, appended.map(str::to_owned).to_vec());
}

#[tokio::test]
async fn padding_rows_do_not_count() {
    let fake = Arc::new(
        FakeMultiplexer::new()
            .with_session("agent", None)
            .with_buffer(&["$ ls", "Cargo.toml", ""]),
    );
    let differ = ScreenBufferDiffer::new(as_mux(&fake), 100);

    assert_eq!(differ.line_count(&handle("agent")).await.expect("count"), 2);
}

#[tokio::test]
async fn unchanged_buffer_yields_no_lines() {
    let fake = Arc::new(FakeMultiplexer::new().with_session("agent", None).with_buffer(&["a", "b"]));
    let differ = ScreenBufferDiffer::new(as_mux(&fake), 100);
    let session = handle("agent");

    let baseline = differ.line_count(&session).await.expect("count");
    let captured = differ.capture_since(&session, baseline).await.expect("capture");
    assert!(captured.is_empty());
}

#[tokio::test]
async fn shrunken_buffer_yields_no_lines() {
    let fake = Arc::new(FakeMultiplexer::new().with_session("agent", None).with_buffer(&["a", "b", "c"]));
    let differ = ScreenBufferDiffer::new(as_mux(&fake), 100);

    let captured = differ
        .capture_since(&handle("agent"), 10)
        .await
        .expect("capture");
    assert!(captured.is_empty());
}

#[tokio::test]
async fn empty_dump_is_capture_incomplete() {
    let fake = Arc::new(FakeMultiplexer::new().with_session("agent", None));
    let differ = ScreenBufferDiffer::new(as_mux(&fake), 100);

    let err = differ
        .capture_since(&handle("agent"), 0)
        .await
        .expect_err("empty buffer");
    assert!(matches!(err, AppError::CaptureIncomplete(_)));
}

#[tokio::test]
async fn missing_session_is_capture_incomplete() {
    let fake = Arc::new(FakeMultiplexer::new());
    let differ = ScreenBufferDiffer::new(as_mux(&fake), 100);

    let err = differ
        .line_count(&handle("ghost"))
        .await
        .expect_err("no session");
    assert!(matches!(err, AppError::CaptureIncomplete(_)));
}

#[tokio::test]
async fn horizon_is_reached_at_scrollback_depth() {
    let fake = Arc::new(FakeMultiplexer::new().with_session("agent", None));
    let differ = ScreenBufferDiffer::new(as_mux(&fake), 5);

    assert_eq!(differ.scrollback(), 5);
    assert!(!differ.at_horizon(4));
    assert!(differ.at_horizon(5));
    assert!(differ.at_horizon(6));
}

#[tokio::test]
async fn cleared_history_restarts_the_count() {
    let fake = Arc::new(FakeMultiplexer::new().with_session("agent", None).with_buffer(&["a", "b", "c"]));
    let mux = as_mux(&fake);
    let differ = ScreenBufferDiffer::new(Arc::clone(&mux), 100);
    let session = handle("agent");

    mux.clear_history("agent").await.expect("clear");
    assert_eq!(differ.line_count(&session).await.expect("count"), 0);

    fake.push_lines(&["fresh"]);
    let captured = differ.capture_since(&session, 0).await.expect("capture");
    assert_eq!(captured, vec!["fresh".to_owned()]);
}
