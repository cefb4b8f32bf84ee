//! Integration tests for sequential command dispatch.

use std::sync::Arc;
use std::time::Duration;

use agent_relay::dispatch::{Command, CommandDispatcher, Completeness, DispatchTarget};
use agent_relay::session::locator::SettleDelays;
use agent_relay::AppError;

use super::test_helpers::{as_mux, quick_fixed, quick_quiescence, FakeMultiplexer};

fn existing(name: &str) -> DispatchTarget {
    DispatchTarget::Existing {
        name: name.to_owned(),
        tty: None,
    }
}

fn commands(texts: &[&str]) -> Vec<Command> {
    texts
        .iter()
        .map(|t| Command::new(*t).expect("valid command"))
        .collect()
}

fn echo_agent() -> FakeMultiplexer {
    FakeMultiplexer::new()
        .with_session("agent", Some("/dev/pts/3"))
        .with_buffer(&["welcome", "ready"])
        .respond_with(|cmd| vec![format!("ack: {cmd}"), "done".to_owned()])
}

#[tokio::test]
async fn each_response_holds_only_its_own_output() {
    let fake = Arc::new(echo_agent());
    let dispatcher = CommandDispatcher::new(as_mux(&fake), 10_000, quick_fixed());

    let responses = dispatcher
        .run(&existing("agent"), &commands(&["status", "build"]))
        .await
        .expect("run");

    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].baseline, 2);
    assert_eq!(responses[0].lines, vec!["> status", "ack: status", "done"]);
    assert_eq!(responses[1].baseline, 5);
    assert_eq!(responses[1].lines, vec!["> build", "ack: build", "done"]);
    assert_eq!(responses[0].command.text(), "status");
    assert_eq!(fake.submitted(), vec!["status".to_owned(), "build".to_owned()]);
}

#[tokio::test]
async fn fixed_wait_marks_responses_unverified() {
    let fake = Arc::new(echo_agent());
    let dispatcher = CommandDispatcher::new(as_mux(&fake), 10_000, quick_fixed());

    let responses = dispatcher
        .run(&existing("agent"), &commands(&["status"]))
        .await
        .expect("run");
    assert_eq!(responses[0].completeness, Completeness::Unverified);
    assert_eq!(responses[0].text(), "> status\nack: status\ndone");
}

#[tokio::test]
async fn missing_session_aborts_before_sending() {
    let fake = Arc::new(echo_agent());
    let dispatcher = CommandDispatcher::new(as_mux(&fake), 10_000, quick_fixed());

    let err = dispatcher
        .run(&existing("nope"), &commands(&["status"]))
        .await
        .expect_err("no session");
    assert!(matches!(err, AppError::SessionNotFound(_)));
    assert!(fake.submitted().is_empty());
}

#[tokio::test]
async fn send_failure_fails_fast() {
    let fake = Arc::new(echo_agent());
    fake.fail_sends();
    let dispatcher = CommandDispatcher::new(as_mux(&fake), 10_000, quick_fixed());

    let err = dispatcher
        .run(&existing("agent"), &commands(&["one", "two"]))
        .await
        .expect_err("send fails");
    assert!(matches!(err, AppError::SessionCommand(_)));
}

#[tokio::test]
async fn baseline_failure_aborts_the_run() {
    let fake = Arc::new(echo_agent());
    fake.fail_captures_from(0);
    let dispatcher = CommandDispatcher::new(as_mux(&fake), 10_000, quick_fixed());

    let err = dispatcher
        .run(&existing("agent"), &commands(&["status"]))
        .await
        .expect_err("baseline fails");
    assert!(matches!(err, AppError::CaptureIncomplete(_)));
    assert!(fake.submitted().is_empty());
}

#[tokio::test]
async fn post_send_capture_failure_is_recorded_on_the_response() {
    let fake = Arc::new(echo_agent());
    // Capture 0 is the baseline; capture 1 is the post-send dump.
    fake.fail_captures_from(1);
    let dispatcher = CommandDispatcher::new(as_mux(&fake), 10_000, quick_fixed());

    let responses = dispatcher
        .run(&existing("agent"), &commands(&["status"]))
        .await
        .expect("run continues");
    assert!(responses[0].lines.is_empty());
    assert!(matches!(&responses[0].completeness, Completeness::Failed(reason) if reason.contains("capture incomplete")));
}

#[tokio::test]
async fn quiescence_waits_for_trickling_output() {
    let fake = Arc::new(
        FakeMultiplexer::new()
            .with_session("agent", None)
            .with_buffer(&["ready"]),
    );
    fake.drip(&["thinking", "step 1", "step 2"]);
    let dispatcher = CommandDispatcher::new(
        as_mux(&fake),
        10_000,
        quick_quiescence(Duration::from_secs(5)),
    );

    let responses = dispatcher
        .run(&existing("agent"), &commands(&["plan"]))
        .await
        .expect("run");
    assert_eq!(responses[0].completeness, Completeness::Settled);
    assert_eq!(
        responses[0].lines,
        vec!["> plan", "thinking", "step 1", "step 2"]
    );
}

#[tokio::test]
async fn quiescence_deadline_leaves_response_unverified() {
    let fake = Arc::new(
        FakeMultiplexer::new()
            .with_session("agent", None)
            .with_buffer(&["ready"]),
    );
    let endless: Vec<String> = (0..10_000).map(|n| format!("tick {n}")).collect();
    let refs: Vec<&str> = endless.iter().map(String::as_str).collect();
    fake.drip(&refs);
    let dispatcher = CommandDispatcher::new(
        as_mux(&fake),
        100_000,
        quick_quiescence(Duration::from_millis(60)),
    );

    let responses = dispatcher
        .run(&existing("agent"), &commands(&["watch"]))
        .await
        .expect("run");
    assert_eq!(responses[0].completeness, Completeness::Unverified);
    assert_eq!(responses[0].lines[0], "> watch");
    assert!(responses[0].lines.len() > 2);
}

#[tokio::test]
async fn output_reaching_scrollback_depth_is_flagged() {
    let fake = Arc::new(
        FakeMultiplexer::new()
            .with_session("agent", None)
            .with_buffer(&["a", "b", "c"])
            .respond_with(|_| (1..=4).map(|n| format!("out {n}")).collect()),
    );
    let dispatcher = CommandDispatcher::new(as_mux(&fake), 5, quick_fixed());

    let responses = dispatcher
        .run(&existing("agent"), &commands(&["dump"]))
        .await
        .expect("run");
    assert_eq!(responses[0].completeness, Completeness::HorizonReached);
    assert_eq!(responses[0].lines, vec!["out 3", "out 4"]);
}

#[tokio::test]
async fn callback_error_stops_the_run() {
    let fake = Arc::new(echo_agent());
    let dispatcher = CommandDispatcher::new(as_mux(&fake), 10_000, quick_fixed());

    let mut seen = 0;
    let err = dispatcher
        .run_with(&existing("agent"), &commands(&["one", "two"]), |_| {
            seen += 1;
            Err(AppError::Io("disk full".into()))
        })
        .await
        .expect_err("callback fails");
    assert!(matches!(err, AppError::Io(_)));
    assert_eq!(seen, 1);
    assert_eq!(fake.submitted(), vec!["one".to_owned()]);
}

#[tokio::test]
async fn create_target_bootstraps_then_dispatches() {
    let fake = Arc::new(
        FakeMultiplexer::new().respond_with(|cmd| vec![format!("ran {cmd}")]),
    );
    let dispatcher = CommandDispatcher::new(as_mux(&fake), 10_000, quick_fixed());
    let target = DispatchTarget::Create {
        name: "agent_test".to_owned(),
        bootstrap: "agent".to_owned(),
        settle: SettleDelays {
            after_create: Duration::ZERO,
            after_bootstrap: Duration::ZERO,
        },
    };

    let session = dispatcher
        .run_with(&target, &commands(&["hello"]), |response| {
            assert_eq!(response.lines, vec!["> hello", "ran hello"]);
            Ok(())
        })
        .await
        .expect("run");
    assert_eq!(session.name, "agent_test");
    assert_eq!(fake.submitted(), vec!["agent".to_owned(), "hello".to_owned()]);
}
