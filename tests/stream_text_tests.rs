//! End-to-end runs through `stream_text` with a scripted model.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;

use common::*;
use roci_stream::prelude::*;
use roci_stream::testing::MockResponse;
use roci_stream::util::retry::RetryPolicy;

#[tokio::test]
async fn hello_scenario_streams_text_and_finishes_with_stop() {
    let model = model(vec![hello_world()]);
    let result = stream_text(request(&model, "hello"));

    let texts: Vec<String> = result.text_stream().collect().await;
    assert_eq!(texts, vec!["Hello", " World"]);
    assert_eq!(result.finish_reason().await.unwrap(), FinishReason::Stop);
    assert_eq!(result.text().await.unwrap(), "Hello World");

    let events = collect(&result).await;
    assert_eq!(
        tags(&events),
        vec![
            "start",
            "start-step",
            "text-start",
            "text-delta",
            "text-delta",
            "text-end",
            "finish-step",
            "finish",
        ]
    );
}

#[tokio::test]
async fn error_mid_stream_ends_the_run_without_finish() {
    let model = model(vec![MockResponse::Parts(vec![
        Ok(StreamPart::text_start("1")),
        Ok(StreamPart::text_delta("1", "Hel")),
        Ok(StreamPart::Error {
            error: json!({ "message": "overloaded" }),
        }),
    ])]);
    let result = stream_text(request(&model, "hello"));
    let events = collect(&result).await;

    assert_eq!(count(&events, "finish"), 0);
    match events.last() {
        Some(StepEvent::Error { error_text }) => assert!(error_text.contains("overloaded")),
        other => panic!("expected a terminal error, got {other:?}"),
    }
    assert!(result.consume().await.is_err());
}

#[tokio::test]
async fn late_subscriber_replays_the_whole_run() {
    let model = model(vec![hello_world()]);
    let result = stream_text(request(&model, "hello"));
    let live = result.subscribe();

    let from_start: Vec<StepEvent> = live.collect().await;
    result.consume().await.unwrap();
    let replayed = collect(&result).await;

    assert_eq!(replayed, from_start);
    assert!(replayed.last().is_some_and(StepEvent::is_terminal));
}

#[tokio::test]
async fn concurrent_subscribers_see_identical_sequences() {
    let model = model(vec![
        MockResponse::tool_call("c1", "search", r#"{"q":"rust"}"#),
        hello_world(),
    ]);
    let result = stream_text(
        request(&model, "hello")
            .with_tool(search_tool())
            .with_stop_condition(step_count_is(5)),
    );
    let a = result.subscribe();
    let b = result.subscribe();

    let (a, b): (Vec<StepEvent>, Vec<StepEvent>) = tokio::join!(a.collect(), b.collect());
    let encode = |events: &[StepEvent]| serde_json::to_string(events).unwrap();
    assert_eq!(encode(&a), encode(&b));
    assert_eq!(count(&a, "start-step"), 2);
}

#[tokio::test]
async fn stop_during_a_run_emits_abort_then_finish() {
    let model = model(vec![MockResponse::Hang(vec![
        StreamPart::text_start("1"),
        StreamPart::text_delta("1", "partial"),
    ])]);
    let result = stream_text(request(&model, "hello"));

    let mut reader = result.subscribe();
    while let Some(event) = reader.next().await {
        if matches!(event, StepEvent::TextDelta { .. }) {
            result.stop();
            break;
        }
    }

    let events = collect(&result).await;
    assert_eq!(count(&events, "abort"), 1);
    assert_eq!(count(&events, "finish"), 1);
    assert!(position(&events, "abort") < position(&events, "finish"));
    assert_eq!(events.last().map(StepEvent::type_tag), Some("finish"));
    assert!(result.summary().await.aborted);
}

/// Reads live events until `tag` shows up, then stops the run.
async fn stop_on(result: &StreamTextResult, tag: &str) {
    let mut reader = result.subscribe();
    while let Some(event) = reader.next().await {
        if event.type_tag() == tag {
            result.stop();
            return;
        }
    }
    panic!("run ended before {tag}");
}

fn assert_aborted_without_results(events: &[StepEvent]) {
    assert_eq!(count(events, "abort"), 1);
    assert_eq!(count(events, "finish"), 1);
    assert!(position(events, "abort") < position(events, "finish"));
    assert_eq!(events.last().map(StepEvent::type_tag), Some("finish"));
    assert_eq!(count(events, "tool-result"), 0);
}

#[tokio::test]
async fn stop_during_tool_execution_aborts_then_finishes() {
    let stuck = AgentTool::new("stuck", "never returns", ToolParameters::empty(), |_, _| async {
        futures::future::pending::<()>().await;
        Ok(json!(null))
    });
    let model = model(vec![MockResponse::tool_call("c1", "stuck", "{}"), hello_world()]);
    let result = stream_text(
        request(&model, "hello")
            .with_tool(stuck)
            .with_stop_condition(step_count_is(5)),
    );

    stop_on(&result, "tool-call").await;
    let events = collect(&result).await;

    assert_aborted_without_results(&events);
    assert_eq!(model.call_count(), 1);
    assert!(result.summary().await.aborted);
}

#[tokio::test]
async fn stop_while_approval_pending_aborts_then_finishes() {
    let model = model(vec![MockResponse::tool_call("c1", "rm", "{}"), hello_world()]);
    let result = stream_text(
        request(&model, "hello")
            .with_tool(guarded_tool("rm"))
            .with_stop_condition(step_count_is(5))
            .with_approval_policy(ApprovalPolicy::custom(|_| {
                ApprovalVerdict::Pending(Box::pin(futures::future::pending()))
            })),
    );

    stop_on(&result, "tool-approval-request").await;
    let events = collect(&result).await;

    assert_aborted_without_results(&events);
    assert_eq!(count(&events, "tool-approval-response"), 0);
    assert_eq!(model.call_count(), 1);
}

#[tokio::test]
async fn external_cancellation_token_stops_the_run() {
    let token = tokio_util::sync::CancellationToken::new();
    let model = model(vec![MockResponse::Hang(Vec::new())]);
    let result = stream_text(request(&model, "hello").with_cancellation(token.clone()));
    token.cancel();
    let events = collect(&result).await;
    assert_eq!(&tags(&events)[events.len() - 2..], &["abort", "finish"]);
}

#[tokio::test]
async fn tool_step_continues_until_the_step_limit() {
    let model = model(vec![
        MockResponse::tool_call("c1", "search", r#"{"q":"a"}"#),
        MockResponse::tool_call("c2", "search", r#"{"q":"b"}"#),
        hello_world(),
    ]);
    let result = stream_text(
        request(&model, "hello")
            .with_tool(search_tool())
            .with_stop_condition(step_count_is(2)),
    );
    let steps = result.steps().await.unwrap();

    assert_eq!(steps.len(), 2);
    assert_eq!(model.call_count(), 2);
    assert_eq!(result.finish_reason().await.unwrap(), FinishReason::ToolCalls);

    // The second call saw the first step's call and its output.
    let second = &model.calls()[1].messages;
    let tool_message = second.last().unwrap();
    assert_eq!(tool_message.role, Role::Tool);
    assert_eq!(tool_message.tool_results()[0].output, json!({ "hits": ["a"] }));
}

#[tokio::test]
async fn total_usage_sums_every_step() {
    let model = model(vec![
        MockResponse::tool_call("c1", "search", r#"{"q":"a"}"#),
        hello_world(),
    ]);
    let result = stream_text(
        request(&model, "hello")
            .with_tool(search_tool())
            .with_stop_condition(step_count_is(3)),
    );
    assert_eq!(result.total_usage().await.unwrap(), Usage::new(15, 7));
    assert_eq!(result.steps().await.unwrap().len(), 2);
}

#[tokio::test]
async fn unknown_tool_blocks_continuation() {
    let model = model(vec![
        MockResponse::tool_call("c1", "lookup", "{}"),
        hello_world(),
    ]);
    let result = stream_text(
        request(&model, "hello")
            .with_tool(search_tool())
            .with_stop_condition(step_count_is(5)),
    );
    let events = collect(&result).await;

    assert_eq!(model.call_count(), 1);
    assert!(events.iter().any(|e| matches!(
        e,
        StepEvent::ToolCall { tool_name, dynamic: true, .. } if tool_name == "lookup"
    )));
    assert_eq!(count(&events, "tool-result"), 0);
}

#[tokio::test]
async fn callbacks_see_chunks_steps_and_one_finish() {
    let chunks = Arc::new(AtomicUsize::new(0));
    let steps = Arc::new(AtomicUsize::new(0));
    let finishes = Arc::new(AtomicUsize::new(0));
    let (c, s, f) = (chunks.clone(), steps.clone(), finishes.clone());

    let model = model(vec![hello_world()]);
    let result = stream_text(
        request(&model, "hello")
            .with_on_chunk(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .with_on_step_finish(move |_| {
                s.fetch_add(1, Ordering::SeqCst);
            })
            .with_on_finish(move |summary| {
                assert_eq!(summary.finish_reason, FinishReason::Stop);
                f.fetch_add(1, Ordering::SeqCst);
            }),
    );
    let events = collect(&result).await;
    result.consume().await.unwrap();

    assert_eq!(chunks.load(Ordering::SeqCst), events.len());
    assert_eq!(steps.load(Ordering::SeqCst), 1);
    assert_eq!(finishes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn panicking_on_chunk_does_not_corrupt_the_log() {
    let errors = Arc::new(AtomicUsize::new(0));
    let e = errors.clone();
    let model = model(vec![hello_world()]);
    let result = stream_text(
        request(&model, "hello")
            .with_on_chunk(|event| {
                if matches!(event, StepEvent::TextDelta { .. }) {
                    panic!("consumer bug");
                }
            })
            .with_on_error(move |_| {
                e.fetch_add(1, Ordering::SeqCst);
            }),
    );
    let events = collect(&result).await;

    assert_eq!(count(&events, "text-delta"), 2);
    assert_eq!(events.last().map(StepEvent::type_tag), Some("finish"));
    assert_eq!(errors.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn retryable_failures_back_off_before_the_next_attempt() {
    let model = model(vec![
        MockResponse::Fail(RociError::api(503, "unavailable")),
        MockResponse::Fail(RociError::api_with_retry_after(429, "slow down", 500)),
        hello_world(),
    ]);
    let started = tokio::time::Instant::now();
    let result = stream_text(request(&model, "hello").with_retry(RetryPolicy {
        max_retries: 2,
        initial_backoff: Duration::from_secs(1),
        multiplier: 2.0,
        max_retry_after: Duration::from_secs(60),
    }));

    assert_eq!(result.text().await.unwrap(), "Hello World");
    assert_eq!(model.call_count(), 3);
    // 1s backoff, then the 500ms retry-after hint.
    assert_eq!(started.elapsed(), Duration::from_millis(1500));
}

#[tokio::test]
async fn exhausted_retries_surface_as_an_error_event() {
    let model = model(vec![
        MockResponse::Fail(RociError::api(503, "unavailable")),
        MockResponse::Fail(RociError::api(503, "still unavailable")),
    ]);
    let result = stream_text(request(&model, "hello").with_retry(RetryPolicy {
        max_retries: 1,
        initial_backoff: Duration::from_millis(1),
        multiplier: 1.0,
        max_retry_after: Duration::from_secs(1),
    }));
    let events = collect(&result).await;
    match events.last() {
        Some(StepEvent::Error { error_text }) => {
            assert!(error_text.contains("Failed after 2 attempts"))
        }
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn system_prompt_is_sent_first() {
    let model = model(vec![hello_world()]);
    let result = stream_text(request(&model, "hello").with_system("be brief"));
    result.consume().await.unwrap();
    let messages = &model.calls()[0].messages;
    assert_eq!(messages[0].role, Role::System);
    assert_eq!(messages[1].role, Role::User);
}
