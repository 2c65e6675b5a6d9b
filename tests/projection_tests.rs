//! Projections over real runs: SSE, log lines and UI messages.

mod common;

use std::sync::{Arc, Mutex};

use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use common::*;
use roci_stream::prelude::*;
use roci_stream::projection::{decode_sse, DONE_FRAME};
use roci_stream::testing::MockResponse;
use roci_stream::ui::{PartState, UiPart};

#[tokio::test]
async fn sse_round_trip_matches_the_event_log() {
    let model = model(vec![
        MockResponse::tool_call("c1", "search", r#"{"q":"rust"}"#),
        hello_world(),
    ]);
    let result = stream_text(
        request(&model, "hello")
            .with_tool(search_tool())
            .with_stop_condition(step_count_is(2)),
    );

    let body: String = result.sse_stream().collect::<Vec<_>>().await.concat();
    assert!(body.ends_with(DONE_FRAME));

    let decoded = decode_sse(&body).unwrap();
    let original = collect(&result).await;
    // Equal up to field order: compare as JSON values.
    let as_values = |events: &[StepEvent]| -> Vec<Value> {
        events
            .iter()
            .map(|e| serde_json::to_value(e).unwrap())
            .collect()
    };
    assert_eq!(as_values(&decoded), as_values(&original));
}

#[tokio::test]
async fn sse_frames_use_the_wire_field_names() {
    let model = model(vec![hello_world()]);
    let result = stream_text(request(&model, "hello"));
    let frames: Vec<String> = result.sse_stream().collect().await;

    assert_eq!(frames[0], "data: {\"type\":\"start\"}\n\n");
    let finish: Value = serde_json::from_str(
        frames[frames.len() - 2]
            .strip_prefix("data: ")
            .unwrap()
            .trim_end(),
    )
    .unwrap();
    assert_eq!(finish["type"], "finish");
    assert_eq!(finish["finishReason"], "stop");
    assert_eq!(finish["totalUsage"]["totalTokens"], 7);
    assert_eq!(frames.last().map(String::as_str), Some(DONE_FRAME));
}

#[tokio::test]
async fn error_runs_encode_error_text() {
    let model = model(vec![MockResponse::Parts(vec![Ok(StreamPart::Error {
        error: json!("boom"),
    })])]);
    let result = stream_text(request(&model, "hello"));
    let frames: Vec<String> = result.sse_stream().collect().await;
    let error = &frames[frames.len() - 2];
    assert!(error.starts_with("data: {\"type\":\"error\",\"errorText\":"));
    assert!(error.contains("boom"));
}

#[tokio::test]
async fn log_stream_describes_the_run() {
    let model = model(vec![hello_world()]);
    let result = stream_text(request(&model, "hello"));
    let lines: Vec<String> = result
        .log_stream(LogOptions::default().with_prefix("[demo]"))
        .collect()
        .await;

    assert_eq!(
        lines,
        vec![
            "[demo] stream:start\n",
            "[demo] step 0:start\n",
            "[demo] step 0:text[1] += Hello\n",
            "[demo] step 0:text[1] +=  World\n",
            "[demo] step 0:text[1] end\n",
            "[demo] step 0:finish reason=stop\n",
            "[demo] stream:finish reason=stop input=5 output=2 total=7\n",
        ]
    );
}

#[tokio::test]
async fn ui_message_tracks_text_and_tool_parts() {
    let model = model(vec![
        MockResponse::tool_call("c1", "search", r#"{"q":"rust"}"#),
        hello_world(),
    ]);
    let result = stream_text(
        request(&model, "hello")
            .with_tool(search_tool())
            .with_stop_condition(step_count_is(2)),
    );
    let snapshots: Vec<UiMessage> = result
        .ui_message_stream(UiMessageOptions::default().with_message_id("assistant-1"))
        .collect()
        .await;
    let message = snapshots.last().unwrap();

    assert_eq!(message.id, "assistant-1");
    assert_eq!(message.text(), "Hello World");
    let tool = message.tool_part("c1").unwrap();
    assert_eq!(tool.state, ToolCallPhase::OutputAvailable);
    assert_eq!(tool.output, Some(json!({ "hits": ["rust"] })));

    let kinds: Vec<&str> = message
        .parts
        .iter()
        .map(|p| match p {
            UiPart::StepStart => "step-start",
            UiPart::Tool(_) => "tool",
            UiPart::Text { state, .. } => {
                assert_eq!(*state, PartState::Done);
                "text"
            }
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, vec!["step-start", "tool", "step-start", "text"]);
}

#[tokio::test]
async fn transient_tool_data_reaches_the_callback_only() {
    let reporter = AgentTool::new("report", "reports", ToolParameters::empty(), |_, ctx| async move {
        ctx.data.write_transient("progress", json!(50));
        Ok(json!("ok"))
    });
    let model = model(vec![MockResponse::tool_call("c1", "report", "{}")]);
    let result = stream_text(request(&model, "hello").with_tool(reporter));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let snapshots: Vec<UiMessage> = result
        .ui_message_stream(
            UiMessageOptions::default().with_on_data(move |part| sink.lock().unwrap().push(part.data.clone())),
        )
        .collect()
        .await;

    assert_eq!(*seen.lock().unwrap(), vec![json!(50)]);
    assert!(snapshots
        .last()
        .unwrap()
        .parts
        .iter()
        .all(|p| !matches!(p, UiPart::Data(_))));
}

#[tokio::test]
async fn projections_can_attach_after_the_run_finished() {
    let model = model(vec![hello_world()]);
    let result = stream_text(request(&model, "hello"));
    result.consume().await.unwrap();

    let texts: Vec<String> = result.text_stream().collect().await;
    let frames: Vec<String> = result.sse_stream().collect().await;
    assert_eq!(texts.concat(), "Hello World");
    assert_eq!(frames.len(), 9);
}
