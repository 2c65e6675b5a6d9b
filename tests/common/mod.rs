//! Shared test helpers: scripted models, tools and event collection.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::{json, Value};

use roci_stream::config::StreamConfig;
use roci_stream::prelude::*;
use roci_stream::testing::{MockLanguageModel, MockResponse};
use roci_stream::util::retry::RetryPolicy;

/// A request over `model` with deterministic defaults (no env config, no retries).
pub fn request(model: &Arc<MockLanguageModel>, prompt: &str) -> StreamTextRequest {
    let model: Arc<dyn LanguageModel> = model.clone();
    StreamTextRequest::prompt(model, prompt)
        .with_config(StreamConfig::default())
        .with_retry(RetryPolicy::none())
}

pub fn model(responses: Vec<MockResponse>) -> Arc<MockLanguageModel> {
    let model = MockLanguageModel::new("mock-model");
    for response in responses {
        model.queue(response);
    }
    Arc::new(model)
}

/// `textStart(1) → "Hello" → " World" → textEnd(1) → finish(stop)`.
pub fn hello_world() -> MockResponse {
    MockResponse::parts(vec![
        StreamPart::text_start("1"),
        StreamPart::text_delta("1", "Hello"),
        StreamPart::text_delta("1", " World"),
        StreamPart::text_end("1"),
        StreamPart::finish(FinishReason::Stop, Usage::new(5, 2)),
    ])
}

pub async fn collect(result: &StreamTextResult) -> Vec<StepEvent> {
    result.full_stream().collect().await
}

pub fn tags(events: &[StepEvent]) -> Vec<&'static str> {
    events.iter().map(StepEvent::type_tag).collect()
}

pub fn count(events: &[StepEvent], tag: &str) -> usize {
    events.iter().filter(|e| e.type_tag() == tag).count()
}

/// Position of the first event with `tag`.
pub fn position(events: &[StepEvent], tag: &str) -> Option<usize> {
    events.iter().position(|e| e.type_tag() == tag)
}

/// `{ "q": string }` search tool answering with the query echoed back.
pub fn search_tool() -> AgentTool {
    AgentTool::new(
        "search",
        "search the web",
        ToolParameters::object().string("q", "query", true).build(),
        |args, _ctx| async move { Ok(json!({ "hits": [args.get_str("q")?] })) },
    )
}

/// Streaming tool yielding `values` one by one, `delay` apart.
pub fn progress_tool(name: &str, values: Vec<Value>, delay: Duration) -> AgentTool {
    AgentTool::streaming(name, "reports progress", ToolParameters::empty(), move |_args, _ctx| {
        let values = values.clone();
        async_stream::stream! {
            for value in values {
                tokio::time::sleep(delay).await;
                yield Ok(value);
            }
        }
    })
}

/// Tool that always needs approval and returns `true`.
pub fn guarded_tool(name: &str) -> AgentTool {
    AgentTool::new(name, "needs approval", ToolParameters::empty(), |_args, _ctx| async {
        Ok(json!(true))
    })
    .with_needs_approval(NeedsApproval::Always)
}
