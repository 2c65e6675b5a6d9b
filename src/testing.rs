//! Scripted model for tests.
//!
//! `MockLanguageModel` replays one queued [`MockResponse`] per call and keeps
//! every [`CallOptions`] it received so tests can inspect the history sent to
//! each step.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;

use crate::error::RociError;
use crate::provider::{CallOptions, LanguageModel, StreamPart, StreamResponse};
use crate::types::{FinishReason, RequestMetadata, Usage};

/// What the mock does for one call.
#[derive(Debug)]
pub enum MockResponse {
    /// Stream these items, then end.
    Parts(Vec<Result<StreamPart, RociError>>),
    /// Fail the call itself before any part is produced.
    Fail(RociError),
    /// Stream these items, then never end.
    Hang(Vec<StreamPart>),
}

impl MockResponse {
    /// A single text block finishing with `stop`.
    pub fn text(text: &str) -> Self {
        Self::Parts(
            vec![
                StreamPart::text_start("1"),
                StreamPart::text_delta("1", text),
                StreamPart::text_end("1"),
                StreamPart::finish(FinishReason::Stop, Usage::new(10, 20)),
            ]
            .into_iter()
            .map(Ok)
            .collect(),
        )
    }

    /// One tool call finishing with `tool-calls`.
    pub fn tool_call(id: &str, name: &str, input: &str) -> Self {
        Self::Parts(vec![
            Ok(StreamPart::tool_call(id, name, input)),
            Ok(StreamPart::finish(FinishReason::ToolCalls, Usage::new(10, 5))),
        ])
    }

    pub fn parts(parts: Vec<StreamPart>) -> Self {
        Self::Parts(parts.into_iter().map(Ok).collect())
    }
}

/// A model that replays scripted responses.
pub struct MockLanguageModel {
    model_id: String,
    responses: Mutex<VecDeque<MockResponse>>,
    calls: Mutex<Vec<CallOptions>>,
}

impl MockLanguageModel {
    pub fn new(model_id: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            responses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_response(self, response: MockResponse) -> Self {
        self.queue(response);
        self
    }

    pub fn queue(&self, response: MockResponse) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(response);
        }
    }

    /// Every call received so far.
    pub fn calls(&self) -> Vec<CallOptions> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
    }

    pub fn into_arc(self) -> Arc<dyn LanguageModel> {
        Arc::new(self)
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    fn provider(&self) -> &str {
        "mock"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn do_stream(&self, options: CallOptions) -> Result<StreamResponse, RociError> {
        let request = RequestMetadata {
            body: Some(serde_json::json!({ "messages": options.messages.len() })),
        };
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(options);
        }
        let next = self
            .responses
            .lock()
            .map_err(|_| RociError::InvalidState("mock response queue poisoned".into()))?
            .pop_front();

        let parts = match next {
            None => {
                return Err(RociError::InvalidState(
                    "mock model has no scripted response left".into(),
                ))
            }
            Some(MockResponse::Fail(error)) => return Err(error),
            Some(MockResponse::Parts(parts)) => futures::stream::iter(parts).boxed(),
            Some(MockResponse::Hang(parts)) => futures::stream::iter(parts.into_iter().map(Ok))
                .chain(futures::stream::pending())
                .boxed(),
        };
        Ok(StreamResponse { parts, request })
    }
}
