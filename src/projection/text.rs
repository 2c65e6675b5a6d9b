use futures::stream::BoxStream;
use futures::{Stream, StreamExt};

use crate::types::StepEvent;

/// Text deltas of a run, in order.
pub fn text_stream<S>(events: S) -> BoxStream<'static, String>
where
    S: Stream<Item = StepEvent> + Send + 'static,
{
    events
        .filter_map(|event| async move {
            match event {
                StepEvent::TextDelta { delta, .. } => Some(delta),
                _ => None,
            }
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FinishReason, Usage};

    #[tokio::test]
    async fn keeps_only_text_deltas() {
        let delta = |text: &str| StepEvent::TextDelta {
            id: "1".into(),
            delta: text.into(),
            provider_metadata: None,
        };
        let events = futures::stream::iter(vec![
            StepEvent::Start,
            delta("Hello"),
            StepEvent::ReasoningDelta {
                id: "r".into(),
                delta: "thinking".into(),
                provider_metadata: None,
            },
            delta(" World"),
            StepEvent::Finish {
                finish_reason: FinishReason::Stop,
                total_usage: Usage::default(),
            },
        ]);
        let texts: Vec<String> = text_stream(events).collect().await;
        assert_eq!(texts, vec!["Hello", " World"]);
    }
}
