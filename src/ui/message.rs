//! The assistant message as a UI renders it.

use serde::{Deserialize, Serialize};

use crate::types::{GeneratedFile, ProviderMetadata, Source, ToolCallPhase};

/// Whether a text or reasoning part is still receiving deltas.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PartState {
    Streaming,
    Done,
}

/// Approval attached to a tool part.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UiToolApproval {
    pub id: String,
    /// `None` until the request is answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// One tool call, updated in place as its events arrive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UiToolPart {
    pub tool_call_id: String,
    pub tool_name: String,
    pub state: ToolCallPhase,
    #[serde(default)]
    pub dynamic: bool,
    #[serde(default)]
    pub provider_executed: bool,
    /// Input text as streamed so far.
    #[serde(default)]
    pub raw_input: String,
    /// Parsed input; partial while the input is still streaming.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub preliminary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<UiToolApproval>,
}

impl UiToolPart {
    pub(crate) fn new(tool_call_id: &str, tool_name: &str, state: ToolCallPhase) -> Self {
        Self {
            tool_call_id: tool_call_id.to_string(),
            tool_name: tool_name.to_string(),
            state,
            dynamic: false,
            provider_executed: false,
            raw_input: String::new(),
            input: None,
            output: None,
            preliminary: false,
            error_text: None,
            approval: None,
        }
    }
}

/// Custom data written by a tool or the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UiDataPart {
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UiPart {
    StepStart,
    #[serde(rename_all = "camelCase")]
    Text {
        text: String,
        state: PartState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_metadata: Option<ProviderMetadata>,
    },
    #[serde(rename_all = "camelCase")]
    Reasoning {
        text: String,
        state: PartState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_metadata: Option<ProviderMetadata>,
    },
    Tool(UiToolPart),
    File(GeneratedFile),
    Source(Source),
    Data(UiDataPart),
}

/// Assistant message built from a run's events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UiMessage {
    pub id: String,
    pub parts: Vec<UiPart>,
}

impl UiMessage {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parts: Vec::new(),
        }
    }

    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                UiPart::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn tool_parts(&self) -> impl Iterator<Item = &UiToolPart> {
        self.parts.iter().filter_map(|p| match p {
            UiPart::Tool(tool) => Some(tool),
            _ => None,
        })
    }

    pub fn tool_part(&self, tool_call_id: &str) -> Option<&UiToolPart> {
        self.tool_parts().find(|t| t.tool_call_id == tool_call_id)
    }

    pub(crate) fn tool_part_mut(&mut self, tool_call_id: &str) -> Option<&mut UiToolPart> {
        self.parts.iter_mut().find_map(|p| match p {
            UiPart::Tool(tool) if tool.tool_call_id == tool_call_id => Some(tool),
            _ => None,
        })
    }

    /// Update the tool part for `tool_call_id`, creating it with `init` first
    /// when absent.
    pub(crate) fn upsert_tool_part(
        &mut self,
        tool_call_id: &str,
        init: impl FnOnce() -> UiToolPart,
        update: impl FnOnce(&mut UiToolPart),
    ) {
        match self.tool_part_mut(tool_call_id) {
            Some(part) => update(part),
            None => {
                let mut part = init();
                update(&mut part);
                self.parts.push(UiPart::Tool(part));
            }
        }
    }
}
