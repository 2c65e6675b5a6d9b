//! Call settings, finish reasons and per-call metadata.

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Settings forwarded to the model on every step.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, Default, PartialEq)]
pub struct CallSettings {
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub stop_sequences: Option<Vec<String>>,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub seed: Option<u64>,
}

/// Why a step (or the whole run) finished.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString, Default,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Error,
    Other,
    #[default]
    Unknown,
}

/// Warning reported by the provider for a single call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CallWarning {
    #[serde(rename_all = "camelCase")]
    UnsupportedSetting {
        setting: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    UnsupportedTool {
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
    Other { message: String },
}

/// What was sent to the provider for one step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RequestMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

/// Identity of the provider response for one step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub id: String,
    pub model_id: String,
    pub timestamp: DateTime<Utc>,
}

impl ResponseMetadata {
    /// Metadata for a response whose provider did not report its own.
    pub fn generated(model_id: impl Into<String>) -> Self {
        Self {
            id: format!("resp-{}", uuid::Uuid::new_v4()),
            model_id: model_id.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Kind of cited source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    Url,
    Document,
}

/// A source the model cited.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub source_type: SourceType,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl Source {
    pub fn url(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            source_type: SourceType::Url,
            id: id.into(),
            url: Some(url.into()),
            title: None,
            media_type: None,
            filename: None,
        }
    }
}

/// A file produced by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedFile {
    pub media_type: String,
    #[serde(rename = "base64", with = "base64_bytes")]
    pub data: Vec<u8>,
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn finish_reason_uses_kebab_case_everywhere() {
        assert_eq!(FinishReason::ToolCalls.to_string(), "tool-calls");
        assert_eq!(
            FinishReason::from_str("content-filter").unwrap(),
            FinishReason::ContentFilter
        );
        assert_eq!(
            serde_json::to_value(FinishReason::ToolCalls).unwrap(),
            serde_json::json!("tool-calls")
        );
    }

    #[test]
    fn generated_file_bytes_travel_as_base64() {
        let file = GeneratedFile {
            media_type: "text/plain".into(),
            data: b"hi".to_vec(),
        };
        let json = serde_json::to_value(&file).unwrap();
        assert_eq!(json["base64"], "aGk=");
        let back: GeneratedFile = serde_json::from_value(json).unwrap();
        assert_eq!(back, file);
    }
}
