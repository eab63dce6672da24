use serde::{Deserialize, Serialize};

/// A tool definition advertised to the transport for the running agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// One content block of a normalized tool output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
}

/// The normalized shape every tool invocation result is coerced into before
/// it is recorded on the thread and fed back to the transport.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolOutput {
    pub content: Vec<ToolContentBlock>,
}

impl ToolOutput {
    /// Build a single-text-block output, the common case for simple tools.
    pub fn text(s: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContentBlock::Text { text: s.into() }],
        }
    }

    /// Coerce an arbitrary JSON value returned by a tool into the canonical
    /// `{content: [text_block, ...]}` shape. Strings become a single text
    /// block; anything else is pretty-printed.
    pub fn normalize(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => Self::text(s),
            other => Self::text(
                serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string()),
            ),
        }
    }

    /// Join all text blocks, the shape the model actually reads.
    pub fn as_text(&self) -> String {
        self.content
            .iter()
            .map(|b| match b {
                ToolContentBlock::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_string_is_single_text_block() {
        let out = ToolOutput::normalize(serde_json::json!("hello"));
        assert_eq!(out.as_text(), "hello");
    }

    #[test]
    fn normalize_object_pretty_prints() {
        let out = ToolOutput::normalize(serde_json::json!({"a": 1}));
        assert!(out.as_text().contains("\"a\""));
    }

    #[test]
    fn text_helper_builds_single_block() {
        let out = ToolOutput::text("ok");
        assert_eq!(out.content.len(), 1);
        assert_eq!(out.as_text(), "ok");
    }
}
