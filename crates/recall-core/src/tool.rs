use serde::{Deserialize, Serialize};

/// A request from the LLM to invoke a specific tool.
///
/// Recorded on assistant messages so that a restored session reproduces the
/// exact history the agent saw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier assigned by the LLM for this call.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// JSON arguments passed to the tool.
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Creates a tool call with the given id, tool name and arguments.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}
