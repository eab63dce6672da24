use crate::dedup::dedup_key;
use crate::usage::Usage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A tool output recorded against a specific call, keyed for dedup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingToolOutput {
    pub dedup_key: String,
    pub call_id: Option<String>,
    pub tool_name: String,
    pub arguments: Value,
    pub output: crate::tool::ToolOutput,
}

/// A tool failure recorded against a specific call, fed back to the next
/// turn so the model can adjust rather than halting the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingToolFailure {
    pub dedup_key: String,
    pub call_id: Option<String>,
    pub tool_name: String,
    pub arguments: Value,
    pub reason: String,
}

/// The mutable conversation state a single run owns exclusively.
///
/// A `Thread` is created once (on the transport's `ThreadStarted` event),
/// mutated only by the run in progress, and returned to the caller inside
/// `RunResult`. Concurrent runs must not share a `Thread`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Thread {
    pub thread_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Non-empty means the transport asked to resume; absent/empty means
    /// the last turn produced a final response.
    #[serde(default)]
    pub continuation_token: Option<String>,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub pending_tool_outputs: Vec<PendingToolOutput>,
    #[serde(default)]
    pub pending_tool_failures: Vec<PendingToolFailure>,
}

impl Thread {
    pub fn new() -> Self {
        Self::default()
    }

    /// Has the transport requested another turn to continue the current
    /// one? (invariant: never true at the same time a final response was
    /// just produced)
    pub fn has_continuation(&self) -> bool {
        matches!(&self.continuation_token, Some(t) if !t.is_empty())
    }

    /// Clear all run-scoped state. Used both on successful finalization and
    /// for the "early exit" transport status, which resets the
    /// conversation entirely (see the driver's early-exit handling, decided
    /// in favor of clear-and-return-cleared).
    pub fn clear_run_state(&mut self) {
        self.thread_id = None;
        self.metadata.clear();
        self.continuation_token = None;
        self.usage = Usage::new();
    }

    /// Clear only the per-run pending tool bookkeeping, leaving thread
    /// identity and usage intact. Called on normal turn finalization.
    pub fn clear_pending_tool_state(&mut self) {
        self.pending_tool_outputs.clear();
        self.pending_tool_failures.clear();
    }

    /// True if a pending output or failure already exists for this call,
    /// used by the tool pipeline to skip duplicate `ToolCallRequested`
    /// events (e.g. ones replayed by a retried turn).
    pub fn has_pending_for(&self, call_id: Option<&str>, tool_name: &str, arguments: &Value) -> bool {
        let key = dedup_key(call_id, tool_name, arguments);
        self.pending_tool_outputs.iter().any(|o| o.dedup_key == key)
            || self.pending_tool_failures.iter().any(|f| f.dedup_key == key)
    }

    /// Record a tool output, replacing any prior entry under the same
    /// dedup key (a retried call wins over its earlier attempt).
    pub fn record_tool_output(
        &mut self,
        call_id: Option<String>,
        tool_name: String,
        arguments: Value,
        output: crate::tool::ToolOutput,
    ) {
        let key = dedup_key(call_id.as_deref(), &tool_name, &arguments);
        self.pending_tool_outputs.retain(|o| o.dedup_key != key);
        self.pending_tool_failures.retain(|f| f.dedup_key != key);
        self.pending_tool_outputs.push(PendingToolOutput {
            dedup_key: key,
            call_id,
            tool_name,
            arguments,
            output,
        });
    }

    /// Record a tool failure, replacing any prior entry under the same key.
    pub fn record_tool_failure(
        &mut self,
        call_id: Option<String>,
        tool_name: String,
        arguments: Value,
        reason: String,
    ) {
        let key = dedup_key(call_id.as_deref(), &tool_name, &arguments);
        self.pending_tool_outputs.retain(|o| o.dedup_key != key);
        self.pending_tool_failures.retain(|f| f.dedup_key != key);
        self.pending_tool_failures.push(PendingToolFailure {
            dedup_key: key,
            call_id,
            tool_name,
            arguments,
            reason,
        });
    }
}
