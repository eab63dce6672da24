use crate::usage::Usage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A single event in a transport's event sequence for one turn.
///
/// Unrecognized event kinds fall through to [`Event::Other`] rather than
/// failing to deserialize. Wire dispatch happens entirely through the
/// `#[serde(tag = "type")]`/`#[serde(rename = "...")]` attributes above;
/// [`Event::kind_tag`] is a separate, coarser grouping used to label
/// `SemanticStreamEvent::RunItem.item_type` for stream consumers, not a
/// wire-spelling normalizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "thread.started")]
    ThreadStarted {
        thread_id: String,
        #[serde(default)]
        metadata: HashMap<String, Value>,
    },

    #[serde(rename = "turn.started")]
    TurnStarted { thread_id: String, turn_id: String },

    #[serde(rename = "turn.continuation")]
    TurnContinuation {
        thread_id: String,
        turn_id: String,
        continuation_token: String,
        #[serde(default)]
        retryable: bool,
        #[serde(default)]
        reason: Option<String>,
    },

    #[serde(rename = "turn.completed")]
    TurnCompleted {
        thread_id: String,
        turn_id: String,
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        final_response: Option<Value>,
        #[serde(default)]
        usage: Option<Usage>,
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        error: Option<Value>,
    },

    #[serde(rename = "thread.tokenUsage.updated")]
    ThreadTokenUsageUpdated {
        #[serde(default)]
        usage: Option<Usage>,
        #[serde(default)]
        delta: Option<Usage>,
        #[serde(default)]
        rate_limits: Option<Value>,
    },

    #[serde(rename = "account.rateLimits.updated")]
    AccountRateLimitsUpdated { rate_limits: Value },

    #[serde(rename = "turn.diff.updated")]
    TurnDiffUpdated { thread_id: String, diff: Value },

    #[serde(rename = "turn.compaction")]
    TurnCompaction {
        thread_id: String,
        stage: String,
        compaction: Value,
        #[serde(default)]
        usage: Option<Usage>,
        #[serde(default)]
        usage_delta: Option<Usage>,
    },

    #[serde(rename = "item.agentMessage.delta")]
    ItemAgentMessageDelta { item: Value },

    #[serde(rename = "item.started")]
    ItemStarted { item: Value },

    #[serde(rename = "item.updated")]
    ItemUpdated { item: Value },

    #[serde(rename = "item.completed")]
    ItemCompleted { item: Value },

    #[serde(rename = "tool_call.requested")]
    ToolCallRequested {
        #[serde(default)]
        call_id: Option<String>,
        tool_name: String,
        #[serde(default)]
        arguments: Value,
        #[serde(default)]
        requires_approval: bool,
        #[serde(default)]
        approved: Option<bool>,
        #[serde(default)]
        approved_by_policy: Option<bool>,
        #[serde(default)]
        sandbox_warnings: Option<Vec<String>>,
        #[serde(default)]
        capabilities: Option<Value>,
    },

    #[serde(rename = "tool_call.completed")]
    ToolCallCompleted { call_id: String, output: Value },

    #[serde(rename = "turn.failed")]
    TurnFailed { thread_id: String, error: Value },

    #[serde(rename = "error")]
    Error {
        message: String,
        #[serde(default)]
        will_retry: Option<bool>,
    },

    #[serde(rename = "session.configured")]
    SessionConfigured {
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        reasoning_effort: Option<String>,
    },

    /// Anything the engine does not recognize is preserved verbatim rather
    /// than discarded; `EventFold` simply skips it.
    #[serde(other)]
    Other,
}

impl Event {
    pub fn kind_tag(&self) -> &'static str {
        match self {
            Event::ThreadStarted { .. } => "thread_started",
            Event::TurnStarted { .. } => "turn_started",
            Event::TurnContinuation { .. } => "turn_continuation",
            Event::TurnCompleted { .. } => "turn_completed",
            Event::ThreadTokenUsageUpdated { .. } => "usage",
            Event::AccountRateLimitsUpdated { .. } => "usage",
            Event::TurnDiffUpdated { .. } => "turn_diff",
            Event::TurnCompaction { .. } => "turn_compaction",
            Event::ItemAgentMessageDelta { .. } => "item_delta",
            Event::ItemStarted { .. } => "item_started",
            Event::ItemUpdated { .. } => "item_updated",
            Event::ItemCompleted { .. } => "item_completed",
            Event::ToolCallRequested { .. } => "tool_call",
            Event::ToolCallCompleted { .. } => "tool_call_completed",
            Event::TurnFailed { .. } => "event",
            Event::Error { .. } => "event",
            Event::SessionConfigured { .. } => "event",
            Event::Other => "event",
        }
    }
}

/// A normalized agent message decoded out of an `ItemAgentMessageDelta` or
/// `ItemCompleted`/`TurnCompleted` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentMessage {
    #[serde(default)]
    pub id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub parsed: Option<Value>,
}

/// Events the engine produces for streaming consumers. Distinct from the
/// raw [`Event`] taxonomy the transport emits.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum SemanticStreamEvent {
    #[serde(rename = "agent_updated")]
    AgentUpdated { agent: String, run_config: Value },

    #[serde(rename = "run_item")]
    RunItem { event: Event, item_type: &'static str },

    #[serde(rename = "raw_responses")]
    RawResponses { events: Vec<Event>, usage: Usage },

    #[serde(rename = "guardrail_result")]
    GuardrailResult {
        stage: String,
        guardrail: String,
        result: String,
        message: Option<String>,
    },

    #[serde(rename = "tool_approval")]
    ToolApproval {
        tool_name: String,
        call_id: String,
        decision: String,
        reason: Option<String>,
    },
}
