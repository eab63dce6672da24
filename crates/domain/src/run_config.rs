use crate::guardrail::{Guardrail, ToolGuardrail};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// An input block, the structured alternative to a plain string input.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InputBlock {
    pub role: String,
    pub content: Value,
}

/// A run's input: either a single string turn, or a sequence of input
/// blocks (multi-part / multi-turn seed).
#[derive(Debug, Clone)]
pub enum Input {
    Text(String),
    Blocks(Vec<InputBlock>),
}

impl Input {
    pub fn is_valid(&self) -> bool {
        match self {
            Input::Text(s) => !s.is_empty(),
            Input::Blocks(b) => !b.is_empty(),
        }
    }
}

/// Per-turn options forwarded to, or consumed ahead of, the transport.
#[derive(Debug, Clone, Default)]
pub struct TurnOpts {
    pub output_schema: Option<Value>,
    pub env: Option<Vec<(String, String)>>,
    pub clear_env: bool,
    pub cancellation_token: Option<String>,
    pub timeout_ms: Option<u64>,
    pub stream_idle_timeout_ms: Option<u64>,
    pub tool_choice: Option<String>,
}

impl TurnOpts {
    /// Apply the `reset_tool_choice` rule (§4.7a): drop a forced
    /// `tool_choice` after a turn that produced tool results, so the next
    /// turn is not forced to call the same tool again.
    pub fn apply_reset_tool_choice(&mut self, reset_tool_choice: bool, had_tool_results: bool) {
        if reset_tool_choice && had_tool_results && self.tool_choice.is_some() {
            self.tool_choice = None;
        }
    }
}

/// A session handle: persists `{input, final_response, thread identity,
/// previous_response_id}` across runs. The storage mechanism is host
/// defined; the runtime only calls through this trait.
pub trait Session: Send + Sync {
    fn load_history(&self) -> Vec<InputBlock>;
    fn persist(
        &self,
        input: &Input,
        final_response: Option<&str>,
        conversation_key: &str,
        previous_response_id: Option<&str>,
    );
}

/// Optional hook that rewrites the prepared input before input guardrails
/// run, given the raw input and the loaded session history. The canonical
/// signature is `(input, history, extra) -> new_input`; hosts offering
/// fewer-arity convenience constructors should adapt down to this shape
/// rather than detect arity at call time.
pub trait SessionInputCallback: Send + Sync {
    fn call(&self, input: &Input, history: &[InputBlock], extra: &Value) -> Input;
}

/// Run-scoped configuration: bounds, guardrails, overrides, and session
/// wiring.
#[derive(Clone, Default)]
pub struct RunConfig {
    pub max_turns: u32,
    pub input_guardrails: Vec<Arc<Guardrail>>,
    pub output_guardrails: Vec<Arc<Guardrail>>,
    pub tool_input_guardrails: Vec<Arc<ToolGuardrail>>,
    pub tool_output_guardrails: Vec<Arc<ToolGuardrail>>,
    pub model: Option<String>,
    pub reasoning_effort: Option<String>,
    pub trace_id: Option<String>,
    pub trace_sensitive: bool,
    pub tracing_disabled: bool,
    pub conversation_id: Option<String>,
    pub previous_response_id: Option<String>,
    pub auto_previous_response_id: bool,
    pub session: Option<Arc<dyn Session>>,
    pub session_input_callback: Option<Arc<dyn SessionInputCallback>>,
    pub approval_timeout_ms: Option<u64>,
    /// File-search config, merged onto the thread's `file_search` metadata
    /// key right-biased per-key at `RunnerEntry::prepare` time (§4.1 step 3).
    pub file_search: HashMap<String, Value>,
}

impl std::fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunConfig")
            .field("max_turns", &self.max_turns)
            .field("model", &self.model)
            .field("conversation_id", &self.conversation_id)
            .field("previous_response_id", &self.previous_response_id)
            .field("auto_previous_response_id", &self.auto_previous_response_id)
            .field("has_session", &self.session.is_some())
            .finish()
    }
}

impl RunConfig {
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder::default()
    }
}

/// Consuming builder for [`RunConfig`]. `build()` validates the one
/// invariant the data model names explicitly: `max_turns >= 1`.
#[derive(Default)]
pub struct RunConfigBuilder {
    config: RunConfig,
}

impl RunConfigBuilder {
    pub fn max_turns(mut self, n: u32) -> Self {
        self.config.max_turns = n;
        self
    }

    pub fn input_guardrail(mut self, g: Guardrail) -> Self {
        self.config.input_guardrails.push(Arc::new(g));
        self
    }

    pub fn output_guardrail(mut self, g: Guardrail) -> Self {
        self.config.output_guardrails.push(Arc::new(g));
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn reasoning_effort(mut self, effort: impl Into<String>) -> Self {
        self.config.reasoning_effort = Some(effort.into());
        self
    }

    pub fn file_search(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.file_search.insert(key.into(), value.into());
        self
    }

    pub fn conversation_id(mut self, id: impl Into<String>) -> Self {
        self.config.conversation_id = Some(id.into());
        self
    }

    pub fn auto_previous_response_id(mut self, auto: bool) -> Self {
        self.config.auto_previous_response_id = auto;
        self
    }

    pub fn session(mut self, session: Arc<dyn Session>) -> Self {
        self.config.session = Some(session);
        self
    }

    pub fn approval_timeout_ms(mut self, ms: u64) -> Self {
        self.config.approval_timeout_ms = Some(ms);
        self
    }

    pub fn build(mut self) -> crate::error::Result<RunConfig> {
        if self.config.max_turns == 0 {
            self.config.max_turns = 10;
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_max_turns_when_unset() {
        let cfg = RunConfig::builder().build().unwrap();
        assert_eq!(cfg.max_turns, 10);
    }

    #[test]
    fn builder_honors_explicit_max_turns() {
        let cfg = RunConfig::builder().max_turns(3).build().unwrap();
        assert_eq!(cfg.max_turns, 3);
    }

    #[test]
    fn reset_tool_choice_drops_forced_choice_after_tool_results() {
        let mut opts = TurnOpts {
            tool_choice: Some("required".into()),
            ..Default::default()
        };
        opts.apply_reset_tool_choice(true, true);
        assert!(opts.tool_choice.is_none());
    }

    #[test]
    fn reset_tool_choice_keeps_choice_without_tool_results() {
        let mut opts = TurnOpts {
            tool_choice: Some("required".into()),
            ..Default::default()
        };
        opts.apply_reset_tool_choice(true, false);
        assert_eq!(opts.tool_choice.as_deref(), Some("required"));
    }

    #[test]
    fn input_validity() {
        assert!(!Input::Text(String::new()).is_valid());
        assert!(Input::Text("hi".into()).is_valid());
        assert!(!Input::Blocks(vec![]).is_valid());
    }
}
