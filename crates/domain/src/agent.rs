use crate::guardrail::{Guardrail, ToolGuardrail};
use std::collections::HashSet;
use std::sync::Arc;

/// A single tool's recorded result, as seen by a `tool_use_behavior`
/// decision after the tool pipeline has run.
#[derive(Debug, Clone)]
pub struct ToolResultSummary {
    pub call_id: Option<String>,
    pub tool_name: String,
    pub is_error: bool,
    pub output_text: String,
}

/// Ambient context handed to a custom `tool_use_behavior` decision.
#[derive(Debug, Clone)]
pub struct ToolUseContext {
    pub agent_name: String,
    pub attempt: u32,
}

/// What a custom `tool_use_behavior` decided.
#[derive(Debug, Clone)]
pub enum ToolUseDecisionResult {
    Continue,
    Final(String),
}

/// The canonical 2-arity signature for a custom tool-use-behavior decision:
/// `(context, results) -> Decision`. Other arities some hosts might want to
/// offer (0/1-arity convenience closures) should be adapted down to this
/// single shape rather than detected dynamically.
pub trait ToolUseDecision: Send + Sync {
    fn decide(&self, ctx: &ToolUseContext, results: &[ToolResultSummary]) -> ToolUseDecisionResult;
}

impl<F> ToolUseDecision for F
where
    F: Fn(&ToolUseContext, &[ToolResultSummary]) -> ToolUseDecisionResult + Send + Sync,
{
    fn decide(&self, ctx: &ToolUseContext, results: &[ToolResultSummary]) -> ToolUseDecisionResult {
        self(ctx, results)
    }
}

/// Whether a turn that produced tool calls should loop the model again or
/// treat one of the tool outputs as the run's final output.
#[derive(Clone)]
pub enum ToolUseBehavior {
    RunLlmAgain,
    StopOnFirstTool,
    StopAtToolNames(HashSet<String>),
    Custom(Arc<dyn ToolUseDecision>),
}

impl std::fmt::Debug for ToolUseBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolUseBehavior::RunLlmAgain => write!(f, "RunLlmAgain"),
            ToolUseBehavior::StopOnFirstTool => write!(f, "StopOnFirstTool"),
            ToolUseBehavior::StopAtToolNames(names) => {
                write!(f, "StopAtToolNames({names:?})")
            }
            ToolUseBehavior::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl Default for ToolUseBehavior {
    fn default() -> Self {
        ToolUseBehavior::RunLlmAgain
    }
}

/// A named agent: its handoffs, its guardrails, and its tool-loop policy.
#[derive(Debug, Clone, Default)]
pub struct Agent {
    pub name: String,
    pub handoffs: Vec<String>,
    pub input_guardrails: Vec<Arc<Guardrail>>,
    pub output_guardrails: Vec<Arc<Guardrail>>,
    pub tool_input_guardrails: Vec<Arc<ToolGuardrail>>,
    pub tool_output_guardrails: Vec<Arc<ToolGuardrail>>,
    pub tool_use_behavior: ToolUseBehavior,
    /// When true and the turn produced tool results, drop any forced
    /// `tool_choice` from the next turn's options so the model is not
    /// forced to call the same tool again.
    pub reset_tool_choice: bool,
}

impl Agent {
    pub fn builder(name: impl Into<String>) -> AgentBuilder {
        AgentBuilder::new(name)
    }
}

/// Consuming builder for [`Agent`], matching the teacher's config builder
/// idiom: construct field-by-field, validate nothing here (an `Agent` has
/// no invariants that can be violated at construction time).
#[derive(Default)]
pub struct AgentBuilder {
    agent: Agent,
}

impl AgentBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            agent: Agent {
                name: name.into(),
                ..Default::default()
            },
        }
    }

    pub fn handoff(mut self, name: impl Into<String>) -> Self {
        self.agent.handoffs.push(name.into());
        self
    }

    pub fn input_guardrail(mut self, g: Guardrail) -> Self {
        self.agent.input_guardrails.push(Arc::new(g));
        self
    }

    pub fn output_guardrail(mut self, g: Guardrail) -> Self {
        self.agent.output_guardrails.push(Arc::new(g));
        self
    }

    pub fn tool_input_guardrail(mut self, g: ToolGuardrail) -> Self {
        self.agent.tool_input_guardrails.push(Arc::new(g));
        self
    }

    pub fn tool_output_guardrail(mut self, g: ToolGuardrail) -> Self {
        self.agent.tool_output_guardrails.push(Arc::new(g));
        self
    }

    pub fn tool_use_behavior(mut self, behavior: ToolUseBehavior) -> Self {
        self.agent.tool_use_behavior = behavior;
        self
    }

    pub fn reset_tool_choice(mut self, reset: bool) -> Self {
        self.agent.reset_tool_choice = reset;
        self
    }

    pub fn build(self) -> Agent {
        self.agent
    }
}
