use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// What stage of the pipeline a guardrail ran at; carried into
/// [`crate::event::SemanticStreamEvent::GuardrailResult`] and error payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardrailStage {
    Input,
    Output,
    ToolInput,
    ToolOutput,
}

impl GuardrailStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardrailStage::Input => "input",
            GuardrailStage::Output => "output",
            GuardrailStage::ToolInput => "tool_input",
            GuardrailStage::ToolOutput => "tool_output",
        }
    }
}

/// What a guardrail function may do when it disagrees with a payload, set
/// once per guardrail at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardrailBehavior {
    /// Replace the payload with the rejection message; the run continues.
    /// Only meaningful for tool guardrails — a plain input/output guardrail
    /// reject always halts the run.
    RejectContent,
    /// Halt the run with a `GuardrailReject`/`GuardrailTripwire` error.
    RaiseException,
}

/// The result of running a single guardrail check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardrailOutcome {
    Ok,
    Reject(String),
    Tripwire(String),
}

/// Ambient information handed to every guardrail and approval check.
#[derive(Debug, Clone, Default)]
pub struct GuardrailContext {
    pub agent_name: String,
    pub attempt: u32,
}

#[async_trait]
pub trait GuardrailCheck: Send + Sync {
    async fn check(&self, payload: &Value, ctx: &GuardrailContext) -> GuardrailOutcome;
}

/// A guardrail over a plain text/JSON payload (run at the input or output
/// stage of a run).
#[derive(Clone)]
pub struct Guardrail {
    pub name: String,
    pub run_in_parallel: bool,
    pub behavior: GuardrailBehavior,
    pub check: Arc<dyn GuardrailCheck>,
}

impl std::fmt::Debug for Guardrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guardrail")
            .field("name", &self.name)
            .field("run_in_parallel", &self.run_in_parallel)
            .field("behavior", &self.behavior)
            .finish()
    }
}

impl Guardrail {
    pub fn new(
        name: impl Into<String>,
        behavior: GuardrailBehavior,
        run_in_parallel: bool,
        check: Arc<dyn GuardrailCheck>,
    ) -> Self {
        Self {
            name: name.into(),
            run_in_parallel,
            behavior,
            check,
        }
    }
}

/// Extra context a tool guardrail sees on top of the plain payload: which
/// call it is evaluating.
#[derive(Debug, Clone)]
pub struct ToolGuardrailEvent {
    pub call_id: Option<String>,
    pub tool_name: String,
}

#[async_trait]
pub trait ToolGuardrailCheck: Send + Sync {
    async fn check(
        &self,
        event: &ToolGuardrailEvent,
        payload: &Value,
        ctx: &GuardrailContext,
    ) -> GuardrailOutcome;
}

/// A guardrail over a tool call's arguments (tool-input stage) or its
/// output (tool-output stage).
#[derive(Clone)]
pub struct ToolGuardrail {
    pub name: String,
    pub run_in_parallel: bool,
    pub behavior: GuardrailBehavior,
    pub check: Arc<dyn ToolGuardrailCheck>,
}

impl std::fmt::Debug for ToolGuardrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolGuardrail")
            .field("name", &self.name)
            .field("run_in_parallel", &self.run_in_parallel)
            .field("behavior", &self.behavior)
            .finish()
    }
}

impl ToolGuardrail {
    pub fn new(
        name: impl Into<String>,
        behavior: GuardrailBehavior,
        run_in_parallel: bool,
        check: Arc<dyn ToolGuardrailCheck>,
    ) -> Self {
        Self {
            name: name.into(),
            run_in_parallel,
            behavior,
            check,
        }
    }
}

/// Adapts a plain closure into a [`GuardrailCheck`], for the common case of
/// a synchronous-feeling pure predicate.
pub struct FnGuardrail<F>(pub F);

#[async_trait]
impl<F> GuardrailCheck for FnGuardrail<F>
where
    F: Fn(&Value, &GuardrailContext) -> GuardrailOutcome + Send + Sync,
{
    async fn check(&self, payload: &Value, ctx: &GuardrailContext) -> GuardrailOutcome {
        (self.0)(payload, ctx)
    }
}
