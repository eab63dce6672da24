//! Guardrail and approval execution: the policy layer the tool pipeline and
//! the plain input/output stages dispatch through.

pub mod approvals;
pub mod engine;

pub use approvals::{review, ApprovalTelemetry, NoopTelemetry};
pub use engine::{run_guardrails, run_tool_guardrails, GuardrailHooks, NoopHooks, ToolGuardrailPass};
