//! Core data model for the agent run-loop engine: the types every other
//! crate (`agentrun-guardrails`, `agentrun-transport`, `agentrun-runtime`)
//! builds on.

pub mod agent;
pub mod approval;
pub mod dedup;
pub mod error;
pub mod event;
pub mod guardrail;
pub mod result;
pub mod run_config;
pub mod stream;
pub mod thread;
pub mod tool;
pub mod usage;

pub use agent::{Agent, AgentBuilder, ToolUseBehavior, ToolUseContext, ToolUseDecisionResult};
pub use error::{Result, RunError};
pub use event::{AgentMessage, Event, SemanticStreamEvent};
pub use guardrail::{Guardrail, GuardrailBehavior, GuardrailContext, GuardrailOutcome, GuardrailStage, ToolGuardrail};
pub use result::{RawResult, RunResult};
pub use run_config::{Input, InputBlock, RunConfig, RunConfigBuilder, TurnOpts};
pub use thread::Thread;
pub use usage::Usage;
