use async_trait::async_trait;
use serde_json::Value;

/// The outcome of an approval review for a single tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalDecision {
    Allow,
    Deny(String),
    /// The hook wants to resolve this asynchronously; `reference` is an
    /// opaque handle the hook itself understands (e.g. a ticket id).
    Async {
        reference: String,
        metadata: Option<Value>,
    },
}

/// What is being approved.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub call_id: Option<String>,
    pub tool_name: String,
    pub arguments: Value,
    /// True when the originating event already decided the call needs no
    /// approval round-trip (`requires_approval == false` or
    /// `approved == true`); callers short-circuit to `Allow` in this case
    /// before ever calling a policy or hook.
    pub requires_approval: bool,
}

/// A synchronous policy: given the request, decide immediately.
pub trait ApprovalPolicy: Send + Sync {
    fn review(&self, request: &ApprovalRequest) -> ApprovalDecision;
}

/// An asynchronous hook, optionally able to prepare additional context and
/// optionally able to await its own `Async` decisions.
#[async_trait]
pub trait ApprovalHook: Send + Sync {
    async fn review(&self, request: &ApprovalRequest) -> ApprovalDecision;

    /// Resolve a previously-returned `Async` decision. Hooks that cannot
    /// support this return `None`; per the decided policy (see the crate's
    /// design notes) the caller then treats the pending decision as denied
    /// rather than stalling the run.
    async fn await_async(
        &self,
        _reference: &str,
        _timeout_ms: u64,
    ) -> Option<ApprovalDecision> {
        None
    }
}

/// Either half of the approval dispatch: a plain policy or a hook.
#[derive(Clone)]
pub enum ApprovalSource {
    Policy(std::sync::Arc<dyn ApprovalPolicy>),
    Hook(std::sync::Arc<dyn ApprovalHook>),
}

impl std::fmt::Debug for ApprovalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApprovalSource::Policy(_) => write!(f, "ApprovalSource::Policy(..)"),
            ApprovalSource::Hook(_) => write!(f, "ApprovalSource::Hook(..)"),
        }
    }
}

/// Default approval timeout, matching the documented 30s default.
pub const DEFAULT_APPROVAL_TIMEOUT_MS: u64 = 30_000;
