/// Closed error-kind taxonomy shared across the run-loop engine.
///
/// Every halting condition the engine can produce maps to exactly one of
/// these variants; nothing public returns a bare `String` or `Box<dyn
/// Error>`.
#[derive(thiserror::Error, Debug, Clone)]
pub enum RunError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid transport response: {0}")]
    InvalidTransport(String),

    #[error("guardrail {guardrail} rejected at {stage}: {message}")]
    GuardrailReject {
        stage: String,
        guardrail: String,
        message: String,
    },

    #[error("guardrail {guardrail} tripwire at {stage}: {message}")]
    GuardrailTripwire {
        stage: String,
        guardrail: String,
        message: String,
    },

    #[error("tool call {call_id} ({tool_name}) denied: {reason}")]
    ApprovalDenied {
        call_id: String,
        tool_name: String,
        reason: String,
    },

    #[error("approval hook failed: {0}")]
    ApprovalHookFailed(String),

    #[error("tool {tool_name} failed: {message}")]
    ToolFailure { tool_name: String, message: String },

    #[error("exceeded max_turns ({max_turns}) with an outstanding continuation")]
    MaxTurnsExceeded {
        max_turns: u32,
        continuation_token: Option<String>,
    },

    #[error("turn failed: {0}")]
    TurnFailed(String),

    #[error("transport execution failed: {0}")]
    ExecFailed(String),

    #[error("invalid tool_use_behavior result: {0}")]
    InvalidToolUseBehavior(String),

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("{0}")]
    Other(String),
}

impl RunError {
    /// Normalize an arbitrary failure into a `RunError`, the way
    /// [`RunError::Other`] catches anything that does not already carry a
    /// closed kind.
    pub fn other(message: impl std::fmt::Display) -> Self {
        RunError::Other(message.to_string())
    }

    /// Short machine-readable kind tag, useful for logging and for callers
    /// that want to match on kind without destructuring the payload.
    pub fn kind(&self) -> &'static str {
        match self {
            RunError::InvalidInput(_) => "invalid_input",
            RunError::InvalidTransport(_) => "invalid_transport",
            RunError::GuardrailReject { .. } => "guardrail_reject",
            RunError::GuardrailTripwire { .. } => "guardrail_tripwire",
            RunError::ApprovalDenied { .. } => "approval_denied",
            RunError::ApprovalHookFailed(_) => "approval_hook_failed",
            RunError::ToolFailure { .. } => "tool_failure",
            RunError::MaxTurnsExceeded { .. } => "max_turns_exceeded",
            RunError::TurnFailed(_) => "turn_failed",
            RunError::ExecFailed(_) => "exec_failed",
            RunError::InvalidToolUseBehavior(_) => "invalid_tool_use_behavior",
            RunError::UnsupportedFeature(_) => "unsupported_feature",
            RunError::Other(_) => "unknown",
        }
    }
}

impl From<serde_json::Error> for RunError {
    fn from(e: serde_json::Error) -> Self {
        RunError::InvalidTransport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RunError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_match_closed_taxonomy() {
        assert_eq!(RunError::InvalidInput("x".into()).kind(), "invalid_input");
        assert_eq!(
            RunError::MaxTurnsExceeded {
                max_turns: 3,
                continuation_token: None
            }
            .kind(),
            "max_turns_exceeded"
        );
        assert_eq!(RunError::other("boom").kind(), "unknown");
    }
}
