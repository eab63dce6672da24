use agentrun_domain::approval::{
    ApprovalDecision, ApprovalRequest, ApprovalSource, DEFAULT_APPROVAL_TIMEOUT_MS,
};
use std::time::Duration;

/// Telemetry sink for approval review outcomes, mirroring the teacher's
/// `approval.*` event names (`approval.requested`, `approval.approved`,
/// `approval.denied`, `approval.timeout`).
pub trait ApprovalTelemetry: Send + Sync {
    fn emit(&self, event: &str, call_id: Option<&str>, tool_name: &str, detail: Option<&str>);
}

pub struct NoopTelemetry;
impl ApprovalTelemetry for NoopTelemetry {
    fn emit(&self, _event: &str, _call_id: Option<&str>, _tool_name: &str, _detail: Option<&str>) {}
}

/// Review a single tool call's approval. Short-circuits to `Allow` when the
/// originating event already marked the call as not requiring approval, or
/// already approved.
pub async fn review(
    source: Option<&ApprovalSource>,
    request: &ApprovalRequest,
    timeout_ms: Option<u64>,
    telemetry: &dyn ApprovalTelemetry,
) -> ApprovalDecision {
    if !request.requires_approval {
        return ApprovalDecision::Allow;
    }
    let Some(source) = source else {
        return ApprovalDecision::Allow;
    };

    telemetry.emit("approval.requested", request.call_id.as_deref(), &request.tool_name, None);

    let decision = match source {
        ApprovalSource::Policy(policy) => policy.review(request),
        ApprovalSource::Hook(hook) => {
            let decision = hook.review(request).await;
            match decision {
                ApprovalDecision::Async { reference, .. } => {
                    let timeout = Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_APPROVAL_TIMEOUT_MS));
                    match tokio::time::timeout(timeout, hook.await_async(&reference, timeout.as_millis() as u64)).await {
                        Ok(Some(resolved)) => resolved,
                        Ok(None) => {
                            // Hook returned Async but cannot await it: the
                            // decided policy (see crate docs) is to deny
                            // rather than stall the run.
                            ApprovalDecision::Deny(
                                "approval hook returned an async decision but does not support awaiting it".into(),
                            )
                        }
                        Err(_elapsed) => {
                            telemetry.emit(
                                "approval.timeout",
                                request.call_id.as_deref(),
                                &request.tool_name,
                                None,
                            );
                            ApprovalDecision::Deny("approval timeout".into())
                        }
                    }
                }
                other => other,
            }
        }
    };

    match &decision {
        ApprovalDecision::Allow => {
            telemetry.emit("approval.approved", request.call_id.as_deref(), &request.tool_name, None);
        }
        ApprovalDecision::Deny(reason) => {
            telemetry.emit(
                "approval.denied",
                request.call_id.as_deref(),
                &request.tool_name,
                Some(reason),
            );
        }
        ApprovalDecision::Async { .. } => {}
    }

    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentrun_domain::approval::ApprovalPolicy;

    fn request(requires_approval: bool) -> ApprovalRequest {
        ApprovalRequest {
            call_id: Some("c1".into()),
            tool_name: "exec".into(),
            arguments: serde_json::json!({}),
            requires_approval,
        }
    }

    #[tokio::test]
    async fn skips_review_when_not_required() {
        let decision = review(None, &request(false), None, &NoopTelemetry).await;
        assert_eq!(decision, ApprovalDecision::Allow);
    }

    #[tokio::test]
    async fn nil_source_allows_when_required() {
        let decision = review(None, &request(true), None, &NoopTelemetry).await;
        assert_eq!(decision, ApprovalDecision::Allow);
    }

    struct AlwaysDeny;
    impl ApprovalPolicy for AlwaysDeny {
        fn review(&self, _r: &ApprovalRequest) -> ApprovalDecision {
            ApprovalDecision::Deny("no".into())
        }
    }

    #[tokio::test]
    async fn policy_denial_is_returned() {
        let source = ApprovalSource::Policy(std::sync::Arc::new(AlwaysDeny));
        let decision = review(Some(&source), &request(true), None, &NoopTelemetry).await;
        assert_eq!(decision, ApprovalDecision::Deny("no".into()));
    }
}
