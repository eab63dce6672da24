use agentrun_domain::agent::{Agent, ToolResultSummary};
use agentrun_domain::approval::{ApprovalDecision, ApprovalRequest, ApprovalSource};
use agentrun_domain::guardrail::{GuardrailContext, GuardrailStage, ToolGuardrailEvent};
use agentrun_domain::tool::ToolOutput;
use agentrun_domain::{Event, RunConfig, RunError, Thread};
use agentrun_guardrails::engine::{run_tool_guardrails, GuardrailHooks, NoopHooks, ToolGuardrailPass};
use async_trait::async_trait;
use serde_json::Value;

/// Ambient information handed to a tool's `invoke`.
#[derive(Debug, Clone, Default)]
pub struct ToolInvokeContext {
    pub thread_metadata: std::collections::HashMap<String, Value>,
    pub attempt: u32,
    pub retry: bool,
}

/// The registry of concrete tool implementations. A tool that fails
/// returns `Err(reason)`; the pipeline records that as a
/// `PendingToolFailure` and continues — it does not halt the run.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    async fn invoke(
        &self,
        tool_name: &str,
        arguments: &Value,
        context: &ToolInvokeContext,
    ) -> Result<Value, String>;
}

/// Optional streaming hooks; `None` entries are `NoopHooks`-equivalent.
pub trait ToolPipelineHooks: Send + Sync {
    fn on_approval(&self, tool_name: &str, call_id: Option<&str>, decision: &ApprovalDecision);
}

pub struct NoopPipelineHooks;
impl ToolPipelineHooks for NoopPipelineHooks {
    fn on_approval(&self, _tool_name: &str, _call_id: Option<&str>, _decision: &ApprovalDecision) {}
}

/// Run the tool pipeline over every `ToolCallRequested` event in `events`,
/// in order: dedup -> input guardrails -> approval -> invoke -> output
/// guardrails -> record.
///
/// Returns the per-call summaries the agent's `tool_use_behavior` decides
/// over. A `GuardrailTripwire`/`RaiseException` reject or an approval
/// denial halts the whole pipeline immediately (`Err`); a tool invocation
/// failure does not (`Ok`, recorded as a pending failure).
#[allow(clippy::too_many_arguments)]
pub async fn run_tool_pipeline(
    thread: &mut Thread,
    events: &[Event],
    agent: &Agent,
    run_config: &RunConfig,
    tools: &dyn ToolRegistry,
    approval_source: Option<&ApprovalSource>,
    attempt: u32,
    guardrail_hooks: Option<&dyn GuardrailHooks>,
    pipeline_hooks: Option<&dyn ToolPipelineHooks>,
) -> Result<Vec<ToolResultSummary>, RunError> {
    let guardrail_hooks = guardrail_hooks.unwrap_or(&NoopHooks);
    let pipeline_hooks = pipeline_hooks.unwrap_or(&NoopPipelineHooks);
    let mut results = Vec::new();

    for event in events {
        let Event::ToolCallRequested {
            call_id,
            tool_name,
            arguments,
            requires_approval,
            approved,
            ..
        } = event
        else {
            continue;
        };

        if thread.has_pending_for(call_id.as_deref(), tool_name, arguments) {
            continue;
        }

        let ctx = GuardrailContext {
            agent_name: agent.name.clone(),
            attempt,
        };
        let guardrail_event = ToolGuardrailEvent {
            call_id: call_id.clone(),
            tool_name: tool_name.clone(),
        };

        // 1. Input guardrails (agent-only; run_config does not merge into
        // the tool stage, unlike plain input/output guardrails).
        let pass = run_tool_guardrails(
            GuardrailStage::ToolInput,
            &agent.tool_input_guardrails,
            &guardrail_event,
            arguments,
            &ctx,
            guardrail_hooks,
        )
        .await?;

        if let ToolGuardrailPass::RejectContent(message) = pass {
            thread.record_tool_output(
                call_id.clone(),
                tool_name.clone(),
                arguments.clone(),
                ToolOutput::text(message.clone()),
            );
            results.push(ToolResultSummary {
                call_id: call_id.clone(),
                tool_name: tool_name.clone(),
                is_error: false,
                output_text: message,
            });
            continue;
        }

        // 2. Approval.
        let already_approved = !*requires_approval || approved.unwrap_or(false);
        let decision = if already_approved {
            ApprovalDecision::Allow
        } else {
            let request = ApprovalRequest {
                call_id: call_id.clone(),
                tool_name: tool_name.clone(),
                arguments: arguments.clone(),
                requires_approval: *requires_approval,
            };
            agentrun_guardrails::review(
                approval_source,
                &request,
                run_config.approval_timeout_ms,
                &agentrun_guardrails::approvals::NoopTelemetry,
            )
            .await
        };
        pipeline_hooks.on_approval(tool_name, call_id.as_deref(), &decision);

        match decision {
            ApprovalDecision::Allow => {}
            ApprovalDecision::Deny(reason) => {
                tracing::warn!(
                    call_id = call_id.as_deref().unwrap_or(""),
                    tool_name = %tool_name,
                    reason = %reason,
                    "tool call denied"
                );
                return Err(RunError::ApprovalDenied {
                    call_id: call_id.clone().unwrap_or_default(),
                    tool_name: tool_name.clone(),
                    reason,
                });
            }
            ApprovalDecision::Async { .. } => {
                return Err(RunError::ApprovalHookFailed(
                    "approval hook left an unresolved async decision".into(),
                ));
            }
        }

        // 3. Invoke.
        let invoke_ctx = ToolInvokeContext {
            thread_metadata: thread.metadata.clone(),
            attempt,
            retry: attempt > 1,
        };
        tracing::debug!(
            call_id = call_id.as_deref().unwrap_or(""),
            tool_name = %tool_name,
            "dispatching tool call"
        );
        let invoke_result = tools.invoke(tool_name, arguments, &invoke_ctx).await;

        let normalized = match invoke_result {
            Ok(value) => ToolOutput::normalize(value),
            Err(reason) => {
                tracing::warn!(
                    call_id = call_id.as_deref().unwrap_or(""),
                    tool_name = %tool_name,
                    reason = %reason,
                    "tool call failed"
                );
                thread.record_tool_failure(
                    call_id.clone(),
                    tool_name.clone(),
                    arguments.clone(),
                    reason.clone(),
                );
                results.push(ToolResultSummary {
                    call_id: call_id.clone(),
                    tool_name: tool_name.clone(),
                    is_error: true,
                    output_text: reason,
                });
                continue;
            }
        };

        // 4. Output guardrails (agent-only, same rule as input above).
        let output_value = Value::String(normalized.as_text());
        let pass = run_tool_guardrails(
            GuardrailStage::ToolOutput,
            &agent.tool_output_guardrails,
            &guardrail_event,
            &output_value,
            &ctx,
            guardrail_hooks,
        )
        .await?;

        let final_output = match pass {
            ToolGuardrailPass::Ok => normalized,
            ToolGuardrailPass::RejectContent(message) => ToolOutput::text(message),
        };

        results.push(ToolResultSummary {
            call_id: call_id.clone(),
            tool_name: tool_name.clone(),
            is_error: false,
            output_text: final_output.as_text(),
        });
        thread.record_tool_output(call_id.clone(), tool_name.clone(), arguments.clone(), final_output);
    }

    Ok(results)
}
