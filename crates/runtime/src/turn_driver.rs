use crate::event_fold::{self, FoldOpts};
use crate::tool_pipeline::{run_tool_pipeline, ToolRegistry};
use agentrun_domain::agent::{ToolUseContext, ToolUseDecisionResult};
use agentrun_domain::approval::ApprovalSource;
use agentrun_domain::guardrail::GuardrailContext;
use agentrun_domain::{Agent, Event, Input, RawResult, RunConfig, RunError, RunResult, Thread, TurnOpts};
use agentrun_transport::Transport;
use std::time::Duration;
use tracing::Instrument;

/// Default exponential backoff between continuation turns: `100 *
/// 2^(attempt-1)` ms.
pub async fn default_backoff(attempt: u32) {
    let ms = 100u64.saturating_mul(1u64 << attempt.saturating_sub(1).min(20));
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Run a blocking multi-turn conversation to completion.
///
/// Loops turns against `transport` until the agent's `tool_use_behavior`
/// produces a final output, the transport stops asking for continuation,
/// or `run_config.max_turns` is exhausted while a continuation is still
/// outstanding.
pub struct TurnDriver<'a> {
    pub transport: &'a dyn Transport,
    pub tools: &'a dyn ToolRegistry,
    pub agent: &'a Agent,
    pub run_config: &'a RunConfig,
    pub approval_source: Option<&'a ApprovalSource>,
}

impl<'a> TurnDriver<'a> {
    pub async fn run(&self, mut thread: Thread, input: Input) -> Result<RunResult, RunError> {
        agentrun_guardrails::run_guardrails(
            agentrun_domain::GuardrailStage::Input,
            &[&self.agent.input_guardrails[..], &self.run_config.input_guardrails[..]].concat(),
            &input_to_value(&input),
            &GuardrailContext {
                agent_name: self.agent.name.clone(),
                attempt: 1,
            },
            &agentrun_guardrails::NoopHooks,
        )
        .await?;

        let mut turn_opts = TurnOpts::default();
        let mut all_events: Vec<Event> = Vec::new();
        let mut attempt: u32 = 1;

        loop {
            let turn_span = tracing::info_span!(
                "turn",
                run_attempt = attempt,
                thread_id = %thread.thread_id.clone().unwrap_or_default()
            );

            let turn_events = self
                .transport
                .run_turn(&thread, &input, &turn_opts)
                .instrument(tracing::debug_span!(parent: &turn_span, "llm_call"))
                .await
                .map_err(|e| RunError::ExecFailed(e.to_string()))?;

            if let Some(failure) = turn_events.iter().find_map(|e| match e {
                Event::TurnFailed { error, .. } => Some(error.clone()),
                Event::TurnCompleted {
                    status: Some(status),
                    error,
                    ..
                } if status == "failed" || status == "error" => {
                    Some(error.clone().unwrap_or(serde_json::Value::Null))
                }
                _ => None,
            }) {
                return Err(RunError::TurnFailed(failure.to_string()));
            }

            let early_exit = turn_events.iter().any(|e| {
                matches!(e, Event::TurnCompleted { status: Some(s), .. } if s == "early_exit")
            });

            all_events.extend(turn_events.iter().cloned());

            let (next_thread, response, usage) =
                event_fold::reduce(thread, &turn_events, &FoldOpts::default());
            thread = next_thread;

            let tool_results = run_tool_pipeline(
                &mut thread,
                &turn_events,
                self.agent,
                self.run_config,
                self.tools,
                self.approval_source,
                attempt,
                None,
                None,
            )
            .instrument(turn_span.clone())
            .await?;

            let had_tool_results = !tool_results.is_empty();
            turn_opts.apply_reset_tool_choice(self.agent.reset_tool_choice, had_tool_results);

            let decision = decide(self.agent, self.run_config, attempt, &tool_results);

            if let Some(final_text) = decision {
                agentrun_guardrails::run_guardrails(
                    agentrun_domain::GuardrailStage::Output,
                    &[&self.agent.output_guardrails[..], &self.run_config.output_guardrails[..]].concat(),
                    &serde_json::Value::String(final_text.clone()),
                    &GuardrailContext {
                        agent_name: self.agent.name.clone(),
                        attempt,
                    },
                    &agentrun_guardrails::NoopHooks,
                )
                .instrument(turn_span.clone())
                .await?;

                thread.continuation_token = None;
                let raw = RawResult {
                    tool_outputs: thread.pending_tool_outputs.clone(),
                    tool_failures: thread.pending_tool_failures.clone(),
                    structured_output: None,
                };
                thread.clear_pending_tool_state();
                if early_exit {
                    thread.clear_run_state();
                }
                let last_response_id = event_fold::last_response_id(&all_events);
                return Ok(RunResult {
                    thread,
                    events: all_events,
                    final_response: Some(agentrun_domain::event::AgentMessage {
                        id: None,
                        text: final_text,
                        parsed: None,
                    }),
                    usage,
                    raw,
                    attempts: attempt,
                    last_response_id,
                });
            }

            if thread.has_continuation() {
                if attempt < self.run_config.max_turns {
                    tracing::debug!(parent: &turn_span, run_attempt = attempt, "continuation requested, scheduling next turn");
                    default_backoff(attempt).await;
                    attempt += 1;
                    continue;
                }
                tracing::warn!(
                    parent: &turn_span,
                    run_attempt = attempt,
                    max_turns = self.run_config.max_turns,
                    "max_turns exceeded with continuation still outstanding"
                );
                return Err(RunError::MaxTurnsExceeded {
                    max_turns: self.run_config.max_turns,
                    continuation_token: thread.continuation_token.clone(),
                });
            }

            agentrun_guardrails::run_guardrails(
                agentrun_domain::GuardrailStage::Output,
                &[&self.agent.output_guardrails[..], &self.run_config.output_guardrails[..]].concat(),
                &response
                    .as_ref()
                    .map(|m| serde_json::Value::String(m.text.clone()))
                    .unwrap_or(serde_json::Value::Null),
                &GuardrailContext {
                    agent_name: self.agent.name.clone(),
                    attempt,
                },
                &agentrun_guardrails::NoopHooks,
            )
            .instrument(turn_span.clone())
            .await?;

            let raw = RawResult {
                tool_outputs: thread.pending_tool_outputs.clone(),
                tool_failures: thread.pending_tool_failures.clone(),
                structured_output: None,
            };
            thread.clear_pending_tool_state();
            if early_exit {
                thread.clear_run_state();
            }
            let last_response_id = event_fold::last_response_id(&all_events);
            return Ok(RunResult {
                thread,
                events: all_events,
                final_response: response,
                usage,
                raw,
                attempts: attempt,
                last_response_id,
            });
        }
    }
}

fn input_to_value(input: &Input) -> serde_json::Value {
    match input {
        Input::Text(s) => serde_json::Value::String(s.clone()),
        Input::Blocks(blocks) => serde_json::to_value(blocks).unwrap_or(serde_json::Value::Null),
    }
}

/// Evaluate the agent's `tool_use_behavior` against this turn's tool
/// results. Returns `Some(final_output)` to stop here, `None` to continue
/// the loop (run the LLM again).
fn decide(
    agent: &Agent,
    run_config: &RunConfig,
    attempt: u32,
    results: &[agentrun_domain::agent::ToolResultSummary],
) -> Option<String> {
    use agentrun_domain::agent::ToolUseBehavior;

    if results.is_empty() {
        return None;
    }

    match &agent.tool_use_behavior {
        ToolUseBehavior::RunLlmAgain => None,
        ToolUseBehavior::StopOnFirstTool => Some(results[0].output_text.clone()),
        ToolUseBehavior::StopAtToolNames(names) => results
            .iter()
            .find(|r| names.contains(&r.tool_name))
            .map(|r| r.output_text.clone()),
        ToolUseBehavior::Custom(decision) => {
            let ctx = ToolUseContext {
                agent_name: agent.name.clone(),
                attempt,
            };
            let _ = run_config;
            match decision.decide(&ctx, results) {
                ToolUseDecisionResult::Continue => None,
                ToolUseDecisionResult::Final(text) => Some(text),
            }
        }
    }
}
