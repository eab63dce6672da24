use crate::event_fold::{self, FoldOpts};
use crate::stream_control::{CancelMode, StreamControl};
use crate::stream_queue::StreamQueue;
use crate::tool_pipeline::{run_tool_pipeline, ToolPipelineHooks, ToolRegistry};
use agentrun_domain::agent::ToolUseContext;
use agentrun_domain::approval::{ApprovalDecision, ApprovalSource};
use agentrun_domain::guardrail::{GuardrailContext, GuardrailOutcome, GuardrailStage};
use agentrun_domain::{Agent, Event, Input, RawResult, RunConfig, RunError, RunResult, SemanticStreamEvent, Thread, TurnOpts};
use agentrun_guardrails::engine::GuardrailHooks;
use agentrun_transport::Transport;
use futures_util::StreamExt;
use std::sync::Arc;
use tracing::Instrument;

/// Pushes `GuardrailResult` and `ToolApproval` semantic events to the
/// queue as the tool pipeline runs, per the streaming design (errors
/// surface as a queue error-close only for transport/internal failures;
/// guardrail/approval rejections get a descriptive event first).
struct StreamingHooks {
    queue: Arc<StreamQueue>,
}

impl GuardrailHooks for StreamingHooks {
    fn on_result(&self, stage: GuardrailStage, guardrail: &str, outcome: &GuardrailOutcome) {
        let (result, message) = match outcome {
            GuardrailOutcome::Ok => ("ok", None),
            GuardrailOutcome::Reject(m) => ("reject", Some(m.clone())),
            GuardrailOutcome::Tripwire(m) => ("tripwire", Some(m.clone())),
        };
        self.queue.push(SemanticStreamEvent::GuardrailResult {
            stage: stage.as_str().to_string(),
            guardrail: guardrail.to_string(),
            result: result.to_string(),
            message,
        });
    }
}

impl ToolPipelineHooks for StreamingHooks {
    fn on_approval(&self, tool_name: &str, call_id: Option<&str>, decision: &ApprovalDecision) {
        let (decision_str, reason) = match decision {
            ApprovalDecision::Allow => ("allow", None),
            ApprovalDecision::Deny(r) => ("deny", Some(r.clone())),
            ApprovalDecision::Async { .. } => ("async", None),
        };
        self.queue.push(SemanticStreamEvent::ToolApproval {
            tool_name: tool_name.to_string(),
            call_id: call_id.unwrap_or_default().to_string(),
            decision: decision_str.to_string(),
            reason,
        });
    }
}

pub struct StreamDriver {
    pub transport: Arc<dyn Transport>,
    pub tools: Arc<dyn ToolRegistry>,
    pub agent: Agent,
    pub run_config: RunConfig,
    pub approval_source: Option<ApprovalSource>,
}

type Starter = Box<dyn FnOnce() + Send>;

/// A handle to a running (or completed) streaming run: the queue to read
/// from and the control surface to cancel it. The producer task is not
/// spawned until the first consumer operation (`pop`), not at `start()` —
/// a caller that only constructs a `StreamingRun` and cancels it `Immediate`
/// before ever polling never runs the producer at all.
pub struct StreamingRun {
    pub queue: Arc<StreamQueue>,
    pub control: Arc<StreamControl>,
    starter: parking_lot::Mutex<Option<Starter>>,
}

impl StreamingRun {
    fn ensure_started(&self) {
        if let Some(starter) = self.starter.lock().take() {
            starter();
        }
    }

    /// Block up to `wait` for the next event, starting the producer first
    /// if this is the first consumer touch.
    pub async fn pop(&self, wait: std::time::Duration) -> crate::stream_queue::Popped {
        self.ensure_started();
        self.queue.pop(wait).await
    }
}

impl StreamDriver {
    /// Build the streaming run's queue/control pair and register the
    /// producer to run lazily, on the first `StreamingRun::pop`. Calling
    /// `start` alone never touches the transport.
    pub fn start(self, thread: Thread, input: Input) -> StreamingRun {
        let queue = Arc::new(StreamQueue::new(crate::stream_queue::DEFAULT_QUEUE_CAPACITY));
        let control = Arc::new(StreamControl::new());

        let transport_for_handler = self.transport.clone();
        let cancel_token_holder: Arc<parking_lot::Mutex<Option<String>>> =
            Arc::new(parking_lot::Mutex::new(None));
        let token_for_handler = cancel_token_holder.clone();
        control.set_cancel_handler(move |_mode| {
            if let Some(token) = token_for_handler.lock().clone() {
                transport_for_handler.cancel(&token);
            }
        });

        let queue_for_producer = queue.clone();
        let control_for_producer = control.clone();
        let queue_for_start = queue.clone();
        let control_for_start = control.clone();
        let starter: Starter = Box::new(move || {
            control_for_start.start_if_needed(queue_for_start, move || {
                run_producer(
                    self,
                    thread,
                    input,
                    queue_for_producer,
                    control_for_producer,
                    cancel_token_holder,
                )
            });
        });

        StreamingRun {
            queue,
            control,
            starter: parking_lot::Mutex::new(Some(starter)),
        }
    }
}

async fn run_producer(
    driver: StreamDriver,
    mut thread: Thread,
    input: Input,
    queue: Arc<StreamQueue>,
    control: Arc<StreamControl>,
    cancel_token_holder: Arc<parking_lot::Mutex<Option<String>>>,
) {
    queue.push(SemanticStreamEvent::AgentUpdated {
        agent: driver.agent.name.clone(),
        run_config: serde_json::Value::Null,
    });

    let input_guardrails =
        [&driver.agent.input_guardrails[..], &driver.run_config.input_guardrails[..]].concat();
    let hooks = StreamingHooks { queue: queue.clone() };
    if let Err(e) = agentrun_guardrails::run_guardrails(
        GuardrailStage::Input,
        &input_guardrails,
        &input_to_value(&input),
        &GuardrailContext {
            agent_name: driver.agent.name.clone(),
            attempt: 1,
        },
        &hooks,
    )
    .await
    {
        queue.close_with_error(e);
        return;
    }

    let mut turn_opts = TurnOpts::default();
    let mut all_events: Vec<Event> = Vec::new();
    let mut attempt: u32 = 1;

    loop {
        if control.cancel_mode() == Some(CancelMode::Immediate) {
            queue.close();
            return;
        }

        let turn_span = tracing::info_span!(
            "turn",
            run_attempt = attempt,
            thread_id = %thread.thread_id.clone().unwrap_or_default()
        );

        let token = format!("agentrun_{}", uuid::Uuid::new_v4().simple());
        *cancel_token_holder.lock() = Some(token.clone());
        turn_opts.cancellation_token = Some(token);

        let mut stream = match driver
            .transport
            .run_turn_streamed(&thread, &input, &turn_opts)
            .instrument(tracing::debug_span!(parent: &turn_span, "llm_call"))
            .await
        {
            Ok(s) => s,
            Err(e) => {
                queue.close_with_error(e);
                return;
            }
        };

        let mut turn_events = Vec::new();
        let mut cancelled = false;
        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => {
                    queue.push(SemanticStreamEvent::RunItem {
                        item_type: event.kind_tag(),
                        event: event.clone(),
                    });
                    turn_events.push(event);
                }
                Err(e) => {
                    queue.close_with_error(e);
                    return;
                }
            }
            if control.cancel_mode() == Some(CancelMode::Immediate) {
                cancelled = true;
                break;
            }
        }

        if cancelled {
            queue.close();
            return;
        }

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
            queue.close_with_error(RunError::TurnFailed(failure.to_string()));
            return;
        }

        let early_exit = turn_events.iter().any(|e| {
            matches!(e, Event::TurnCompleted { status: Some(s), .. } if s == "early_exit")
        });

        all_events.extend(turn_events.iter().cloned());
        let (next_thread, response, usage) =
            event_fold::reduce(thread, &turn_events, &FoldOpts::default());
        thread = next_thread;
        control.put_usage(usage.clone());
        queue.push(SemanticStreamEvent::RawResponses {
            events: turn_events.clone(),
            usage: usage.clone(),
        });

        let tool_results = match run_tool_pipeline(
            &mut thread,
            &turn_events,
            &driver.agent,
            &driver.run_config,
            driver.tools.as_ref(),
            driver.approval_source.as_ref(),
            attempt,
            Some(&hooks),
            Some(&hooks),
        )
        .instrument(turn_span.clone())
        .await
        {
            Ok(results) => results,
            Err(e) => {
                queue.close_with_error(e);
                return;
            }
        };

        let had_tool_results = !tool_results.is_empty();
        turn_opts.apply_reset_tool_choice(driver.agent.reset_tool_choice, had_tool_results);

        let final_text = decide_final(&driver.agent, attempt, &tool_results);

        if let Some(final_text) = final_text {
            let output_guardrails =
                [&driver.agent.output_guardrails[..], &driver.run_config.output_guardrails[..]].concat();
            if let Err(e) = agentrun_guardrails::run_guardrails(
                GuardrailStage::Output,
                &output_guardrails,
                &serde_json::Value::String(final_text.clone()),
                &GuardrailContext {
                    agent_name: driver.agent.name.clone(),
                    attempt,
                },
                &hooks,
            )
            .instrument(turn_span.clone())
            .await
            {
                queue.close_with_error(e);
                return;
            }
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
            finalize(&queue, &control, thread, all_events, usage, raw, Some(final_text), attempt);
            return;
        }

        if control.cancel_mode() == Some(CancelMode::AfterTurn) {
            let raw = RawResult {
                tool_outputs: thread.pending_tool_outputs.clone(),
                tool_failures: thread.pending_tool_failures.clone(),
                structured_output: None,
            };
            thread.clear_pending_tool_state();
            if early_exit {
                thread.clear_run_state();
            }
            finalize(&queue, &control, thread, all_events, usage, raw, response.map(|m| m.text), attempt);
            return;
        }

        if thread.has_continuation() {
            if attempt < driver.run_config.max_turns {
                tracing::debug!(parent: &turn_span, run_attempt = attempt, "continuation requested, scheduling next turn");
                crate::turn_driver::default_backoff(attempt).await;
                attempt += 1;
                continue;
            }
            tracing::warn!(
                parent: &turn_span,
                run_attempt = attempt,
                max_turns = driver.run_config.max_turns,
                "max_turns exceeded with continuation still outstanding"
            );
            queue.close_with_error(RunError::MaxTurnsExceeded {
                max_turns: driver.run_config.max_turns,
                continuation_token: thread.continuation_token.clone(),
            });
            return;
        }

        let output_guardrails =
            [&driver.agent.output_guardrails[..], &driver.run_config.output_guardrails[..]].concat();
        let response_value = response
            .as_ref()
            .map(|m| serde_json::Value::String(m.text.clone()))
            .unwrap_or(serde_json::Value::Null);
        if let Err(e) = agentrun_guardrails::run_guardrails(
            GuardrailStage::Output,
            &output_guardrails,
            &response_value,
            &GuardrailContext {
                agent_name: driver.agent.name.clone(),
                attempt,
            },
            &hooks,
        )
        .instrument(turn_span.clone())
        .await
        {
            queue.close_with_error(e);
            return;
        }
        let raw = RawResult {
            tool_outputs: thread.pending_tool_outputs.clone(),
            tool_failures: thread.pending_tool_failures.clone(),
            structured_output: None,
        };
        thread.clear_pending_tool_state();
        if early_exit {
            thread.clear_run_state();
        }
        finalize(&queue, &control, thread, all_events, usage, raw, response.map(|m| m.text), attempt);
        return;
    }
}

/// Build the run's final `RunResult`, hand it to `control` for retrieval,
/// then close the queue cleanly. Consumers read `control.take_result()`
/// after observing `Popped::Done`.
fn finalize(
    queue: &StreamQueue,
    control: &StreamControl,
    thread: Thread,
    events: Vec<Event>,
    usage: agentrun_domain::Usage,
    raw: RawResult,
    final_text: Option<String>,
    attempts: u32,
) {
    let last_response_id = event_fold::last_response_id(&events);
    control.set_result(RunResult {
        thread,
        events,
        final_response: final_text.map(|text| agentrun_domain::event::AgentMessage {
            id: None,
            text,
            parsed: None,
        }),
        usage,
        raw,
        attempts,
        last_response_id,
    });
    queue.close();
}

fn input_to_value(input: &Input) -> serde_json::Value {
    match input {
        Input::Text(s) => serde_json::Value::String(s.clone()),
        Input::Blocks(blocks) => serde_json::to_value(blocks).unwrap_or(serde_json::Value::Null),
    }
}

fn decide_final(
    agent: &Agent,
    attempt: u32,
    results: &[agentrun_domain::agent::ToolResultSummary],
) -> Option<String> {
    use agentrun_domain::agent::{ToolUseBehavior, ToolUseDecisionResult};

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
            match decision.decide(&ctx, results) {
                ToolUseDecisionResult::Continue => None,
                ToolUseDecisionResult::Final(text) => Some(text),
            }
        }
    }
}
