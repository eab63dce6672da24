//! End-to-end scenarios for the run-loop engine, exercised against
//! `MockTransport` instead of a live model.

use agentrun_domain::guardrail::{FnGuardrail, Guardrail, GuardrailBehavior, GuardrailContext, GuardrailOutcome};
use agentrun_domain::run_config::Input;
use agentrun_domain::{Agent, Event, RunConfig, RunError};
use agentrun_runtime::tool_pipeline::ToolInvokeContext;
use agentrun_runtime::{Popped, RunnerEntry, ToolRegistry};
use agentrun_transport::MockTransport;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct NoTools;
#[async_trait]
impl ToolRegistry for NoTools {
    async fn invoke(&self, _n: &str, _a: &Value, _c: &ToolInvokeContext) -> Result<Value, String> {
        Ok(Value::Null)
    }
}

struct EchoTools(Arc<AtomicUsize>);
#[async_trait]
impl ToolRegistry for EchoTools {
    async fn invoke(&self, name: &str, args: &Value, _c: &ToolInvokeContext) -> Result<Value, String> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(Value::from(format!("{name} saw {args}")))
    }
}

fn thread_started() -> Event {
    Event::ThreadStarted {
        thread_id: "th_1".into(),
        metadata: Default::default(),
    }
}

fn turn_completed(text: &str) -> Event {
    Event::TurnCompleted {
        thread_id: "th_1".into(),
        turn_id: "t1".into(),
        response_id: Some("r1".into()),
        final_response: Some(Value::from(text)),
        usage: None,
        status: None,
        error: None,
    }
}

fn continuation() -> Event {
    Event::TurnContinuation {
        thread_id: "th_1".into(),
        turn_id: "t1".into(),
        continuation_token: "cont_1".into(),
        retryable: true,
        reason: None,
    }
}

fn tool_call(call_id: &str, name: &str, requires_approval: bool) -> Event {
    Event::ToolCallRequested {
        call_id: Some(call_id.into()),
        tool_name: name.into(),
        arguments: Value::from("{}"),
        requires_approval,
        approved: None,
        approved_by_policy: None,
        sandbox_warnings: None,
        capabilities: None,
    }
}

/// S1 (single-turn text) is covered inline in `runner_entry.rs`'s
/// `run_returns_final_response_from_single_turn`.

/// S2: a transport that never stops asking for continuation exhausts
/// `max_turns` and the engine never calls it a turn more than that.
#[tokio::test]
async fn continuation_to_max_turns_is_bounded() {
    let transport = Arc::new(MockTransport::new(vec![
        Ok(vec![thread_started(), continuation()]),
        Ok(vec![continuation()]),
        Ok(vec![continuation()]),
    ]));
    let entry = RunnerEntry::new(transport.clone(), Arc::new(NoTools));
    let agent = Agent::builder("writer").build();
    let run_config = RunConfig::builder().max_turns(2).build().unwrap();

    let result = entry.run(&agent, run_config, Input::Text("go".into())).await;

    assert!(matches!(
        result,
        Err(RunError::MaxTurnsExceeded { max_turns: 2, .. })
    ));
    assert_eq!(transport.call_count(), 2);
}

/// S3: a tool call in turn 1 is invoked once and its result feeds the
/// model's turn 2, which produces the final response.
#[tokio::test]
async fn tool_round_trip_feeds_next_turn() {
    let calls = Arc::new(AtomicUsize::new(0));
    let transport = Arc::new(MockTransport::new(vec![
        Ok(vec![thread_started(), tool_call("c1", "lookup", false)]),
        Ok(vec![turn_completed("done")]),
    ]));
    let entry = RunnerEntry::new(transport, Arc::new(EchoTools(calls.clone())));
    let agent = Agent::builder("writer").build();
    let run_config = RunConfig::builder().build().unwrap();

    let result = entry.run(&agent, run_config, Input::Text("go".into())).await.unwrap();

    assert_eq!(result.final_response.as_ref().unwrap().text, "done");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(result.raw.tool_outputs.len(), 1);
    assert_eq!(result.raw.tool_outputs[0].call_id.as_deref(), Some("c1"));
    assert_eq!(result.raw.tool_outputs[0].tool_name, "lookup");
    assert!(result.raw.tool_failures.is_empty());
}

/// S4: a tool call that requires approval, denied by policy, halts the
/// whole run instead of feeding a failure back into the next turn.
#[tokio::test]
async fn approval_denial_halts_the_run() {
    use agentrun_domain::approval::{ApprovalDecision, ApprovalPolicy, ApprovalRequest, ApprovalSource};

    struct DenyAll;
    impl ApprovalPolicy for DenyAll {
        fn review(&self, _r: &ApprovalRequest) -> ApprovalDecision {
            ApprovalDecision::Deny("not allowed in this environment".into())
        }
    }

    let transport = Arc::new(MockTransport::new(vec![Ok(vec![
        thread_started(),
        tool_call("c1", "exec_shell", true),
    ])]));
    let entry = RunnerEntry::new(transport, Arc::new(NoTools))
        .with_approval_source(ApprovalSource::Policy(Arc::new(DenyAll)));
    let agent = Agent::builder("writer").build();
    let run_config = RunConfig::builder().build().unwrap();

    let result = entry.run(&agent, run_config, Input::Text("go".into())).await;

    assert!(matches!(result, Err(RunError::ApprovalDenied { .. })));
}

/// S5: cancelling a streaming run immediately, before the first `pop` ever
/// starts the producer, means the queue ends in `Done` with no `RunItem`
/// ever observed — deterministically, since the producer never spawns at
/// all (not a timing race against one that already has).
#[tokio::test]
async fn streaming_cancel_immediate_suppresses_emission() {
    use agentrun_domain::SemanticStreamEvent;
    use agentrun_runtime::CancelMode;

    let transport = Arc::new(MockTransport::new(vec![Ok(vec![
        thread_started(),
        turn_completed("too late"),
    ])]));
    let entry = RunnerEntry::new(transport, Arc::new(NoTools));
    let agent = Agent::builder("writer").build();
    let run_config = RunConfig::builder().build().unwrap();

    let run = entry.run_streamed(agent, run_config, Input::Text("go".into()));
    run.control.cancel(CancelMode::Immediate, &run.queue);

    let mut saw_run_item = false;
    loop {
        match run.pop(Duration::from_millis(200)).await {
            Popped::Event(SemanticStreamEvent::RunItem { .. }) => saw_run_item = true,
            Popped::Event(_) => {}
            Popped::Done | Popped::Error(_) => break,
        }
    }
    assert!(!saw_run_item);
}

/// S6: two output guardrails run in parallel; one rejects, which must
/// still halt the run even though neither sequential guardrail fired.
#[tokio::test]
async fn parallel_guardrail_rejection_halts_the_run() {
    let passes = Guardrail::new(
        "length_check",
        GuardrailBehavior::RaiseException,
        true,
        Arc::new(FnGuardrail(|_v: &Value, _c: &GuardrailContext| GuardrailOutcome::Ok)),
    );
    let rejects = Guardrail::new(
        "pii_scan",
        GuardrailBehavior::RaiseException,
        true,
        Arc::new(FnGuardrail(|_v: &Value, _c: &GuardrailContext| {
            GuardrailOutcome::Reject("response contains an email address".into())
        })),
    );

    let transport = Arc::new(MockTransport::new(vec![Ok(vec![
        thread_started(),
        turn_completed("contact me at a@b.com"),
    ])]));
    let entry = RunnerEntry::new(transport, Arc::new(NoTools));
    let agent = Agent::builder("writer").build();
    let run_config = RunConfig::builder()
        .output_guardrail(passes)
        .output_guardrail(rejects)
        .build()
        .unwrap();

    let result = entry.run(&agent, run_config, Input::Text("go".into())).await;

    assert!(matches!(
        result,
        Err(RunError::GuardrailReject { guardrail, .. }) if guardrail == "pii_scan"
    ));
}
