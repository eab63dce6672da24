use agentrun_domain::guardrail::{
    Guardrail, GuardrailBehavior, GuardrailContext, GuardrailOutcome, GuardrailStage, ToolGuardrail,
    ToolGuardrailEvent,
};
use agentrun_domain::RunError;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Receives a notification for every guardrail evaluated, in evaluation
/// order. Implementations must not be allowed to crash the run: a
/// panicking hook is caught and treated as if it had not fired.
pub trait GuardrailHooks: Send + Sync {
    fn on_result(&self, stage: GuardrailStage, guardrail: &str, outcome: &GuardrailOutcome);
}

/// A hooks implementation that does nothing, for callers that don't need
/// guardrail telemetry.
pub struct NoopHooks;
impl GuardrailHooks for NoopHooks {
    fn on_result(&self, _stage: GuardrailStage, _guardrail: &str, _outcome: &GuardrailOutcome) {}
}

fn notify(hooks: &dyn GuardrailHooks, stage: GuardrailStage, name: &str, outcome: &GuardrailOutcome) {
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| hooks.on_result(stage, name, outcome)));
    if result.is_err() {
        tracing::warn!(guardrail = name, stage = stage.as_str(), "guardrail hook panicked; ignoring");
    }
}

fn to_error(stage: GuardrailStage, name: &str, outcome: GuardrailOutcome) -> RunError {
    match outcome {
        GuardrailOutcome::Ok => unreachable!("to_error called with Ok outcome"),
        GuardrailOutcome::Reject(message) => RunError::GuardrailReject {
            stage: stage.as_str().to_string(),
            guardrail: name.to_string(),
            message,
        },
        GuardrailOutcome::Tripwire(message) => RunError::GuardrailTripwire {
            stage: stage.as_str().to_string(),
            guardrail: name.to_string(),
            message,
        },
    }
}

/// Split a guardrail-like list into (sequential, parallel) while preserving
/// relative order within each group.
fn split<T>(list: &[Arc<T>], run_in_parallel: impl Fn(&T) -> bool) -> (Vec<&Arc<T>>, Vec<&Arc<T>>) {
    let mut seq = Vec::new();
    let mut par = Vec::new();
    for item in list {
        if run_in_parallel(item) {
            par.push(item);
        } else {
            seq.push(item);
        }
    }
    (seq, par)
}

/// Run a plain input/output guardrail list. A `Reject` or `Tripwire`
/// outcome always halts here — there is no payload to substitute at the
/// input/output stage, unlike the tool stage.
pub async fn run_guardrails(
    stage: GuardrailStage,
    list: &[Arc<Guardrail>],
    payload: &Value,
    ctx: &GuardrailContext,
    hooks: &dyn GuardrailHooks,
) -> Result<(), RunError> {
    let (seq, par) = split(list, |g| g.run_in_parallel);

    for g in seq {
        let outcome = g.check.check(payload, ctx).await;
        notify(hooks, stage, &g.name, &outcome);
        if !matches!(outcome, GuardrailOutcome::Ok) {
            return Err(to_error(stage, &g.name, outcome));
        }
    }

    if par.is_empty() {
        return Ok(());
    }

    let names: Vec<String> = par.iter().map(|g| g.name.clone()).collect();
    let handles: Vec<_> = par
        .iter()
        .map(|g| {
            let g = (*g).clone();
            let payload = payload.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { g.check.check(&payload, &ctx).await })
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for (name, handle) in names.into_iter().zip(handles) {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(join_err) => {
                tracing::warn!(guardrail = %name, stage = stage.as_str(), error = %join_err, "guardrail check panicked; treating as tripwire");
                GuardrailOutcome::Tripwire(format!("guardrail '{name}' panicked: {join_err}"))
            }
        };
        results.push((name, outcome));
    }
    for (name, outcome) in results {
        notify(hooks, stage, &name, &outcome);
        if !matches!(outcome, GuardrailOutcome::Ok) {
            return Err(to_error(stage, &name, outcome));
        }
    }
    Ok(())
}

/// What a tool-stage guardrail pass decided: proceed unchanged, or replace
/// the payload with a rejection message and keep going (`RejectContent`).
#[derive(Debug, Clone)]
pub enum ToolGuardrailPass {
    Ok,
    RejectContent(String),
}

/// Run a tool-input/tool-output guardrail list. Unlike [`run_guardrails`],
/// a `Reject` outcome on a `RejectContent`-behavior guardrail does not
/// halt the run — it replaces the payload text and the tool pipeline keeps
/// going with the rejection message as the effective output.
pub async fn run_tool_guardrails(
    stage: GuardrailStage,
    list: &[Arc<ToolGuardrail>],
    event: &ToolGuardrailEvent,
    payload: &Value,
    ctx: &GuardrailContext,
    hooks: &dyn GuardrailHooks,
) -> Result<ToolGuardrailPass, RunError> {
    let (seq, par) = split(list, |g| g.run_in_parallel);

    for g in seq {
        let outcome = g.check.check(event, payload, ctx).await;
        notify(hooks, stage, &g.name, &outcome);
        if let Some(pass) = resolve(stage, &g.name, g.behavior, outcome)? {
            return Ok(pass);
        }
    }

    if par.is_empty() {
        return Ok(ToolGuardrailPass::Ok);
    }

    let names_behaviors: Vec<(String, GuardrailBehavior)> =
        par.iter().map(|g| (g.name.clone(), g.behavior)).collect();
    let handles: Vec<_> = par
        .iter()
        .map(|g| {
            let g = (*g).clone();
            let payload = payload.clone();
            let ctx = ctx.clone();
            let event = event.clone();
            tokio::spawn(async move { g.check.check(&event, &payload, &ctx).await })
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for ((name, behavior), handle) in names_behaviors.into_iter().zip(handles) {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(join_err) => {
                tracing::warn!(guardrail = %name, stage = stage.as_str(), error = %join_err, "guardrail check panicked; treating as tripwire");
                GuardrailOutcome::Tripwire(format!("guardrail '{name}' panicked: {join_err}"))
            }
        };
        results.push((name, behavior, outcome));
    }
    for (name, behavior, outcome) in results {
        notify(hooks, stage, &name, &outcome);
        if let Some(pass) = resolve(stage, &name, behavior, outcome)? {
            return Ok(pass);
        }
    }
    Ok(ToolGuardrailPass::Ok)
}

fn resolve(
    stage: GuardrailStage,
    name: &str,
    behavior: GuardrailBehavior,
    outcome: GuardrailOutcome,
) -> Result<Option<ToolGuardrailPass>, RunError> {
    match outcome {
        GuardrailOutcome::Ok => Ok(None),
        GuardrailOutcome::Reject(message) => match behavior {
            GuardrailBehavior::RejectContent => Ok(Some(ToolGuardrailPass::RejectContent(message))),
            GuardrailBehavior::RaiseException => Err(to_error(
                stage,
                name,
                GuardrailOutcome::Reject(message),
            )),
        },
        GuardrailOutcome::Tripwire(message) => {
            Err(to_error(stage, name, GuardrailOutcome::Tripwire(message)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentrun_domain::guardrail::{FnGuardrail, GuardrailCheck};
    use async_trait::async_trait;

    fn ctx() -> GuardrailContext {
        GuardrailContext {
            agent_name: "a".into(),
            attempt: 1,
        }
    }

    fn always(outcome: GuardrailOutcome) -> Arc<Guardrail> {
        Arc::new(Guardrail::new(
            "g",
            GuardrailBehavior::RaiseException,
            false,
            Arc::new(FnGuardrail(move |_v: &Value, _c: &GuardrailContext| outcome.clone())),
        ))
    }

    #[tokio::test]
    async fn sequential_ok_list_passes() {
        let list = vec![always(GuardrailOutcome::Ok), always(GuardrailOutcome::Ok)];
        let result = run_guardrails(
            GuardrailStage::Input,
            &list,
            &Value::Null,
            &ctx(),
            &NoopHooks,
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn sequential_rejects_before_reaching_later_guardrails() {
        struct Counting(std::sync::atomic::AtomicUsize);
        #[async_trait]
        impl GuardrailCheck for Counting {
            async fn check(&self, _v: &Value, _c: &GuardrailContext) -> GuardrailOutcome {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                GuardrailOutcome::Ok
            }
        }
        let counter = Arc::new(Counting(std::sync::atomic::AtomicUsize::new(0)));
        let list = vec![
            always(GuardrailOutcome::Tripwire("nope".into())),
            Arc::new(Guardrail::new(
                "later",
                GuardrailBehavior::RaiseException,
                false,
                counter.clone(),
            )),
        ];
        let result = run_guardrails(GuardrailStage::Input, &list, &Value::Null, &ctx(), &NoopHooks).await;
        assert!(result.is_err());
        assert_eq!(counter.0.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tool_reject_content_substitutes_instead_of_halting() {
        let g = ToolGuardrail::new(
            "pii",
            GuardrailBehavior::RejectContent,
            false,
            Arc::new(ToolRejector),
        );
        let event = ToolGuardrailEvent {
            call_id: Some("c1".into()),
            tool_name: "exec".into(),
        };
        let result = run_tool_guardrails(
            GuardrailStage::ToolInput,
            &[Arc::new(g)],
            &event,
            &Value::Null,
            &ctx(),
            &NoopHooks,
        )
        .await
        .unwrap();
        assert!(matches!(result, ToolGuardrailPass::RejectContent(_)));
    }

    struct ToolRejector;
    #[async_trait]
    impl agentrun_domain::guardrail::ToolGuardrailCheck for ToolRejector {
        async fn check(
            &self,
            _event: &ToolGuardrailEvent,
            _payload: &Value,
            _ctx: &GuardrailContext,
        ) -> GuardrailOutcome {
            GuardrailOutcome::Reject("contains secrets".into())
        }
    }
}
