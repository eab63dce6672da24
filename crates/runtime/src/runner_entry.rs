use crate::stream_driver::{StreamDriver, StreamingRun};
use crate::tool_pipeline::ToolRegistry;
use crate::turn_driver::TurnDriver;
use agentrun_domain::approval::ApprovalSource;
use agentrun_domain::run_config::{Input, InputBlock, RunConfig};
use agentrun_domain::{Agent, RunError, RunResult, Thread};
use agentrun_transport::Transport;
use serde_json::Value;
use std::sync::Arc;

/// §4.1 step 3: apply model override (coercing reasoning-effort alongside
/// it), tracing metadata merge (overwrite-if-present for the four tracing
/// keys), and file-search config merge (right-biased per-key), in that
/// order, onto a freshly constructed thread.
fn apply_run_config_overlay(thread: &mut Thread, run_config: &RunConfig) {
    if let Some(model) = run_config.model.as_ref() {
        thread.metadata.insert("model".to_string(), Value::from(model.clone()));
    }
    if let Some(reasoning_effort) = run_config.reasoning_effort.as_ref() {
        thread
            .metadata
            .insert("reasoning_effort".to_string(), Value::from(reasoning_effort.clone()));
    }

    if let Some(trace_id) = run_config.trace_id.as_ref() {
        thread.metadata.insert("trace_id".to_string(), Value::from(trace_id.clone()));
    }
    thread
        .metadata
        .insert("trace_sensitive".to_string(), Value::from(run_config.trace_sensitive));
    thread
        .metadata
        .insert("tracing_disabled".to_string(), Value::from(run_config.tracing_disabled));
    if let Some(conversation_id) = run_config.conversation_id.as_ref() {
        thread
            .metadata
            .insert("conversation_id".to_string(), Value::from(conversation_id.clone()));
    }

    if !run_config.file_search.is_empty() {
        let mut merged = thread
            .metadata
            .get("file_search")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();
        for (key, value) in &run_config.file_search {
            merged.insert(key.clone(), value.clone());
        }
        thread.metadata.insert("file_search".to_string(), Value::Object(merged));
    }
}

/// The top-level entry point a host wires up once per agent: the fixed
/// dependencies (transport, tool registry, approval source) plus the
/// per-call agent and run configuration. Mirrors the non-blocking
/// `run`/`run_streamed` pair the engine exposes externally (§6).
pub struct RunnerEntry {
    pub transport: Arc<dyn Transport>,
    pub tools: Arc<dyn ToolRegistry>,
    pub approval_source: Option<ApprovalSource>,
}

impl RunnerEntry {
    pub fn new(transport: Arc<dyn Transport>, tools: Arc<dyn ToolRegistry>) -> Self {
        Self {
            transport,
            tools,
            approval_source: None,
        }
    }

    pub fn with_approval_source(mut self, source: ApprovalSource) -> Self {
        self.approval_source = Some(source);
        self
    }

    /// Blocking run: resolves session history and the
    /// `session_input_callback`, loads a fresh `Thread` (or the session's
    /// `previous_response_id` continuation via `auto_previous_response_id`),
    /// drives `TurnDriver` to completion, and persists the result to the
    /// session (if configured).
    pub async fn run(&self, agent: &Agent, run_config: RunConfig, input: Input) -> Result<RunResult, RunError> {
        let (prepared_input, run_config, thread) = self.prepare(&run_config, input);

        let driver = TurnDriver {
            transport: self.transport.as_ref(),
            tools: self.tools.as_ref(),
            agent,
            run_config: &run_config,
            approval_source: self.approval_source.as_ref(),
        };
        let result = driver.run(thread, prepared_input.clone()).await?;

        self.persist(&run_config, &prepared_input, &result);
        Ok(result)
    }

    /// Streaming run: same preparation as `run`, but hands off to
    /// `StreamDriver` and returns the handle immediately. Session
    /// persistence on a streaming run is the caller's responsibility once
    /// it has observed the queue close and taken the final result off
    /// `StreamingRun::control`.
    pub fn run_streamed(&self, agent: Agent, run_config: RunConfig, input: Input) -> StreamingRun {
        let (prepared_input, run_config, thread) = self.prepare(&run_config, input);

        let driver = StreamDriver {
            transport: self.transport.clone(),
            tools: self.tools.clone(),
            agent,
            run_config,
            approval_source: self.approval_source.clone(),
        };
        driver.start(thread, prepared_input)
    }

    /// Build the thread the run starts from, apply the model/tracing/
    /// file-search overlay to it, then resolve session history and the
    /// `session_input_callback` to produce the input the run actually
    /// drives against. `auto_previous_response_id` is applied here too:
    /// when set and `run_config.previous_response_id` is absent, fall back
    /// to whatever the session last persisted.
    fn prepare(&self, run_config: &RunConfig, input: Input) -> (Input, RunConfig, Thread) {
        let mut run_config = run_config.clone();
        let mut thread = Thread::new();
        apply_run_config_overlay(&mut thread, &run_config);

        let history: Vec<InputBlock> = run_config
            .session
            .as_ref()
            .map(|s| s.load_history())
            .unwrap_or_default();

        let prepared = if let Some(callback) = run_config.session_input_callback.as_ref() {
            callback.call(&input, &history, &serde_json::Value::Null)
        } else {
            input
        };

        if run_config.auto_previous_response_id && run_config.previous_response_id.is_none() {
            if let Some(last) = history.iter().rev().find_map(|b| {
                b.content.get("previous_response_id").and_then(|v| v.as_str()).map(str::to_string)
            }) {
                run_config.previous_response_id = Some(last);
            }
        }

        (prepared, run_config, thread)
    }

    fn persist(&self, run_config: &RunConfig, input: &Input, result: &RunResult) {
        let Some(session) = run_config.session.as_ref() else {
            return;
        };
        let conversation_key = run_config.conversation_id.as_deref().unwrap_or("default");
        session.persist(
            input,
            result.final_response.as_ref().map(|m| m.text.as_str()),
            conversation_key,
            result.last_response_id.as_deref(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool_pipeline::ToolInvokeContext;
    use agentrun_domain::Event;
    use agentrun_transport::MockTransport;
    use async_trait::async_trait;
    use serde_json::Value;

    struct NoTools;
    #[async_trait]
    impl ToolRegistry for NoTools {
        async fn invoke(&self, _n: &str, _a: &Value, _c: &ToolInvokeContext) -> Result<Value, String> {
            Ok(Value::Null)
        }
    }

    fn single_turn_script() -> Vec<agentrun_domain::Result<Vec<Event>>> {
        vec![Ok(vec![
            Event::ThreadStarted {
                thread_id: "th_1".into(),
                metadata: Default::default(),
            },
            Event::TurnCompleted {
                thread_id: "th_1".into(),
                turn_id: "t1".into(),
                response_id: Some("r1".into()),
                final_response: Some(Value::from("hi there")),
                usage: None,
                status: None,
                error: None,
            },
        ])]
    }

    #[test]
    fn prepare_applies_model_tracing_and_file_search_overlay() {
        let entry = RunnerEntry::new(Arc::new(MockTransport::new(single_turn_script())), Arc::new(NoTools));
        let run_config = RunConfig::builder()
            .model("gpt-5")
            .reasoning_effort("high")
            .conversation_id("conv_1")
            .file_search("vector_store_id", Value::from("vs_1"))
            .build()
            .unwrap();

        let (_, _, thread) = entry.prepare(&run_config, Input::Text("hi".into()));

        assert_eq!(thread.metadata.get("model"), Some(&Value::from("gpt-5")));
        assert_eq!(thread.metadata.get("reasoning_effort"), Some(&Value::from("high")));
        assert_eq!(thread.metadata.get("conversation_id"), Some(&Value::from("conv_1")));
        assert_eq!(
            thread.metadata.get("file_search").and_then(|v| v.get("vector_store_id")),
            Some(&Value::from("vs_1"))
        );
    }

    #[tokio::test]
    async fn run_returns_final_response_from_single_turn() {
        let entry = RunnerEntry::new(Arc::new(MockTransport::new(single_turn_script())), Arc::new(NoTools));
        let agent = Agent::builder("writer").build();
        let run_config = RunConfig::builder().build().unwrap();

        let result = entry.run(&agent, run_config, Input::Text("hello".into())).await.unwrap();
        assert_eq!(result.final_response.unwrap().text, "hi there");
        assert_eq!(result.last_response_id.as_deref(), Some("r1"));
    }

    struct RecordingSession {
        persisted: parking_lot::Mutex<Vec<String>>,
    }
    impl agentrun_domain::run_config::Session for RecordingSession {
        fn load_history(&self) -> Vec<InputBlock> {
            Vec::new()
        }
        fn persist(
            &self,
            _input: &Input,
            final_response: Option<&str>,
            _conversation_key: &str,
            _previous_response_id: Option<&str>,
        ) {
            if let Some(text) = final_response {
                self.persisted.lock().push(text.to_string());
            }
        }
    }

    #[tokio::test]
    async fn run_persists_final_response_to_session() {
        let session = Arc::new(RecordingSession {
            persisted: parking_lot::Mutex::new(Vec::new()),
        });
        let entry = RunnerEntry::new(Arc::new(MockTransport::new(single_turn_script())), Arc::new(NoTools));
        let agent = Agent::builder("writer").build();
        let run_config = RunConfig::builder().session(session.clone()).build().unwrap();

        entry.run(&agent, run_config, Input::Text("hello".into())).await.unwrap();
        assert_eq!(session.persisted.lock().as_slice(), ["hi there"]);
    }
}
