use agentrun_domain::event::AgentMessage;
use agentrun_domain::{Event, Thread, Usage};
use serde_json::Value;

/// Options influencing how `EventFold` decodes the final response.
#[derive(Debug, Clone, Default)]
pub struct FoldOpts {
    /// When set, attempt to JSON-decode the agent message text into
    /// `AgentMessage.parsed`. A decode failure keeps `text` and omits
    /// `parsed` rather than failing the fold.
    pub structured_output: bool,
}

fn decode_message(text: String, opts: &FoldOpts) -> AgentMessage {
    let parsed = if opts.structured_output {
        serde_json::from_str::<Value>(&text).ok()
    } else {
        None
    };
    AgentMessage {
        id: None,
        text,
        parsed,
    }
}

fn agent_message_from_item(item: &Value, opts: &FoldOpts) -> Option<AgentMessage> {
    let text = item.get("text").and_then(Value::as_str)?;
    let id = item.get("id").and_then(Value::as_str).map(str::to_string);
    let mut msg = decode_message(text.to_string(), opts);
    msg.id = id;
    Some(msg)
}

/// Fold a transport's event sequence for a single turn into the updated
/// thread state, final response (if any), and merged usage.
///
/// Pure: given the same `(thread, events, opts)` this always returns the
/// same output (testable property: determinism of `EventFold`).
pub fn reduce(
    mut thread: Thread,
    events: &[Event],
    opts: &FoldOpts,
) -> (Thread, Option<AgentMessage>, Usage) {
    let mut response: Option<AgentMessage> = None;

    for event in events {
        match event {
            Event::ThreadStarted { thread_id, metadata } => {
                thread.thread_id = Some(thread_id.clone());
                thread.metadata = metadata.clone();
            }
            Event::SessionConfigured { model, reasoning_effort } => {
                if let Some(model) = model {
                    thread.metadata.insert("model".to_string(), Value::from(model.clone()));
                }
                if let Some(reasoning_effort) = reasoning_effort {
                    thread
                        .metadata
                        .insert("reasoning_effort".to_string(), Value::from(reasoning_effort.clone()));
                }
            }
            Event::TurnContinuation {
                continuation_token, ..
            } => {
                thread.continuation_token = Some(continuation_token.clone());
            }
            Event::ThreadTokenUsageUpdated { usage, delta, .. } => {
                thread.usage = Usage::fold(&thread.usage, usage.as_ref(), delta.as_ref());
            }
            Event::AccountRateLimitsUpdated { rate_limits } => {
                thread
                    .metadata
                    .insert("rate_limits".to_string(), rate_limits.clone());
            }
            Event::TurnDiffUpdated { thread_id, .. } => {
                thread.thread_id = Some(thread_id.clone());
            }
            Event::TurnCompaction {
                thread_id,
                usage,
                usage_delta,
                ..
            } => {
                thread.thread_id = Some(thread_id.clone());
                thread.usage = Usage::fold(&thread.usage, usage.as_ref(), usage_delta.as_ref());
            }
            Event::ItemAgentMessageDelta { item } => {
                if let Some(msg) = agent_message_from_item(item, opts) {
                    response = Some(msg);
                }
            }
            Event::ItemCompleted { item } => {
                if item.get("type").and_then(Value::as_str) == Some("agent_message") {
                    if let Some(msg) = agent_message_from_item(item, opts) {
                        response = Some(msg);
                    }
                }
            }
            Event::TurnCompleted {
                usage,
                final_response,
                ..
            } => {
                if let Some(u) = usage {
                    thread.usage = Usage::fold(&thread.usage, Some(u), None);
                }
                if let Some(final_response) = final_response {
                    if let Some(text) = final_response.as_str() {
                        response = Some(decode_message(text.to_string(), opts));
                    } else if let Some(msg) = agent_message_from_item(final_response, opts) {
                        response = Some(msg);
                    }
                }
                if response.is_some() {
                    thread.continuation_token = None;
                }
            }
            _ => {}
        }
    }

    let usage = thread.usage.clone();
    (thread, response, usage)
}

/// The most recent non-empty `TurnCompleted.response_id` in `events`, in
/// order.
pub fn last_response_id(events: &[Event]) -> Option<String> {
    events.iter().rev().find_map(|e| match e {
        Event::TurnCompleted {
            response_id: Some(id),
            ..
        } if !id.is_empty() => Some(id.clone()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn events_fixture() -> Vec<Event> {
        vec![
            Event::ThreadStarted {
                thread_id: "th_1".into(),
                metadata: HashMap::new(),
            },
            Event::ThreadTokenUsageUpdated {
                usage: None,
                delta: Some(Usage(
                    [("output_tokens".to_string(), Value::from(4))]
                        .into_iter()
                        .collect(),
                )),
                rate_limits: None,
            },
            Event::TurnCompleted {
                thread_id: "th_1".into(),
                turn_id: "turn_1".into(),
                response_id: Some("resp_1".into()),
                final_response: Some(Value::from("hello")),
                usage: None,
                status: None,
                error: None,
            },
        ]
    }

    #[test]
    fn reduce_is_deterministic() {
        let opts = FoldOpts::default();
        let (t1, r1, u1) = reduce(Thread::new(), &events_fixture(), &opts);
        let (t2, r2, u2) = reduce(Thread::new(), &events_fixture(), &opts);
        assert_eq!(t1.thread_id, t2.thread_id);
        assert_eq!(r1.map(|m| m.text), r2.map(|m| m.text));
        assert_eq!(u1.get("output_tokens"), u2.get("output_tokens"));
    }

    #[test]
    fn reduce_sets_thread_id_and_clears_continuation_on_final_response() {
        let (thread, response, _) = reduce(Thread::new(), &events_fixture(), &FoldOpts::default());
        assert_eq!(thread.thread_id.as_deref(), Some("th_1"));
        assert!(thread.continuation_token.is_none());
        assert_eq!(response.unwrap().text, "hello");
    }

    #[test]
    fn reduce_accumulates_usage_from_delta() {
        let (thread, _, usage) = reduce(Thread::new(), &events_fixture(), &FoldOpts::default());
        assert_eq!(usage.get("output_tokens"), Some(&Value::from(4)));
        assert_eq!(thread.usage.get("output_tokens"), Some(&Value::from(4)));
    }

    #[test]
    fn reduce_keeps_continuation_when_no_final_response() {
        let events = vec![Event::TurnContinuation {
            thread_id: "th_1".into(),
            turn_id: "turn_1".into(),
            continuation_token: "cont_1".into(),
            retryable: true,
            reason: None,
        }];
        let (thread, response, _) = reduce(Thread::new(), &events, &FoldOpts::default());
        assert_eq!(thread.continuation_token.as_deref(), Some("cont_1"));
        assert!(response.is_none());
    }

    #[test]
    fn structured_output_decodes_json_text() {
        let events = vec![Event::TurnCompleted {
            thread_id: "th_1".into(),
            turn_id: "t1".into(),
            response_id: None,
            final_response: Some(Value::from("{\"ok\":true}")),
            usage: None,
            status: None,
            error: None,
        }];
        let opts = FoldOpts {
            structured_output: true,
        };
        let (_, response, _) = reduce(Thread::new(), &events, &opts);
        let msg = response.unwrap();
        assert_eq!(msg.parsed, Some(serde_json::json!({"ok": true})));
    }

    #[test]
    fn structured_output_decode_failure_keeps_text_without_panicking() {
        let events = vec![Event::TurnCompleted {
            thread_id: "th_1".into(),
            turn_id: "t1".into(),
            response_id: None,
            final_response: Some(Value::from("not json")),
            usage: None,
            status: None,
            error: None,
        }];
        let opts = FoldOpts {
            structured_output: true,
        };
        let (_, response, _) = reduce(Thread::new(), &events, &opts);
        let msg = response.unwrap();
        assert_eq!(msg.text, "not json");
        assert!(msg.parsed.is_none());
    }

    #[test]
    fn last_response_id_picks_latest_non_empty() {
        let events = vec![
            Event::TurnCompleted {
                thread_id: "t".into(),
                turn_id: "1".into(),
                response_id: Some("r1".into()),
                final_response: None,
                usage: None,
                status: None,
                error: None,
            },
            Event::TurnCompleted {
                thread_id: "t".into(),
                turn_id: "2".into(),
                response_id: Some("r2".into()),
                final_response: None,
                usage: None,
                status: None,
                error: None,
            },
        ];
        assert_eq!(last_response_id(&events), Some("r2".to_string()));
    }
}
