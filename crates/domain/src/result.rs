use crate::event::{AgentMessage, Event};
use crate::thread::Thread;
use crate::usage::Usage;
use serde_json::Value;

/// Raw extras carried alongside the decoded fields, mirroring the source's
/// open `raw` map: tool outputs/failures plus an optional structured
/// output when the caller requested JSON decoding.
#[derive(Debug, Clone, Default)]
pub struct RawResult {
    pub tool_outputs: Vec<crate::thread::PendingToolOutput>,
    pub tool_failures: Vec<crate::thread::PendingToolFailure>,
    pub structured_output: Option<Value>,
}

/// The immutable output of a completed run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub thread: Thread,
    pub events: Vec<Event>,
    pub final_response: Option<AgentMessage>,
    pub usage: Usage,
    pub raw: RawResult,
    pub attempts: u32,
    pub last_response_id: Option<String>,
}

impl RunResult {
    /// The most recent non-empty `response_id` from a `TurnCompleted` event
    /// in `events`, in order (§4.2).
    pub fn last_response_id_from_events(events: &[Event]) -> Option<String> {
        events.iter().rev().find_map(|e| match e {
            Event::TurnCompleted {
                response_id: Some(id),
                ..
            } if !id.is_empty() => Some(id.clone()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_response_id_picks_most_recent_non_empty() {
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
                response_id: Some(String::new()),
                final_response: None,
                usage: None,
                status: None,
                error: None,
            },
        ];
        assert_eq!(
            RunResult::last_response_id_from_events(&events),
            Some("r1".to_string())
        );
    }

    #[test]
    fn last_response_id_none_when_absent() {
        let events = vec![Event::ThreadStarted {
            thread_id: "t".into(),
            metadata: Default::default(),
        }];
        assert_eq!(RunResult::last_response_id_from_events(&events), None);
    }
}
