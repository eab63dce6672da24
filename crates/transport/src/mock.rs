use crate::{EventStream, Transport};
use agentrun_domain::{Event, Input, RunError, Thread, TurnOpts};
use async_trait::async_trait;
use parking_lot::Mutex;

/// A scripted transport for tests: each call to `run_turn`/
/// `run_turn_streamed` consumes the next entry of the script, in order.
/// Calling past the end of the script is a test bug, not a runtime
/// condition, so it panics rather than returning an error.
pub struct MockTransport {
    script: Mutex<Vec<Result<Vec<Event>, RunError>>>,
    calls: Mutex<Vec<(Option<String>, bool)>>,
}

impl MockTransport {
    pub fn new(script: Vec<Result<Vec<Event>, RunError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().rev().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// How many turns were actually requested, and what thread_id (if any)
    /// was observed for each — used to assert the max-turns boundedness
    /// property.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn next(&self, thread_id: Option<String>) -> Result<Vec<Event>, RunError> {
        self.calls.lock().push((thread_id, true));
        self.script
            .lock()
            .pop()
            .expect("MockTransport script exhausted: more turns requested than scripted")
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn run_turn(
        &self,
        thread: &Thread,
        _input: &Input,
        _turn_opts: &TurnOpts,
    ) -> Result<Vec<Event>, RunError> {
        self.next(thread.thread_id.clone())
    }

    async fn run_turn_streamed(
        &self,
        thread: &Thread,
        _input: &Input,
        _turn_opts: &TurnOpts,
    ) -> Result<EventStream, RunError> {
        let events = self.next(thread.thread_id.clone())?;
        let stream = futures_util::stream::iter(events.into_iter().map(Ok));
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::collections::HashMap;

    fn thread_started() -> Event {
        Event::ThreadStarted {
            thread_id: "th_1".into(),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn run_turn_consumes_script_in_order() {
        let mock = MockTransport::new(vec![Ok(vec![thread_started()]), Ok(vec![])]);
        let thread = Thread::new();
        let input = Input::Text("hi".into());
        let opts = TurnOpts::default();

        let first = mock.run_turn(&thread, &input, &opts).await.unwrap();
        assert_eq!(first.len(), 1);
        let second = mock.run_turn(&thread, &input, &opts).await.unwrap();
        assert!(second.is_empty());
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    #[should_panic(expected = "script exhausted")]
    async fn run_turn_panics_past_end_of_script() {
        let mock = MockTransport::new(vec![]);
        let thread = Thread::new();
        let _ = mock
            .run_turn(&thread, &Input::Text("hi".into()), &TurnOpts::default())
            .await;
    }

    #[tokio::test]
    async fn run_turn_streamed_yields_scripted_events_in_order() {
        let mock = MockTransport::new(vec![Ok(vec![thread_started(), thread_started()])]);
        let mut stream = mock
            .run_turn_streamed(&Thread::new(), &Input::Text("hi".into()), &TurnOpts::default())
            .await
            .unwrap();
        let mut count = 0;
        while let Some(evt) = stream.next().await {
            evt.unwrap();
            count += 1;
        }
        assert_eq!(count, 2);
    }
}
