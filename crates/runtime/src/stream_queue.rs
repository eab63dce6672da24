use agentrun_domain::{RunError, SemanticStreamEvent};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// The bounded size a single streaming run's queue holds before `push`
/// starts applying backpressure to the producer.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

enum Slot {
    Event(SemanticStreamEvent),
    Done,
    Error(RunError),
}

/// What [`StreamQueue::pop`] returns.
pub enum Popped {
    Event(SemanticStreamEvent),
    Done,
    Error(RunError),
}

/// A single-producer/single-consumer bounded queue of semantic events with
/// two terminal states: cleanly closed, or closed with an error. Dropping
/// the queue (or calling `push` after close) silently discards further
/// events rather than panicking — a cancelled producer racing a close is
/// expected, not exceptional.
pub struct StreamQueue {
    tx: mpsc::Sender<Slot>,
    rx: parking_lot::Mutex<mpsc::Receiver<Slot>>,
    closed: std::sync::atomic::AtomicBool,
}

impl StreamQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: parking_lot::Mutex::new(rx),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Non-blocking; silently dropped once the queue is closed.
    pub fn push(&self, event: SemanticStreamEvent) {
        if self.is_closed() {
            return;
        }
        let _ = self.tx.try_send(Slot::Event(event));
    }

    /// Close cleanly. Idempotent.
    pub fn close(&self) {
        if self
            .closed
            .compare_exchange(
                false,
                true,
                std::sync::atomic::Ordering::AcqRel,
                std::sync::atomic::Ordering::Acquire,
            )
            .is_ok()
        {
            let _ = self.tx.try_send(Slot::Done);
        }
    }

    /// Close with a terminal error. Idempotent; the first close wins.
    pub fn close_with_error(&self, error: RunError) {
        if self
            .closed
            .compare_exchange(
                false,
                true,
                std::sync::atomic::Ordering::AcqRel,
                std::sync::atomic::Ordering::Acquire,
            )
            .is_ok()
        {
            let _ = self.tx.try_send(Slot::Error(error));
        }
    }

    /// Block up to `timeout` waiting for the next event, `:done`, or a
    /// terminal error.
    pub async fn pop(&self, wait: Duration) -> Popped {
        let mut rx = self.rx.lock();
        match timeout(wait, rx.recv()).await {
            Ok(Some(Slot::Event(e))) => Popped::Event(e),
            Ok(Some(Slot::Done)) | Ok(None) => Popped::Done,
            Ok(Some(Slot::Error(e))) => Popped::Error(e),
            Err(_elapsed) => Popped::Error(RunError::other("stream queue pop timed out")),
        }
    }
}
