use crate::stream_queue::StreamQueue;
use agentrun_domain::{RunResult, Usage};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The two cancel modes a streaming run accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelMode {
    /// Stop emitting immediately: close the queue, stop the producer.
    Immediate,
    /// Cooperative: finish the current turn, then stop before the next.
    AfterTurn,
}

type CancelHandler = Box<dyn Fn(CancelMode) + Send + Sync>;

/// Owns a streaming run's lifecycle: whether the producer has started,
/// the current cancel mode (if any), the registered cancel handler, and
/// the latest usage snapshot.
pub struct StreamControl {
    started: AtomicBool,
    cancel_mode: Mutex<Option<CancelMode>>,
    cancel_handler: Mutex<Option<CancelHandler>>,
    usage: Mutex<Usage>,
    producer_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    result: Mutex<Option<RunResult>>,
}

impl Default for StreamControl {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamControl {
    pub fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
            cancel_mode: Mutex::new(None),
            cancel_handler: Mutex::new(None),
            usage: Mutex::new(Usage::new()),
            producer_handle: Mutex::new(None),
            result: Mutex::new(None),
        }
    }

    /// Store the run's final result once the producer reaches a terminal
    /// state. Consumers read it after observing `Popped::Done` from the
    /// queue.
    pub fn set_result(&self, result: RunResult) {
        *self.result.lock() = Some(result);
    }

    pub fn take_result(&self) -> Option<RunResult> {
        self.result.lock().take()
    }

    pub fn set_cancel_handler<F>(&self, handler: F)
    where
        F: Fn(CancelMode) + Send + Sync + 'static,
    {
        *self.cancel_handler.lock() = Some(Box::new(handler));
    }

    pub fn cancel_mode(&self) -> Option<CancelMode> {
        *self.cancel_mode.lock()
    }

    pub fn put_usage(&self, usage: Usage) {
        *self.usage.lock() = usage;
    }

    pub fn usage(&self) -> Usage {
        self.usage.lock().clone()
    }

    /// Record the cancel mode and fire the handler (best-effort). If
    /// `Immediate`, also close the queue and abort the producer task.
    pub fn cancel(&self, mode: CancelMode, queue: &StreamQueue) {
        *self.cancel_mode.lock() = Some(mode);
        if let Some(handler) = self.cancel_handler.lock().as_ref() {
            handler(mode);
        }
        if mode == CancelMode::Immediate {
            queue.close();
            if let Some(handle) = self.producer_handle.lock().take() {
                handle.abort();
            }
        }
    }

    /// Idempotent: start the producer task exactly once, unless cancel was
    /// already requested as `Immediate` before the first consumer touch, in
    /// which case the queue is closed without ever starting it.
    pub fn start_if_needed<F, Fut>(self: &Arc<Self>, queue: Arc<StreamQueue>, producer: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.cancel_mode() == Some(CancelMode::Immediate) {
            queue.close();
            return;
        }
        let handle = tokio::spawn(async move {
            producer().await;
        });
        *self.producer_handle.lock() = Some(handle);
    }
}
