//! The transport boundary: the opaque, external, model-backed conversation
//! engine the run-loop drives. Concrete transports (subprocess, RPC
//! connection, ...) are host-provided; this crate only defines the
//! contract and a scripted [`MockTransport`] for tests.

mod mock;

pub use mock::MockTransport;

use agentrun_domain::{Event, Input, RunError, Thread, TurnOpts};
use async_trait::async_trait;
use futures_core::Stream;
use std::pin::Pin;

/// A lazy sequence of transport events for one turn.
pub type EventStream = Pin<Box<dyn Stream<Item = agentrun_domain::Result<Event>> + Send>>;

/// The contract the run-loop engine drives. A transport turns `(thread,
/// input, turn_opts)` into a sequence of [`Event`]s; the engine's
/// `EventFold` reducer is what makes sense of that sequence, so both
/// `run_turn` and `run_turn_streamed` deal only in raw events — the
/// blocking form simply collects its stream eagerly.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run exactly one turn, blocking until the transport finishes it.
    async fn run_turn(
        &self,
        thread: &Thread,
        input: &Input,
        turn_opts: &TurnOpts,
    ) -> Result<Vec<Event>, RunError>;

    /// Run exactly one turn, returning a lazily-consumed event stream.
    async fn run_turn_streamed(
        &self,
        thread: &Thread,
        input: &Input,
        turn_opts: &TurnOpts,
    ) -> Result<EventStream, RunError>;

    /// Best-effort cancellation of whatever turn is associated with this
    /// token. Fire-and-forget: the runtime does not wait on this to
    /// terminate its own emission loop (see the cancellation design notes).
    fn cancel(&self, _cancellation_token: &str) {}
}
