//! The run-loop engine: folds a transport's raw events into thread state,
//! drives the tool pipeline, and exposes both a blocking (`TurnDriver`) and
//! a streaming (`StreamDriver`) way to run an agent to completion.

pub mod event_fold;
pub mod runner_entry;
pub mod stream_control;
pub mod stream_driver;
pub mod stream_queue;
pub mod tool_pipeline;
pub mod turn_driver;

pub use runner_entry::RunnerEntry;
pub use stream_control::{CancelMode, StreamControl};
pub use stream_driver::{StreamDriver, StreamingRun};
pub use stream_queue::{Popped, StreamQueue, DEFAULT_QUEUE_CAPACITY};
pub use tool_pipeline::{run_tool_pipeline, NoopPipelineHooks, ToolInvokeContext, ToolPipelineHooks, ToolRegistry};
pub use turn_driver::TurnDriver;
