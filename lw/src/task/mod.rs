//! Cancelable tasks
//!
//! Every long-running session call returns a [`CancelableTask`]. Callers
//! either await it (`task.await` yields a [`TaskOutcome`]) or attach
//! continuations, and may `abort()` it at any time.

mod cancelable;

pub use cancelable::{CancelableTask, TaskHandle, TaskOutcome};
