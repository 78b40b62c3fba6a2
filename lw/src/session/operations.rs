//! Tracked session operations
//!
//! ```text
//!  run(name, work)
//!    ├─ tracker.add_operation(uuid, token, done)
//!    ├─ OperationStarted ─► cancel delegation (waits for `done`) ─► OperationProcessing
//!    ├─ work(ctx).await
//!    ├─ OperationDone | OperationError
//!    ├─ tracker.remove_operation(uuid), done.cancel()
//!    └─ resolve | reject | cancel
//! ```

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::state::StateManager;
use super::tracker::Tracker;
use crate::config::Config;
use crate::error::NativeError;
use crate::events::{EventProvider, Progress, SessionEvent};
use crate::task::CancelableTask;

/// What an operation's work gets to see
#[derive(Clone)]
pub struct OperationContext {
    pub uuid: Uuid,
    /// Cancelled on abort and on tracker cancellation
    pub token: CancellationToken,
    pub state: StateManager,
    pub events: Arc<EventProvider>,
    pub config: Arc<Config>,
    pub attachments_dir: PathBuf,
}

impl OperationContext {
    pub fn progress(&self, count: u64, total: Option<u64>) {
        self.events.emit(SessionEvent::Progress {
            uuid: self.uuid,
            progress: Progress::Ticks { count, total },
        });
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Everything needed to start an operation
#[derive(Clone)]
pub struct OperationRunner {
    pub state: StateManager,
    pub tracker: Tracker,
    pub events: Arc<EventProvider>,
    pub config: Arc<Config>,
    pub attachments_dir: PathBuf,
}

impl OperationRunner {
    /// Start `work` as a tracked operation
    pub fn run<T, F, Fut>(&self, name: &'static str, work: F) -> CancelableTask<T>
    where
        T: Clone + Send + Sync + Serialize + 'static,
        F: FnOnce(OperationContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, NativeError>> + Send + 'static,
    {
        let runner = self.clone();
        CancelableTask::new(move |handle| async move {
            let uuid = handle.uuid();
            debug!(%uuid, %name, "run: called");
            let token = handle.token();
            let done = CancellationToken::new();
            runner
                .tracker
                .add_operation(uuid, name, token.clone(), done.clone())
                .await?;
            runner.events.debug_operation_started(name, uuid);
            runner.events.emit(SessionEvent::OperationStarted { uuid });

            let waiter = done.clone();
            handle.set_cancel_delegation(move || async move { waiter.cancelled().await });
            runner.events.emit(SessionEvent::OperationProcessing { uuid });

            let ctx = OperationContext {
                uuid,
                token,
                state: runner.state.clone(),
                events: Arc::clone(&runner.events),
                config: Arc::clone(&runner.config),
                attachments_dir: runner.attachments_dir.clone(),
            };
            let result = work(ctx).await;
            let canceled = handle.is_canceling();
            match (&result, canceled) {
                (_, true) => runner.events.emit(SessionEvent::OperationDone { uuid, result: None }),
                (Ok(value), false) => runner.events.emit(SessionEvent::OperationDone {
                    uuid,
                    result: serde_json::to_string(value).ok(),
                }),
                (Err(error), false) => {
                    warn!(%uuid, %name, %error, "run: operation failed");
                    runner.events.emit(SessionEvent::OperationError {
                        uuid,
                        error: error.clone(),
                    })
                }
            }
            if let Err(e) = runner.tracker.remove_operation(uuid).await {
                debug!(%uuid, error = %e, "run: tracker is gone");
            }
            runner.events.debug_operation_ended(uuid);
            done.cancel();
            match result {
                _ if canceled => handle.cancel(),
                Ok(value) => handle.resolve(value),
                Err(error) => handle.reject(error),
            };
            Ok(())
        })
    }
}
