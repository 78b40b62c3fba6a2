//! CancelableTask - a settle-once task with cooperative cancellation
//!
//! ```text
//!            resolve(v)            ┌──────────────┐
//!     ┌──────────────────────────► │ Resolved(v)  │
//!     │      reject(e)             ├──────────────┤
//! Pending ───────────────────────► │ Rejected(e)  │
//!     │      abort(), no delegate  ├──────────────┤
//!     ├──────────────────────────► │ Canceled     │
//!     │                            └──────────────┘
//!     │      abort(), delegate set        ▲
//!     └──────────────► Canceling ─────────┘  (delegate future finished)
//! ```
//!
//! Every transition goes through `settle`, which holds the state lock only
//! to swap the state and drain callbacks. Callbacks run after the lock is
//! released, so they may freely touch this or other tasks.

use std::collections::HashMap;
use std::future::{Future, IntoFuture};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::NativeError;

/// Terminal state of a task
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome<T> {
    Resolved(T),
    Rejected(NativeError),
    Canceled,
}

impl<T> TaskOutcome<T> {
    pub fn is_resolved(&self) -> bool {
        matches!(self, TaskOutcome::Resolved(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, TaskOutcome::Rejected(_))
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, TaskOutcome::Canceled)
    }

    /// Resolved value, if any
    pub fn ok(self) -> Option<T> {
        match self {
            TaskOutcome::Resolved(v) => Some(v),
            _ => None,
        }
    }

    /// Rejection error, if any
    pub fn err(self) -> Option<NativeError> {
        match self {
            TaskOutcome::Rejected(e) => Some(e),
            _ => None,
        }
    }
}

type OnResolved<T> = Box<dyn FnOnce(&T) + Send>;
type OnRejected = Box<dyn FnOnce(&NativeError) + Send>;
type OnUnit = Box<dyn FnOnce() + Send>;
type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;
type Delegation = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

enum State<T> {
    Pending,
    Canceling,
    Settled(TaskOutcome<T>),
}

struct Core<T> {
    state: State<T>,
    on_resolved: Vec<OnResolved<T>>,
    on_rejected: Vec<OnRejected>,
    on_canceled: Vec<OnUnit>,
    on_finally: Vec<OnUnit>,
    handlers: HashMap<String, Vec<EventHandler>>,
    delegation: Option<Delegation>,
    work: Option<AbortHandle>,
}

struct Inner<T> {
    uuid: Uuid,
    core: Mutex<Core<T>>,
    token: CancellationToken,
    settled: watch::Sender<bool>,
}

/// Callbacks drained from the core, run after the lock is released
enum Fired<T> {
    Resolved(T, Vec<OnResolved<T>>, Vec<OnUnit>),
    Rejected(NativeError, Vec<OnRejected>, Vec<OnUnit>),
    Canceled(Vec<OnUnit>, Vec<OnUnit>),
}

impl<T> Fired<T> {
    fn run(self) {
        match self {
            Fired::Resolved(value, callbacks, finally) => {
                callbacks.into_iter().for_each(|cb| cb(&value));
                finally.into_iter().for_each(|cb| cb());
            }
            Fired::Rejected(error, callbacks, finally) => {
                callbacks.into_iter().for_each(|cb| cb(&error));
                finally.into_iter().for_each(|cb| cb());
            }
            Fired::Canceled(callbacks, finally) => {
                callbacks.into_iter().for_each(|cb| cb());
                finally.into_iter().for_each(|cb| cb());
            }
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Inner<T> {
    fn new() -> Self {
        let (settled, _) = watch::channel(false);
        Self {
            uuid: Uuid::now_v7(),
            core: Mutex::new(Core {
                state: State::Pending,
                on_resolved: Vec::new(),
                on_rejected: Vec::new(),
                on_canceled: Vec::new(),
                on_finally: Vec::new(),
                handlers: HashMap::new(),
                delegation: None,
                work: None,
            }),
            token: CancellationToken::new(),
            settled,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Core<T>> {
        // callbacks never run under the lock
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move into a terminal state; returns false if the transition was refused
    fn settle(&self, outcome: TaskOutcome<T>) -> bool {
        let fired = {
            let mut core = self.lock();
            let accepted = match (&core.state, &outcome) {
                (State::Pending, _) => true,
                (State::Canceling, TaskOutcome::Canceled) => true,
                _ => false,
            };
            if !accepted {
                return false;
            }
            core.handlers.clear();
            core.delegation = None;
            core.work = None;
            let finally = std::mem::take(&mut core.on_finally);
            let fired = match &outcome {
                TaskOutcome::Resolved(v) => {
                    core.on_rejected.clear();
                    core.on_canceled.clear();
                    Fired::Resolved(v.clone(), std::mem::take(&mut core.on_resolved), finally)
                }
                TaskOutcome::Rejected(e) => {
                    core.on_resolved.clear();
                    core.on_canceled.clear();
                    Fired::Rejected(e.clone(), std::mem::take(&mut core.on_rejected), finally)
                }
                TaskOutcome::Canceled => {
                    core.on_resolved.clear();
                    core.on_rejected.clear();
                    Fired::Canceled(std::mem::take(&mut core.on_canceled), finally)
                }
            };
            core.state = State::Settled(outcome);
            fired
        };
        self.token.cancel();
        self.settled.send_replace(true);
        fired.run();
        true
    }

    fn abort(self: &Arc<Self>) {
        let (delegation, work) = {
            let mut core = self.lock();
            match core.state {
                State::Pending => {}
                State::Canceling | State::Settled(_) => return,
            }
            let delegation = core.delegation.take();
            if delegation.is_some() {
                core.state = State::Canceling;
            }
            (delegation, core.work.take())
        };
        self.token.cancel();
        match delegation {
            None => {
                if let Some(work) = work {
                    work.abort();
                }
                self.settle(TaskOutcome::Canceled);
            }
            Some(delegation) => {
                debug!(uuid = %self.uuid, "abort: running cancel delegation");
                let inner = Arc::clone(self);
                let fut = delegation();
                tokio::spawn(async move {
                    fut.await;
                    inner.settle(TaskOutcome::Canceled);
                });
            }
        }
    }

    fn emit(&self, event: &str, payload: &Value) {
        let handlers = {
            let core = self.lock();
            if !matches!(core.state, State::Pending) {
                return;
            }
            core.handlers.get(event).cloned().unwrap_or_default()
        };
        for handler in handlers {
            handler(payload);
        }
    }
}

/// Producer-side handle given to the task's work
pub struct TaskHandle<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> TaskHandle<T> {
    pub fn uuid(&self) -> Uuid {
        self.inner.uuid
    }

    /// Settle with a value; ignored unless the task is pending
    pub fn resolve(&self, value: T) -> bool {
        self.inner.settle(TaskOutcome::Resolved(value))
    }

    /// Settle with an error; ignored unless the task is pending
    pub fn reject(&self, error: NativeError) -> bool {
        self.inner.settle(TaskOutcome::Rejected(error))
    }

    /// Settle as canceled (also completes a running cancel delegation)
    pub fn cancel(&self) -> bool {
        self.inner.token.cancel();
        self.inner.settle(TaskOutcome::Canceled)
    }

    /// Register the future that performs cancellation on `abort()`
    pub fn set_cancel_delegation<F, Fut>(&self, delegation: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut core = self.inner.lock();
        if matches!(core.state, State::Pending) {
            core.delegation = Some(Box::new(move || Box::pin(delegation()) as BoxFuture<'static, ()>));
        }
    }

    pub fn emit(&self, event: &str, payload: Value) {
        self.inner.emit(event, &payload);
    }

    /// Whether `abort()` was requested or the task was canceled
    pub fn is_canceling(&self) -> bool {
        matches!(
            self.inner.lock().state,
            State::Canceling | State::Settled(TaskOutcome::Canceled)
        )
    }

    /// Completes once abort is requested or the task settles
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }

    /// Token observed by the work; cancelled on abort and on settle
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }
}

/// Consumer-side task handle
pub struct CancelableTask<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for CancelableTask<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for CancelableTask<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelableTask").field("uuid", &self.inner.uuid).finish()
    }
}

impl<T: Clone + Send + Sync + 'static> CancelableTask<T> {
    /// Run `work` as a tokio task; it settles the task through the handle
    ///
    /// A work future returning `Err(e)` rejects the task with `e`.
    pub fn new<F, Fut>(work: F) -> Self
    where
        F: FnOnce(TaskHandle<T>) -> Fut,
        Fut: Future<Output = Result<(), NativeError>> + Send + 'static,
    {
        let task = Self::pending();
        let handle = task.handle();
        let fut = work(handle.clone());
        tokio::spawn(async move {
            if let Err(e) = fut.await {
                handle.reject(e);
            }
        });
        task
    }

    /// Run a fallible future; `abort()` drops it and cancels
    pub fn from_future<Fut>(fut: Fut) -> Self
    where
        Fut: Future<Output = Result<T, NativeError>> + Send + 'static,
    {
        let task = Self::pending();
        let handle = task.handle();
        let join = tokio::spawn(async move {
            match fut.await {
                Ok(value) => handle.resolve(value),
                Err(e) => handle.reject(e),
            };
        });
        let mut core = task.inner.lock();
        if matches!(core.state, State::Pending) {
            core.work = Some(join.abort_handle());
        }
        drop(core);
        task
    }

    /// A task settled only through its handle
    pub fn pending() -> Self {
        Self {
            inner: Arc::new(Inner::new()),
        }
    }

    /// An already settled task
    pub fn settled(outcome: TaskOutcome<T>) -> Self {
        let task = Self::pending();
        task.inner.settle(outcome);
        task
    }

    pub fn rejected(error: NativeError) -> Self {
        Self::settled(TaskOutcome::Rejected(error))
    }

    pub fn handle(&self) -> TaskHandle<T> {
        TaskHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.inner.uuid
    }

    /// Request cancellation
    ///
    /// Without a delegation the task is canceled at once. With one, it enters
    /// `Canceling` until the delegation future finishes. No-op once settled.
    pub fn abort(&self) {
        debug!(uuid = %self.inner.uuid, "abort: called");
        self.inner.abort();
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.inner.lock().state, State::Pending)
    }

    pub fn is_canceling(&self) -> bool {
        matches!(
            self.inner.lock().state,
            State::Canceling | State::Settled(TaskOutcome::Canceled)
        )
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.inner.lock().state, State::Settled(_))
    }

    /// Terminal outcome, if settled
    pub fn outcome(&self) -> Option<TaskOutcome<T>> {
        match &self.inner.lock().state {
            State::Settled(outcome) => Some(outcome.clone()),
            _ => None,
        }
    }

    pub fn then(&self, callback: impl FnOnce(&T) + Send + 'static) -> &Self {
        let value = {
            let mut core = self.inner.lock();
            match &core.state {
                State::Settled(TaskOutcome::Resolved(v)) => v.clone(),
                State::Settled(_) => return self,
                _ => {
                    core.on_resolved.push(Box::new(callback));
                    return self;
                }
            }
        };
        callback(&value);
        self
    }

    pub fn catch(&self, callback: impl FnOnce(&NativeError) + Send + 'static) -> &Self {
        let error = {
            let mut core = self.inner.lock();
            match &core.state {
                State::Settled(TaskOutcome::Rejected(e)) => e.clone(),
                State::Settled(_) => return self,
                _ => {
                    core.on_rejected.push(Box::new(callback));
                    return self;
                }
            }
        };
        callback(&error);
        self
    }

    pub fn canceled(&self, callback: impl FnOnce() + Send + 'static) -> &Self {
        {
            let mut core = self.inner.lock();
            match &core.state {
                State::Settled(TaskOutcome::Canceled) => {}
                State::Settled(_) => return self,
                _ => {
                    core.on_canceled.push(Box::new(callback));
                    return self;
                }
            }
        }
        callback();
        self
    }

    pub fn finally(&self, callback: impl FnOnce() + Send + 'static) -> &Self {
        {
            let mut core = self.inner.lock();
            if !matches!(core.state, State::Settled(_)) {
                core.on_finally.push(Box::new(callback));
                return self;
            }
        }
        callback();
        self
    }

    /// Subscribe to a task-scoped side-channel event
    pub fn on(&self, event: &str, handler: impl Fn(&Value) + Send + Sync + 'static) -> &Self {
        if event.trim().is_empty() {
            warn!("on: ignoring handler for empty event name");
            return self;
        }
        let mut core = self.inner.lock();
        if !matches!(core.state, State::Settled(_)) {
            core.handlers.entry(event.to_string()).or_default().push(Arc::new(handler));
        }
        drop(core);
        self
    }

    pub fn emit(&self, event: &str, payload: Value) {
        self.inner.emit(event, &payload);
    }

    /// Tie two tasks together
    ///
    /// Whichever settles first carries its terminal category over to the
    /// other, if that one is still pending. Binding is symmetric.
    pub fn bind(&self, other: &CancelableTask<T>) -> &Self {
        link(self, other);
        link(other, self);
        self
    }

    /// Wait for the terminal outcome
    pub async fn wait(&self) -> TaskOutcome<T> {
        let mut rx = self.inner.settled.subscribe();
        loop {
            if let Some(outcome) = self.outcome() {
                return outcome;
            }
            // the sender lives in `inner`, so this only returns on change
            let _ = rx.changed().await;
        }
    }
}

fn link<T: Clone + Send + Sync + 'static>(from: &CancelableTask<T>, to: &CancelableTask<T>) {
    let target: Weak<Inner<T>> = Arc::downgrade(&to.inner);
    let on_value = target.clone();
    let on_error = target.clone();
    from.then(move |value| {
        if let Some(inner) = on_value.upgrade() {
            inner.settle(TaskOutcome::Resolved(value.clone()));
        }
    });
    from.catch(move |error| {
        if let Some(inner) = on_error.upgrade() {
            inner.settle(TaskOutcome::Rejected(error.clone()));
        }
    });
    from.canceled(move || {
        if let Some(inner) = target.upgrade() {
            inner.abort();
        }
    });
}

impl<T: Clone + Send + Sync + 'static> IntoFuture for CancelableTask<T> {
    type Output = TaskOutcome<T>;
    type IntoFuture = BoxFuture<'static, TaskOutcome<T>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.wait().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{NativeErrorKind, Severity};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    fn error() -> NativeError {
        NativeError::new(Severity::Error, NativeErrorKind::ComputationFailed, "boom")
    }

    #[tokio::test]
    async fn test_resolve_runs_then_and_finally() {
        let hits = Arc::new(AtomicUsize::new(0));
        let task = CancelableTask::<u32>::new(|handle| async move {
            handle.resolve(7);
            Ok(())
        });
        let (h1, h2, h3) = (hits.clone(), hits.clone(), hits.clone());
        task.then(move |v| {
            assert_eq!(*v, 7);
            h1.fetch_add(1, Ordering::SeqCst);
        })
        .catch(move |_| {
            h2.fetch_add(100, Ordering::SeqCst);
        })
        .finally(move || {
            h3.fetch_add(10, Ordering::SeqCst);
        });

        assert_eq!(task.wait().await, TaskOutcome::Resolved(7));
        assert_eq!(hits.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn test_work_error_rejects() {
        let task = CancelableTask::<u32>::new(|_handle| async move { Err(error()) });
        assert_eq!(task.await, TaskOutcome::Rejected(error()));
    }

    #[tokio::test]
    async fn test_settle_once() {
        let task = CancelableTask::<u32>::pending();
        let handle = task.handle();
        assert!(handle.resolve(1));
        assert!(!handle.resolve(2));
        assert!(!handle.reject(error()));
        assert!(!handle.cancel());
        assert_eq!(task.outcome(), Some(TaskOutcome::Resolved(1)));
    }

    #[tokio::test]
    async fn test_abort_without_delegation_is_immediate() {
        let task = CancelableTask::<u32>::new(|handle| async move {
            handle.cancelled().await;
            Ok(())
        });
        task.abort();
        assert!(task.is_completed());
        assert_eq!(task.wait().await, TaskOutcome::Canceled);
        // double abort is a no-op
        task.abort();
        assert_eq!(task.outcome(), Some(TaskOutcome::Canceled));
    }

    #[tokio::test]
    async fn test_abort_with_delegation_goes_through_canceling() {
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let task = CancelableTask::<u32>::new(move |handle| async move {
            handle.set_cancel_delegation(move || async move {
                let _ = release_rx.await;
            });
            Ok(())
        });
        sleep(Duration::from_millis(10)).await;

        task.abort();
        assert!(task.is_canceling());
        assert!(!task.is_completed());
        // resolving while canceling is refused
        assert!(!task.handle().resolve(5));

        release_tx.send(()).unwrap();
        let outcome = timeout(Duration::from_secs(1), task.wait()).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Canceled);
    }

    #[tokio::test]
    async fn test_abort_after_resolve_is_noop() {
        let task = CancelableTask::<u32>::settled(TaskOutcome::Resolved(3));
        task.abort();
        assert_eq!(task.outcome(), Some(TaskOutcome::Resolved(3)));
    }

    #[tokio::test]
    async fn test_from_future_abort_drops_future() {
        let dropped = Arc::new(AtomicUsize::new(0));
        struct Guard(Arc<AtomicUsize>);
        impl Drop for Guard {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        let guard = Guard(dropped.clone());
        let task = CancelableTask::<u32>::from_future(async move {
            let _guard = guard;
            sleep(Duration::from_secs(60)).await;
            Ok(1)
        });
        sleep(Duration::from_millis(10)).await;
        task.abort();
        assert_eq!(task.wait().await, TaskOutcome::Canceled);
        sleep(Duration::from_millis(10)).await;
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_late_continuations_fire_immediately() {
        let task = CancelableTask::<u32>::rejected(error());
        let hits = Arc::new(AtomicUsize::new(0));
        let (h1, h2, h3) = (hits.clone(), hits.clone(), hits.clone());
        task.then(move |_| {
            h1.fetch_add(100, Ordering::SeqCst);
        });
        task.catch(move |e| {
            assert_eq!(e.message, "boom");
            h2.fetch_add(1, Ordering::SeqCst);
        });
        task.finally(move || {
            h3.fetch_add(10, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn test_emit_reaches_handlers_until_settled() {
        let task = CancelableTask::<()>::pending();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        task.on("progress", move |payload| {
            sink.lock().unwrap().push(payload.clone());
        });
        let handle = task.handle();
        handle.emit("progress", serde_json::json!(1));
        handle.emit("other", serde_json::json!(2));
        handle.resolve(());
        handle.emit("progress", serde_json::json!(3));
        assert_eq!(*seen.lock().unwrap(), vec![serde_json::json!(1)]);
    }

    #[tokio::test]
    async fn test_emit_dropped_while_canceling() {
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let task = CancelableTask::<()>::pending();
        let seen = Arc::new(AtomicUsize::new(0));
        let sink = seen.clone();
        task.on("progress", move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });
        let handle = task.handle();
        handle.set_cancel_delegation(move || async move {
            let _ = release_rx.await;
        });
        handle.emit("progress", serde_json::json!(1));
        task.abort();
        assert!(task.is_canceling());
        handle.emit("progress", serde_json::json!(2));
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        release_tx.send(()).unwrap();
        assert_eq!(timeout(Duration::from_secs(1), task.wait()).await.unwrap(), TaskOutcome::Canceled);
        handle.emit("progress", serde_json::json!(3));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bind_propagates_resolve() {
        let a = CancelableTask::<u32>::pending();
        let b = CancelableTask::<u32>::pending();
        a.bind(&b);
        a.handle().resolve(9);
        assert_eq!(b.outcome(), Some(TaskOutcome::Resolved(9)));
    }

    #[tokio::test]
    async fn test_bind_propagates_reject_both_ways() {
        let a = CancelableTask::<u32>::pending();
        let b = CancelableTask::<u32>::pending();
        a.bind(&b);
        b.handle().reject(error());
        assert_eq!(a.outcome(), Some(TaskOutcome::Rejected(error())));
    }

    #[tokio::test]
    async fn test_bind_cancel_runs_delegation_of_bound() {
        let delegated = Arc::new(AtomicUsize::new(0));
        let counter = delegated.clone();
        let a = CancelableTask::<u32>::pending();
        a.handle().set_cancel_delegation(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let b = CancelableTask::<u32>::pending();
        a.bind(&b);

        b.abort();
        assert_eq!(b.outcome(), Some(TaskOutcome::Canceled));
        let outcome = timeout(Duration::from_secs(1), a.wait()).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Canceled);
        assert_eq!(delegated.load(Ordering::SeqCst), 1);
        // exactly one terminal category on each side
        assert!(!a.handle().resolve(1));
        assert!(!b.handle().resolve(1));
    }

    #[tokio::test]
    async fn test_bind_chain_is_transitive() {
        let a = CancelableTask::<u32>::pending();
        let b = CancelableTask::<u32>::pending();
        let c = CancelableTask::<u32>::pending();
        a.bind(&b);
        b.bind(&c);
        c.handle().resolve(4);
        assert_eq!(a.outcome(), Some(TaskOutcome::Resolved(4)));
        assert_eq!(b.outcome(), Some(TaskOutcome::Resolved(4)));
    }
}
