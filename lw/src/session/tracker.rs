//! Operation tracker - actor that knows every running session operation
//!
//! An operation registers its cancellation token and a `done` token. Cancel
//! requests cancel the first and wait for the second, so the caller only
//! hears back once the operation has really stopped.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ComputationError, ComputationResult, NativeError};

/// One entry of the operations report
#[derive(Debug, Clone, Serialize)]
pub struct OperationStat {
    pub uuid: Uuid,
    pub name: String,
    pub started: DateTime<Utc>,
    /// Milliseconds; running time so far for live operations
    pub duration: u64,
}

struct Operation {
    name: String,
    token: CancellationToken,
    done: CancellationToken,
    started: DateTime<Utc>,
    clock: Instant,
}

pub enum TrackerCommand {
    AddOperation {
        uuid: Uuid,
        name: String,
        token: CancellationToken,
        done: CancellationToken,
        reply: oneshot::Sender<bool>,
    },
    RemoveOperation {
        uuid: Uuid,
        reply: oneshot::Sender<bool>,
    },
    CancelOperation {
        uuid: Uuid,
        reply: oneshot::Sender<bool>,
    },
    CancelAll {
        reply: oneshot::Sender<()>,
    },
    SetDebugMode {
        enabled: bool,
        reply: oneshot::Sender<()>,
    },
    GetOperationsStat {
        reply: oneshot::Sender<Result<String, NativeError>>,
    },
    TriggerError,
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to send commands to the tracker
#[derive(Clone)]
pub struct Tracker {
    tx: mpsc::Sender<TrackerCommand>,
}

impl Tracker {
    pub fn spawn(capacity: usize) -> (Self, JoinHandle<Result<(), NativeError>>) {
        debug!(capacity, "Tracker::spawn: called");
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let join = tokio::spawn(actor_loop(rx));
        (Self { tx }, join)
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> TrackerCommand) -> ComputationResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(command(reply_tx))
            .await
            .map_err(|_| ComputationError::SessionUnavailable)?;
        reply_rx.await.map_err(|_| ComputationError::SessionUnavailable)
    }

    /// Register an operation; false if the uuid is already known
    pub async fn add_operation(
        &self,
        uuid: Uuid,
        name: &str,
        token: CancellationToken,
        done: CancellationToken,
    ) -> ComputationResult<bool> {
        debug!(%uuid, %name, "add_operation: called");
        let name = name.to_string();
        self.request(|reply| TrackerCommand::AddOperation {
            uuid,
            name,
            token,
            done,
            reply,
        })
        .await
    }

    pub async fn remove_operation(&self, uuid: Uuid) -> ComputationResult<bool> {
        debug!(%uuid, "remove_operation: called");
        self.request(|reply| TrackerCommand::RemoveOperation { uuid, reply }).await
    }

    /// Cancel one operation and wait until it finished; false if unknown
    pub async fn cancel_operation(&self, uuid: Uuid) -> ComputationResult<bool> {
        debug!(%uuid, "cancel_operation: called");
        self.request(|reply| TrackerCommand::CancelOperation { uuid, reply }).await
    }

    /// Cancel every operation and wait until all finished
    pub async fn cancel_all(&self) -> ComputationResult<()> {
        debug!("cancel_all: called");
        self.request(|reply| TrackerCommand::CancelAll { reply }).await
    }

    pub async fn set_debug(&self, enabled: bool) -> ComputationResult<()> {
        debug!(enabled, "set_debug: called");
        self.request(|reply| TrackerCommand::SetDebugMode { enabled, reply }).await
    }

    /// JSON array of `{uuid, name, started, duration}`
    pub async fn get_operations_stat(&self) -> ComputationResult<String> {
        self.request(|reply| TrackerCommand::GetOperationsStat { reply })
            .await?
            .map_err(ComputationError::from)
    }

    pub async fn trigger_error(&self) -> ComputationResult<()> {
        debug!("trigger_error: called");
        self.tx
            .send(TrackerCommand::TriggerError)
            .await
            .map_err(|_| ComputationError::SessionUnavailable)
    }

    pub async fn shutdown(&self) -> ComputationResult<()> {
        debug!("shutdown: called");
        self.request(|reply| TrackerCommand::Shutdown { reply }).await
    }
}

impl std::fmt::Debug for TrackerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackerCommand::AddOperation { uuid, name, .. } => write!(f, "AddOperation({}, {})", uuid, name),
            TrackerCommand::RemoveOperation { uuid, .. } => write!(f, "RemoveOperation({})", uuid),
            TrackerCommand::CancelOperation { uuid, .. } => write!(f, "CancelOperation({})", uuid),
            TrackerCommand::CancelAll { .. } => write!(f, "CancelAll"),
            TrackerCommand::SetDebugMode { enabled, .. } => write!(f, "SetDebugMode({})", enabled),
            TrackerCommand::GetOperationsStat { .. } => write!(f, "GetOperationsStat"),
            TrackerCommand::TriggerError => write!(f, "TriggerError"),
            TrackerCommand::Shutdown { .. } => write!(f, "Shutdown"),
        }
    }
}

fn stat_of(uuid: Uuid, operation: &Operation) -> OperationStat {
    OperationStat {
        uuid,
        name: operation.name.clone(),
        started: operation.started,
        duration: operation.clock.elapsed().as_millis() as u64,
    }
}

async fn actor_loop(mut rx: mpsc::Receiver<TrackerCommand>) -> Result<(), NativeError> {
    debug!("Tracker actor started");
    let mut operations: HashMap<Uuid, Operation> = HashMap::new();
    let mut finished: Vec<OperationStat> = Vec::new();
    let mut debug_mode = false;

    while let Some(cmd) = rx.recv().await {
        match cmd {
            TrackerCommand::AddOperation {
                uuid,
                name,
                token,
                done,
                reply,
            } => {
                let added = !operations.contains_key(&uuid);
                if added {
                    operations.insert(
                        uuid,
                        Operation {
                            name,
                            token,
                            done,
                            started: Utc::now(),
                            clock: Instant::now(),
                        },
                    );
                } else {
                    warn!(%uuid, "Tracker: operation already registered");
                }
                let _ = reply.send(added);
            }
            TrackerCommand::RemoveOperation { uuid, reply } => {
                let removed = operations.remove(&uuid);
                if debug_mode && let Some(operation) = &removed {
                    finished.push(stat_of(uuid, operation));
                }
                let _ = reply.send(removed.is_some());
            }
            TrackerCommand::CancelOperation { uuid, reply } => match operations.get(&uuid) {
                Some(operation) => {
                    operation.token.cancel();
                    let done = operation.done.clone();
                    tokio::spawn(async move {
                        done.cancelled().await;
                        let _ = reply.send(true);
                    });
                }
                None => {
                    let _ = reply.send(false);
                }
            },
            TrackerCommand::CancelAll { reply } => {
                info!(count = operations.len(), "Tracker: cancelling all operations");
                let dones: Vec<CancellationToken> = operations
                    .values()
                    .map(|operation| {
                        operation.token.cancel();
                        operation.done.clone()
                    })
                    .collect();
                tokio::spawn(async move {
                    futures::future::join_all(dones.iter().map(|done| done.cancelled())).await;
                    let _ = reply.send(());
                });
            }
            TrackerCommand::SetDebugMode { enabled, reply } => {
                debug_mode = enabled;
                if !enabled {
                    finished.clear();
                }
                let _ = reply.send(());
            }
            TrackerCommand::GetOperationsStat { reply } => {
                let mut stats = finished.clone();
                stats.extend(operations.iter().map(|(uuid, operation)| stat_of(*uuid, operation)));
                stats.sort_by_key(|stat| stat.started);
                let _ = reply.send(serde_json::to_string(&stats).map_err(|e| NativeError::computation(e.to_string())));
            }
            TrackerCommand::TriggerError => {
                error!("Tracker: fault injected, stopping");
                return Err(NativeError::computation("Tracker fault injected"));
            }
            TrackerCommand::Shutdown { reply } => {
                info!(running = operations.len(), "Tracker shutting down");
                let _ = reply.send(());
                return Ok(());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_waits_for_done() {
        let (tracker, _join) = Tracker::spawn(16);
        let uuid = Uuid::now_v7();
        let token = CancellationToken::new();
        let done = CancellationToken::new();
        assert!(tracker.add_operation(uuid, "work", token.clone(), done.clone()).await.unwrap());
        assert!(!tracker.add_operation(uuid, "work", token.clone(), done.clone()).await.unwrap());

        let worker = tokio::spawn(async move {
            token.cancelled().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            done.cancel();
        });
        assert!(tracker.cancel_operation(uuid).await.unwrap());
        worker.await.unwrap();
        assert!(!tracker.cancel_operation(Uuid::now_v7()).await.unwrap());
    }

    #[tokio::test]
    async fn test_stats_in_debug_mode() {
        let (tracker, _join) = Tracker::spawn(16);
        tracker.set_debug(true).await.unwrap();
        let uuid = Uuid::now_v7();
        tracker
            .add_operation(uuid, "sleep", CancellationToken::new(), CancellationToken::new())
            .await
            .unwrap();
        assert!(tracker.remove_operation(uuid).await.unwrap());
        let stats: serde_json::Value = serde_json::from_str(&tracker.get_operations_stat().await.unwrap()).unwrap();
        assert_eq!(stats[0]["name"], "sleep");
        assert_eq!(stats[0]["uuid"], uuid.to_string());
    }

    #[tokio::test]
    async fn test_cancel_all_and_shutdown() {
        let (tracker, join) = Tracker::spawn(16);
        let token = CancellationToken::new();
        let done = CancellationToken::new();
        tracker
            .add_operation(Uuid::now_v7(), "a", token.clone(), done.clone())
            .await
            .unwrap();
        tokio::spawn(async move {
            token.cancelled().await;
            done.cancel();
        });
        tokio::time::timeout(Duration::from_secs(5), tracker.cancel_all())
            .await
            .unwrap()
            .unwrap();
        tracker.shutdown().await.unwrap();
        assert!(join.await.unwrap().is_ok());
        assert!(matches!(
            tracker.remove_operation(Uuid::now_v7()).await,
            Err(ComputationError::SessionUnavailable)
        ));
    }
}
