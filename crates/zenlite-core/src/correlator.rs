//! Correlation of fire-and-forget commands with their asynchronous responses.
//!
//! A command call returns a correlation id synchronously; the response
//! arrives later on the event channel carrying the same id. The correlator
//! holds one continuation per outstanding id and guarantees each
//! continuation runs exactly once: with the response, with the transport's
//! rejection code, or with a cancellation or timeout. Continuations are
//! always invoked after the correlator lock is released, so they may freely
//! call back into the session.
//!
//! [`issue`](CommandCorrelator::issue) makes the transport call under the
//! correlator lock, so a response that races ahead of the returned id still
//! finds its continuation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use zenlite_types::{CommandKind, CommandResponse, SysInfo};

use crate::error::{Error, Result};
use crate::metrics::DispatchMetrics;

/// Positive id allocated by the transport for an accepted command.
pub type CorrelationId = u32;

/// How a command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandOutcome {
    /// The device answered. The response may still report a failure.
    Completed { response: CommandResponse },
    /// The transport refused the command synchronously.
    Rejected { code: i32 },
    /// The device disconnected before answering.
    Cancelled,
    /// No answer within the configured timeout.
    TimedOut,
}

impl CommandOutcome {
    /// Whether the device answered with a success response.
    pub fn is_success(&self) -> bool {
        matches!(self, CommandOutcome::Completed { response } if response.is_success())
    }

    /// The device response, if one arrived.
    pub fn response(&self) -> Option<&CommandResponse> {
        match self {
            CommandOutcome::Completed { response } => Some(response),
            _ => None,
        }
    }
}

/// Called exactly once with the outcome of a command.
pub type Continuation = Box<dyn FnOnce(CommandOutcome) + Send + 'static>;

/// Called at most once with the record answering a sys-info query.
pub type SysInfoCallback = Box<dyn FnOnce(SysInfo) + Send + 'static>;

struct PendingCommand {
    uuid: String,
    kind: CommandKind,
    submitted_at: Instant,
    continuation: Continuation,
}

struct PendingSysInfo {
    uuid: String,
    submitted_at: Instant,
    callback: SysInfoCallback,
}

#[derive(Default)]
struct Tables {
    commands: HashMap<CorrelationId, PendingCommand>,
    sys_info: HashMap<CorrelationId, PendingSysInfo>,
}

/// Read-only view of an outstanding command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSummary {
    pub id: CorrelationId,
    pub uuid: String,
    pub kind: CommandKind,
    pub age: Duration,
}

/// Map of outstanding command ids to their continuations.
pub struct CommandCorrelator {
    tables: Mutex<Tables>,
    metrics: Arc<DispatchMetrics>,
}

impl std::fmt::Debug for CommandCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandCorrelator")
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl Default for CommandCorrelator {
    fn default() -> Self {
        Self::new(Arc::new(DispatchMetrics::new()))
    }
}

impl CommandCorrelator {
    /// Create an empty correlator reporting into `metrics`.
    pub fn new(metrics: Arc<DispatchMetrics>) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            metrics,
        }
    }

    /// Record the result of a command call.
    ///
    /// A positive `transport_result` is the correlation id: the continuation
    /// is stored until [`resolve`](Self::resolve) (or a cancellation) runs it.
    /// A non-positive result is an error code: the continuation runs
    /// immediately with [`CommandOutcome::Rejected`], nothing is stored, and
    /// the code is returned as [`Error::Transport`].
    pub fn submit(
        &self,
        uuid: &str,
        kind: CommandKind,
        transport_result: i32,
        continuation: impl FnOnce(CommandOutcome) + Send + 'static,
    ) -> Result<CorrelationId> {
        self.issue(uuid, kind, || transport_result, continuation)
    }

    /// Make a transport call and record its result atomically.
    ///
    /// `call` runs with the correlator locked and must not re-enter it.
    /// Otherwise behaves like [`submit`](Self::submit).
    pub fn issue(
        &self,
        uuid: &str,
        kind: CommandKind,
        call: impl FnOnce() -> i32,
        continuation: impl FnOnce(CommandOutcome) + Send + 'static,
    ) -> Result<CorrelationId> {
        self.issue_inner(uuid, kind, call, Box::new(continuation), None)
    }

    /// Issue a sys-info query whose id answers twice: once with a command
    /// response (to `continuation`) and once with the record (to `on_info`).
    pub fn issue_query(
        &self,
        uuid: &str,
        call: impl FnOnce() -> i32,
        continuation: impl FnOnce(CommandOutcome) + Send + 'static,
        on_info: impl FnOnce(SysInfo) + Send + 'static,
    ) -> Result<CorrelationId> {
        self.issue_inner(
            uuid,
            CommandKind::SysInfo,
            call,
            Box::new(continuation),
            Some(Box::new(on_info)),
        )
    }

    fn issue_inner(
        &self,
        uuid: &str,
        kind: CommandKind,
        call: impl FnOnce() -> i32,
        continuation: Continuation,
        on_info: Option<SysInfoCallback>,
    ) -> Result<CorrelationId> {
        let (id, displaced) = {
            let mut tables = self.tables();
            let transport_result = call();
            if transport_result <= 0 {
                drop(tables);
                debug!(
                    "{} for {} rejected by transport with code {}",
                    kind, uuid, transport_result
                );
                continuation(CommandOutcome::Rejected {
                    code: transport_result,
                });
                return Err(Error::transport(transport_result));
            }

            let id = transport_result as CorrelationId;
            let submitted_at = Instant::now();
            let displaced = tables.commands.insert(
                id,
                PendingCommand {
                    uuid: uuid.to_string(),
                    kind,
                    submitted_at,
                    continuation,
                },
            );
            match on_info {
                Some(callback) => {
                    tables.sys_info.insert(
                        id,
                        PendingSysInfo {
                            uuid: uuid.to_string(),
                            submitted_at,
                            callback,
                        },
                    );
                }
                None => {
                    tables.sys_info.remove(&id);
                }
            }
            (id, displaced)
        };

        // The transport reused an id that was still outstanding.
        if let Some(old) = displaced {
            warn!(
                "Correlation id {} reused while {} for {} was pending; cancelling it",
                id, old.kind, old.uuid
            );
            self.metrics.record_cancelled(1);
            (old.continuation)(CommandOutcome::Cancelled);
        }

        debug!("Submitted {} #{} for {}", kind, id, uuid);
        Ok(id)
    }

    /// Deliver a response. Returns `false` for stale or mismatched ids.
    pub fn resolve(&self, uuid: &str, id: CorrelationId, response: CommandResponse) -> bool {
        let entry = {
            let mut tables = self.tables();
            match tables.commands.get(&id) {
                Some(entry) if entry.uuid == uuid => tables.commands.remove(&id),
                _ => None,
            }
        };

        match entry {
            Some(entry) => {
                debug!(
                    "Resolved {} #{} for {} (success: {})",
                    entry.kind,
                    id,
                    uuid,
                    response.is_success()
                );
                (entry.continuation)(CommandOutcome::Completed { response });
                true
            }
            None => {
                debug!("Dropping stale response #{} for {}", id, uuid);
                self.metrics.record_stale_resolution();
                false
            }
        }
    }

    /// Register the record callback of a sys-info query.
    pub fn register_sys_info(
        &self,
        uuid: &str,
        id: CorrelationId,
        callback: impl FnOnce(SysInfo) + Send + 'static,
    ) {
        self.tables().sys_info.insert(
            id,
            PendingSysInfo {
                uuid: uuid.to_string(),
                submitted_at: Instant::now(),
                callback: Box::new(callback),
            },
        );
    }

    /// Deliver a sys-info record. Returns `false` for stale or mismatched ids.
    pub fn resolve_sys_info(&self, uuid: &str, id: CorrelationId, info: SysInfo) -> bool {
        let entry = {
            let mut tables = self.tables();
            match tables.sys_info.get(&id) {
                Some(entry) if entry.uuid == uuid => tables.sys_info.remove(&id),
                _ => None,
            }
        };

        match entry {
            Some(entry) => {
                (entry.callback)(info);
                true
            }
            None => {
                debug!("Dropping stale sys info #{} for {}", id, uuid);
                self.metrics.record_stale_resolution();
                false
            }
        }
    }

    /// Cancel every outstanding command of a device.
    ///
    /// Each continuation runs once with [`CommandOutcome::Cancelled`].
    /// Returns the number of cancelled commands.
    pub fn cancel_device(&self, uuid: &str) -> usize {
        let cancelled: Vec<PendingCommand> = {
            let mut tables = self.tables();
            let ids: Vec<CorrelationId> = tables
                .commands
                .iter()
                .filter(|(_, entry)| entry.uuid == uuid)
                .map(|(id, _)| *id)
                .collect();
            tables.sys_info.retain(|_, entry| entry.uuid != uuid);
            ids.iter().filter_map(|id| tables.commands.remove(id)).collect()
        };

        let count = cancelled.len();
        if count > 0 {
            debug!("Cancelling {} pending command(s) for {}", count, uuid);
            self.metrics.record_cancelled(count);
        }
        for entry in cancelled {
            (entry.continuation)(CommandOutcome::Cancelled);
        }
        count
    }

    /// Expire commands submitted more than `older_than` ago.
    ///
    /// Each continuation runs once with [`CommandOutcome::TimedOut`].
    /// Sys-info records still awaited past the same age are given up on and
    /// their callbacks dropped, even when the command itself was answered.
    /// Returns the number of expired commands.
    pub fn expire(&self, older_than: Duration) -> usize {
        let now = Instant::now();
        let is_old = |submitted_at: Instant| now.duration_since(submitted_at) >= older_than;
        let (expired, abandoned) = {
            let mut tables = self.tables();
            let ids: Vec<CorrelationId> = tables
                .commands
                .iter()
                .filter(|(_, entry)| is_old(entry.submitted_at))
                .map(|(id, _)| *id)
                .collect();
            let expired: Vec<(CorrelationId, PendingCommand)> = ids
                .into_iter()
                .filter_map(|id| tables.commands.remove(&id).map(|entry| (id, entry)))
                .collect();

            let info_ids: Vec<CorrelationId> = tables
                .sys_info
                .iter()
                .filter(|(_, entry)| is_old(entry.submitted_at))
                .map(|(id, _)| *id)
                .collect();
            let abandoned: Vec<(CorrelationId, PendingSysInfo)> = info_ids
                .into_iter()
                .filter_map(|id| tables.sys_info.remove(&id).map(|entry| (id, entry)))
                .collect();
            (expired, abandoned)
        };

        for (id, entry) in abandoned {
            debug!("Sys info #{} for {} never arrived", id, entry.uuid);
        }
        if expired.is_empty() {
            return 0;
        }

        let count = expired.len();
        self.metrics.record_timed_out(count);
        for (id, entry) in expired {
            warn!("{} #{} for {} timed out", entry.kind, id, entry.uuid);
            (entry.continuation)(CommandOutcome::TimedOut);
        }
        count
    }

    /// Whether `id` is outstanding.
    pub fn is_pending(&self, id: CorrelationId) -> bool {
        self.tables().commands.contains_key(&id)
    }

    /// Whether a sys-info record is still expected for `id`.
    pub fn awaiting_sys_info(&self, id: CorrelationId) -> bool {
        self.tables().sys_info.contains_key(&id)
    }

    /// Number of outstanding commands.
    pub fn pending_count(&self) -> usize {
        self.tables().commands.len()
    }

    /// Outstanding commands of one device, oldest first.
    pub fn pending_for(&self, uuid: &str) -> Vec<PendingSummary> {
        let now = Instant::now();
        let mut summaries: Vec<PendingSummary> = self
            .tables()
            .commands
            .iter()
            .filter(|(_, entry)| entry.uuid == uuid)
            .map(|(id, entry)| PendingSummary {
                id: *id,
                uuid: entry.uuid.clone(),
                kind: entry.kind,
                age: now.duration_since(entry.submitted_at),
            })
            .collect();
        summaries.sort_by(|a, b| b.age.cmp(&a.age).then(a.id.cmp(&b.id)));
        summaries
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
