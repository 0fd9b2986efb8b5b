//! Pending-request bookkeeping keyed by correlation id.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::channel::{CorrelationId, MessageKind};
use crate::error::RelayError;

/// Completion slot handed back to the waiting caller.
pub type Completion = oneshot::Sender<Result<serde_json::Value, RelayError>>;

/// A request waiting for its response frame.
#[derive(Debug)]
pub struct PendingRequest {
    pub correlation_id: CorrelationId,
    pub kind: MessageKind,
    pub created_at: Instant,
    pub deadline: Instant,
    completion: Completion,
}

impl PendingRequest {
    pub fn new(
        correlation_id: CorrelationId,
        kind: MessageKind,
        created_at: Instant,
        deadline: Instant,
        completion: Completion,
    ) -> Self {
        Self {
            correlation_id,
            kind,
            created_at,
            deadline,
            completion,
        }
    }

    fn complete(self, outcome: Result<serde_json::Value, RelayError>) {
        // The caller may already have given up; nothing to do then.
        let _ = self.completion.send(outcome);
    }
}

/// Mutex-guarded map from correlation id to pending request.
///
/// Every operation removes or inserts under the lock, so at most one
/// resolution is ever honored per id.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    entries: Mutex<HashMap<CorrelationId, PendingRequest>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CorrelationId, PendingRequest>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a new entry. Hands the entry back if its id is already pending.
    pub fn insert(&self, entry: PendingRequest) -> Result<(), PendingRequest> {
        let mut entries = self.lock();
        if entries.contains_key(&entry.correlation_id) {
            return Err(entry);
        }
        entries.insert(entry.correlation_id.clone(), entry);
        Ok(())
    }

    /// Complete and retire the entry for `id`.
    ///
    /// Returns `false` when `id` is unknown or already retired.
    pub fn resolve(&self, id: &CorrelationId, outcome: Result<serde_json::Value, RelayError>) -> bool {
        let entry = self.lock().remove(id);
        match entry {
            Some(entry) => {
                entry.complete(outcome);
                true
            }
            None => false,
        }
    }

    /// Retire the entry for `id` without completing it.
    pub fn remove(&self, id: &CorrelationId) -> Option<PendingRequest> {
        self.lock().remove(id)
    }

    /// Fail every pending entry with the error produced by `error`.
    pub fn fail_all(&self, error: impl Fn() -> RelayError) -> usize {
        let drained: Vec<PendingRequest> = self.lock().drain().map(|(_, entry)| entry).collect();
        let count = drained.len();
        for entry in drained {
            entry.complete(Err(error()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
