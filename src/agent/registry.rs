//! Registry of live agent executions.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::types::{EngineName, ExecutionStatus, RequestId, RunningExecution, SessionId};
use crate::error::{RelayError, Result};

struct ExecutionRecord {
    info: RunningExecution,
    cancel: CancellationToken,
}

/// Live executions keyed by request id.
///
/// A record exists from acceptance until the execution finishes or is
/// cancelled. Removal happens under the lock, so of several concurrent
/// `cancel`/`finish` calls exactly one observes the live record.
#[derive(Default)]
pub struct AgentExecutionRegistry {
    records: Mutex<HashMap<RequestId, ExecutionRecord>>,
}

impl AgentExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RequestId, ExecutionRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a pending record.
    pub fn register(
        &self,
        request_id: RequestId,
        session_id: SessionId,
        engine_name: EngineName,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut records = self.lock();
        if records.contains_key(&request_id) {
            return Err(RelayError::InvalidState(format!(
                "execution {request_id} is already registered"
            )));
        }
        let info = RunningExecution {
            request_id: request_id.clone(),
            session_id,
            engine_name,
            status: ExecutionStatus::Pending,
            started_at: Utc::now(),
        };
        records.insert(request_id, ExecutionRecord { info, cancel });
        Ok(())
    }

    /// Move a pending record to running. `false` if it is gone.
    pub fn mark_running(&self, request_id: &str) -> bool {
        match self.lock().get_mut(request_id) {
            Some(record) => {
                record.info.status = ExecutionStatus::Running;
                true
            }
            None => false,
        }
    }

    /// Remove the record without firing its token, handing the token to
    /// the caller. `None` for unknown or already retired executions.
    pub fn retire(&self, request_id: &str) -> Option<CancellationToken> {
        self.lock().remove(request_id).map(|record| record.cancel)
    }

    /// Remove every live record of `session_id`, handing back the tokens.
    pub fn retire_session(&self, session_id: &str) -> Vec<(RequestId, CancellationToken)> {
        let mut records = self.lock();
        let ids: Vec<RequestId> = records
            .values()
            .filter(|record| record.info.session_id == session_id)
            .map(|record| record.info.request_id.clone())
            .collect();
        ids.into_iter()
            .filter_map(|id| records.remove(&id).map(|record| (id, record.cancel)))
            .collect()
    }

    /// Remove the record and fire its cancel token.
    ///
    /// Returns `false` for unknown or already retired executions.
    pub fn cancel(&self, request_id: &str) -> bool {
        match self.retire(request_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every live execution of `session_id`; returns their ids.
    pub fn cancel_session(&self, session_id: &str) -> Vec<RequestId> {
        self.retire_session(session_id)
            .into_iter()
            .map(|(request_id, token)| {
                token.cancel();
                request_id
            })
            .collect()
    }

    /// Retire a record that reached `status`.
    ///
    /// Returns `false` if the record was already removed (e.g. cancelled).
    pub fn finish(&self, request_id: &str, status: ExecutionStatus) -> bool {
        let removed = self.lock().remove(request_id);
        match removed {
            Some(record) => {
                tracing::debug!(
                    request_id,
                    status = %status,
                    engine = %record.info.engine_name,
                    "execution retired"
                );
                true
            }
            None => false,
        }
    }

    pub fn get(&self, request_id: &str) -> Option<RunningExecution> {
        self.lock().get(request_id).map(|record| record.info.clone())
    }

    /// Live executions, oldest first.
    pub fn snapshot(&self) -> Vec<RunningExecution> {
        let mut executions: Vec<RunningExecution> =
            self.lock().values().map(|record| record.info.clone()).collect();
        executions.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.request_id.cmp(&b.request_id)));
        executions
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
