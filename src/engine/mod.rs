mod availability;
mod conflict;
mod error;
mod expand;
mod mutations;
mod queries;
mod validate;
mod workflow;
#[cfg(test)]
mod tests;

pub use availability::{free_windows, merge_overlapping, subtract_intervals};
pub use conflict::{ConflictCheck, first_conflict};
pub use error::{ConflictError, EngineError, Field, InfrastructureError, ValidationErrors};
pub use expand::{DayRequest, expand};
pub use validate::{ValidatedRequest, validate};
pub use workflow::{StatusAction, Transition, UnknownAction, can_transition, transition};

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};

use crate::clock::{Clock, SystemClock};
use crate::observability;
use crate::repository::{Identity, ReservationRepository, StoreError};

/// Knobs the engine reads on every call.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Upper bound for any single repository call.
    pub repo_timeout: Duration,
    /// Office local time; decides what "today" is.
    pub office_offset: FixedOffset,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            repo_timeout: Duration::from_millis(5_000),
            office_offset: FixedOffset::east_opt(8 * 3600).unwrap_or_else(|| Utc.fix()),
        }
    }
}

/// Reservation orchestrator. Holds no mutable state of its own; every
/// operation is one pass over the repository.
pub struct Engine {
    repo: Arc<dyn ReservationRepository>,
    identity: Arc<dyn Identity>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(repo: Arc<dyn ReservationRepository>, identity: Arc<dyn Identity>) -> Self {
        Self {
            repo,
            identity,
            clock: Arc::new(SystemClock),
            settings: EngineSettings::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn repository(&self) -> &Arc<dyn ReservationRepository> {
        &self.repo
    }

    pub(super) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(super) fn today(&self) -> NaiveDate {
        self.clock.today(self.settings.office_offset)
    }

    /// Run one repository call under the configured timeout, recording its
    /// latency. Store failures are mapped to engine errors.
    pub(super) async fn repo_call<T, F>(&self, operation: &'static str, call: F) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        self.repo_call_with(operation, call, |e| EngineError::from_store(operation, e))
            .await
    }

    /// [`repo_call`](Self::repo_call) with a caller-supplied store error mapping.
    pub(super) async fn repo_call_with<T, F, M>(
        &self,
        operation: &'static str,
        call: F,
        map_err: M,
    ) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, StoreError>>,
        M: FnOnce(StoreError) -> EngineError,
    {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.settings.repo_timeout, call).await;
        metrics::histogram!(observability::REPOSITORY_DURATION_SECONDS, "operation" => operation)
            .record(started.elapsed().as_secs_f64());
        match outcome {
            Ok(result) => result.map_err(map_err),
            Err(_) => {
                tracing::warn!(operation, timeout = ?self.settings.repo_timeout, "repository call timed out");
                Err(InfrastructureError::Timeout { operation }.into())
            }
        }
    }

    /// Count a failed public operation.
    pub(super) fn observe<T>(&self, operation: &'static str, result: Result<T, EngineError>) -> Result<T, EngineError> {
        if let Err(err) = &result {
            let kind = observability::error_label(err);
            metrics::counter!(observability::ENGINE_ERRORS_TOTAL, "operation" => operation, "kind" => kind)
                .increment(1);
            if err.is_retryable() {
                tracing::warn!(operation, error = %err, "infrastructure failure");
            } else {
                tracing::debug!(operation, error = %err, "rejected");
            }
        }
        result
    }
}
