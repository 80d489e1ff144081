//! Best-effort teardown of a session's resources.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use vmigrate_core::{ProviderType, ResourceKind, ResourceRecord, SessionId};

use crate::poll::{PollError, Poller};
use crate::provider::SourceProvider;
use crate::store::ObjectStore;
use crate::{ExecutionContext, ExecutorConfig, ExecutorError, TeardownPolicy, TrackingFile};

/// What happened to one record.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TeardownStatus {
    Deleted,
    /// Nothing to delete; the object was already gone.
    AlreadyGone,
    /// Kept for inspection after an expected hook failure.
    Retained,
    /// Teardown was suppressed.
    Skipped,
    Failed(String),
}

impl fmt::Display for TeardownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deleted => f.write_str("deleted"),
            Self::AlreadyGone => f.write_str("already gone"),
            Self::Retained => f.write_str("retained"),
            Self::Skipped => f.write_str("skipped"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct TeardownOutcome {
    pub record: ResourceRecord,
    pub status: TeardownStatus,
}

/// Per-record outcomes in the order they were processed.
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct TeardownReport {
    pub outcomes: Vec<TeardownOutcome>,
}

impl TeardownReport {
    /// Records whose deletion failed.
    #[must_use]
    pub fn leftovers(&self) -> Vec<&ResourceRecord> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, TeardownStatus::Failed(_)))
            .map(|o| &o.record)
            .collect()
    }

    /// Records that still exist afterwards: failed, retained or skipped.
    #[must_use]
    pub fn left_in_place(&self) -> Vec<&ResourceRecord> {
        self.outcomes
            .iter()
            .filter(|o| !matches!(o.status, TeardownStatus::Deleted | TeardownStatus::AlreadyGone))
            .map(|o| &o.record)
            .collect()
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.leftovers().is_empty()
    }
}

/// Deletes registered resources in reverse creation order.
pub struct TeardownEngine {
    store: Arc<dyn ObjectStore>,
    providers: BTreeMap<ProviderType, Arc<SourceProvider>>,
    poll_interval: Duration,
    deletion_timeout: Duration,
    tracking_file: Option<PathBuf>,
}

impl TeardownEngine {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, config: &ExecutorConfig) -> Self {
        Self {
            store,
            providers: BTreeMap::new(),
            poll_interval: config.poll_interval,
            deletion_timeout: config.deletion_timeout,
            tracking_file: config.tracking_file.clone(),
        }
    }

    /// Register the provider that deletes `ClonedVm` records of its type.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<SourceProvider>) -> Self {
        self.providers.insert(provider.provider_type(), provider);
        self
    }

    /// Tear down everything `ctx` created.
    ///
    /// Never fails: each failure is recorded in the report and processing
    /// continues. With [`TeardownPolicy::Suppressed`] nothing is deleted and
    /// the creation log stays in `ctx`; otherwise the log is consumed, so a
    /// second call reports nothing.
    ///
    /// With a tracking file configured, the records left in place (the whole
    /// log when suppressed) are written to it in creation order. A second
    /// call leaves the file alone.
    pub async fn teardown(&self, ctx: &mut ExecutionContext, policy: TeardownPolicy) -> TeardownReport {
        if policy == TeardownPolicy::Suppressed {
            tracing::warn!(session = %ctx.session(), records = ctx.records().len(), "teardown suppressed, leaving resources in place");
            let outcomes = ctx
                .records()
                .iter()
                .rev()
                .map(|record| TeardownOutcome { record: record.clone(), status: TeardownStatus::Skipped })
                .collect();
            if !ctx.is_consumed() {
                self.write_tracking(ctx.session(), ctx.records()).await;
            }
            return TeardownReport { outcomes };
        }

        if ctx.is_consumed() {
            tracing::debug!(session = %ctx.session(), "creation log already consumed");
            return TeardownReport::default();
        }
        let records = ctx.take_records();
        tracing::info!(session = %ctx.session(), records = records.len(), "tearing down session resources");
        let mut report = TeardownReport::default();
        for record in records.into_iter().rev() {
            let status = if ctx.is_retained(&record.resource) {
                tracing::warn!(resource = %record.resource, "retained, not deleting");
                TeardownStatus::Retained
            } else {
                match self.delete(&record).await {
                    Ok(status) => status,
                    Err(e) => {
                        tracing::error!(resource = %record.resource, error = %e, "teardown failed");
                        TeardownStatus::Failed(e.to_string())
                    }
                }
            };
            report.outcomes.push(TeardownOutcome { record, status });
        }
        tracing::info!(
            session = %ctx.session(),
            leftovers = report.leftovers().len(),
            "teardown finished"
        );
        self.write_tracking(ctx.session(), report.left_in_place().into_iter().rev()).await;
        report
    }

    async fn write_tracking<'a>(&self, session: &SessionId, records: impl IntoIterator<Item = &'a ResourceRecord>) {
        let Some(path) = &self.tracking_file else {
            return;
        };
        if let Err(e) = TrackingFile::from_records(session.clone(), records).write(path).await {
            tracing::error!(path = %path.display(), error = %e, "failed to write tracking file");
        }
    }

    async fn delete(&self, record: &ResourceRecord) -> Result<TeardownStatus, ExecutorError> {
        let resource = &record.resource;
        if let ResourceKind::ClonedVm(provider_type) = resource.kind {
            let provider = self.providers.get(&provider_type).ok_or_else(|| ExecutorError::Provider {
                provider: provider_type,
                reason: "no provider registered for teardown".to_owned(),
            })?;
            let deleted = provider.delete_vm(&resource.name).await?;
            return Ok(if deleted { TeardownStatus::Deleted } else { TeardownStatus::AlreadyGone });
        }

        if !self.store.delete(resource).await.map_err(|e| e.for_resource(resource))? {
            tracing::info!(resource = %resource, "already gone");
            return Ok(TeardownStatus::AlreadyGone);
        }
        let store = &self.store;
        let gone = Poller::new(self.poll_interval, self.deletion_timeout)
            .until(|| async move {
                let present = store.get(resource).await?.is_some();
                Ok::<_, ExecutorError>((!present).then_some(()))
            })
            .await;
        match gone {
            Ok(()) => {
                tracing::info!(resource = %resource, "deleted");
                Ok(TeardownStatus::Deleted)
            }
            Err(PollError::DeadlineExceeded { waited, .. }) => Err(ExecutorError::Resource {
                resource: resource.clone(),
                source: Box::new(ExecutorError::Api(format!("still present {waited:?} after deletion was requested"))),
            }),
            Err(PollError::Sample(e)) => Err(e.for_resource(resource)),
        }
    }
}
