//! Post-write snapshot enrichment.
//!
//! # Responsibilities
//! - Log every record through the wrapped [`LogSink`]
//! - Resolve the write's targets to document ids and fetch their current state
//! - Keep lookups off the forwarding path and bounded in number
//!
//! # Design Decisions
//! - Lookups run on spawned tasks; `emit` only derives targets and spawns
//! - A saturated lookup budget drops the enrichment, never the record
//! - Individual lookup failures are logged and skipped, the rest proceed

use std::sync::Arc;

use async_trait::async_trait;
use bson::{Bson, Document};
use tokio::sync::Semaphore;

use super::log_sink::render;
use super::targets::{derive_targets, WriteTarget};
use super::{AuditError, AuditRecord, AuditSink, LogSink};
use crate::observability::metrics;
use crate::wire::{OperationInfo, OperationKind};

/// Read access to the upstream's documents.
#[async_trait]
pub trait DocumentFetcher: Send + Sync + 'static {
    /// `_id`s of the documents matching `filter` (at most one unless `many`).
    async fn resolve_ids(&self, info: &OperationInfo, filter: &Document, many: bool) -> Result<Vec<Bson>, AuditError>;

    /// Current state of the documents with the given `_id`s.
    async fn fetch_documents(&self, info: &OperationInfo, ids: &[Bson]) -> Result<Vec<Document>, AuditError>;
}

/// [`LogSink`] plus a background snapshot of the written documents.
pub struct EnrichingSink<F> {
    log: LogSink,
    fetcher: Arc<F>,
    lookups: Arc<Semaphore>,
}

impl<F: DocumentFetcher> EnrichingSink<F> {
    pub fn new(log: LogSink, fetcher: F, max_in_flight: usize) -> Self {
        Self {
            log,
            fetcher: Arc::new(fetcher),
            lookups: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }
}

impl<F: DocumentFetcher> AuditSink for EnrichingSink<F> {
    fn emit(&self, record: AuditRecord) -> Result<(), AuditError> {
        self.log.emit(record.clone())?;

        // Deleted documents cannot be read back.
        if record.info.kind == OperationKind::Delete {
            return Ok(());
        }

        let targets = derive_targets(&record.info, &record.request, &record.response);
        if targets.is_empty() {
            return Ok(());
        }

        let Ok(permit) = Arc::clone(&self.lookups).try_acquire_owned() else {
            metrics::record_enrichment_skipped();
            tracing::debug!(
                session = %record.session,
                request_id = record.request_id,
                "Enrichment budget exhausted, skipping snapshot"
            );
            return Ok(());
        };

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| AuditError::NoRuntime)?;
        let fetcher = Arc::clone(&self.fetcher);

        runtime.spawn(async move {
            let _permit = permit;
            let documents = snapshot(fetcher.as_ref(), &record.info, targets).await;

            tracing::info!(
                target: "audit",
                session = %record.session,
                request_id = record.request_id,
                namespace = %record.info.namespace(),
                operation = %record.info.kind,
                count = documents.len(),
                documents = %serde_json::Value::Array(documents.iter().map(render).collect()),
                "Post-write snapshot"
            );
        });

        Ok(())
    }
}

/// Resolve `targets` and fetch the documents behind them.
pub async fn snapshot<F: DocumentFetcher + ?Sized>(
    fetcher: &F,
    info: &OperationInfo,
    targets: Vec<WriteTarget>,
) -> Vec<Document> {
    let mut ids = Vec::new();
    for target in targets {
        match target {
            WriteTarget::Ids(known) => ids.extend(known),
            WriteTarget::Filter { filter, many } => match fetcher.resolve_ids(info, &filter, many).await {
                Ok(found) => ids.extend(found),
                Err(err) => {
                    tracing::warn!(namespace = %info.namespace(), error = %err, "Failed to resolve affected ids");
                }
            },
        }
    }

    if ids.is_empty() {
        return Vec::new();
    }

    match fetcher.fetch_documents(info, &ids).await {
        Ok(documents) => documents,
        Err(err) => {
            tracing::warn!(namespace = %info.namespace(), error = %err, "Failed to fetch affected documents");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connection::SessionId;
    use bson::doc;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct MockFetcher {
        filters: Mutex<Vec<(Document, bool)>>,
        fetched: Mutex<Vec<Vec<Bson>>>,
        fail_resolve: bool,
    }

    #[async_trait]
    impl DocumentFetcher for MockFetcher {
        async fn resolve_ids(&self, _info: &OperationInfo, filter: &Document, many: bool) -> Result<Vec<Bson>, AuditError> {
            self.filters.lock().unwrap().push((filter.clone(), many));
            if self.fail_resolve {
                return Err(AuditError::Lookup("connection reset".into()));
            }
            Ok(vec![Bson::Int32(42)])
        }

        async fn fetch_documents(&self, _info: &OperationInfo, ids: &[Bson]) -> Result<Vec<Document>, AuditError> {
            self.fetched.lock().unwrap().push(ids.to_vec());
            Ok(ids.iter().map(|id| doc! { "_id": id.clone(), "name": "ada" }).collect())
        }
    }

    fn info(kind: OperationKind) -> OperationInfo {
        OperationInfo {
            database: "app".into(),
            collection: "users".into(),
            kind,
        }
    }

    #[tokio::test]
    async fn snapshot_resolves_filters_then_fetches() {
        let fetcher = MockFetcher::default();
        let targets = vec![
            WriteTarget::Filter { filter: doc! { "a": 1 }, many: true },
            WriteTarget::Ids(vec![Bson::Int32(7)]),
        ];

        let documents = snapshot(&fetcher, &info(OperationKind::Update), targets).await;

        assert_eq!(documents.len(), 2);
        assert_eq!(*fetcher.filters.lock().unwrap(), vec![(doc! { "a": 1 }, true)]);
        assert_eq!(*fetcher.fetched.lock().unwrap(), vec![vec![Bson::Int32(42), Bson::Int32(7)]]);
    }

    #[tokio::test]
    async fn failed_resolution_is_skipped() {
        let fetcher = MockFetcher {
            fail_resolve: true,
            ..Default::default()
        };
        let targets = vec![WriteTarget::Filter { filter: doc! {}, many: false }];

        let documents = snapshot(&fetcher, &info(OperationKind::FindAndModify), targets).await;

        assert!(documents.is_empty());
        assert!(fetcher.fetched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn emit_spawns_lookup_for_updates() {
        let sink = EnrichingSink::new(LogSink::new(false), MockFetcher::default(), 4);
        let record = AuditRecord {
            session: SessionId::new(),
            request_id: 9,
            info: info(OperationKind::Update),
            request: doc! { "update": "users", "updates": [{ "q": { "a": 1 }, "u": {} }] },
            response: doc! { "n": 1, "ok": 1.0 },
            round_trip: Duration::from_millis(1),
        };

        sink.emit(record).unwrap();

        for _ in 0..50 {
            if !sink.fetcher.fetched.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sink.fetcher.fetched.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deletes_are_not_looked_up() {
        let sink = EnrichingSink::new(LogSink::new(false), MockFetcher::default(), 4);
        let record = AuditRecord {
            session: SessionId::new(),
            request_id: 10,
            info: info(OperationKind::Delete),
            request: doc! { "delete": "users", "deletes": [{ "q": { "a": 1 }, "limit": 0 }] },
            response: doc! { "n": 3, "ok": 1.0 },
            round_trip: Duration::from_millis(1),
        };

        sink.emit(record).unwrap();
        tokio::task::yield_now().await;

        assert!(sink.fetcher.filters.lock().unwrap().is_empty());
        assert_eq!(sink.lookups.available_permits(), 4);
    }
}
