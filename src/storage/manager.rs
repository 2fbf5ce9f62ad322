//! Queued, duplicate-aware persistence of search results.
//!
//! ```text
//! store_search_results ──► mpsc queue ──► worker
//!                                           ├─ recent-hash cache ─┐
//!                                           ├─ find_similar ──────┴─► Duplicate
//!                                           └─ join(content store, graph store)
//!                                                 ├─ both ok ─► Completed
//!                                                 └─ any err ─► delete content row ─► Failed
//! ```
//!
//! Producers never touch the stores directly; they only enqueue. The single
//! worker processes operations in submission order, so two identical results
//! in one batch resolve as one `Completed` plus one `Duplicate`.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use moka::future::Cache;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use unified_search::{ResultSink, SearchResult};

use super::extract::extract_graph;
use super::{ContentStore, GraphStore, IntelligenceRecord, OperationId};
use crate::config::StorageConfig;
use crate::error::{IntelError, Result};

/// Lifecycle of one storage operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Processing,
    Completed { record_id: String },
    /// Content was already stored; nothing was written.
    Duplicate { existing_id: Option<String> },
    Failed { error: String },
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Processing)
    }
}

/// Counters polled by the metrics endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StorageMetrics {
    pub total_operations: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub duplicates: u64,
    pub pending: u64,
    pub average_processing_time_ms: f64,
    /// Bytes of text and JSON content written so far.
    pub approximate_storage_bytes: u64,
}

enum StorageOperation {
    Store {
        id: OperationId,
        record: IntelligenceRecord,
    },
    Flush(oneshot::Sender<()>),
}

#[derive(Default)]
struct Counters {
    total: u64,
    succeeded: u64,
    failed: u64,
    duplicates: u64,
    processed: u64,
    total_processing: Duration,
    bytes: u64,
}

/// Statuses live in a bounded cache: each change restarts the entry's TTL,
/// and the least useful entries go first once `status_max_entries` is hit.
struct Shared {
    statuses: moka::sync::Cache<OperationId, OperationStatus>,
    counters: Mutex<Counters>,
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Shared {
    fn new(config: &StorageConfig) -> Self {
        Self {
            statuses: moka::sync::Cache::builder()
                .max_capacity(config.status_max_entries)
                .time_to_live(config.status_ttl().max(Duration::from_millis(1)))
                .build(),
            counters: Mutex::new(Counters::default()),
        }
    }

    fn set_status(&self, id: &OperationId, status: OperationStatus) {
        self.statuses.insert(id.clone(), status);
    }

    fn finish(&self, id: &OperationId, status: OperationStatus, elapsed: Duration, bytes: u64) {
        {
            let mut c = guard(&self.counters);
            match &status {
                OperationStatus::Completed { .. } => {
                    c.succeeded += 1;
                    c.bytes += bytes;
                }
                OperationStatus::Duplicate { .. } => c.duplicates += 1,
                OperationStatus::Failed { .. } => c.failed += 1,
                OperationStatus::Pending | OperationStatus::Processing => {}
            }
            c.processed += 1;
            c.total_processing += elapsed;
        }
        self.set_status(id, status);
    }
}

/// Background persistence of accepted search results.
///
/// Must be created inside a tokio runtime: the worker task is spawned on
/// construction.
pub struct IntelligenceStorageManager {
    sender: Mutex<Option<mpsc::UnboundedSender<StorageOperation>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    shared: Arc<Shared>,
}

impl IntelligenceStorageManager {
    pub fn new(
        content: Arc<dyn ContentStore>,
        graph: Arc<dyn GraphStore>,
        config: &StorageConfig,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new(config));
        let worker = Worker {
            content,
            graph,
            recent: Cache::builder()
                .max_capacity(config.duplicate_cache_max_entries)
                .time_to_live(config.duplicate_cache_ttl().max(Duration::from_millis(1)))
                .build(),
            threshold: config.duplicate_threshold,
            shared: Arc::clone(&shared),
        };
        let handle = tokio::spawn(worker.run(receiver));
        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(handle)),
            shared,
        }
    }

    /// Queue every result for storage and return one operation id per result,
    /// in input order. Returns immediately.
    pub fn store_search_results(&self, results: &[SearchResult]) -> Vec<OperationId> {
        let sender = guard(&self.sender).clone();
        results
            .iter()
            .map(|result| {
                let id = OperationId::new();
                guard(&self.shared.counters).total += 1;
                self.shared.set_status(&id, OperationStatus::Pending);

                let op = StorageOperation::Store {
                    id: id.clone(),
                    record: IntelligenceRecord::from_result(result),
                };
                let sent = sender.as_ref().is_some_and(|tx| tx.send(op).is_ok());
                if !sent {
                    warn!(operation = %id, "storage queue closed, dropping result");
                    self.shared.finish(
                        &id,
                        OperationStatus::Failed {
                            error: "storage manager is shut down".into(),
                        },
                        Duration::ZERO,
                        0,
                    );
                }
                id
            })
            .collect()
    }

    /// Latest status of an operation, or `None` if it is unknown or has
    /// aged out.
    pub fn operation_status(&self, id: &OperationId) -> Option<OperationStatus> {
        self.shared.statuses.get(id)
    }

    pub fn metrics(&self) -> StorageMetrics {
        let c = guard(&self.shared.counters);
        let average = if c.processed == 0 {
            0.0
        } else {
            c.total_processing.as_secs_f64() * 1000.0 / c.processed as f64
        };
        StorageMetrics {
            total_operations: c.total,
            succeeded: c.succeeded,
            failed: c.failed,
            duplicates: c.duplicates,
            pending: c.total.saturating_sub(c.processed),
            average_processing_time_ms: average,
            approximate_storage_bytes: c.bytes,
        }
    }

    /// Wait until every operation queued before this call has finished.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        let sent = guard(&self.sender)
            .as_ref()
            .is_some_and(|s| s.send(StorageOperation::Flush(tx)).is_ok());
        if sent {
            let _ = rx.await;
        }
    }

    /// Close the queue and wait for the worker to drain it.
    pub async fn shutdown(&self) {
        drop(guard(&self.sender).take());
        let handle = guard(&self.worker).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "storage worker ended abnormally");
            }
            info!("storage manager stopped");
        }
    }
}

impl ResultSink for IntelligenceStorageManager {
    fn submit(&self, results: &[SearchResult]) -> usize {
        self.store_search_results(results).len()
    }
}

struct Worker {
    content: Arc<dyn ContentStore>,
    graph: Arc<dyn GraphStore>,
    recent: Cache<String, String>,
    threshold: f64,
    shared: Arc<Shared>,
}

impl Worker {
    async fn run(self, mut receiver: mpsc::UnboundedReceiver<StorageOperation>) {
        while let Some(op) = receiver.recv().await {
            match op {
                StorageOperation::Store { id, record } => {
                    self.shared.set_status(&id, OperationStatus::Processing);
                    let started = Instant::now();
                    let bytes = (record.text.len() + record.content.to_string().len()) as u64;
                    let status = self.process(record).await;
                    match &status {
                        OperationStatus::Failed { error } => {
                            warn!(operation = %id, %error, "storage operation failed");
                        }
                        other => debug!(operation = %id, status = ?other, "storage operation done"),
                    }
                    self.shared.finish(&id, status, started.elapsed(), bytes);
                }
                StorageOperation::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
    }

    async fn process(&self, record: IntelligenceRecord) -> OperationStatus {
        if let Some(existing) = self.recent.get(&record.content_hash).await {
            return OperationStatus::Duplicate {
                existing_id: Some(existing),
            };
        }

        match self.find_similar(&record).await {
            Ok(Some(existing)) => {
                return OperationStatus::Duplicate {
                    existing_id: Some(existing),
                };
            }
            Ok(None) => {}
            Err(e) => {
                return OperationStatus::Failed {
                    error: e.to_string(),
                };
            }
        }

        match self.write(&record).await {
            Ok(()) => {
                self.recent
                    .insert(record.content_hash.clone(), record.id.clone())
                    .await;
                OperationStatus::Completed {
                    record_id: record.id,
                }
            }
            Err(e) => OperationStatus::Failed {
                error: e.to_string(),
            },
        }
    }

    async fn find_similar(&self, record: &IntelligenceRecord) -> Result<Option<String>> {
        let store = Arc::clone(&self.content);
        let text = record.text.clone();
        let threshold = self.threshold;
        tokio::task::spawn_blocking(move || store.find_similar(&text, threshold))
            .await
            .map_err(|e| IntelError::Storage(format!("similarity task failed: {e}")))?
    }

    /// Write to both stores concurrently; succeed only if both do.
    ///
    /// A content row written alongside a failed graph write is deleted, so a
    /// resubmission is not mistaken for a duplicate. Graph writes are
    /// idempotent and need no undo.
    async fn write(&self, record: &IntelligenceRecord) -> Result<()> {
        let graph_data = extract_graph(record);

        let content = Arc::clone(&self.content);
        let content_record = record.clone();
        let content_write = tokio::task::spawn_blocking(move || content.store(&content_record));

        let graph = Arc::clone(&self.graph);
        let graph_record = record.clone();
        let graph_write =
            tokio::task::spawn_blocking(move || graph.write(&graph_record, &graph_data));

        let (content_res, graph_res) = tokio::join!(content_write, graph_write);
        let join = |r: std::result::Result<Result<()>, tokio::task::JoinError>, what: &str| {
            r.map_err(|e| IntelError::StorageWriteFailure(format!("{what} task failed: {e}")))?
        };
        let content_res = join(content_res, "content");
        let graph_res = join(graph_res, "graph");

        match (content_res, graph_res) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), Ok(())) => Err(IntelError::StorageWriteFailure(format!(
                "content store: {e}"
            ))),
            (Ok(()), Err(e)) => {
                self.discard_content(&record.id).await;
                Err(IntelError::StorageWriteFailure(format!("graph store: {e}")))
            }
            (Err(c), Err(g)) => Err(IntelError::StorageWriteFailure(format!(
                "content store: {c}; graph store: {g}"
            ))),
        }
    }

    async fn discard_content(&self, id: &str) {
        let content = Arc::clone(&self.content);
        let record_id = id.to_owned();
        match tokio::task::spawn_blocking(move || content.delete(&record_id)).await {
            Ok(Ok(_)) => debug!(record = id, "rolled back content row"),
            Ok(Err(e)) => error!(record = id, error = %e, "content rollback failed"),
            Err(e) => error!(record = id, error = %e, "content rollback task failed"),
        }
    }
}
