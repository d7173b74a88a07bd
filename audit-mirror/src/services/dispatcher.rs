//! Bounded, drop-on-overflow audit queue serviced by a fixed worker pool.
//!
//! Callers never wait on the database: `submit` either enqueues the task or
//! drops it right away. Each worker takes one task at a time and runs the
//! whole pipeline for it (reconcile schema, project, insert). Failures are
//! logged and counted per task and never reach the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::error::AuditError;
use crate::models::record::AuditRecord;
use crate::models::task::{AuditAction, AuditPayload, AuditTask, RecordId};
use crate::repositories::store::{AuditStore, SourceStore};
use crate::services::projector::ProjectionPolicy;
use crate::services::schema::{SchemaReconciler, SchemaSource};
use crate::sql::build_insert;

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOptions {
    pub workers: usize,
    pub queue_size: usize,
    /// Appended to the source table name to form the audit table name. It may
    /// only be empty when the audit store is not also the source store, since
    /// the audit table would otherwise be the source table itself.
    pub table_suffix: String,
    pub policy: ProjectionPolicy,
    pub shutdown_timeout: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_size: 1024,
            table_suffix: "_audit".to_string(),
            policy: ProjectionPolicy::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    QueueFull,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    Dropped(DropReason),
}

impl SubmitOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmitOutcome::Accepted)
    }
}

/// Counters since the service started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub accepted: u64,
    pub dropped: u64,
    pub processed: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    accepted: AtomicU64,
    dropped: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
}

struct Pipeline {
    store: Arc<dyn AuditStore>,
    source: Option<Arc<dyn SourceStore>>,
    schema: SchemaReconciler,
    policy: ProjectionPolicy,
    table_suffix: String,
    counters: Counters,
}

impl Pipeline {
    fn audit_table(&self, table: &str) -> String {
        format!("{}{}", table, self.table_suffix)
    }

    async fn handle(&self, worker_id: usize, task: AuditTask) {
        let span = tracing::debug_span!(
            "audit_task",
            worker_id,
            table = task.table(),
            action = %task.action(),
            record_id = %task.record_id()
        );
        match self.process(&task).instrument(span).await {
            Ok(()) => {
                self.counters.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    error = %err,
                    code = err.code(),
                    table = task.table(),
                    action = %task.action(),
                    record_id = %task.record_id(),
                    "Failed to record audit entry"
                );
            }
        }
    }

    async fn process(&self, task: &AuditTask) -> Result<(), AuditError> {
        let audit_table = self.audit_table(task.table());
        let mut row = match task.payload() {
            AuditPayload::Record(record) => {
                self.schema
                    .ensure(&audit_table, SchemaSource::Record(record.as_ref()))
                    .await?;
                record.project(&self.policy)?
            }
            AuditPayload::SourceRow => {
                self.schema
                    .ensure(&audit_table, SchemaSource::SourceTable(task.table()))
                    .await?;
                let source = self
                    .source
                    .as_ref()
                    .ok_or_else(|| AuditError::SourceUnavailable(task.table().to_string()))?;
                source
                    .select_row(task.table(), task.record_id())
                    .await?
                    .ok_or_else(|| AuditError::RowNotFound {
                        table: task.table().to_string(),
                        id: task.record_id().to_string(),
                    })?
            }
        };

        row.append_metadata(task.action().as_str(), task.actor(), Utc::now().naive_utc())?;
        let statement = build_insert(self.store.dialect(), &audit_table, &row);
        self.store
            .execute(statement)
            .await
            .map_err(|source| AuditError::InsertExecution {
                table: audit_table.clone(),
                source,
            })?;
        tracing::debug!(table = %audit_table, columns = row.len(), "Recorded audit entry");
        Ok(())
    }
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<AuditTask>>>;

async fn run_worker(worker_id: usize, receiver: SharedReceiver, pipeline: Arc<Pipeline>) {
    loop {
        let task = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let Some(task) = task else {
            break;
        };
        pipeline.handle(worker_id, task).await;
    }
    tracing::debug!(worker_id, "Audit worker stopped");
}

/// Entry point for calling code.
///
/// Dropping the service without [`AuditService::shutdown`] closes the queue;
/// workers still drain what was accepted, but nobody waits for them.
pub struct AuditService {
    sender: RwLock<Option<mpsc::Sender<AuditTask>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    pipeline: Arc<Pipeline>,
    capacity: usize,
    shutdown_timeout: Duration,
}

fn shares_store(store: &Arc<dyn AuditStore>, source: Option<&Arc<dyn SourceStore>>) -> bool {
    source.is_some_and(|source| {
        std::ptr::eq(
            Arc::as_ptr(store).cast::<()>(),
            Arc::as_ptr(source).cast::<()>(),
        )
    })
}

impl AuditService {
    /// Spawns the worker pool on the current tokio runtime.
    pub fn start(
        options: DispatchOptions,
        store: Arc<dyn AuditStore>,
        source: Option<Arc<dyn SourceStore>>,
    ) -> Result<Self, AuditError> {
        if options.workers == 0 {
            return Err(AuditError::Construction(
                "worker count must be at least 1".to_string(),
            ));
        }
        if options.queue_size == 0 {
            return Err(AuditError::Construction(
                "queue size must be at least 1".to_string(),
            ));
        }
        if options.table_suffix.is_empty() && shares_store(&store, source.as_ref()) {
            return Err(AuditError::Construction(
                "table suffix must not be empty when audit and source stores are the same"
                    .to_string(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            AuditError::Construction("audit workers need a running tokio runtime".to_string())
        })?;

        let (sender, receiver) = mpsc::channel(options.queue_size);
        let receiver: SharedReceiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let dialect = store.dialect();
        let pipeline = Arc::new(Pipeline {
            schema: SchemaReconciler::new(Arc::clone(&store), source.clone(), options.policy),
            store,
            source,
            policy: options.policy,
            table_suffix: options.table_suffix,
            counters: Counters::default(),
        });

        let workers = (0..options.workers)
            .map(|worker_id| {
                runtime.spawn(run_worker(
                    worker_id,
                    Arc::clone(&receiver),
                    Arc::clone(&pipeline),
                ))
            })
            .collect();

        tracing::info!(
            workers = options.workers,
            queue_size = options.queue_size,
            dialect = %dialect,
            "Audit service started"
        );

        Ok(Self {
            sender: RwLock::new(Some(sender)),
            workers: Mutex::new(workers),
            pipeline,
            capacity: options.queue_size,
            shutdown_timeout: options.shutdown_timeout,
        })
    }

    /// Enqueues `task` without waiting. A full or closed queue drops it.
    pub fn submit(&self, task: AuditTask) -> SubmitOutcome {
        let sender = self.sender.read().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = sender.as_ref() else {
            return self.reject(&task, DropReason::Closed);
        };
        match sender.try_send(task) {
            Ok(()) => {
                self.pipeline.counters.accepted.fetch_add(1, Ordering::Relaxed);
                SubmitOutcome::Accepted
            }
            Err(TrySendError::Full(task)) => self.reject(&task, DropReason::QueueFull),
            Err(TrySendError::Closed(task)) => self.reject(&task, DropReason::Closed),
        }
    }

    /// Audits a caller-supplied record.
    pub fn log_record<R: AuditRecord>(
        &self,
        table: impl Into<String>,
        record_id: impl Into<RecordId>,
        action: impl Into<AuditAction>,
        actor: impl Into<String>,
        record: R,
    ) -> SubmitOutcome {
        self.submit(AuditTask::record(table, record_id, action, actor, record))
    }

    /// Audits the current source row with the given id.
    pub fn log_snapshot(
        &self,
        table: impl Into<String>,
        record_id: impl Into<RecordId>,
        action: impl Into<AuditAction>,
        actor: impl Into<String>,
    ) -> SubmitOutcome {
        self.submit(AuditTask::snapshot(table, record_id, action, actor))
    }

    fn reject(&self, task: &AuditTask, reason: DropReason) -> SubmitOutcome {
        let dropped = self.pipeline.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        match reason {
            DropReason::QueueFull => tracing::warn!(
                table = task.table(),
                action = %task.action(),
                record_id = %task.record_id(),
                capacity = self.capacity,
                dropped_total = dropped,
                "Audit queue full, dropping task"
            ),
            DropReason::Closed => tracing::warn!(
                table = task.table(),
                action = %task.action(),
                record_id = %task.record_id(),
                dropped_total = dropped,
                "Audit service is shut down, dropping task"
            ),
        }
        SubmitOutcome::Dropped(reason)
    }

    pub fn stats(&self) -> DispatchStats {
        let counters = &self.pipeline.counters;
        DispatchStats {
            accepted: counters.accepted.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            processed: counters.processed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Tasks waiting in the queue.
    pub fn pending(&self) -> usize {
        self.sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|sender| self.capacity - sender.capacity())
            .unwrap_or(0)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn audit_table_name(&self, table: &str) -> String {
        self.pipeline.audit_table(table)
    }

    pub fn schema(&self) -> &SchemaReconciler {
        &self.pipeline.schema
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Stops accepting tasks, lets the workers drain the queue and joins them.
    ///
    /// Workers still busy when the shutdown timeout expires are aborted and
    /// whatever they had not written is lost. Calling this twice is a no-op.
    pub async fn shutdown(&self) -> DispatchStats {
        let sender = self
            .sender
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_none() {
            return self.stats();
        }
        drop(sender);

        let workers = {
            let mut guard = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;
        let mut aborted = 0usize;
        for handle in workers {
            let abort = handle.abort_handle();
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::error!(error = %err, "Audit worker terminated abnormally");
                }
                Err(_) => {
                    abort.abort();
                    aborted += 1;
                }
            }
        }
        if aborted > 0 {
            tracing::warn!(
                aborted,
                timeout_secs = self.shutdown_timeout.as_secs(),
                "Audit workers did not drain before the shutdown timeout"
            );
        }

        let stats = self.stats();
        tracing::info!(
            accepted = stats.accepted,
            dropped = stats.dropped,
            processed = stats.processed,
            failed = stats.failed,
            "Audit service stopped"
        );
        stats
    }
}
