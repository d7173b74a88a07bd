use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::error::{is_duplicate_table, AuditError};
use crate::models::record::AuditRecord;
use crate::models::value::{ColumnSpec, METADATA_COLUMNS};
use crate::repositories::store::{AuditStore, SourceStore};
use crate::services::projector::ProjectionPolicy;
use crate::sql::build_create_table;

/// Where the column set of a missing audit table comes from.
#[derive(Clone, Copy)]
pub enum SchemaSource<'a> {
    /// Descriptors of the record being audited.
    Record(&'a dyn AuditRecord),
    /// Live column catalog of this table in the source store.
    SourceTable(&'a str),
}

/// Confirms or creates audit tables, at most once per table per process.
///
/// The existence cache is created empty with the reconciler, only ever gains
/// entries, and is cleared only by [`SchemaReconciler::reset`]. Reconciliation
/// of a single table is serialized, so concurrent first use issues one CREATE.
pub struct SchemaReconciler {
    store: Arc<dyn AuditStore>,
    source: Option<Arc<dyn SourceStore>>,
    policy: ProjectionPolicy,
    known: RwLock<HashSet<String>>,
    pending: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SchemaReconciler {
    pub fn new(
        store: Arc<dyn AuditStore>,
        source: Option<Arc<dyn SourceStore>>,
        policy: ProjectionPolicy,
    ) -> Self {
        Self {
            store,
            source,
            policy,
            known: RwLock::new(HashSet::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_known(&self, table: &str) -> bool {
        self.known
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(table)
    }

    pub fn known_tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self
            .known
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        tables.sort();
        tables
    }

    /// Forgets every table, so the next task for each one reconciles again.
    pub fn reset(&self) {
        self.known
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Makes sure `table` exists in the audit store.
    ///
    /// On failure the cache is left untouched and the next call starts over.
    pub async fn ensure(&self, table: &str, source: SchemaSource<'_>) -> Result<(), AuditError> {
        if self.is_known(table) {
            return Ok(());
        }

        let lock = self.table_lock(table);
        let _guard = lock.lock().await;
        if self.is_known(table) {
            return Ok(());
        }

        let exists = self
            .store
            .table_exists(table)
            .await
            .map_err(|source| AuditError::SchemaIntrospection {
                table: table.to_string(),
                source,
            })?;

        if exists {
            tracing::debug!(table, "Audit table already exists");
        } else {
            let columns = self.columns_for(source).await?;
            let statement = build_create_table(self.store.dialect(), table, &columns);
            match self.store.execute(statement).await {
                Ok(_) => {
                    tracing::info!(table, columns = columns.len(), "Created audit table");
                }
                Err(err) if is_duplicate_table(&err) => {
                    tracing::debug!(table, "Audit table created concurrently");
                }
                Err(source) => {
                    return Err(AuditError::DdlExecution {
                        table: table.to_string(),
                        source,
                    });
                }
            }
        }

        self.known
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table.to_string());
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(table);
        Ok(())
    }

    fn table_lock(&self, table: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(table.to_string())
            .or_default()
            .clone()
    }

    async fn columns_for(&self, source: SchemaSource<'_>) -> Result<Vec<ColumnSpec>, AuditError> {
        match source {
            SchemaSource::Record(record) => record.column_specs(&self.policy),
            SchemaSource::SourceTable(source_table) => {
                let store = self
                    .source
                    .as_ref()
                    .ok_or_else(|| AuditError::SourceUnavailable(source_table.to_string()))?;
                let columns = store.describe_table(source_table).await?;
                if columns.is_empty() {
                    return Err(AuditError::SourceTableMissing(source_table.to_string()));
                }
                if let Some(reserved) = columns
                    .iter()
                    .find(|spec| METADATA_COLUMNS.contains(&spec.name.as_str()))
                {
                    return Err(AuditError::RecordProjection(format!(
                        "source column `{}` of `{}` is reserved for audit metadata",
                        reserved.name, source_table
                    )));
                }
                Ok(columns)
            }
        }
    }
}
