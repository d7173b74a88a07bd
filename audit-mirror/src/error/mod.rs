use thiserror::Error;

/// Failures of the audit pipeline.
///
/// Every variant except [`AuditError::Construction`] is terminal for a single
/// task only: workers log it and move on. Nothing here ever reaches the code
/// that submitted the task.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Invalid audit configuration: {0}")]
    Construction(String),

    #[error("Failed to inspect schema of `{table}`: {source}")]
    SchemaIntrospection {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to create audit table `{table}`: {source}")]
    DdlExecution {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Invalid audit record: {0}")]
    RecordProjection(String),

    #[error("Failed to read source row from `{table}`: {source}")]
    SourceRead {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Source row {id} not found in `{table}`")]
    RowNotFound { table: String, id: String },

    #[error("Column `{column}` of `{table}` has unsupported type {type_name}")]
    UnsupportedColumnType {
        table: String,
        column: String,
        type_name: String,
    },

    #[error("Source table `{0}` not found or has no columns")]
    SourceTableMissing(String),

    #[error("No source store configured; cannot snapshot `{0}`")]
    SourceUnavailable(String),

    #[error("Failed to insert audit row into `{table}`: {source}")]
    InsertExecution {
        table: String,
        #[source]
        source: sqlx::Error,
    },
}

impl AuditError {
    /// Short machine-readable label used as a log field.
    pub fn code(&self) -> &'static str {
        match self {
            AuditError::Construction(_) => "construction",
            AuditError::SchemaIntrospection { .. } => "schema_introspection",
            AuditError::DdlExecution { .. } => "ddl_execution",
            AuditError::RecordProjection(_) => "record_projection",
            AuditError::SourceRead { .. } => "source_read",
            AuditError::RowNotFound { .. } => "row_not_found",
            AuditError::UnsupportedColumnType { .. } => "unsupported_column_type",
            AuditError::SourceTableMissing(_) => "source_table_missing",
            AuditError::SourceUnavailable(_) => "source_unavailable",
            AuditError::InsertExecution { .. } => "insert_execution",
        }
    }
}

/// Whether a database error reports that the table being created already exists.
///
/// PostgreSQL reports SQLSTATE `42P07`, MySQL reports `42S01` (error 1050).
pub fn is_duplicate_table(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db_err| db_err.code())
        .map(|code| code == "42P07" || code == "42S01")
        .unwrap_or(false)
}
