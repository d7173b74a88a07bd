//! Loosely typed row representation shared by the projector, the schema
//! reconciler and the statement builder.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::AuditError;

pub const AUDIT_ACTION_COLUMN: &str = "audit_action";
pub const AUDIT_ACTOR_COLUMN: &str = "audit_actor";
pub const AUDIT_CREATED_AT_COLUMN: &str = "audit_created_at";

/// Metadata columns appended to every audit row, in insertion order.
pub const METADATA_COLUMNS: [&str; 3] = [
    AUDIT_ACTION_COLUMN,
    AUDIT_ACTOR_COLUMN,
    AUDIT_CREATED_AT_COLUMN,
];

/// Column type hint carried next to every value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    Text,
    Integer,
    Float,
    Boolean,
    Timestamp,
    TimestampTz,
    Date,
    Uuid,
    Json,
    Bytes,
}

/// A single bindable value. NULL keeps its kind so it can be bound with the
/// right SQL type.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null(ColumnKind),
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Date(NaiveDate),
    Uuid(Uuid),
    Json(Value),
    Bytes(Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null(_))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedColumn {
    pub name: String,
    pub kind: ColumnKind,
    pub value: SqlValue,
    /// SQL type of the destination column, when known. PostgreSQL casts the
    /// bound parameter to it.
    pub sql_type: Option<String>,
}

/// Ordered (name, kind, value) triples for one audit row.
///
/// Column names are unique within a row; names and values are positionally
/// aligned by construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectedRow {
    columns: Vec<ProjectedColumn>,
}

impl ProjectedRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            columns: Vec::with_capacity(capacity),
        }
    }

    pub fn push(
        &mut self,
        name: impl Into<String>,
        kind: ColumnKind,
        value: SqlValue,
    ) -> Result<(), AuditError> {
        self.push_typed(name, kind, value, None)
    }

    /// Like [`ProjectedRow::push`], recording the destination SQL type.
    pub fn push_typed(
        &mut self,
        name: impl Into<String>,
        kind: ColumnKind,
        value: SqlValue,
        sql_type: Option<String>,
    ) -> Result<(), AuditError> {
        let name = name.into();
        if self.contains(&name) {
            return Err(AuditError::RecordProjection(format!(
                "duplicate column `{}`",
                name
            )));
        }
        self.columns.push(ProjectedColumn {
            name,
            kind,
            value,
            sql_type,
        });
        Ok(())
    }

    /// Appends `audit_action`, `audit_actor` and `audit_created_at`, in that order.
    pub fn append_metadata(
        &mut self,
        action: &str,
        actor: &str,
        at: NaiveDateTime,
    ) -> Result<(), AuditError> {
        if let Some(reserved) = METADATA_COLUMNS.iter().find(|name| self.contains(name)) {
            return Err(AuditError::RecordProjection(format!(
                "column `{}` is reserved for audit metadata",
                reserved
            )));
        }
        self.columns.reserve(METADATA_COLUMNS.len());
        self.push(
            AUDIT_ACTION_COLUMN,
            ColumnKind::Text,
            SqlValue::Text(action.to_string()),
        )?;
        self.push(
            AUDIT_ACTOR_COLUMN,
            ColumnKind::Text,
            SqlValue::Text(actor.to_string()),
        )?;
        self.push(
            AUDIT_CREATED_AT_COLUMN,
            ColumnKind::Timestamp,
            SqlValue::Timestamp(at),
        )
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|column| column.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|column| column.name == name)
            .map(|column| &column.value)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[ProjectedColumn] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|column| column.name.as_str()).collect()
    }

    pub fn values(&self) -> Vec<&SqlValue> {
        self.columns.iter().map(|column| &column.value).collect()
    }
}

/// Column definition used only while synthesizing a CREATE statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    /// Explicit SQL type; falls back to the dialect default for `kind`.
    pub sql_type: Option<String>,
    pub kind: ColumnKind,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            sql_type: None,
            kind,
        }
    }

    pub fn with_sql_type(mut self, sql_type: impl Into<String>) -> Self {
        self.sql_type = Some(sql_type.into());
        self
    }
}
