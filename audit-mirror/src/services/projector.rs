use std::collections::HashSet;

use chrono::NaiveDateTime;

use crate::error::AuditError;
use crate::models::record::{AuditRecord, Auditable, FieldKind, FieldValue};
use crate::models::value::{ColumnKind, ColumnSpec, ProjectedRow, SqlValue, METADATA_COLUMNS};

/// Rendering of timestamp fields in audit rows.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// What happens to nested record-typed fields that are not timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NestedRecordPolicy {
    /// The field is left out of the audit row and the audit table.
    #[default]
    Drop,
    /// The field is stored as JSON text.
    Serialize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProjectionPolicy {
    /// Store empty strings as NULL.
    pub empty_string_as_null: bool,
    pub nested_records: NestedRecordPolicy,
}

/// Projects the auditable fields of `record` into an ordered row.
///
/// Fields are visited in declaration order. Only fields marked auditable and
/// not skipped by their serialization tag produce a column.
pub fn project<T: Auditable>(
    record: &T,
    policy: &ProjectionPolicy,
) -> Result<ProjectedRow, AuditError> {
    let fields = T::fields();
    let mut row = ProjectedRow::with_capacity(fields.len() + METADATA_COLUMNS.len());
    for field in fields {
        let Some(column) = field.column_name() else {
            continue;
        };
        let Some(kind) = column_kind(field.kind(), policy) else {
            continue;
        };
        let value = normalize(field.read(record), kind, policy);
        let sql_type = field.explicit_sql_type().map(str::to_string);
        row.push_typed(column, kind, value, sql_type)?;
    }
    Ok(row)
}

/// Audit column definitions for `T`, in the same order [`project`] emits them.
pub fn column_specs<T: Auditable>(
    policy: &ProjectionPolicy,
) -> Result<Vec<ColumnSpec>, AuditError> {
    let mut seen = HashSet::new();
    let mut specs = Vec::new();
    for field in T::fields() {
        let Some(column) = field.column_name() else {
            continue;
        };
        let Some(kind) = column_kind(field.kind(), policy) else {
            continue;
        };
        if METADATA_COLUMNS.contains(&column.as_str()) {
            return Err(AuditError::RecordProjection(format!(
                "column `{}` is reserved for audit metadata",
                column
            )));
        }
        if !seen.insert(column.clone()) {
            return Err(AuditError::RecordProjection(format!(
                "duplicate column `{}`",
                column
            )));
        }
        let mut spec = ColumnSpec::new(column, kind);
        if let Some(sql_type) = field.explicit_sql_type() {
            spec = spec.with_sql_type(sql_type);
        }
        specs.push(spec);
    }
    Ok(specs)
}

fn column_kind(kind: FieldKind, policy: &ProjectionPolicy) -> Option<ColumnKind> {
    match kind {
        FieldKind::Text | FieldKind::Composite => Some(ColumnKind::Text),
        FieldKind::Integer => Some(ColumnKind::Integer),
        FieldKind::Float => Some(ColumnKind::Float),
        FieldKind::Boolean => Some(ColumnKind::Boolean),
        FieldKind::Timestamp => Some(ColumnKind::Timestamp),
        FieldKind::Record => match policy.nested_records {
            NestedRecordPolicy::Drop => None,
            NestedRecordPolicy::Serialize => Some(ColumnKind::Text),
        },
    }
}

fn normalize(value: FieldValue, kind: ColumnKind, policy: &ProjectionPolicy) -> SqlValue {
    match value {
        FieldValue::Null => SqlValue::Null(kind),
        FieldValue::Bool(value) => SqlValue::Bool(value),
        FieldValue::Int(value) => SqlValue::Int(value),
        FieldValue::Float(value) => SqlValue::Float(value),
        FieldValue::Text(value) if value.is_empty() && policy.empty_string_as_null => {
            SqlValue::Null(kind)
        }
        FieldValue::Text(value) => SqlValue::Text(value),
        FieldValue::Timestamp(value) if value == NaiveDateTime::default() => SqlValue::Null(kind),
        FieldValue::Timestamp(value) => SqlValue::Text(value.format(TIMESTAMP_FORMAT).to_string()),
        FieldValue::Composite(value) | FieldValue::Record(value) => {
            if value.is_null() {
                SqlValue::Null(kind)
            } else {
                SqlValue::Text(value.to_string())
            }
        }
    }
}

impl<T: Auditable> AuditRecord for T {
    fn record_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn project(&self, policy: &ProjectionPolicy) -> Result<ProjectedRow, AuditError> {
        project(self, policy)
    }

    fn column_specs(&self, policy: &ProjectionPolicy) -> Result<Vec<ColumnSpec>, AuditError> {
        column_specs::<T>(policy)
    }
}
