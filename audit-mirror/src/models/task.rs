use std::fmt;

use uuid::Uuid;

use crate::models::record::AuditRecord;
use crate::models::value::{ColumnKind, SqlValue};

/// What happened to the audited record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    /// Caller-defined label, stored verbatim.
    Custom(String),
}

impl AuditAction {
    pub fn as_str(&self) -> &str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::Custom(label) => label.as_str(),
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Only the exact labels `create`, `update` and `delete` map to the named
/// variants. Anything else is kept as given, so `as_str` always returns the
/// caller's label unchanged.
impl From<&str> for AuditAction {
    fn from(value: &str) -> Self {
        match value {
            "create" => AuditAction::Create,
            "update" => AuditAction::Update,
            "delete" => AuditAction::Delete,
            _ => AuditAction::Custom(value.to_string()),
        }
    }
}

impl From<String> for AuditAction {
    fn from(value: String) -> Self {
        AuditAction::from(value.as_str())
    }
}

/// Opaque identifier of the audited record. Snapshots look the source row up
/// by `id = <record id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordId {
    Int(i64),
    Text(String),
    Uuid(Uuid),
}

impl RecordId {
    /// Reads an id typed on a command line: integers first, then UUIDs,
    /// anything else stays text.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Ok(id) = raw.parse::<i64>() {
            return RecordId::Int(id);
        }
        match Uuid::parse_str(raw) {
            Ok(id) => RecordId::Uuid(id),
            Err(_) => RecordId::Text(raw.to_string()),
        }
    }

    pub fn to_sql_value(&self) -> SqlValue {
        match self {
            RecordId::Int(id) => SqlValue::Int(*id),
            RecordId::Text(id) => SqlValue::Text(id.clone()),
            RecordId::Uuid(id) => SqlValue::Uuid(*id),
        }
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            RecordId::Int(_) => ColumnKind::Integer,
            RecordId::Text(_) => ColumnKind::Text,
            RecordId::Uuid(_) => ColumnKind::Uuid,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(id) => write!(f, "{}", id),
            RecordId::Text(id) => f.write_str(id),
            RecordId::Uuid(id) => write!(f, "{}", id),
        }
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        RecordId::Int(id)
    }
}

impl From<i32> for RecordId {
    fn from(id: i32) -> Self {
        RecordId::Int(i64::from(id))
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        RecordId::Text(id.to_string())
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        RecordId::Text(id)
    }
}

impl From<Uuid> for RecordId {
    fn from(id: Uuid) -> Self {
        RecordId::Uuid(id)
    }
}

/// Where the audited column values come from.
pub enum AuditPayload {
    /// A record materialized by the caller, projected through its field descriptors.
    Record(Box<dyn AuditRecord>),
    /// Read the current row back from the source store by record id.
    SourceRow,
}

impl fmt::Debug for AuditPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditPayload::Record(record) => f
                .debug_tuple("Record")
                .field(&record.record_type())
                .finish(),
            AuditPayload::SourceRow => f.write_str("SourceRow"),
        }
    }
}

/// One unit of audit work. Owned by the queue until a worker claims it and
/// dropped once processed, whatever the outcome.
#[derive(Debug)]
pub struct AuditTask {
    table: String,
    record_id: RecordId,
    action: AuditAction,
    actor: String,
    payload: AuditPayload,
}

impl AuditTask {
    pub fn new(
        table: impl Into<String>,
        record_id: impl Into<RecordId>,
        action: impl Into<AuditAction>,
        actor: impl Into<String>,
        payload: AuditPayload,
    ) -> Self {
        Self {
            table: table.into(),
            record_id: record_id.into(),
            action: action.into(),
            actor: actor.into(),
            payload,
        }
    }

    /// Task auditing a caller-supplied record.
    pub fn record<R: AuditRecord>(
        table: impl Into<String>,
        record_id: impl Into<RecordId>,
        action: impl Into<AuditAction>,
        actor: impl Into<String>,
        record: R,
    ) -> Self {
        Self::new(
            table,
            record_id,
            action,
            actor,
            AuditPayload::Record(Box::new(record)),
        )
    }

    /// Task auditing the live source row with the given id.
    pub fn snapshot(
        table: impl Into<String>,
        record_id: impl Into<RecordId>,
        action: impl Into<AuditAction>,
        actor: impl Into<String>,
    ) -> Self {
        Self::new(table, record_id, action, actor, AuditPayload::SourceRow)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn record_id(&self) -> &RecordId {
        &self.record_id
    }

    pub fn action(&self) -> &AuditAction {
        &self.action
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn payload(&self) -> &AuditPayload {
        &self.payload
    }
}
