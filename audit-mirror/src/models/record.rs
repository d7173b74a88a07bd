//! Compile-time field descriptors for auditable record types.
//!
//! A record type lists its fields once, in declaration order, in a `static`
//! slice. Each descriptor says whether the field is audited, which column it
//! lands in and how to read its value:
//!
//! ```
//! use audit_mirror::models::record::{Auditable, FieldDescriptor, FieldValue};
//!
//! struct Order {
//!     id: i64,
//!     status: String,
//!     internal_note: String,
//! }
//!
//! type OrderField = FieldDescriptor<Order>;
//!
//! impl Auditable for Order {
//!     fn fields() -> &'static [FieldDescriptor<Self>] {
//!         static FIELDS: [OrderField; 3] = [
//!             OrderField::integer("ID", |o| o.id.into()),
//!             OrderField::text("Status", |o| o.status.as_str().into()).auditable(),
//!             OrderField::text("InternalNote", |o| o.internal_note.as_str().into()),
//!         ];
//!         &FIELDS
//!     }
//! }
//! ```

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::AuditError;
use crate::models::value::{ColumnSpec, ProjectedRow};
use crate::services::projector::ProjectionPolicy;

/// Serialization tag value that excludes a field.
pub const SKIP_TAG: &str = "-";

/// Declared shape of a field, used for SQL type inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Boolean,
    Timestamp,
    /// Sequences and maps, stored as JSON text.
    Composite,
    /// Nested structured values; dropped unless the policy serializes them.
    Record,
}

/// Value read from a record field before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
    Composite(Value),
    Record(Value),
}

impl FieldValue {
    /// Sequence or map value. Unserializable input reads as NULL.
    pub fn composite<T: Serialize + ?Sized>(value: &T) -> Self {
        serde_json::to_value(value)
            .map(FieldValue::Composite)
            .unwrap_or(FieldValue::Null)
    }

    /// Nested record value. Unserializable input reads as NULL.
    pub fn record<T: Serialize + ?Sized>(value: &T) -> Self {
        serde_json::to_value(value)
            .map(FieldValue::Record)
            .unwrap_or(FieldValue::Null)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Int(i64::from(value))
    }
}

impl From<i16> for FieldValue {
    fn from(value: i16) -> Self {
        FieldValue::Int(i64::from(value))
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Int(i64::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<f32> for FieldValue {
    fn from(value: f32) -> Self {
        FieldValue::Float(f64::from(value))
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<&String> for FieldValue {
    fn from(value: &String) -> Self {
        FieldValue::Text(value.clone())
    }
}

impl From<NaiveDateTime> for FieldValue {
    fn from(value: NaiveDateTime) -> Self {
        FieldValue::Timestamp(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(value.naive_utc())
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// Describes one field of `T`: its tags and how to read it.
pub struct FieldDescriptor<T> {
    name: &'static str,
    kind: FieldKind,
    auditable: bool,
    column: Option<&'static str>,
    rename: Option<&'static str>,
    sql_type: Option<&'static str>,
    read: fn(&T) -> FieldValue,
}

impl<T> Clone for FieldDescriptor<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for FieldDescriptor<T> {}

impl<T> std::fmt::Debug for FieldDescriptor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("auditable", &self.auditable)
            .field("column", &self.column)
            .field("rename", &self.rename)
            .field("sql_type", &self.sql_type)
            .finish()
    }
}

impl<T> FieldDescriptor<T> {
    pub const fn new(name: &'static str, kind: FieldKind, read: fn(&T) -> FieldValue) -> Self {
        Self {
            name,
            kind,
            auditable: false,
            column: None,
            rename: None,
            sql_type: None,
            read,
        }
    }

    pub const fn text(name: &'static str, read: fn(&T) -> FieldValue) -> Self {
        Self::new(name, FieldKind::Text, read)
    }

    pub const fn integer(name: &'static str, read: fn(&T) -> FieldValue) -> Self {
        Self::new(name, FieldKind::Integer, read)
    }

    pub const fn float(name: &'static str, read: fn(&T) -> FieldValue) -> Self {
        Self::new(name, FieldKind::Float, read)
    }

    pub const fn boolean(name: &'static str, read: fn(&T) -> FieldValue) -> Self {
        Self::new(name, FieldKind::Boolean, read)
    }

    pub const fn timestamp(name: &'static str, read: fn(&T) -> FieldValue) -> Self {
        Self::new(name, FieldKind::Timestamp, read)
    }

    pub const fn composite(name: &'static str, read: fn(&T) -> FieldValue) -> Self {
        Self::new(name, FieldKind::Composite, read)
    }

    pub const fn record(name: &'static str, read: fn(&T) -> FieldValue) -> Self {
        Self::new(name, FieldKind::Record, read)
    }

    /// Marks the field for inclusion in audit rows.
    pub const fn auditable(mut self) -> Self {
        self.auditable = true;
        self
    }

    /// Persistence-mapping tag; wins over every other naming source.
    pub const fn column(mut self, column: &'static str) -> Self {
        self.column = Some(column);
        self
    }

    /// Serialization tag; `"-"` excludes the field.
    pub const fn rename(mut self, rename: &'static str) -> Self {
        self.rename = Some(rename);
        self
    }

    /// Explicit SQL type used when the audit table is created.
    pub const fn sql_type(mut self, sql_type: &'static str) -> Self {
        self.sql_type = Some(sql_type);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn is_auditable(&self) -> bool {
        self.auditable
    }

    pub fn explicit_sql_type(&self) -> Option<&'static str> {
        self.sql_type
    }

    /// Audit column for this field, or `None` when the field is excluded.
    ///
    /// Precedence: persistence tag, then serialization tag, then the
    /// lower-cased field name.
    pub fn column_name(&self) -> Option<String> {
        if !self.auditable || self.rename == Some(SKIP_TAG) || self.column == Some(SKIP_TAG) {
            return None;
        }
        let name = self
            .column
            .filter(|column| !column.is_empty())
            .or(self.rename.filter(|rename| !rename.is_empty()))
            .map(str::to_string)
            .unwrap_or_else(|| self.name.to_lowercase());
        Some(name)
    }

    pub fn read(&self, record: &T) -> FieldValue {
        (self.read)(record)
    }
}

/// A record type with a fixed, declaration-ordered list of field descriptors.
pub trait Auditable: Send + Sync + 'static {
    fn fields() -> &'static [FieldDescriptor<Self>]
    where
        Self: Sized;
}

/// Type-erased view of an [`Auditable`] record, so tasks for different record
/// types can share one queue. Implemented for every `Auditable` type.
pub trait AuditRecord: Send + Sync + 'static {
    fn record_type(&self) -> &'static str;

    fn project(&self, policy: &ProjectionPolicy) -> Result<ProjectedRow, AuditError>;

    fn column_specs(&self, policy: &ProjectionPolicy) -> Result<Vec<ColumnSpec>, AuditError>;
}
