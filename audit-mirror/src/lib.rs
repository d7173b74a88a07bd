//! Asynchronous audit mirroring for MySQL and PostgreSQL.
//!
//! Records handed to [`services::dispatcher::AuditService`] are projected into
//! flat rows and appended to `<table><suffix>` audit tables, which are created
//! on first use.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod repositories;
pub mod services;
pub mod sql;

pub use error::AuditError;
pub use models::record::{AuditRecord, Auditable, FieldDescriptor, FieldValue};
pub use models::task::{AuditAction, AuditTask, RecordId};
pub use services::dispatcher::{AuditService, DispatchOptions, DispatchStats, SubmitOutcome};
pub use sql::Dialect;
