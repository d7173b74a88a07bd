//! Store capabilities used by the audit pipeline.
//!
//! These traits are designed to be mockable using mockall for testing.
//! [`SqlStore`] is the sqlx implementation for both supported dialects.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlArguments, MySqlRow};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Column, MySql, MySqlPool, PgPool, Postgres, Row, TypeInfo, ValueRef};
use uuid::Uuid;

use crate::error::AuditError;
use crate::models::task::RecordId;
use crate::models::value::{ColumnKind, ColumnSpec, ProjectedRow, SqlValue, METADATA_COLUMNS};
use crate::sql::{build_select_row, Dialect, Statement};

/// Destination of audit rows.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditStore: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Whether `table` exists in the audit database.
    async fn table_exists(&self, table: &str) -> Result<bool, sqlx::Error>;

    /// Executes a statement, returning the number of affected rows.
    async fn execute(&self, statement: Statement) -> Result<u64, sqlx::Error>;
}

/// Primary store the audited tables live in. Only needed for snapshots.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Column catalog of `table`, in ordinal order.
    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnSpec>, AuditError>;

    /// Current row of `table` whose `id` equals `id`.
    async fn select_row(
        &self,
        table: &str,
        id: &RecordId,
    ) -> Result<Option<ProjectedRow>, AuditError>;
}

/// sqlx-backed store, one variant per dialect.
#[derive(Debug, Clone)]
pub enum SqlStore {
    MySql(MySqlPool),
    Postgres(PgPool),
}

impl SqlStore {
    pub fn dialect(&self) -> Dialect {
        match self {
            SqlStore::MySql(_) => Dialect::MySql,
            SqlStore::Postgres(_) => Dialect::Postgres,
        }
    }

    pub async fn close(&self) {
        match self {
            SqlStore::MySql(pool) => pool.close().await,
            SqlStore::Postgres(pool) => pool.close().await,
        }
    }
}

#[async_trait]
impl AuditStore for SqlStore {
    fn dialect(&self) -> Dialect {
        SqlStore::dialect(self)
    }

    async fn table_exists(&self, table: &str) -> Result<bool, sqlx::Error> {
        let query = self.dialect().table_exists_query();
        match self {
            SqlStore::MySql(pool) => {
                let count: i64 = sqlx::query_scalar(query).bind(table).fetch_one(pool).await?;
                Ok(count > 0)
            }
            SqlStore::Postgres(pool) => {
                sqlx::query_scalar::<_, bool>(query)
                    .bind(table)
                    .fetch_one(pool)
                    .await
            }
        }
    }

    async fn execute(&self, statement: Statement) -> Result<u64, sqlx::Error> {
        let result = match self {
            SqlStore::MySql(pool) => {
                let mut query = sqlx::query(&statement.sql);
                for value in &statement.params {
                    query = bind_mysql(query, value);
                }
                query.execute(pool).await?.rows_affected()
            }
            SqlStore::Postgres(pool) => {
                let mut query = sqlx::query(&statement.sql);
                for value in &statement.params {
                    query = bind_postgres(query, value);
                }
                query.execute(pool).await?.rows_affected()
            }
        };
        Ok(result)
    }
}

#[async_trait]
impl SourceStore for SqlStore {
    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnSpec>, AuditError> {
        let dialect = self.dialect();
        let query = dialect.source_columns_query();
        let columns = match self {
            SqlStore::MySql(pool) => {
                sqlx::query_as::<_, (String, String)>(query)
                    .bind(table)
                    .fetch_all(pool)
                    .await
            }
            SqlStore::Postgres(pool) => {
                sqlx::query_as::<_, (String, String)>(query)
                    .bind(table)
                    .fetch_all(pool)
                    .await
            }
        }
        .map_err(|source| AuditError::SchemaIntrospection {
            table: table.to_string(),
            source,
        })?;

        Ok(columns
            .into_iter()
            .map(|(name, sql_type)| {
                let kind = dialect.kind_for_sql_type(&sql_type);
                ColumnSpec::new(name, kind).with_sql_type(sql_type)
            })
            .collect())
    }

    async fn select_row(
        &self,
        table: &str,
        id: &RecordId,
    ) -> Result<Option<ProjectedRow>, AuditError> {
        let columns = self.describe_table(table).await?;
        let statement = build_select_row(self.dialect(), table, id, &columns);
        let read_error = |source| AuditError::SourceRead {
            table: table.to_string(),
            source,
        };
        match self {
            SqlStore::MySql(pool) => {
                let mut query = sqlx::query(&statement.sql);
                for value in &statement.params {
                    query = bind_mysql(query, value);
                }
                let row = query.fetch_optional(pool).await.map_err(read_error)?;
                row.map(|row| decode_mysql_row(table, &row, &columns))
                    .transpose()
            }
            SqlStore::Postgres(pool) => {
                let mut query = sqlx::query(&statement.sql);
                for value in &statement.params {
                    query = bind_postgres(query, value);
                }
                let row = query.fetch_optional(pool).await.map_err(read_error)?;
                row.map(|row| decode_pg_row(table, &row, &columns))
                    .transpose()
            }
        }
    }
}

fn bind_mysql<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &SqlValue,
) -> Query<'q, MySql, MySqlArguments> {
    match value.clone() {
        SqlValue::Null(kind) => match kind {
            ColumnKind::Integer => query.bind(None::<i64>),
            ColumnKind::Float => query.bind(None::<f64>),
            ColumnKind::Boolean => query.bind(None::<bool>),
            ColumnKind::Timestamp => query.bind(None::<NaiveDateTime>),
            ColumnKind::TimestampTz => query.bind(None::<DateTime<Utc>>),
            ColumnKind::Date => query.bind(None::<NaiveDate>),
            ColumnKind::Json => query.bind(None::<JsonValue>),
            ColumnKind::Bytes => query.bind(None::<Vec<u8>>),
            ColumnKind::Text | ColumnKind::Uuid => query.bind(None::<String>),
        },
        SqlValue::Bool(value) => query.bind(value),
        SqlValue::Int(value) => query.bind(value),
        SqlValue::Float(value) => query.bind(value),
        SqlValue::Text(value) => query.bind(value),
        SqlValue::Timestamp(value) => query.bind(value),
        SqlValue::TimestampTz(value) => query.bind(value),
        SqlValue::Date(value) => query.bind(value),
        // CHAR(36) rather than the driver's 16-byte binary encoding.
        SqlValue::Uuid(value) => query.bind(value.to_string()),
        SqlValue::Json(value) => query.bind(value),
        SqlValue::Bytes(value) => query.bind(value),
    }
}

fn bind_postgres<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &SqlValue,
) -> Query<'q, Postgres, PgArguments> {
    match value.clone() {
        SqlValue::Null(kind) => match kind {
            ColumnKind::Integer => query.bind(None::<i64>),
            ColumnKind::Float => query.bind(None::<f64>),
            ColumnKind::Boolean => query.bind(None::<bool>),
            ColumnKind::Timestamp => query.bind(None::<NaiveDateTime>),
            ColumnKind::TimestampTz => query.bind(None::<DateTime<Utc>>),
            ColumnKind::Date => query.bind(None::<NaiveDate>),
            ColumnKind::Uuid => query.bind(None::<Uuid>),
            ColumnKind::Json => query.bind(None::<JsonValue>),
            ColumnKind::Bytes => query.bind(None::<Vec<u8>>),
            ColumnKind::Text => query.bind(None::<String>),
        },
        SqlValue::Bool(value) => query.bind(value),
        SqlValue::Int(value) => query.bind(value),
        SqlValue::Float(value) => query.bind(value),
        SqlValue::Text(value) => query.bind(value),
        SqlValue::Timestamp(value) => query.bind(value),
        SqlValue::TimestampTz(value) => query.bind(value),
        SqlValue::Date(value) => query.bind(value),
        SqlValue::Uuid(value) => query.bind(value),
        SqlValue::Json(value) => query.bind(value),
        SqlValue::Bytes(value) => query.bind(value),
    }
}

fn decode_pg_row(
    table: &str,
    row: &PgRow,
    catalog: &[ColumnSpec],
) -> Result<ProjectedRow, AuditError> {
    let mut projected = ProjectedRow::with_capacity(row.len() + METADATA_COLUMNS.len());
    for column in row.columns() {
        let type_name = column.type_info().name();
        let decoded = decode_pg_value(row, column.ordinal(), type_name).map_err(|source| {
            AuditError::SourceRead {
                table: table.to_string(),
                source,
            }
        })?;
        let Some((kind, value)) = decoded else {
            return Err(AuditError::UnsupportedColumnType {
                table: table.to_string(),
                column: column.name().to_string(),
                type_name: type_name.to_string(),
            });
        };
        let sql_type = catalog_type(catalog, column.name());
        projected.push_typed(column.name(), kind, value, sql_type)?;
    }
    Ok(projected)
}

/// Catalog SQL type of `name`, used to cast the value back on insert.
fn catalog_type(catalog: &[ColumnSpec], name: &str) -> Option<String> {
    catalog
        .iter()
        .find(|spec| spec.name == name)
        .and_then(|spec| spec.sql_type.clone())
}

fn decode_pg_value(
    row: &PgRow,
    index: usize,
    type_name: &str,
) -> Result<Option<(ColumnKind, SqlValue)>, sqlx::Error> {
    let (kind, value) = match type_name {
        "INT2" => (
            ColumnKind::Integer,
            row.try_get::<Option<i16>, _>(index)?
                .map(|value| SqlValue::Int(i64::from(value))),
        ),
        "INT4" => (
            ColumnKind::Integer,
            row.try_get::<Option<i32>, _>(index)?
                .map(|value| SqlValue::Int(i64::from(value))),
        ),
        "INT8" => (
            ColumnKind::Integer,
            row.try_get::<Option<i64>, _>(index)?.map(SqlValue::Int),
        ),
        "FLOAT4" => (
            ColumnKind::Float,
            row.try_get::<Option<f32>, _>(index)?
                .map(|value| SqlValue::Float(f64::from(value))),
        ),
        "FLOAT8" => (
            ColumnKind::Float,
            row.try_get::<Option<f64>, _>(index)?.map(SqlValue::Float),
        ),
        "BOOL" => (
            ColumnKind::Boolean,
            row.try_get::<Option<bool>, _>(index)?.map(SqlValue::Bool),
        ),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => (
            ColumnKind::Text,
            row.try_get::<Option<String>, _>(index)?.map(SqlValue::Text),
        ),
        "TIMESTAMP" => (
            ColumnKind::Timestamp,
            row.try_get::<Option<NaiveDateTime>, _>(index)?
                .map(SqlValue::Timestamp),
        ),
        "TIMESTAMPTZ" => (
            ColumnKind::TimestampTz,
            row.try_get::<Option<DateTime<Utc>>, _>(index)?
                .map(SqlValue::TimestampTz),
        ),
        "DATE" => (
            ColumnKind::Date,
            row.try_get::<Option<NaiveDate>, _>(index)?.map(SqlValue::Date),
        ),
        "UUID" => (
            ColumnKind::Uuid,
            row.try_get::<Option<Uuid>, _>(index)?.map(SqlValue::Uuid),
        ),
        "JSON" | "JSONB" => (
            ColumnKind::Json,
            row.try_get::<Option<JsonValue>, _>(index)?.map(SqlValue::Json),
        ),
        "BYTEA" => (
            ColumnKind::Bytes,
            row.try_get::<Option<Vec<u8>>, _>(index)?.map(SqlValue::Bytes),
        ),
        _ => return Ok(None),
    };
    Ok(Some((kind, value.unwrap_or(SqlValue::Null(kind)))))
}

fn decode_mysql_row(
    table: &str,
    row: &MySqlRow,
    catalog: &[ColumnSpec],
) -> Result<ProjectedRow, AuditError> {
    let mut projected = ProjectedRow::with_capacity(row.len() + METADATA_COLUMNS.len());
    for column in row.columns() {
        let type_name = column.type_info().name();
        let decoded = decode_mysql_value(row, column.ordinal(), type_name).map_err(|source| {
            AuditError::SourceRead {
                table: table.to_string(),
                source,
            }
        })?;
        let Some((kind, value)) = decoded else {
            return Err(AuditError::UnsupportedColumnType {
                table: table.to_string(),
                column: column.name().to_string(),
                type_name: type_name.to_string(),
            });
        };
        let sql_type = catalog_type(catalog, column.name());
        projected.push_typed(column.name(), kind, value, sql_type)?;
    }
    Ok(projected)
}

fn decode_mysql_value(
    row: &MySqlRow,
    index: usize,
    type_name: &str,
) -> Result<Option<(ColumnKind, SqlValue)>, sqlx::Error> {
    if row.try_get_raw(index)?.is_null() {
        let kind = match mysql_kind(type_name) {
            Some(kind) => kind,
            None => return Ok(None),
        };
        return Ok(Some((kind, SqlValue::Null(kind))));
    }

    let value = match type_name {
        "BOOLEAN" => SqlValue::Bool(row.try_get::<bool, _>(index)?),
        "TINYINT" => SqlValue::Int(i64::from(row.try_get::<i8, _>(index)?)),
        "SMALLINT" => SqlValue::Int(i64::from(row.try_get::<i16, _>(index)?)),
        "MEDIUMINT" | "INT" => SqlValue::Int(i64::from(row.try_get::<i32, _>(index)?)),
        "BIGINT" => SqlValue::Int(row.try_get::<i64, _>(index)?),
        "TINYINT UNSIGNED" => SqlValue::Int(i64::from(row.try_get::<u8, _>(index)?)),
        "SMALLINT UNSIGNED" => SqlValue::Int(i64::from(row.try_get::<u16, _>(index)?)),
        "MEDIUMINT UNSIGNED" | "INT UNSIGNED" => {
            SqlValue::Int(i64::from(row.try_get::<u32, _>(index)?))
        }
        "BIGINT UNSIGNED" => {
            let value = row.try_get::<u64, _>(index)?;
            // Values past i64::MAX keep their decimal text.
            i64::try_from(value)
                .map(SqlValue::Int)
                .unwrap_or_else(|_| SqlValue::Text(value.to_string()))
        }
        "FLOAT" => SqlValue::Float(f64::from(row.try_get::<f32, _>(index)?)),
        "DOUBLE" => SqlValue::Float(row.try_get::<f64, _>(index)?),
        "DECIMAL" | "CHAR" | "VARCHAR" | "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT"
        | "ENUM" | "SET" => SqlValue::Text(row.try_get_unchecked::<String, _>(index)?),
        "DATETIME" => SqlValue::Timestamp(row.try_get::<NaiveDateTime, _>(index)?),
        "TIMESTAMP" => SqlValue::TimestampTz(row.try_get::<DateTime<Utc>, _>(index)?),
        "DATE" => SqlValue::Date(row.try_get::<NaiveDate, _>(index)?),
        "JSON" => SqlValue::Json(row.try_get::<JsonValue, _>(index)?),
        "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
            SqlValue::Bytes(row.try_get::<Vec<u8>, _>(index)?)
        }
        _ => return Ok(None),
    };
    let kind = mysql_kind(type_name).unwrap_or(ColumnKind::Text);
    Ok(Some((kind, value)))
}

fn mysql_kind(type_name: &str) -> Option<ColumnKind> {
    let kind = match type_name {
        "BOOLEAN" => ColumnKind::Boolean,
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "TINYINT UNSIGNED"
        | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED" | "BIGINT UNSIGNED" => {
            ColumnKind::Integer
        }
        "FLOAT" | "DOUBLE" => ColumnKind::Float,
        "DECIMAL" | "CHAR" | "VARCHAR" | "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT"
        | "ENUM" | "SET" => ColumnKind::Text,
        "DATETIME" => ColumnKind::Timestamp,
        "TIMESTAMP" => ColumnKind::TimestampTz,
        "DATE" => ColumnKind::Date,
        "JSON" => ColumnKind::Json,
        "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
            ColumnKind::Bytes
        }
        _ => return None,
    };
    Some(kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mysql_kind_maps_driver_type_names() {
        assert_eq!(mysql_kind("BIGINT UNSIGNED"), Some(ColumnKind::Integer));
        assert_eq!(mysql_kind("BOOLEAN"), Some(ColumnKind::Boolean));
        assert_eq!(mysql_kind("DATETIME"), Some(ColumnKind::Timestamp));
        assert_eq!(mysql_kind("TIMESTAMP"), Some(ColumnKind::TimestampTz));
        assert_eq!(mysql_kind("DECIMAL"), Some(ColumnKind::Text));
        assert_eq!(mysql_kind("GEOMETRY"), None);
    }

    #[test]
    fn catalog_type_is_looked_up_by_column_name() {
        let catalog = vec![
            ColumnSpec::new("id", ColumnKind::Integer).with_sql_type("bigint"),
            ColumnSpec::new("total", ColumnKind::Text).with_sql_type("numeric"),
            ColumnSpec::new("note", ColumnKind::Text),
        ];
        assert_eq!(catalog_type(&catalog, "total").as_deref(), Some("numeric"));
        assert_eq!(catalog_type(&catalog, "note"), None);
        assert_eq!(catalog_type(&catalog, "missing"), None);
    }

    #[test]
    fn test_mock_stores_can_be_created() {
        let _audit = MockAuditStore::new();
        let _source = MockSourceStore::new();
    }

    #[test]
    fn test_mock_store_trait_bounds() {
        fn check_send_sync<T: Send + Sync>() {}
        check_send_sync::<MockAuditStore>();
        check_send_sync::<MockSourceStore>();
        check_send_sync::<SqlStore>();
    }
}
