//! Pure statement synthesis. Nothing in here touches a connection.

use crate::models::task::RecordId;
use crate::models::value::{ColumnSpec, ProjectedRow, SqlValue};
use crate::sql::dialect::Dialect;

/// SQL text plus its parameters in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn is_create_table(&self) -> bool {
        self.sql.starts_with("CREATE TABLE")
    }
}

/// INSERT of every column of `row` into `table`.
///
/// The row carries names and values positionally aligned, so the statement
/// has exactly one placeholder per column.
pub fn build_insert(dialect: Dialect, table: &str, row: &ProjectedRow) -> Statement {
    let table = dialect.quote_ident(table);
    if row.is_empty() {
        let sql = match dialect {
            Dialect::MySql => format!("INSERT INTO {} () VALUES ()", table),
            Dialect::Postgres => format!("INSERT INTO {} DEFAULT VALUES", table),
        };
        return Statement::new(sql);
    }

    let mut columns = Vec::with_capacity(row.len());
    let mut placeholders = Vec::with_capacity(row.len());
    let mut params = Vec::with_capacity(row.len());
    for (index, column) in row.columns().iter().enumerate() {
        columns.push(dialect.quote_ident(&column.name));
        placeholders.push(dialect.placeholder(
            index + 1,
            column.kind,
            column.sql_type.as_deref(),
        ));
        params.push(column.value.clone());
    }

    Statement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders.join(", ")
        ),
        params,
    }
}

/// Conditional CREATE of an audit table: the given columns followed by the
/// three audit metadata columns.
pub fn build_create_table(dialect: Dialect, table: &str, columns: &[ColumnSpec]) -> Statement {
    let mut definitions: Vec<String> = columns
        .iter()
        .map(|spec| {
            format!(
                "{} {}",
                dialect.quote_ident(&spec.name),
                dialect.column_type(spec)
            )
        })
        .collect();
    definitions.extend(dialect.metadata_column_definitions());

    Statement::new(format!(
        "CREATE TABLE IF NOT EXISTS {} ({}){}",
        dialect.quote_ident(table),
        definitions.join(", "),
        dialect.table_options()
    ))
}

/// SELECT of the source row whose `id` column equals `id`.
///
/// With a column catalog the select list names every column, reading those
/// without a native decoding as text. Without one it falls back to `*`.
pub fn build_select_row(
    dialect: Dialect,
    table: &str,
    id: &RecordId,
    columns: &[ColumnSpec],
) -> Statement {
    let select_list = if columns.is_empty() {
        "*".to_string()
    } else {
        columns
            .iter()
            .map(|spec| dialect.select_expr(spec))
            .collect::<Vec<_>>()
            .join(", ")
    };
    Statement {
        sql: format!(
            "SELECT {} FROM {} WHERE {} = {}",
            select_list,
            dialect.quote_ident(table),
            dialect.quote_ident("id"),
            dialect.placeholder(1, id.kind(), None)
        ),
        params: vec![id.to_sql_value()],
    }
}
