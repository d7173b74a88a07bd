use std::fmt;
use std::str::FromStr;

use crate::error::AuditError;
use crate::models::value::{
    ColumnKind, ColumnSpec, AUDIT_ACTION_COLUMN, AUDIT_ACTOR_COLUMN, AUDIT_CREATED_AT_COLUMN,
};

/// SQL dialect of the primary and audit stores.
///
/// Chosen once at construction; adding a database means adding a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    MySql,
    Postgres,
}

impl FromStr for Dialect {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" => Ok(Dialect::MySql),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            other => Err(AuditError::Construction(format!(
                "unsupported driver: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Dialect {
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::MySql => "mysql",
            Dialect::Postgres => "postgres",
        }
    }

    /// Quotes an identifier, doubling any embedded quote character.
    pub fn quote_ident(&self, ident: &str) -> String {
        match self {
            Dialect::MySql => format!("`{}`", ident.replace('`', "``")),
            Dialect::Postgres => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// Placeholder for the `index`-th parameter (1-based).
    ///
    /// On PostgreSQL the parameter is cast to the column's explicit SQL type
    /// when one is known, and timestamp columns are cast to `timestamp`, so
    /// text renderings bind against typed columns. MySQL converts on
    /// assignment and never needs a cast.
    pub fn placeholder(&self, index: usize, kind: ColumnKind, sql_type: Option<&str>) -> String {
        match self {
            Dialect::MySql => "?".to_string(),
            Dialect::Postgres => match sql_type.map(str::trim).filter(|ty| !ty.is_empty()) {
                Some(sql_type) => format!("${}::{}", index, sql_type),
                None if kind == ColumnKind::Timestamp => format!("${}::timestamp", index),
                None => format!("${}", index),
            },
        }
    }

    /// Select-list entry for a source column. Text-kind columns, which include
    /// every catalog type without a native decoding (numeric, time, interval,
    /// enums and the like), are read through a cast to text.
    pub fn select_expr(&self, spec: &ColumnSpec) -> String {
        let ident = self.quote_ident(&spec.name);
        if spec.kind != ColumnKind::Text {
            return ident;
        }
        match self {
            Dialect::MySql => format!("CAST({} AS CHAR) AS {}", ident, ident),
            Dialect::Postgres => format!("{}::text AS {}", ident, ident),
        }
    }

    pub fn default_sql_type(&self, kind: ColumnKind) -> &'static str {
        match (self, kind) {
            (_, ColumnKind::Text) => "TEXT",
            (_, ColumnKind::Integer) => "BIGINT",
            (_, ColumnKind::Boolean) => "BOOLEAN",
            (_, ColumnKind::Date) => "DATE",
            (Dialect::MySql, ColumnKind::Float) => "DOUBLE",
            (Dialect::MySql, ColumnKind::Timestamp) => "DATETIME",
            (Dialect::MySql, ColumnKind::TimestampTz) => "TIMESTAMP",
            (Dialect::MySql, ColumnKind::Uuid) => "CHAR(36)",
            (Dialect::MySql, ColumnKind::Json) => "JSON",
            (Dialect::MySql, ColumnKind::Bytes) => "LONGBLOB",
            (Dialect::Postgres, ColumnKind::Float) => "DOUBLE PRECISION",
            (Dialect::Postgres, ColumnKind::Timestamp) => "TIMESTAMP",
            (Dialect::Postgres, ColumnKind::TimestampTz) => "TIMESTAMPTZ",
            (Dialect::Postgres, ColumnKind::Uuid) => "UUID",
            (Dialect::Postgres, ColumnKind::Json) => "JSONB",
            (Dialect::Postgres, ColumnKind::Bytes) => "BYTEA",
        }
    }

    /// Explicit type tag if present, otherwise the default for the column kind.
    pub fn column_type<'a>(&self, spec: &'a ColumnSpec) -> &'a str {
        spec.sql_type
            .as_deref()
            .filter(|sql_type| !sql_type.trim().is_empty())
            .unwrap_or_else(|| self.default_sql_type(spec.kind))
    }

    pub(crate) fn metadata_column_definitions(&self) -> [String; 3] {
        let created_at_type = self.default_sql_type(ColumnKind::Timestamp);
        [
            format!("{} VARCHAR(64) NOT NULL", self.quote_ident(AUDIT_ACTION_COLUMN)),
            format!("{} VARCHAR(255) NULL", self.quote_ident(AUDIT_ACTOR_COLUMN)),
            format!(
                "{} {} NOT NULL DEFAULT CURRENT_TIMESTAMP",
                self.quote_ident(AUDIT_CREATED_AT_COLUMN),
                created_at_type
            ),
        ]
    }

    pub(crate) fn table_options(&self) -> &'static str {
        match self {
            Dialect::MySql => " ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
            Dialect::Postgres => "",
        }
    }

    /// Catalog query answering whether a table exists in the current
    /// database/schema. MySQL yields a count, PostgreSQL a boolean.
    pub fn table_exists_query(&self) -> &'static str {
        match self {
            Dialect::MySql => {
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND table_name = ?"
            }
            Dialect::Postgres => {
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = $1)"
            }
        }
    }

    /// Catalog query listing (column name, SQL type) of a table in ordinal order.
    pub fn source_columns_query(&self) -> &'static str {
        match self {
            Dialect::MySql => {
                "SELECT CAST(column_name AS CHAR) AS column_name, \
                 CAST(column_type AS CHAR) AS column_type \
                 FROM information_schema.columns \
                 WHERE table_schema = DATABASE() AND table_name = ? \
                 ORDER BY ordinal_position"
            }
            Dialect::Postgres => {
                "SELECT column_name::text, \
                 CASE WHEN data_type IN ('USER-DEFINED', 'ARRAY') THEN 'text' \
                 ELSE data_type::text END AS column_type \
                 FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name = $1 \
                 ORDER BY ordinal_position"
            }
        }
    }

    /// Best-effort column kind for a catalog type name.
    pub fn kind_for_sql_type(&self, sql_type: &str) -> ColumnKind {
        let upper = sql_type.to_ascii_uppercase();
        if upper == "TINYINT(1)" || upper.starts_with("BOOL") {
            ColumnKind::Boolean
        } else if is_integer_type(&upper) {
            ColumnKind::Integer
        } else if upper.starts_with("DOUBLE")
            || upper.starts_with("FLOAT")
            || upper.starts_with("REAL")
        {
            ColumnKind::Float
        } else if upper.starts_with("TIMESTAMP WITH TIME ZONE") || upper == "TIMESTAMPTZ" {
            ColumnKind::TimestampTz
        } else if upper.starts_with("TIMESTAMP") || upper.starts_with("DATETIME") {
            ColumnKind::Timestamp
        } else if upper == "DATE" {
            ColumnKind::Date
        } else if upper == "UUID" {
            ColumnKind::Uuid
        } else if upper.starts_with("JSON") {
            ColumnKind::Json
        } else if upper.contains("BLOB") || upper.contains("BINARY") || upper == "BYTEA" {
            ColumnKind::Bytes
        } else {
            ColumnKind::Text
        }
    }
}

fn is_integer_type(upper: &str) -> bool {
    let base = upper
        .split(|c: char| c == '(' || c.is_whitespace())
        .next()
        .unwrap_or_default();
    matches!(
        base,
        "TINYINT"
            | "SMALLINT"
            | "MEDIUMINT"
            | "INT"
            | "INTEGER"
            | "BIGINT"
            | "INT2"
            | "INT4"
            | "INT8"
            | "SMALLSERIAL"
            | "SERIAL"
            | "BIGSERIAL"
    )
}
