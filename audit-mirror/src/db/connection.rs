use std::time::Duration;

use sqlx::mysql::MySqlPoolOptions;
use sqlx::postgres::PgPoolOptions;

use crate::repositories::store::SqlStore;
use crate::sql::Dialect;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

pub async fn create_store(
    dialect: Dialect,
    database_url: &str,
    config: PoolConfig,
) -> anyhow::Result<SqlStore> {
    let store = match dialect {
        Dialect::MySql => SqlStore::MySql(
            MySqlPoolOptions::new()
                .max_connections(config.max_connections)
                .acquire_timeout(config.acquire_timeout)
                .connect(database_url)
                .await?,
        ),
        Dialect::Postgres => SqlStore::Postgres(
            PgPoolOptions::new()
                .max_connections(config.max_connections)
                .acquire_timeout(config.acquire_timeout)
                .connect(database_url)
                .await?,
        ),
    };
    tracing::info!(
        dialect = %dialect,
        max_connections = config.max_connections,
        "Connected to database"
    );
    Ok(store)
}

/// Connects the audit store and, when a URL is given, a separate source store.
pub async fn create_stores(
    dialect: Dialect,
    audit_url: &str,
    source_url: Option<&str>,
    config: PoolConfig,
) -> anyhow::Result<(SqlStore, Option<SqlStore>)> {
    let audit = create_store(dialect, audit_url, config).await?;
    let source = match source_url {
        Some(url) => Some(create_store(dialect, url, config).await?),
        None => None,
    };
    Ok((audit, source))
}
