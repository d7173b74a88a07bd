use anyhow::anyhow;
use std::env;
use std::time::Duration;

use crate::db::connection::PoolConfig;
use crate::services::dispatcher::DispatchOptions;
use crate::services::projector::{NestedRecordPolicy, ProjectionPolicy};
use crate::sql::Dialect;

#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub driver: Dialect,
    pub audit_database_url: String,
    pub source_database_url: Option<String>,
    pub workers: usize,
    pub queue_size: usize,
    pub table_suffix: String,
    pub empty_string_as_null: bool,
    pub nested_records: NestedRecordPolicy,
    pub shutdown_timeout_secs: u64,
    pub max_connections: u32,
}

impl AuditConfig {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup so tests need not touch
    /// the process environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let driver_name = lookup("AUDIT_DB_DRIVER").unwrap_or_else(|| "postgres".to_string());
        let driver: Dialect = driver_name
            .parse()
            .map_err(|_| anyhow!("Invalid AUDIT_DB_DRIVER value: {}", driver_name))?;

        let audit_database_url = lookup("AUDIT_DATABASE_URL")
            .ok_or_else(|| anyhow!("AUDIT_DATABASE_URL must be set"))?;

        let source_database_url = lookup("SOURCE_DATABASE_URL").filter(|url| !url.is_empty());

        let workers = parse_or(&lookup, "AUDIT_WORKERS", 4usize)?;
        if workers == 0 {
            return Err(anyhow!("AUDIT_WORKERS must be at least 1"));
        }

        let queue_size = parse_or(&lookup, "AUDIT_QUEUE_SIZE", 1024usize)?;
        if queue_size == 0 {
            return Err(anyhow!("AUDIT_QUEUE_SIZE must be at least 1"));
        }

        let table_suffix = lookup("AUDIT_TABLE_SUFFIX").unwrap_or_else(|| "_audit".to_string());

        let empty_string_as_null = parse_or(&lookup, "AUDIT_EMPTY_STRING_AS_NULL", false)?;

        let nested_records = match lookup("AUDIT_NESTED_RECORDS")
            .unwrap_or_else(|| "drop".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "drop" => NestedRecordPolicy::Drop,
            "serialize" => NestedRecordPolicy::Serialize,
            other => return Err(anyhow!("Invalid AUDIT_NESTED_RECORDS value: {}", other)),
        };

        let shutdown_timeout_secs = parse_or(&lookup, "AUDIT_SHUTDOWN_TIMEOUT_SECS", 30u64)?;
        let max_connections = parse_or(&lookup, "AUDIT_DB_MAX_CONNECTIONS", 5u32)?;

        Ok(AuditConfig {
            driver,
            audit_database_url,
            source_database_url,
            workers,
            queue_size,
            table_suffix,
            empty_string_as_null,
            nested_records,
            shutdown_timeout_secs,
            max_connections,
        })
    }

    pub fn projection_policy(&self) -> ProjectionPolicy {
        ProjectionPolicy {
            empty_string_as_null: self.empty_string_as_null,
            nested_records: self.nested_records,
        }
    }

    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            workers: self.workers,
            queue_size: self.queue_size,
            table_suffix: self.table_suffix.clone(),
            policy: self.projection_policy(),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_connections: self.max_connections,
            ..PoolConfig::default()
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow!("Invalid {} value: {}", key, raw)),
        None => Ok(default),
    }
}
