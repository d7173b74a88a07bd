use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use audit_mirror::config::AuditConfig;
use audit_mirror::db::connection::create_stores;
use audit_mirror::repositories::store::{AuditStore, SourceStore, SqlStore};
use audit_mirror::{AuditService, RecordId, SubmitOutcome};

fn mask_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return "<invalid url>".to_string();
    };
    if url.password().is_some() {
        let _ = url.set_password(Some("***"));
    }
    if url.query().is_some() {
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(key, value)| {
                let value = if key.eq_ignore_ascii_case("password") {
                    "***".to_string()
                } else {
                    value.into_owned()
                };
                (key.into_owned(), value)
            })
            .collect();
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
    url.to_string()
}

/// `<table> <id> <action> [actor]`, one snapshot request per line.
fn handle_line(service: &AuditService, line: &str) {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return;
    }
    let mut parts = line.split_whitespace();
    let (Some(table), Some(id), Some(action)) = (parts.next(), parts.next(), parts.next()) else {
        tracing::warn!(line, "Expected `<table> <id> <action> [actor]`");
        return;
    };
    let actor = parts.next().unwrap_or("system");
    if let SubmitOutcome::Dropped(reason) =
        service.log_snapshot(table, RecordId::parse(id), action, actor)
    {
        tracing::debug!(table, id, reason = ?reason, "Snapshot request not queued");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audit_mirror=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AuditConfig::load()?;
    tracing::info!(
        driver = %config.driver,
        audit_database_url = %mask_url(&config.audit_database_url),
        source_database_url = ?config.source_database_url.as_deref().map(mask_url),
        workers = config.workers,
        queue_size = config.queue_size,
        table_suffix = %config.table_suffix,
        "Loaded configuration from environment/.env"
    );

    let (audit, source) = create_stores(
        config.driver,
        &config.audit_database_url,
        config.source_database_url.as_deref(),
        config.pool_config(),
    )
    .await?;
    let audit = Arc::new(audit);
    let separate_source = source.map(Arc::new);
    let source: Arc<SqlStore> = match &separate_source {
        Some(source) => Arc::clone(source),
        None => Arc::clone(&audit),
    };

    let service = AuditService::start(
        config.dispatch_options(),
        Arc::clone(&audit) as Arc<dyn AuditStore>,
        Some(source as Arc<dyn SourceStore>),
    )?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => handle_line(&service, &line),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received interrupt, draining audit queue");
                break;
            }
        }
    }

    let stats = service.shutdown().await;
    audit.close().await;
    if let Some(source) = separate_source {
        source.close().await;
    }
    if stats.failed > 0 || stats.dropped > 0 {
        tracing::warn!(
            failed = stats.failed,
            dropped = stats.dropped,
            "Some audit entries were not written"
        );
    }
    Ok(())
}
