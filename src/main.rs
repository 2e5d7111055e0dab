use std::sync::Arc;

use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use sea_orm_migration::MigratorTrait;
use uuid::Uuid;

use searchmail::cache::{InMemoryCacheStore, ResultCache};
use searchmail::config::AppConfig;
use searchmail::email::{DbCredentialProvider, GmailImapClient};
use searchmail::orchestrator::SearchOrchestrator;
use searchmail::quota::{InMemoryCounterStore, QuotaLimiter};
use searchmail::retry::RetryCoordinator;
use searchmail::{api, db, migration, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = AppConfig::load()?;
    tracing::info!("searchmail starting...");
    tracing::info!("Server: {}:{}", config.server.host, config.server.port);
    tracing::info!(
        "Quota: {} requests per {} ms, {} retries",
        config.quota.burst_limit,
        config.quota.window_ms,
        config.retry.max_retries
    );

    // Connect to database
    let db = db::connect(&config.database.url).await?;

    // Run migrations
    migration::Migrator::up(&db, None).await?;
    tracing::info!("Database migrations complete");

    if config.bootstrap.is_some() {
        let principal = ensure_bootstrap_principal(&db, &config).await?;
        tracing::info!("Bootstrap principal: {}", principal);
    }

    let cache_config = config.cache_config();
    let limiter = Arc::new(QuotaLimiter::new(
        Arc::new(InMemoryCounterStore::new()),
        config.quota_config(),
    ));
    let cache = Arc::new(ResultCache::new(
        Arc::new(InMemoryCacheStore::new(cache_config.max_entries)),
        cache_config.ttl,
    ));

    let orchestrator = Arc::new(SearchOrchestrator::new(
        config.search,
        limiter.clone(),
        cache.clone(),
        RetryCoordinator::new(config.retry_policy()),
        Arc::new(GmailImapClient::new(config.gmail.search_mailbox.clone())),
        Arc::new(DbCredentialProvider::new(db)),
        config.search_deadline(),
    ));

    // Periodically drop idle quota windows and expired cache entries
    let sweep_interval = config.sweep_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let windows = limiter.sweep_idle().await;
            let entries = cache.purge_expired().await;
            if windows > 0 || entries > 0 {
                tracing::debug!(windows, entries, "Sweep complete");
            }
        }
    });

    // Build router
    let app = api::build_router(AppState { orchestrator });

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("searchmail API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

/// Ensure the configured bootstrap principal exists in the database
async fn ensure_bootstrap_principal(db: &DatabaseConnection, config: &AppConfig) -> anyhow::Result<Uuid> {
    use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
    use searchmail::db::entities::principal;

    let Some(bootstrap) = &config.bootstrap else {
        anyhow::bail!("no bootstrap principal configured");
    };

    // Check if principal already exists
    let existing = principal::Entity::find()
        .filter(principal::Column::Email.eq(&bootstrap.email))
        .one(db)
        .await?;

    if let Some(record) = existing {
        return Ok(record.id);
    }

    let id = Uuid::new_v4();
    let record = principal::ActiveModel {
        id: Set(id),
        provider: Set("gmail".to_string()),
        email: Set(bootstrap.email.clone()),
        imap_host: Set(config.gmail.imap_host.clone()),
        imap_port: Set(i32::from(config.gmail.imap_port)),
        app_password: Set(bootstrap.app_password.clone()),
        active: Set(true),
        created_at: Set(chrono::Utc::now()),
    };

    record.insert(db).await?;
    tracing::info!("Principal '{}' registered", bootstrap.email);

    Ok(id)
}
