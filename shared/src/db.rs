//! Postgres bootstrap shared by the services' stores.

use diesel::{Connection, PgConnection};
use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::pooled_connection::{AsyncDieselConnectionManager, PoolError};
use diesel_async::AsyncPgConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness};
use thiserror::Error;
use tracing::info;

use crate::events::EnvelopeError;

pub type DbPool = Pool<AsyncPgConnection>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database pool error: {0}")]
    Pool(#[from] bb8::RunError<PoolError>),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("failed to encode stored event: {0}")]
    Encode(#[from] EnvelopeError),
}

/// Applies pending migrations, then opens the async connection pool.
pub async fn connect(database_url: &str, migrations: EmbeddedMigrations) -> anyhow::Result<DbPool> {
    info!("Running database migrations...");
    let url = database_url.to_string();
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mut conn = PgConnection::establish(&url)?;
        conn.run_pending_migrations(migrations)
            .map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
        Ok(())
    })
    .await??;
    info!("Migrations completed successfully");

    let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    let pool = Pool::builder().build(config).await?;
    Ok(pool)
}
