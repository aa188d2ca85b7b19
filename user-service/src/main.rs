use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use diesel_migrations::{embed_migrations, EmbeddedMigrations};
use tracing::info;

use user_service::api::{self, AppState};
use user_service::config::Args;
use user_service::{Ledger, PgBalanceStore};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> Result<()> {
    shared::telemetry::init("user-service");
    let args = Args::parse();

    let pool = shared::db::connect(&args.database_url, MIGRATIONS).await?;
    let ledger = Ledger::new(Arc::new(PgBalanceStore::new(pool)));

    let app = api::create_router(AppState { ledger });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;
    info!("User service web server started on port {}", args.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shared::shutdown::signal())
        .await?;

    info!("User service stopped");
    Ok(())
}
