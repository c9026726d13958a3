use helpdesk_auth::AppResources;
use helpdesk_auth::api::start_webserver;
use helpdesk_auth::config::load_config;
use helpdesk_auth::oauth2::issuer::TokenIssuer;
use helpdesk_auth::oauth2::registry::{self, ClientRegistry};
use migration::{Migrator, MigratorTrait};
use sea_orm::Database;
use std::sync::Arc;
use tokio::time::{Duration, interval};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// How often expired codes and tokens are swept from the database.
const PURGE_INTERVAL: Duration = Duration::from_secs(15 * 60);

fn initialize_tracing() {
    let default_directives = "helpdesk_auth=info,tower_http=info,sea_orm=warn";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = fmt::layer().with_target(true).with_level(true);

    registry.with(layer).init();
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    // A missing .env is fine; real deployments configure through the environment.
    let _ = dotenvy::dotenv();

    initialize_tracing();

    let config = Arc::new(load_config()?);

    let db = Arc::new(Database::connect(&config.database_url).await?);

    if config.run_migrations {
        Migrator::up(db.as_ref(), None).await?;
        tracing::info!("Database migrations applied");
    }

    // Concurrent first starts against an empty database can race here; run a
    // single instance (or the migration job) before scaling out.
    let report = registry::bootstrap(
        db.as_ref(),
        &registry::default_scopes(),
        &registry::default_clients(&config.clients),
    )
    .await?;
    tracing::info!(
        scopes_created = report.scopes_created,
        clients_created = report.clients_created,
        clients_updated = report.clients_updated,
        "Client registry bootstrapped"
    );

    {
        let issuer = TokenIssuer::new(db.clone(), ClientRegistry::new(db.clone()), &config);
        tokio::spawn(async move {
            let mut interval = interval(PURGE_INTERVAL);
            loop {
                interval.tick().await;
                match issuer.purge_expired().await {
                    Ok(0) => {}
                    Ok(removed) => tracing::debug!(removed, "Purged expired grants"),
                    Err(e) => tracing::warn!(error = %e, "Failed to purge expired grants"),
                }
            }
        });
    }

    start_webserver(AppResources { db, config }).await?;
    Ok(())
}
