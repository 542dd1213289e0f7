use dotenvy::dotenv;
use skill_escrow::{
    config::{database, settings},
    core::{
        BookingEngine, EscrowReconciler,
        account::ensure_system_account,
        clock::{Clock, SystemClock},
        events::TracingNotifier,
        listing::DbListings,
    },
    errors::{Error, Result},
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; env vars can also be set externally
    dotenv().ok();

    // 3. Load engine settings
    let settings = settings::load_default_settings()
        .inspect_err(|e| error!("Failed to load settings: {}", e))?;

    // 4. Connect and make sure the schema exists
    let database_url = database::get_database_url(&settings);
    let db = database::create_connection(&database_url)
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db).await?;
    info!("Database initialized successfully.");

    // 5. Resolve the escrow account
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let escrow = ensure_system_account(
        &db,
        &settings.escrow.account_handle,
        &settings.escrow.display_name,
        clock.now(),
    )
    .await?;
    info!("Escrow account is {} ({})", escrow.id, escrow.handle);

    let engine = BookingEngine::new(
        db.clone(),
        Arc::new(DbListings::new(db.clone())),
        Arc::new(TracingNotifier),
        clock,
        escrow.id,
    );

    // 6. Run the reconciler until shutdown
    let reconciler = settings.reconciler.enabled.then(|| {
        EscrowReconciler::new(engine, settings.reconciler.grace())
            .spawn(settings.reconciler.interval())
    });
    if reconciler.is_none() {
        info!("Escrow reconciler disabled by settings");
    }

    tokio::signal::ctrl_c().await.map_err(Error::from)?;
    info!("Shutdown requested");

    if let Some(handle) = reconciler {
        handle.stop().await;
    }
    db.close().await?;
    Ok(())
}
