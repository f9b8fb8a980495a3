use festival_vote::db::Database;
use festival_vote::{tasks, Settings, VotingEngine};
use log::{error, info};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    // Initialize logging
    env_logger::init();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };

    let database = match Database::new(&settings.database_url, settings.max_connections).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            return;
        }
    };
    info!(
        "Voting engine using {} with {:?} voter identity",
        settings.database_url, settings.identity_mode
    );

    let identity = match settings.identity_strategy() {
        Ok(identity) => identity,
        Err(e) => {
            error!("Invalid identity settings: {}", e);
            return;
        }
    };
    let engine = Arc::new(VotingEngine::new(database, identity));

    let closer_engine = Arc::clone(&engine);
    let interval_secs = settings.expiry_check_interval_seconds;
    tokio::spawn(async move {
        tasks::close_expired_groups_task(closer_engine, interval_secs).await;
    });

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down voting engine"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
}
