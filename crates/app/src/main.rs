mod applications;
mod auth;
mod csrf;
mod password;
mod problem;
mod router;
mod seed;
mod session;
mod telemetry;
#[cfg(test)]
mod testing;
mod universities;
mod workflow;

use std::net::SocketAddr;

use chrono::Utc;
use tracing::{info, warn};
use uni_apply_storage::Database;
use uni_apply_util::{load_env_file, sqlite_file_path, AppConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    if let Some(parent) = sqlite_file_path(&config.database_url)
        .as_deref()
        .and_then(|path| path.parent())
        .filter(|parent| !parent.as_os_str().is_empty())
    {
        std::fs::create_dir_all(parent)?;
    }

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;
    info!(stage = "app", database_url = %config.database_url, "database ready");

    let state = router::AppState::new(
        metrics,
        database.clone(),
        router::AuthSettings::from_config(&config),
    );

    if config.admin.uses_default_password() && !config.environment.is_development() {
        warn!(
            stage = "seed",
            email = %config.admin.email,
            "admin account is seeded with the default password; set ADMIN_PASSWORD"
        );
    }
    let report = seed::seed_identity(&database, state.passwords(), &config.admin, Utc::now()).await?;
    info!(
        stage = "seed",
        roles_created = report.roles_created,
        admin_created = report.admin_created,
        "identity seeded"
    );

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
