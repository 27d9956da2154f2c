use crate::config::AppConfig;
use crate::errors::ServiceError;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use sea_orm_migration::MigratorTrait;
use std::time::Duration;
use tracing::info;

/// Type alias for the shared connection pool.
pub type DbPool = DatabaseConnection;

/// Establishes the database connection pool from the application config.
pub async fn establish_connection(config: &AppConfig) -> Result<DbPool, ServiceError> {
    let mut opts = ConnectOptions::new(config.database_url.clone());
    opts.max_connections(config.db_max_connections)
        .min_connections(config.db_min_connections)
        .connect_timeout(Duration::from_secs(config.db_connect_timeout_secs))
        .acquire_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(600))
        .sqlx_logging(false);

    let pool = Database::connect(opts).await?;
    info!(
        backend = ?pool.get_database_backend(),
        max_connections = config.db_max_connections,
        "database connection established"
    );
    Ok(pool)
}

/// Runs the embedded migrations to the latest version.
pub async fn run_migrations(pool: &DbPool) -> Result<(), ServiceError> {
    info!("running database migrations");
    crate::migrator::Migrator::up(pool, None).await?;
    info!("database migrations complete");
    Ok(())
}

/// Cheap liveness probe used by the health endpoint.
pub async fn check_connection(pool: &DbPool) -> Result<(), ServiceError> {
    pool.execute(Statement::from_string(
        pool.get_database_backend(),
        "SELECT 1".to_owned(),
    ))
    .await?;
    Ok(())
}
