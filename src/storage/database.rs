// Database connection and pool management

use serde::{Deserialize, Serialize};
use sqlx::{migrate::MigrateDatabase, Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::domain::{PharmaOpsError, Result};

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL: "sqlite://path/to/db.db" or "sqlite::memory:"
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Run migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_run_migrations() -> bool {
    true
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: default_max_connections(),
            connection_timeout_secs: default_connection_timeout(),
            run_migrations: default_run_migrations(),
        }
    }
}

impl DatabaseConfig {
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            url: format!("sqlite://{}", path.into()),
            ..Default::default()
        }
    }

    pub fn sqlite_memory() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(PharmaOpsError::config("database URL cannot be empty"));
        }
        if self.max_connections == 0 {
            return Err(PharmaOpsError::config(
                "max connections must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// SQLite connection pool manager
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        config.validate()?;

        info!("Creating SQLite connection pool: {}", config.url);

        if !config.url.contains(":memory:") && !Sqlite::database_exists(&config.url).await? {
            info!("Creating SQLite database: {}", config.url);
            Sqlite::create_database(&config.url).await?;
        }

        let options = sqlx::sqlite::SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(config.connection_timeout_secs))
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        let database = Self { pool };

        if config.run_migrations {
            database.run_migrations().await?;
        }

        info!("SQLite pool created successfully");
        Ok(database)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running SQLite migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| PharmaOpsError::persistence(format!("migration failed: {e}")))?;
        info!("Migrations completed successfully");
        Ok(())
    }

    /// Verify the schema matches the expected tables; used at startup to
    /// surface a schema mismatch as a dedicated exit code.
    pub async fn check_schema(&self) -> Result<()> {
        for table in [
            "drugs",
            "price_records",
            "drug_aliases",
            "watch_list",
            "crawl_tasks",
            "monitor_rules",
            "alerts",
        ] {
            let present: Option<(String,)> = sqlx::query_as(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
            )
            .bind(table)
            .fetch_optional(&self.pool)
            .await?;

            if present.is_none() {
                return Err(PharmaOpsError::persistence(format!(
                    "schema mismatch: missing table {table}"
                )));
            }
        }
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            connections: self.pool.size(),
            idle_connections: self.pool.num_idle() as u32,
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Pool statistics
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolStats {
    pub connections: u32,
    pub idle_connections: u32,
}
