use anyhow::{Context, Result};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::config::{CampusConfig, ServerConfig};

#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(config: &CampusConfig, server_config: &ServerConfig) -> Result<Self> {
        info!("Connecting to database: {}", config.db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(server_config.db_max_connections)
            .min_connections(1)
            .connect(&config.db_url())
            .await
            .with_context(|| format!("Failed to connect to database: {}", config.db_url()))?;

        info!("Running database migrations...");
        self::run_migrations(&pool).await?;

        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA temp_store = MEMORY")
            .execute(&pool)
            .await?;

        info!("Database initialized successfully");

        Ok(Self { pool })
    }

    pub async fn get_stats(&self) -> Result<DbStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM chat_messages) as message_count,
                (SELECT COUNT(*) FROM users) as user_count,
                (SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()) as db_size
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(DbStats {
            messages: row.try_get::<i64, _>("message_count").unwrap_or(0) as u64,
            users: row.try_get::<i64, _>("user_count").unwrap_or(0) as u64,
            database_size_bytes: row.try_get::<i64, _>("db_size").unwrap_or(0) as u64,
        })
    }

    /// Administrative bulk clear of all application data.
    pub async fn clear_all(&self) -> Result<ClearStats> {
        let mut tx = self.pool.begin().await?;

        let messages = sqlx::query("DELETE FROM chat_messages")
            .execute(&mut *tx)
            .await
            .context("Failed to clear chat messages")?
            .rows_affected();
        let users = sqlx::query("DELETE FROM users")
            .execute(&mut *tx)
            .await
            .context("Failed to clear users")?
            .rows_affected();

        tx.commit().await?;

        info!(messages, users, "Cleared all application data");

        Ok(ClearStats {
            messages_deleted: messages,
            users_deleted: users,
        })
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub messages: u64,
    pub users: u64,
    pub database_size_bytes: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ClearStats {
    pub messages_deleted: u64,
    pub users_deleted: u64,
}

/// Current schema version - increment when adding migrations
const SCHEMA_VERSION: i64 = 2;

pub(crate) async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL DEFAULT (unixepoch()),
            description TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    let current_version: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
            .fetch_one(pool)
            .await
            .unwrap_or(0);

    if current_version > SCHEMA_VERSION {
        anyhow::bail!(
            "Database schema version {} is newer than supported version {}. Please upgrade the application.",
            current_version,
            SCHEMA_VERSION
        );
    }

    if current_version == SCHEMA_VERSION {
        info!(
            "Database schema is up to date (version {})",
            current_version
        );
        return Ok(());
    }

    info!(
        "Migrating database from version {} to {}",
        current_version, SCHEMA_VERSION
    );

    // v1: chat log. created_at is unix milliseconds.
    if current_version < 1 {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sender TEXT NOT NULL,
                receiver TEXT NOT NULL,
                message TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chat_pair ON chat_messages(sender, receiver)",
        )
        .execute(pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chat_created_at ON chat_messages(created_at)")
            .execute(pool)
            .await?;

        sqlx::query("INSERT INTO schema_version (version, description) VALUES (1, 'chat messages')")
            .execute(pool)
            .await?;
    }

    // v2: user directory
    if current_version < 2 {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                created_at INTEGER NOT NULL DEFAULT (unixepoch()),
                updated_at INTEGER NOT NULL DEFAULT (unixepoch())
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("INSERT INTO schema_version (version, description) VALUES (2, 'user directory')")
            .execute(pool)
            .await?;
    }

    info!("Database migrated to version {}", SCHEMA_VERSION);
    Ok(())
}
