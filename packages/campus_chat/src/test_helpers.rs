use std::sync::Arc;

use crate::AppState;
use crate::chat::ConnectionRegistry;
use crate::config::{FileConfig, ServerConfig};
use crate::db::Database;
use crate::metrics::ServerMetrics;
use crate::repository::ChatRepository;

/// Build a fully-wired `AppState` backed by an in-memory SQLite database.
/// Suitable for handler tests that exercise real SQL queries without I/O.
pub async fn test_app_state() -> AppState {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");

    crate::db::run_migrations(&pool).await.expect("migrations");

    let db = Arc::new(Database { pool: pool.clone() });
    let repository = Arc::new(ChatRepository::new(pool));

    AppState {
        server_config: Arc::new(ServerConfig::from_file(&FileConfig::default())),
        metrics: Arc::new(ServerMetrics::new()),
        db,
        repository,
        registry: Arc::new(ConnectionRegistry::new()),
    }
}
