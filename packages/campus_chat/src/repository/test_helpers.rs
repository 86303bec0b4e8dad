use sqlx::sqlite::SqlitePoolOptions;

/// Create a fresh ChatRepository backed by an in-memory SQLite database.
/// Each call returns an isolated database with all migrations applied.
pub async fn test_repository() -> super::ChatRepository {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool");

    crate::db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    super::ChatRepository::new(pool)
}
