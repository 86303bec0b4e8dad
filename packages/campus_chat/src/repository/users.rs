use anyhow::{Context, Result};
use sqlx::Row;

use crate::models::User;

use super::ChatRepository;

impl ChatRepository {
    /// Create or rename a directory entry. Returns the stored row.
    pub async fn upsert_user(&self, id: &str, display_name: &str) -> Result<User> {
        let now = chrono::Utc::now().timestamp();
        let row = sqlx::query(
            r#"
            INSERT INTO users (id, display_name, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                updated_at = excluded.updated_at
            RETURNING id, display_name, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(display_name)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert user {}", id))?;

        Ok(User {
            id: row.get("id"),
            display_name: row.get("display_name"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, display_name, created_at, updated_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| User {
            id: r.get("id"),
            display_name: r.get("display_name"),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        }))
    }
}
