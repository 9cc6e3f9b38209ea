use quiz_core::model::UserId;
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{conn, id_i64, ser};
use crate::repository::{IdentityDirectory, StorageError};

#[async_trait::async_trait]
impl IdentityDirectory for SqliteRepository {
    async fn username(&self, user_id: UserId) -> Result<Option<String>, StorageError> {
        let row = sqlx::query("SELECT username FROM users WHERE id = ?1")
            .bind(id_i64("user_id", user_id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        row.map(|r| r.try_get::<String, _>("username").map_err(ser))
            .transpose()
    }
}

impl SqliteRepository {
    /// Insert or rename a user.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on write failures.
    pub async fn upsert_user(&self, user_id: UserId, username: &str) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO users (id, username) VALUES (?1, ?2)
            ON CONFLICT(id) DO UPDATE SET username = excluded.username
            ",
        )
        .bind(id_i64("user_id", user_id.value())?)
        .bind(username)
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }
}
