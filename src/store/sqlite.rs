use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};

use async_trait::async_trait;

use super::errors::StoreError;
use super::repository::CredentialRepository;
use super::types::{DeviceType, StoredCredential, User};

/// SQLite-backed repository.
///
/// Uniqueness of usernames and credential ids is enforced by the schema;
/// the counter update is a conditional UPDATE so concurrent authentications
/// cannot both apply against the same read value.
pub struct SqliteRepository {
    pool: Pool<Sqlite>,
}

impl SqliteRepository {
    /// Connect and create the schema if it does not exist.
    ///
    /// `url` is a sqlx SQLite URL, e.g. `sqlite::memory:` or
    /// `sqlite:passkeys.db?mode=rwc`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        // One connection: SQLite serializes writers anyway, and an
        // in-memory database is per-connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await?;
        let repo = Self { pool };
        repo.create_tables().await?;
        Ok(repo)
    }

    pub fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn create_tables(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY NOT NULL,
                username TEXT NOT NULL UNIQUE,
                email TEXT,
                display_name TEXT,
                created_at TIMESTAMP NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS passkey_credentials (
                credential_id TEXT PRIMARY KEY NOT NULL,
                user_id TEXT NOT NULL REFERENCES users(id),
                public_key TEXT NOT NULL,
                sign_count INTEGER NOT NULL DEFAULT 0,
                device_type TEXT NOT NULL,
                backed_up BOOLEAN NOT NULL DEFAULT FALSE,
                transports TEXT NOT NULL DEFAULT '[]',
                user_handle TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn user_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<User, StoreError> {
    Ok(User {
        id: row.try_get("id").map_err(StoreError::from)?,
        username: row.try_get("username").map_err(StoreError::from)?,
        email: row.try_get("email").map_err(StoreError::from)?,
        display_name: row.try_get("display_name").map_err(StoreError::from)?,
        created_at: row
            .try_get::<DateTime<Utc>, _>("created_at")
            .map_err(StoreError::from)?,
    })
}

fn credential_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<StoredCredential, StoreError> {
    let transports_json: String = row.try_get("transports").map_err(StoreError::from)?;
    let transports: Vec<String> = serde_json::from_str(&transports_json)
        .map_err(|e| StoreError::Storage(format!("Invalid transports column: {e}")))?;
    let device_type: String = row.try_get("device_type").map_err(StoreError::from)?;
    let sign_count: i64 = row.try_get("sign_count").map_err(StoreError::from)?;

    Ok(StoredCredential {
        credential_id: row.try_get("credential_id").map_err(StoreError::from)?,
        user_id: row.try_get("user_id").map_err(StoreError::from)?,
        public_key: row.try_get("public_key").map_err(StoreError::from)?,
        sign_count: sign_count as u32,
        device_type: DeviceType::from_str_or_default(&device_type),
        backed_up: row.try_get("backed_up").map_err(StoreError::from)?,
        transports,
        user_handle: row.try_get("user_handle").map_err(StoreError::from)?,
        created_at: row
            .try_get::<DateTime<Utc>, _>("created_at")
            .map_err(StoreError::from)?,
        updated_at: row
            .try_get::<DateTime<Utc>, _>("updated_at")
            .map_err(StoreError::from)?,
    })
}

#[async_trait]
impl CredentialRepository for SqliteRepository {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn list_credentials_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<StoredCredential>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM passkey_credentials WHERE user_id = ? ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(credential_from_row).collect()
    }

    async fn find_credential_by_id(
        &self,
        credential_id: &str,
    ) -> Result<Option<(StoredCredential, User)>, StoreError> {
        let Some(cred_row) = sqlx::query("SELECT * FROM passkey_credentials WHERE credential_id = ?")
            .bind(credential_id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };
        let credential = credential_from_row(&cred_row)?;

        let user_row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(&credential.user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| {
                StoreError::Storage(format!(
                    "Credential {credential_id} references missing user {}",
                    credential.user_id
                ))
            })?;
        let user = user_from_row(&user_row)?;

        Ok(Some((credential, user)))
    }

    async fn insert_user(&self, user: User) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (id, username, email, display_name, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_credential(&self, credential: StoredCredential) -> Result<(), StoreError> {
        let transports_json = serde_json::to_string(&credential.transports)
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO passkey_credentials
                (credential_id, user_id, public_key, sign_count, device_type,
                 backed_up, transports, user_handle, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&credential.credential_id)
        .bind(&credential.user_id)
        .bind(&credential.public_key)
        .bind(credential.sign_count as i64)
        .bind(credential.device_type.as_str())
        .bind(credential.backed_up)
        .bind(&transports_json)
        .bind(&credential.user_handle)
        .bind(credential.created_at)
        .bind(credential.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_user(&self, user_id: &str) -> Result<(), StoreError> {
        // Credentials first so no FK-orphaned rows remain
        sqlx::query("DELETE FROM passkey_credentials WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_credential_counter(
        &self,
        credential_id: &str,
        expected: u32,
        new: u32,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE passkey_credentials
            SET sign_count = ?, updated_at = ?
            WHERE credential_id = ? AND sign_count = ?
            "#,
        )
        .bind(new as i64)
        .bind(Utc::now())
        .bind(credential_id)
        .bind(expected as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
