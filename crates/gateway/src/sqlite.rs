//! SQLite implementation of the store seam.

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use {
    argon2::{
        Argon2, PasswordHasher,
        password_hash::{SaltString, rand_core::OsRng},
    },
    async_trait::async_trait,
    secrecy::{ExposeSecret, Secret},
    sqlx::{SqlitePool, sqlite::SqlitePoolOptions},
    tracing::debug,
};

use crate::{
    error::StoreError,
    store::{AdminSeed, SeedOutcome, Store, StoreConnector},
};

const ACCOUNTS_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS accounts (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    email         TEXT    NOT NULL UNIQUE,
    password_hash TEXT    NOT NULL,
    role          TEXT    NOT NULL,
    created_at    INTEGER NOT NULL
)";

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Argon2 PHC hash, computed off the async workers.
async fn hash_password(password: Secret<String>) -> Result<String, StoreError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.expose_secret().as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| StoreError::PasswordHash(e.to_string()))
    })
    .await
    .map_err(|e| StoreError::PasswordHash(e.to_string()))?
}

/// Opens a pool against a `sqlite:` URL and makes sure the accounts table
/// exists.
pub struct SqliteConnector {
    url: String,
    max_connections: u32,
}

impl SqliteConnector {
    pub fn new(url: impl Into<String>, max_connections: u32) -> Self {
        Self {
            url: url.into(),
            max_connections: max_connections.max(1),
        }
    }
}

#[async_trait]
impl StoreConnector for SqliteConnector {
    fn describe(&self) -> String {
        // Drop query parameters; they can carry options we do not want in logs.
        let path = self.url.split('?').next().unwrap_or_default();
        format!("sqlite ({path})")
    }

    async fn connect(&self) -> Result<Arc<dyn Store>, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.url)
            .await?;
        sqlx::query(ACCOUNTS_SCHEMA).execute(&pool).await?;
        debug!(store = %self.describe(), "accounts schema ready");
        Ok(Arc::new(SqliteStore { pool }))
    }
}

pub struct SqliteStore {
    pool: SqlitePool,
}

#[async_trait]
impl Store for SqliteStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn seed_admin(&self, admin: &AdminSeed) -> Result<SeedOutcome, StoreError> {
        let hash = hash_password(Secret::new(admin.password.expose_secret().clone())).await?;

        let result = sqlx::query(
            "INSERT INTO accounts (email, password_hash, role, created_at)
             VALUES (?, ?, 'admin', ?)
             ON CONFLICT(email) DO NOTHING",
        )
        .bind(admin.email.as_str())
        .bind(hash.as_str())
        .bind(now_ms())
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 0 {
            SeedOutcome::AlreadyExists
        } else {
            SeedOutcome::Created
        })
    }
}
