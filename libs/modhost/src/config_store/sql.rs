use anyhow::Context;
use async_trait::async_trait;
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;

use super::{ConfigStore, ConfigStoreError};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS configs (
    key  TEXT PRIMARY KEY,
    data TEXT NOT NULL
)
"#;

/// `configs(key, data)` table on Postgres or SQLite through the sqlx `Any` driver.
#[derive(Debug, Clone)]
pub struct SqlConfigStore {
    pool: AnyPool,
}

impl SqlConfigStore {
    /// Connect and make sure the `configs` table exists.
    ///
    /// An in-memory SQLite DSN is pinned to one long-lived connection, since
    /// every new connection would open an empty database.
    pub async fn connect(dsn: &str, max_conns: u32) -> anyhow::Result<Self> {
        sqlx::any::install_default_drivers();

        let mut opts = AnyPoolOptions::new().max_connections(max_conns.max(1));
        if dsn.contains(":memory:") {
            opts = opts
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = opts
            .connect(dsn)
            .await
            .context("Failed to connect to the config database")?;

        let store = Self::from_pool(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn from_pool(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .context("Failed to create configs table")?;
        Ok(())
    }
}

fn io(e: sqlx::Error) -> ConfigStoreError {
    ConfigStoreError::Io(e.into())
}

#[async_trait]
impl ConfigStore for SqlConfigStore {
    fn db_pool(&self) -> Option<AnyPool> {
        Some(self.pool.clone())
    }

    async fn init_if_absent(&self, key: &str, data: &str) -> Result<bool, ConfigStoreError> {
        let result = sqlx::query(
            "INSERT INTO configs (key, data) VALUES ($1, $2) ON CONFLICT (key) DO NOTHING",
        )
        .bind(key)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(io)?;
        Ok(result.rows_affected() > 0)
    }

    async fn load(&self, key: &str) -> Result<String, ConfigStoreError> {
        sqlx::query_scalar::<_, String>("SELECT data FROM configs WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(io)?
            .ok_or_else(|| ConfigStoreError::NotFound(key.to_owned()))
    }

    async fn save(&self, key: &str, data: &str) -> Result<(), ConfigStoreError> {
        let result = sqlx::query("UPDATE configs SET data = $1 WHERE key = $2")
            .bind(data)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(io)?;
        if result.rows_affected() == 0 {
            return Err(ConfigStoreError::NotFound(key.to_owned()));
        }
        Ok(())
    }
}
