//! Persistence for the ledger, appetites, breaches and simulation records.

mod memory;
mod postgres;
mod traits;

pub use memory::InMemoryStorage;
pub use postgres::PostgresStorage;
pub use traits::*;

use crate::error::AppetiteResult;
use std::sync::Arc;

/// Persistence backend configuration.
#[derive(Debug, Clone, Default)]
pub enum StorageConfig {
    /// Keep everything in process memory only.
    #[default]
    Memory,
    /// Persist in PostgreSQL, creating the schema on startup.
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres {
            database_url: database_url.into(),
            max_connections,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }

    pub async fn bootstrap(&self) -> AppetiteResult<Arc<dyn Storage>> {
        match self {
            Self::Memory => Ok(Arc::new(InMemoryStorage::new())),
            Self::Postgres {
                database_url,
                max_connections,
            } => {
                let storage = PostgresStorage::connect(database_url, *max_connections).await?;
                storage.ensure_schema().await?;
                Ok(Arc::new(storage))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_config_bootstraps_empty_store() {
        let config = StorageConfig::default();
        assert_eq!(config.label(), "memory");
        let storage = config.bootstrap().await.unwrap();
        assert_eq!(storage.count_observations("t1").await.unwrap(), 0);
        assert!(storage.tenants_with_active_appetite().await.unwrap().is_empty());
    }

    #[test]
    fn postgres_label() {
        assert_eq!(
            StorageConfig::postgres("postgres://localhost/appetite", 5).label(),
            "postgres"
        );
    }
}
