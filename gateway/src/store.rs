//! Read-only access to the reference data the request identifiers are checked against.

use crate::config::StoreConfig;
use async_trait::async_trait;
use deadpool_postgres::{CreatePoolError, Pool, PoolConfig, PoolError, Runtime};
use tokio_postgres::NoTls;

const KNOWN_AREA_KEYS: &str = "SELECT key FROM shapes WHERE key = ANY($1)";
const KNOWN_CONSUMER_GROUPS: &str =
    "SELECT parameter FROM consumer_groups WHERE parameter = ANY($1)";
const ALL_CONSUMER_GROUPS: &str = "SELECT DISTINCT parameter FROM consumer_groups";

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("could not create connection pool: {0}")]
    CreatePool(#[from] CreatePoolError),
    #[error("could not get a connection: {0}")]
    Pool(#[from] PoolError),
    #[error("query failed: {0}")]
    Query(#[from] tokio_postgres::Error),
}

/// Set-membership lookups against the known area keys and consumer groups.
///
/// Each lookup is a single batched query. Implementations return the subset of
/// the supplied values that exist, without duplicates.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    async fn known_area_keys(&self, keys: &[String]) -> Result<Vec<String>, StoreError>;

    async fn known_consumer_groups(&self, groups: &[String]) -> Result<Vec<String>, StoreError>;

    async fn all_consumer_groups(&self) -> Result<Vec<String>, StoreError>;
}

pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    /// Creates the connection pool. Connections are opened lazily on first use.
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let mut pg_config = deadpool_postgres::Config::new();
        pg_config.url = Some(config.url.to_string());
        pg_config.pool = Some(PoolConfig::new(config.max_connections));

        let pool = pg_config.create_pool(Some(Runtime::Tokio1), NoTls)?;
        Ok(PostgresStore { pool })
    }

    /// Opens one connection so a misconfigured store fails at startup.
    pub async fn check_connection(&self) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    async fn query_strings(
        &self,
        statement: &str,
        values: Option<&[String]>,
    ) -> Result<Vec<String>, StoreError> {
        let client = self.pool.get().await?;
        let statement = client.prepare_cached(statement).await?;

        let rows = match values {
            Some(values) => client.query(&statement, &[&values]).await?,
            None => client.query(&statement, &[]).await?,
        };

        rows.iter()
            .map(|row| row.try_get::<_, String>(0).map_err(StoreError::from))
            .collect()
    }
}

#[async_trait]
impl ReferenceStore for PostgresStore {
    async fn known_area_keys(&self, keys: &[String]) -> Result<Vec<String>, StoreError> {
        self.query_strings(KNOWN_AREA_KEYS, Some(keys)).await
    }

    async fn known_consumer_groups(&self, groups: &[String]) -> Result<Vec<String>, StoreError> {
        self.query_strings(KNOWN_CONSUMER_GROUPS, Some(groups)).await
    }

    async fn all_consumer_groups(&self) -> Result<Vec<String>, StoreError> {
        self.query_strings(ALL_CONSUMER_GROUPS, None).await
    }
}
