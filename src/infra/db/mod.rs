//! Postgres-backed document store.

mod documents;
mod util;

pub use util::map_sqlx_error;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::{
    postgres::{PgConnectOptions, PgPool, PgPoolOptions},
    query,
};

use crate::domain::schema::CollectionSchema;

/// JSONB documents of one collection in the `documents` table.
#[derive(Clone)]
pub struct PostgresDocumentStore {
    pool: Arc<PgPool>,
    collection: String,
    schema: CollectionSchema,
}

impl PostgresDocumentStore {
    pub fn new(pool: PgPool, collection: impl Into<String>, schema: CollectionSchema) -> Self {
        Self {
            pool: Arc::new(pool),
            collection: collection.into(),
            schema,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Connect a pool whose sessions cancel any statement running longer than
    /// `statement_timeout`.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        statement_timeout: Duration,
    ) -> Result<PgPool, sqlx::Error> {
        let options = PgConnectOptions::from_str(url)?.options([(
            "statement_timeout",
            statement_timeout.as_millis().to_string(),
        )]);
        PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(statement_timeout)
            .connect_with(options)
            .await
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }
}
