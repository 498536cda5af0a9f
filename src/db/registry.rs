use std::future::Future;

use sqlx::PgPool;

use crate::db::namespace::{Namespace, TableName};
use crate::error::IngestError;

const ALLOCATION_ATTEMPTS: u32 = 4;

/// Who owns which namespace, and how big its tables are.
pub trait TenantRegistry {
    /// Allocates a fresh namespace token for `owner_id` and records it under `display_name`.
    fn create(
        &self,
        owner_id: i64,
        display_name: &str,
    ) -> impl Future<Output = Result<Namespace, IngestError>> + Send;

    /// Fails if `namespace` was never allocated by this registry.
    fn record_table_stats(
        &self,
        namespace: &Namespace,
        table: TableName,
        row_count: i64,
    ) -> impl Future<Output = Result<(), IngestError>> + Send;
}

/// [`TenantRegistry`] over the migrated `projects` and `project_tables` tables.
#[derive(Clone, Debug)]
pub struct PgTenantRegistry {
    db: PgPool,
}

impl PgTenantRegistry {
    #[must_use]
    pub fn new(db: PgPool) -> Self {
        PgTenantRegistry { db }
    }

    /// # Errors
    ///
    /// Returns [`IngestError::Registry`] if the lookup fails.
    pub async fn display_name(&self, namespace: &Namespace) -> Result<Option<String>, IngestError> {
        sqlx::query_scalar("SELECT display_name FROM projects WHERE schema_name = $1")
            .bind(namespace.as_str())
            .fetch_optional(&self.db)
            .await
            .map_err(IngestError::Registry)
    }

    /// # Errors
    ///
    /// Returns [`IngestError::Registry`] if the lookup fails.
    pub async fn table_stats(
        &self,
        namespace: &Namespace,
        table: TableName,
    ) -> Result<Option<i64>, IngestError> {
        sqlx::query_scalar(
            "SELECT pt.row_count FROM project_tables pt
             JOIN projects p ON p.id = pt.project_id
             WHERE p.schema_name = $1 AND pt.table_name = $2",
        )
        .bind(namespace.as_str())
        .bind(table.as_str())
        .fetch_optional(&self.db)
        .await
        .map_err(IngestError::Registry)
    }
}

impl TenantRegistry for PgTenantRegistry {
    async fn create(&self, owner_id: i64, display_name: &str) -> Result<Namespace, IngestError> {
        let mut attempt = 1;
        loop {
            let namespace = Namespace::generate();
            let inserted = sqlx::query(
                "INSERT INTO projects (owner_id, display_name, schema_name)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (schema_name) DO NOTHING",
            )
            .bind(owner_id)
            .bind(display_name)
            .bind(namespace.as_str())
            .execute(&self.db)
            .await
            .map_err(IngestError::Registry)?
            .rows_affected();

            if inserted == 1 {
                tracing::info!(owner_id, %namespace, "Allocated namespace");
                return Ok(namespace);
            }
            if attempt >= ALLOCATION_ATTEMPTS {
                return Err(IngestError::Registry(sqlx::Error::Protocol(
                    "could not allocate a unique namespace token".to_string(),
                )));
            }
            tracing::warn!(%namespace, attempt, "Namespace token collision, drawing another");
            attempt += 1;
        }
    }

    async fn record_table_stats(
        &self,
        namespace: &Namespace,
        table: TableName,
        row_count: i64,
    ) -> Result<(), IngestError> {
        let recorded = sqlx::query(
            "INSERT INTO project_tables (project_id, table_name, row_count)
             SELECT id, $2, $3 FROM projects WHERE schema_name = $1
             ON CONFLICT (project_id, table_name)
             DO UPDATE SET row_count = EXCLUDED.row_count, updated_at = now()",
        )
        .bind(namespace.as_str())
        .bind(table.as_str())
        .bind(row_count)
        .execute(&self.db)
        .await
        .map_err(IngestError::Registry)?
        .rows_affected();

        // the SELECT finds nothing for a namespace that was never registered
        if recorded == 0 {
            return Err(IngestError::Registry(sqlx::Error::RowNotFound));
        }
        Ok(())
    }
}
