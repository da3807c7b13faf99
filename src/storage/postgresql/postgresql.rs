use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction, postgres::PgConnectOptions};
use std::str::FromStr;

use crate::datamodel::{MetricLabelsExt, MetricValueRow, PersistedMetric};
use crate::storage::{StorageError, StorageInstance, UPSERT_CHUNK_SIZE};

#[derive(Debug)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub async fn connect(connection_string: &str) -> Result<Self> {
        let connect_options = PgConnectOptions::from_str(connection_string)
            .context("Failed to create postgres connection options")?;

        let pool = PgPool::connect_with(connect_options)
            .await
            .context("Failed to create postgres pool")?;

        Ok(Self { pool })
    }

    async fn upsert_chunk(
        transaction: &mut Transaction<'_, Postgres>,
        chunk: &[PersistedMetric],
    ) -> Result<(), StorageError> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO metric_values (tenant_id, metric_name, metric_type, value, labels, updated_at) ",
        );
        builder.push_values(chunk, |mut row, record| {
            row.push_bind(record.tenant_id.clone())
                .push_bind(record.metric_name.clone())
                .push_bind(record.metric_type.as_str())
                .push_bind(record.value)
                .push_bind(record.labels.to_json())
                .push("CURRENT_TIMESTAMP");
        });
        builder.push(
            " ON CONFLICT (tenant_id, metric_name, labels) DO UPDATE SET \
             value = EXCLUDED.value, \
             metric_type = EXCLUDED.metric_type, \
             updated_at = EXCLUDED.updated_at",
        );
        builder.build().execute(&mut **transaction).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageInstance for PostgresStorage {
    async fn create_or_migrate(&self) -> Result<()> {
        sqlx::migrate!("src/storage/postgresql/migrations")
            .run(&self.pool)
            .await
            .context("Failed to migrate database")?;

        Ok(())
    }

    async fn upsert_metric_values(&self, records: &[PersistedMetric]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut transaction = self.pool.begin().await?;
        for chunk in records.chunks(UPSERT_CHUNK_SIZE) {
            Self::upsert_chunk(&mut transaction, chunk)
                .await
                .context("Failed to upsert metric values")?;
        }
        transaction.commit().await?;
        Ok(())
    }

    async fn load_metric_values(&self) -> Result<Vec<MetricValueRow>> {
        let rows = sqlx::query_as::<_, MetricValueRow>(
            r#"
            SELECT tenant_id, metric_name, metric_type, value, labels
            FROM metric_values
            ORDER BY tenant_id, metric_name, labels
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load metric values")?;
        Ok(rows)
    }

    async fn delete_tenant(&self, tenant_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM metric_values WHERE tenant_id = $1")
            .bind(tenant_id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> Result<()> {
        let one: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::from)?;
        if one != 1 {
            return Err(StorageError::operation_failed("health_check", "unexpected result").into());
        }
        Ok(())
    }
}
