use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use std::time::Duration;

use crate::datamodel::{MetricLabelsExt, MetricValueRow, PersistedMetric};
use crate::storage::{StorageError, StorageInstance, UPSERT_CHUNK_SIZE};

// SQLite implementation
#[derive(Debug)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub async fn connect(connection_string: &str) -> Result<Self> {
        let in_memory = connection_string.contains(":memory:");

        let mut connect_options = SqliteConnectOptions::from_str(connection_string)
            .context("Failed to create sqlite connection options")?
            // Create the database file if it doesn't exist
            .create_if_missing(true)
            .foreign_keys(false)
            // Set a busy timeout of 5 seconds
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            connect_options = connect_options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to `:memory:` opens its own database, so the pool
        // keeps exactly one connection alive forever.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
        };

        let pool = pool_options
            .connect_with(connect_options)
            .await
            .context("Failed to create sqlite pool")?;

        Ok(Self { pool })
    }

    async fn upsert_chunk(
        transaction: &mut Transaction<'_, Sqlite>,
        chunk: &[PersistedMetric],
    ) -> Result<(), StorageError> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
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
             value = excluded.value, \
             metric_type = excluded.metric_type, \
             updated_at = excluded.updated_at",
        );
        builder.build().execute(&mut **transaction).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageInstance for SqliteStorage {
    async fn create_or_migrate(&self) -> Result<()> {
        sqlx::migrate!("src/storage/sqlite/migrations")
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
        let result = sqlx::query("DELETE FROM metric_values WHERE tenant_id = ?")
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
