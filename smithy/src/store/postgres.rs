use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::debug;

use super::{QueryOpts, Storer};
use crate::error::StoreError;
use crate::finding::{Finding, FindingId, InstanceId, VulnerabilityFinding};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Pooled Postgres backend. Details are kept as `JSONB`.
#[derive(Debug)]
pub struct PostgresStore {
    pool: PgPool,
    closed: AtomicBool,
}

impl PostgresStore {
    pub async fn connect(dsn: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(dsn)
            .await?;
        sqlx::migrate!("./migrations/postgres").run(&pool).await?;

        debug!(max_connections, "connected to postgres store");
        Ok(Self {
            pool,
            closed: AtomicBool::new(false),
        })
    }

    /// Round-trips a trivial query to check the database is reachable.
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.ensure_open()?;
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Storer for PostgresStore {
    async fn read(
        &self,
        instance_id: InstanceId,
        opts: Option<QueryOpts>,
    ) -> Result<Vec<VulnerabilityFinding>, StoreError> {
        self.ensure_open()?;
        let instance = instance_id.to_string();

        let rows: Vec<(i64, String)> = match opts {
            None => {
                sqlx::query_as(
                    "SELECT id, details::text FROM finding WHERE instance_id = $1::uuid ORDER BY id",
                )
                .bind(&instance)
                .fetch_all(&self.pool)
                .await?
            }
            Some(opts) => {
                let Some(offset) = opts.sql_offset() else {
                    return Err(StoreError::NoFindingsFound);
                };
                sqlx::query_as(
                    "SELECT id, details::text FROM finding WHERE instance_id = $1::uuid \
                     ORDER BY id LIMIT $2 OFFSET $3",
                )
                .bind(&instance)
                .bind(i64::from(opts.page_size))
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };

        if rows.is_empty() {
            return Err(StoreError::NoFindingsFound);
        }
        rows.into_iter()
            .map(|(id, details)| {
                let finding = Finding::new(serde_json::from_str(&details)?);
                Ok(VulnerabilityFinding::new(id as FindingId, finding))
            })
            .collect()
    }

    async fn write(&self, instance_id: InstanceId, findings: &[Finding]) -> Result<(), StoreError> {
        self.ensure_open()?;
        for finding in findings {
            self.validate(finding)?;
        }

        let instance = instance_id.to_string();
        let mut tx = self.pool.begin().await?;
        for finding in findings {
            sqlx::query("INSERT INTO finding (instance_id, details) VALUES ($1::uuid, $2::jsonb)")
                .bind(&instance)
                .bind(finding.to_canonical_json()?)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        debug!(instance_id = %instance_id, count = findings.len(), "wrote findings");
        Ok(())
    }

    async fn update(
        &self,
        instance_id: InstanceId,
        findings: &[VulnerabilityFinding],
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        for vf in findings {
            self.validate(&vf.finding)?;
        }

        let instance = instance_id.to_string();
        let mut tx = self.pool.begin().await?;

        for vf in findings {
            let details = vf.finding.to_canonical_json()?;
            match vf.id {
                Some(id) => {
                    let row_id = i64::try_from(id).map_err(|_| StoreError::FindingNotFound(id))?;
                    let result = sqlx::query(
                        "UPDATE finding SET details = $1::jsonb, updated_at = now() \
                         WHERE id = $2 AND instance_id = $3::uuid",
                    )
                    .bind(details)
                    .bind(row_id)
                    .bind(&instance)
                    .execute(&mut *tx)
                    .await?;
                    if result.rows_affected() == 0 {
                        return Err(StoreError::FindingNotFound(id));
                    }
                }
                None => {
                    sqlx::query("INSERT INTO finding (instance_id, details) VALUES ($1::uuid, $2::jsonb)")
                        .bind(&instance)
                        .bind(details)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }
        tx.commit().await?;

        debug!(instance_id = %instance_id, count = findings.len(), "updated findings");
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.pool.close().await;
        }
        Ok(())
    }
}
