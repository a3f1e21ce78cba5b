use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::debug;

use super::{QueryOpts, Storer};
use crate::error::StoreError;
use crate::finding::{Finding, FindingId, InstanceId, VulnerabilityFinding};

const MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Single-file store, the default backend.
#[derive(Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
    path: Option<PathBuf>,
    closed: AtomicBool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path` and applies migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        debug!(path = %path.display(), "opened sqlite store");
        Self::migrate(pool, Some(path.to_path_buf())).await
    }

    /// Private in-memory database, gone once the store is closed.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // every connection would get its own empty database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::migrate(pool, None).await
    }

    async fn migrate(pool: SqlitePool, path: Option<PathBuf>) -> Result<Self, StoreError> {
        sqlx::migrate!("./migrations/sqlite").run(&pool).await?;
        Ok(Self {
            pool,
            path,
            closed: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Closes the store and deletes its backing file.
    pub async fn remove_database(self) -> Result<(), StoreError> {
        self.close().await?;
        if let Some(path) = &self.path {
            std::fs::remove_file(path)?;
            for suffix in ["-wal", "-shm"] {
                let mut sidecar = path.clone().into_os_string();
                sidecar.push(suffix);
                let _ = std::fs::remove_file(sidecar);
            }
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

fn to_vulnerability_finding((id, details): (i64, String)) -> Result<VulnerabilityFinding, StoreError> {
    let finding = Finding::new(serde_json::from_str(&details)?);
    Ok(VulnerabilityFinding::new(id as FindingId, finding))
}

#[async_trait]
impl Storer for SqliteStore {
    async fn read(
        &self,
        instance_id: InstanceId,
        opts: Option<QueryOpts>,
    ) -> Result<Vec<VulnerabilityFinding>, StoreError> {
        self.ensure_open()?;
        let instance = instance_id.to_string();

        let rows: Vec<(i64, String)> = match opts {
            None => {
                sqlx::query_as("SELECT id, details FROM finding WHERE instance_id = ? ORDER BY id")
                    .bind(&instance)
                    .fetch_all(&self.pool)
                    .await?
            }
            Some(opts) => {
                let Some(offset) = opts.sql_offset() else {
                    return Err(StoreError::NoFindingsFound);
                };
                sqlx::query_as(
                    "SELECT id, details FROM finding WHERE instance_id = ? ORDER BY id LIMIT ? OFFSET ?",
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
        rows.into_iter().map(to_vulnerability_finding).collect()
    }

    async fn write(&self, instance_id: InstanceId, findings: &[Finding]) -> Result<(), StoreError> {
        self.ensure_open()?;
        for finding in findings {
            self.validate(finding)?;
        }

        let instance = instance_id.to_string();
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        for finding in findings {
            sqlx::query(
                "INSERT INTO finding (instance_id, details, created_at, updated_at) VALUES (?, ?, ?, ?)",
            )
            .bind(&instance)
            .bind(finding.to_canonical_json()?)
            .bind(&now)
            .bind(&now)
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
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        for vf in findings {
            let details = vf.finding.to_canonical_json()?;
            match vf.id {
                Some(id) => {
                    let row_id = i64::try_from(id).map_err(|_| StoreError::FindingNotFound(id))?;
                    let result = sqlx::query(
                        "UPDATE finding SET details = ?, updated_at = ? WHERE id = ? AND instance_id = ?",
                    )
                    .bind(details)
                    .bind(&now)
                    .bind(row_id)
                    .bind(&instance)
                    .execute(&mut *tx)
                    .await?;
                    if result.rows_affected() == 0 {
                        // dropping `tx` rolls back the rows already touched
                        return Err(StoreError::FindingNotFound(id));
                    }
                }
                None => {
                    sqlx::query(
                        "INSERT INTO finding (instance_id, details, created_at, updated_at) VALUES (?, ?, ?, ?)",
                    )
                    .bind(&instance)
                    .bind(details)
                    .bind(&now)
                    .bind(&now)
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
