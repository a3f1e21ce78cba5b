pub mod findings_client;
pub mod postgres;
pub mod sqlite;

use async_trait::async_trait;

use crate::config::{StoreParams, StoreType};
use crate::error::StoreError;
use crate::finding::{Finding, InstanceId, VulnerabilityFinding};

pub use findings_client::FindingsClient;
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

/// Optional paging for [`Storer::read`]. Pages are zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOpts {
    pub page: u32,
    pub page_size: u32,
}

impl QueryOpts {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self { page, page_size }
    }

    pub(crate) fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.page_size)
    }

    /// Offset as a SQL integer; `None` past `i64::MAX`, where no rows can exist.
    pub(crate) fn sql_offset(&self) -> Option<i64> {
        i64::try_from(self.offset()).ok()
    }
}

/// Instance-scoped finding repository shared by every component of a pipeline.
///
/// Operations do not take a cancellation handle: the runner aborts an
/// in-flight call by dropping its future, and every backend leaves the store
/// consistent when that happens (writes and updates are transactional).
#[async_trait]
pub trait Storer: Send + Sync {
    /// Checks the shape a finding must have to be accepted by `write` or
    /// `update`.
    fn validate(&self, finding: &Finding) -> Result<(), StoreError> {
        finding.validate()
    }

    /// Findings of `instance_id` in insertion order.
    ///
    /// Returns [`StoreError::NoFindingsFound`] when the instance (or the
    /// requested page) holds none.
    async fn read(
        &self,
        instance_id: InstanceId,
        opts: Option<QueryOpts>,
    ) -> Result<Vec<VulnerabilityFinding>, StoreError>;

    /// Appends `findings` to the instance. All or nothing.
    async fn write(&self, instance_id: InstanceId, findings: &[Finding]) -> Result<(), StoreError>;

    /// Replaces findings matched by id; findings without an id are appended.
    /// An unknown id fails the whole call with [`StoreError::FindingNotFound`].
    async fn update(
        &self,
        instance_id: InstanceId,
        findings: &[VulnerabilityFinding],
    ) -> Result<(), StoreError>;

    /// Releases the backend. Safe to call repeatedly.
    async fn close(&self) -> Result<(), StoreError>;
}

/// Opens the backend selected by `store_type`.
pub async fn open(store_type: StoreType, params: &StoreParams) -> Result<Box<dyn Storer>, StoreError> {
    let store: Box<dyn Storer> = match store_type {
        StoreType::Sqlite => Box::new(SqliteStore::open(&params.sqlite_path).await?),
        StoreType::Postgresql => {
            let dsn = params.postgres_dsn.as_deref().unwrap_or_default();
            Box::new(PostgresStore::connect(dsn, params.postgres_max_connections).await?)
        }
        StoreType::FindingsClient => Box::new(FindingsClient::new(
            &params.findings_service_addr,
            params.page_size,
        )?),
    };
    Ok(store)
}
