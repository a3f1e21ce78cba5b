use async_trait::async_trait;

use crate::context::RunContext;
use crate::finding::{Finding, VulnerabilityFinding};

/// Provisions whatever the pipeline scans, e.g. clones a repository.
#[async_trait]
pub trait Target: Send + Sync {
    async fn prepare(&self, ctx: &RunContext) -> anyhow::Result<()>;
}

/// Turns a tool's raw output into findings.
#[async_trait]
pub trait Scanner: Send + Sync {
    async fn transform(&self, ctx: &RunContext) -> anyhow::Result<Vec<Finding>>;
}

/// Annotates stored findings. The returned list may be longer than the input;
/// findings without an id are added to the store.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn annotate(
        &self,
        ctx: &RunContext,
        findings: Vec<VulnerabilityFinding>,
    ) -> anyhow::Result<Vec<VulnerabilityFinding>>;
}

/// Narrows stored findings by some criteria.
///
/// Returns `None` when nothing was filtered out, in which case the store is
/// left untouched. Otherwise the returned findings are written back with
/// [`Storer::update`](crate::store::Storer::update); stored findings missing
/// from the list keep their current details.
#[async_trait]
pub trait Filter: Send + Sync {
    async fn filter(
        &self,
        ctx: &RunContext,
        findings: Vec<VulnerabilityFinding>,
    ) -> anyhow::Result<Option<Vec<VulnerabilityFinding>>>;
}

/// Emits findings to some sink.
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report(&self, ctx: &RunContext, findings: &[VulnerabilityFinding]) -> anyhow::Result<()>;
}
