use tracing::debug;

use crate::component::Enricher;
use crate::config::RunnerOptions;
use crate::context::{ComponentType, RunContext};
use crate::error::ComponentError;
use crate::logging::{KEY_NUM_ENRICHED_FINDINGS, KEY_NUM_PARSED_FINDINGS};

/// Reads the instance's findings, hands them to `enricher.annotate` and writes
/// the result back. An empty store is a read failure here.
pub async fn run_enricher<E>(enricher: &E, options: RunnerOptions) -> Result<(), ComponentError>
where
    E: Enricher + ?Sized,
{
    let ctx = RunContext::initialise(ComponentType::Enricher, options).await?;
    let result = ctx.guarded(enrich(&ctx, enricher)).await;
    ctx.finish(result).await
}

async fn enrich<E>(ctx: &RunContext, enricher: &E) -> Result<(), ComponentError>
where
    E: Enricher + ?Sized,
{
    let store = ctx.require_store().map_err(ComponentError::StoreReadFailed)?;
    let findings = store
        .read(ctx.instance_id(), None)
        .await
        .map_err(ComponentError::StoreReadFailed)?;
    ctx.record_count(KEY_NUM_PARSED_FINDINGS, findings.len());

    let enriched = enricher
        .annotate(ctx, findings)
        .await
        .map_err(ComponentError::EnrichFailed)?;
    ctx.record_count(KEY_NUM_ENRICHED_FINDINGS, enriched.len());

    store
        .update(ctx.instance_id(), &enriched)
        .await
        .map_err(ComponentError::StoreUpdateFailed)?;
    debug!(count = enriched.len(), "updated enriched findings");
    Ok(())
}
