use tracing::debug;

use crate::component::Filter;
use crate::config::RunnerOptions;
use crate::context::{ComponentType, RunContext};
use crate::error::ComponentError;
use crate::logging::{KEY_NUM_FILTERED_FINDINGS, KEY_NUM_PARSED_FINDINGS};

/// Reads the instance's findings, hands them to `filter.filter` and writes the
/// kept findings back. Skips the update when the filter reports no change.
pub async fn run_filter<F>(filter: &F, options: RunnerOptions) -> Result<(), ComponentError>
where
    F: Filter + ?Sized,
{
    let ctx = RunContext::initialise(ComponentType::Filter, options).await?;
    let result = ctx.guarded(apply(&ctx, filter)).await;
    ctx.finish(result).await
}

async fn apply<F>(ctx: &RunContext, filter: &F) -> Result<(), ComponentError>
where
    F: Filter + ?Sized,
{
    let store = ctx.require_store().map_err(ComponentError::StoreReadFailed)?;
    let findings = store
        .read(ctx.instance_id(), None)
        .await
        .map_err(ComponentError::StoreReadFailed)?;
    ctx.record_count(KEY_NUM_PARSED_FINDINGS, findings.len());

    let Some(kept) = filter
        .filter(ctx, findings)
        .await
        .map_err(ComponentError::FilterFailed)?
    else {
        debug!("no findings were filtered, skipping update step...");
        return Ok(());
    };
    ctx.record_count(KEY_NUM_FILTERED_FINDINGS, kept.len());

    store
        .update(ctx.instance_id(), &kept)
        .await
        .map_err(ComponentError::StoreUpdateFailed)?;
    debug!(count = kept.len(), "updated filtered findings");
    Ok(())
}
