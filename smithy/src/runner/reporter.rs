use tracing::debug;

use crate::component::Reporter;
use crate::config::RunnerOptions;
use crate::context::{ComponentType, RunContext};
use crate::error::ComponentError;
use crate::logging::KEY_NUM_PARSED_FINDINGS;

/// Reads the instance's findings and hands them to `reporter.report`.
///
/// With no findings the reporter is skipped unless
/// `run_reporters_without_findings` is set, in which case it receives `[]`.
pub async fn run_reporter<R>(reporter: &R, options: RunnerOptions) -> Result<(), ComponentError>
where
    R: Reporter + ?Sized,
{
    let ctx = RunContext::initialise(ComponentType::Reporter, options).await?;
    let result = ctx.guarded(report(&ctx, reporter)).await;
    ctx.finish(result).await
}

async fn report<R>(ctx: &RunContext, reporter: &R) -> Result<(), ComponentError>
where
    R: Reporter + ?Sized,
{
    let store = ctx.require_store().map_err(ComponentError::StoreReadFailed)?;
    let findings = match store.read(ctx.instance_id(), None).await {
        Ok(findings) => findings,
        Err(err) if err.is_no_findings() => Vec::new(),
        Err(err) => return Err(ComponentError::StoreReadFailed(err)),
    };
    ctx.record_count(KEY_NUM_PARSED_FINDINGS, findings.len());

    if findings.is_empty() && !ctx.config().run_reporters_without_findings() {
        debug!("no findings found, skipping reporter step...");
        return Ok(());
    }

    reporter
        .report(ctx, &findings)
        .await
        .map_err(ComponentError::ReportFailed)
}
