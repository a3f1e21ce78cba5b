use tracing::{debug, error};

use crate::component::Scanner;
use crate::config::RunnerOptions;
use crate::context::{ComponentType, RunContext};
use crate::error::ComponentError;
use crate::logging::KEY_NUM_RAW_FINDINGS;

/// Runs `scanner.transform`, validates every raw finding and persists the
/// batch. Nothing is written unless every finding is valid.
pub async fn run_scanner<S>(scanner: &S, options: RunnerOptions) -> Result<(), ComponentError>
where
    S: Scanner + ?Sized,
{
    let ctx = RunContext::initialise(ComponentType::Scanner, options).await?;
    let result = ctx.guarded(scan(&ctx, scanner)).await;
    ctx.finish(result).await
}

async fn scan<S>(ctx: &RunContext, scanner: &S) -> Result<(), ComponentError>
where
    S: Scanner + ?Sized,
{
    let raw_findings = scanner
        .transform(ctx)
        .await
        .map_err(ComponentError::ScanTransformFailed)?;
    ctx.record_count(KEY_NUM_RAW_FINDINGS, raw_findings.len());

    if raw_findings.is_empty() {
        debug!("no raw findings found, skipping persisting step...");
        return Ok(());
    }

    let store = ctx.require_store().map_err(ComponentError::StoreWriteFailed)?;
    for finding in &raw_findings {
        if let Err(err) = store.validate(finding) {
            error!(
                raw_finding = %finding.to_canonical_json().unwrap_or_default(),
                error = %err,
                "invalid raw finding"
            );
            return Err(ComponentError::InvalidFinding(err));
        }
    }

    store
        .write(ctx.instance_id(), &raw_findings)
        .await
        .map_err(ComponentError::StoreWriteFailed)?;
    debug!(count = raw_findings.len(), "persisted raw findings");
    Ok(())
}
