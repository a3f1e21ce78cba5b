use crate::component::Target;
use crate::config::RunnerOptions;
use crate::context::{ComponentType, RunContext};
use crate::error::ComponentError;

/// Runs `target.prepare`. The store is not opened unless the options ask for
/// it explicitly.
pub async fn run_target<T>(target: &T, options: RunnerOptions) -> Result<(), ComponentError>
where
    T: Target + ?Sized,
{
    let ctx = RunContext::initialise(ComponentType::Target, options).await?;
    let result = ctx.guarded(prepare(&ctx, target)).await;
    ctx.finish(result).await
}

async fn prepare<T>(ctx: &RunContext, target: &T) -> Result<(), ComponentError>
where
    T: Target + ?Sized,
{
    target
        .prepare(ctx)
        .await
        .map_err(ComponentError::TargetPrepareFailed)
}
